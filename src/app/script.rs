use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use super::tracking::UserAction;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScriptAction {
    User(UserAction),
    Fail(String),
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptStep {
    pub(crate) at: Duration,
    pub(crate) action: ScriptAction,
}

/// Parses `<at-seconds> <action> [arg]` lines. Blank lines and `#` comments are skipped.
pub(crate) fn parse_script(raw: &str) -> Result<Vec<ScriptStep>> {
    let mut steps = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.split('#').next().unwrap_or_default().trim();
        if trimmed.is_empty() {
            continue;
        }
        let step = parse_script_line(trimmed).with_context(|| format!("script line {line_no}"))?;
        steps.push(step);
    }
    steps.sort_by_key(|step| step.at);
    Ok(steps)
}

fn parse_script_line(line: &str) -> Result<ScriptStep> {
    let mut parts = line.split_whitespace();
    let at_raw = parts.next().unwrap_or_default();
    let at_seconds = at_raw
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| anyhow!("invalid time `{at_raw}`"))?;
    let verb = parts.next().ok_or_else(|| anyhow!("missing action"))?;
    let rest = parts.collect::<Vec<_>>().join(" ");
    let arg = (!rest.is_empty()).then_some(rest.as_str());

    let action = match (verb, arg) {
        ("play", None) => ScriptAction::User(UserAction::Play),
        ("pause", None) => ScriptAction::User(UserAction::Pause),
        ("toggle", None) => ScriptAction::User(UserAction::TogglePlay),
        ("seek", Some(arg)) => ScriptAction::User(UserAction::Seek(parse_seconds(arg)?)),
        ("skip", Some(window)) => ScriptAction::User(UserAction::Skip(window.to_string())),
        ("skip", None) => ScriptAction::User(UserAction::SkipVisible),
        ("next", None) => ScriptAction::User(UserAction::NextEpisode),
        ("cancel", None) => ScriptAction::User(UserAction::CancelAutoplay),
        ("fail", message) => {
            ScriptAction::Fail(message.unwrap_or("simulated player failure").to_string())
        }
        ("quit", None) => ScriptAction::Quit,
        (verb, Some(arg)) => bail!("unexpected argument `{arg}` for `{verb}`"),
        (verb, None) => bail!("unknown action `{verb}`"),
    };

    Ok(ScriptStep {
        at: Duration::from_secs_f64(at_seconds),
        action,
    })
}

fn parse_seconds(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| anyhow!("invalid seconds `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timed_actions_in_order() {
        let raw = "# warm up\n30 seek 600\n\n5 pause\n6 play  # resume\n40 skip intro\n41 skip\n";
        let steps = parse_script(raw).expect("script should parse");
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].at, Duration::from_secs(5));
        assert_eq!(steps[0].action, ScriptAction::User(UserAction::Pause));
        assert_eq!(
            steps[2].action,
            ScriptAction::User(UserAction::Seek(600.0))
        );
        assert_eq!(
            steps[3].action,
            ScriptAction::User(UserAction::Skip("intro".to_string()))
        );
        assert_eq!(steps[4].action, ScriptAction::User(UserAction::SkipVisible));
    }

    #[test]
    fn parses_fail_with_message_and_quit() {
        let steps = parse_script("1 fail decoder crashed\n2 quit").expect("script should parse");
        assert_eq!(
            steps[0].action,
            ScriptAction::Fail("decoder crashed".to_string())
        );
        assert_eq!(steps[1].action, ScriptAction::Quit);
    }

    #[test]
    fn reports_line_number_for_bad_input() {
        let err = parse_script("1 play\nsoon pause\n").expect_err("bad time should fail");
        let message = format!("{err:#}");
        assert!(message.contains("script line 2"), "unexpected: {message}");
        assert!(message.contains("invalid time"), "unexpected: {message}");

        let err = parse_script("3 rewind").expect_err("unknown verb should fail");
        assert!(format!("{err:#}").contains("unknown action `rewind`"));

        let err = parse_script("3 pause now").expect_err("extra arg should fail");
        assert!(format!("{err:#}").contains("unexpected argument"));
    }
}

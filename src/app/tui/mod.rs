mod render;
mod session;

use std::io;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use super::catalog::Catalog;
use super::describe_event;
use super::player::SimulatedPlayer;
use super::tracking::{
    CheckpointOutcome, ControllerEvent, ProgressStore, UserAction, WatchController,
};

use self::render::draw_watch;
use self::session::TuiSession;

const SEEK_STEP_SECONDS: f64 = 10.0;
const MAX_IDLE_WAIT: Duration = Duration::from_millis(200);

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}

fn status_for_event(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::Checkpoint {
            outcome: CheckpointOutcome::Failed(_),
            ..
        } => status_error(&describe_event(event)),
        _ => status_info(&describe_event(event)),
    }
}

fn key_action(code: KeyCode) -> Option<UserAction> {
    match code {
        KeyCode::Char(' ') => Some(UserAction::TogglePlay),
        KeyCode::Left => Some(UserAction::SeekBy(-SEEK_STEP_SECONDS)),
        KeyCode::Right => Some(UserAction::SeekBy(SEEK_STEP_SECONDS)),
        KeyCode::Char('i') => Some(UserAction::Skip("intro".to_string())),
        KeyCode::Char('r') => Some(UserAction::Skip("recap".to_string())),
        KeyCode::Char('s') => Some(UserAction::SkipVisible),
        KeyCode::Char('n') => Some(UserAction::NextEpisode),
        KeyCode::Char('c') => Some(UserAction::CancelAutoplay),
        _ => None,
    }
}

/// Interactive watch screen; the simulated player runs against the wall clock.
pub(crate) fn run_watch<C, S>(
    mut controller: WatchController<C, S>,
    mut player: SimulatedPlayer,
    episode_id: &str,
) -> Result<()>
where
    C: Catalog,
    S: ProgressStore,
{
    let mut session = TuiSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let mut status = status_info("Loading episode...");
    controller.open(episode_id, &mut player, Instant::now());

    loop {
        let now = Instant::now();
        for event in player.advance(now) {
            controller.handle_player_event(event, &mut player, now);
        }
        controller.poll(&mut player, now);
        if let Some(event) = controller.drain_events().last() {
            status = status_for_event(event);
        }

        let view = controller.view(now);
        terminal.draw(|frame| draw_watch(frame, view.as_ref(), player.media_url(), &status))?;

        let wait = [player.next_deadline(), controller.next_deadline()]
            .into_iter()
            .flatten()
            .min()
            .map_or(MAX_IDLE_WAIT, |deadline| {
                deadline.saturating_duration_since(now).min(MAX_IDLE_WAIT)
            });
        if !event::poll(wait)? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
            break;
        }

        let now = Instant::now();
        if view.as_ref().is_some_and(|view| view.notice.is_some()) {
            controller.handle_action(UserAction::DismissNotice, &mut player, now);
            continue;
        }
        match key_action(key.code) {
            Some(action) => controller.handle_action(action, &mut player, now),
            None => status = status_info("space play/pause  ←/→ seek  i/r/s skip  n next  c cancel  q quit"),
        }
    }

    controller.close(&mut player, Instant::now());
    terminal.show_cursor()?;
    session.leave()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_watch_keys_to_actions() {
        assert_eq!(key_action(KeyCode::Char(' ')), Some(UserAction::TogglePlay));
        assert_eq!(key_action(KeyCode::Left), Some(UserAction::SeekBy(-10.0)));
        assert_eq!(
            key_action(KeyCode::Char('i')),
            Some(UserAction::Skip("intro".to_string()))
        );
        assert_eq!(key_action(KeyCode::Char('x')), None);
    }

    #[test]
    fn failed_checkpoints_surface_as_errors() {
        let event = ControllerEvent::Checkpoint {
            episode_id: "ep-1".to_string(),
            reason: super::super::tracking::CheckpointReason::Pause,
            position_seconds: 60.0,
            completed: false,
            attempt: 2,
            outcome: CheckpointOutcome::Failed("offline".to_string()),
        };
        let status = status_for_event(&event);
        assert!(status.starts_with("ERROR:"), "unexpected status: {status}");
        assert!(status.contains("(retry)"));
    }
}

pub(crate) mod catalog;
pub(crate) mod episode;
mod player;
mod script;
pub(crate) mod tracking;
mod tui;


use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{BackendArgs, Cli, Command};
use crate::config::PlaybackConfig;
use crate::db::Database;
use crate::http::RemoteBackend;
use crate::paths::{catalog_file_path, database_file_path, log_file_path};

use self::catalog::{Catalog, FileCatalog};
use self::episode::{EpisodeResolver, format_clock, format_updated_display, truncate};
use self::player::SimulatedPlayer;
use self::script::{ScriptAction, ScriptStep, parse_script};
use self::tracking::{
    CheckpointOutcome, ControllerEvent, MemoryStore, ProgressRecord, ProgressStore, UiEvent,
    WatchController,
};

const SIMULATION_STEP_LIMIT: usize = 2_000_000;

pub fn run(cli: Cli) -> Result<()> {
    let Cli { backend, command } = cli;
    init_logging(matches!(command, Command::Watch { .. }))?;

    let config = PlaybackConfig::from_env();
    let store = Backend::open(&backend, &config)?;

    match command {
        Command::Watch { episode_id, speed } => {
            let profile = require_profile(&backend)?;
            let controller = WatchController::new(
                EpisodeResolver::new(store.catalog()),
                store.progress(),
                &profile,
                config.clone(),
            );
            let player = SimulatedPlayer::new(config.report_interval, speed);
            tui::run_watch(controller, player, &episode_id)?;
        }
        Command::Simulate {
            episode_id,
            script,
            speed,
            max_episodes,
            ephemeral,
        } => {
            let profile = require_profile(&backend)?;
            let steps = match script {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read script {}", path.display()))?;
                    parse_script(&raw).with_context(|| format!("invalid script {}", path.display()))?
                }
                None => Vec::new(),
            };
            let memory = MemoryStore::new(config.rewind_tolerance_seconds);
            let progress: Box<dyn ProgressStore + '_> = if ephemeral {
                Box::new(&memory)
            } else {
                store.progress()
            };
            let controller = WatchController::new(
                EpisodeResolver::new(store.catalog()),
                progress,
                &profile,
                config.clone(),
            )
            .with_episode_limit(max_episodes);
            let player = SimulatedPlayer::new(config.report_interval, speed);
            run_simulate(controller, player, &episode_id, &steps);

            if ephemeral {
                print_progress(&memory.records());
            }
        }
        Command::Progress => {
            let profile = require_profile(&backend)?;
            run_progress(&store, &profile)?;
        }
        Command::Catalog => run_catalog(&store)?,
    }

    Ok(())
}

enum Backend {
    Local { db: Database, catalog: FileCatalog },
    Remote(RemoteBackend),
}

impl Backend {
    fn open(args: &BackendArgs, config: &PlaybackConfig) -> Result<Self> {
        if let Some(url) = args.remote.as_deref() {
            info!(url, "using remote watch-history backend");
            return Ok(Self::Remote(RemoteBackend::new(url, args.token.clone())));
        }

        let db_path = match &args.db {
            Some(path) => path.clone(),
            None => database_file_path()?,
        };
        let catalog_path = match &args.catalog {
            Some(path) => path.clone(),
            None => catalog_file_path()?,
        };
        let db = Database::open(&db_path, config.rewind_tolerance_seconds)?;
        db.migrate()?;
        let catalog = FileCatalog::new(catalog_path);
        info!(
            db = %db_path.display(),
            catalog = %catalog.path().display(),
            "using local backend"
        );
        Ok(Self::Local { db, catalog })
    }

    fn catalog(&self) -> Box<dyn Catalog + '_> {
        match self {
            Self::Local { catalog, .. } => Box::new(catalog),
            Self::Remote(remote) => Box::new(remote),
        }
    }

    fn progress(&self) -> Box<dyn ProgressStore + '_> {
        match self {
            Self::Local { db, .. } => Box::new(db),
            Self::Remote(remote) => Box::new(remote),
        }
    }

    fn list_progress(&self, profile_id: &str) -> Result<Vec<ProgressRecord>> {
        match self {
            Self::Local { db, .. } => db.list_progress(profile_id),
            Self::Remote(remote) => Ok(remote.list_progress(profile_id)?),
        }
    }
}

fn require_profile(args: &BackendArgs) -> Result<String> {
    args.profile
        .as_deref()
        .map(str::trim)
        .filter(|profile| !profile.is_empty())
        .map(str::to_string)
        .context("a profile is required: pass --profile or set EPWATCH_PROFILE")
}

fn init_logging(to_file: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("epwatch=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    if to_file {
        let path = log_file_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
            .map_err(|err| anyhow!("failed to install logger: {err}"))
    } else {
        builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!("failed to install logger: {err}"))
    }
}

/// Drives a controller on a virtual clock, jumping from one deadline to the next.
fn run_simulate<C, S>(
    mut controller: WatchController<C, S>,
    mut player: SimulatedPlayer,
    episode_id: &str,
    steps: &[ScriptStep],
) where
    C: Catalog,
    S: ProgressStore,
{
    let start = Instant::now();
    let mut now = start;
    let mut next_step = 0;

    controller.open(episode_id, &mut player, now);
    print_events(&mut controller, start, now);

    for _ in 0..SIMULATION_STEP_LIMIT {
        let mut quit = false;
        while let Some(step) = steps.get(next_step)
            && start + step.at <= now
        {
            next_step += 1;
            match &step.action {
                ScriptAction::User(action) => {
                    println!("{} > {action:?}", elapsed_label(start, now));
                    controller.handle_action(action.clone(), &mut player, now);
                }
                ScriptAction::Fail(message) => player.fail(message),
                ScriptAction::Quit => quit = true,
            }
        }
        if quit {
            println!("{} > quit", elapsed_label(start, now));
            break;
        }

        for event in player.advance(now) {
            controller.handle_player_event(event, &mut player, now);
        }
        controller.poll(&mut player, now);
        print_events(&mut controller, start, now);

        let next_script = steps.get(next_step).map(|step| start + step.at);
        let idle = !player.is_playing() && controller.next_deadline().is_none();
        if next_script.is_none() && (controller.is_finished() || idle) {
            break;
        }

        let Some(wake) = [
            player.next_deadline(),
            controller.next_deadline(),
            next_script,
        ]
        .into_iter()
        .flatten()
        .min() else {
            break;
        };
        now = wake.max(now + Duration::from_millis(1));
    }

    if let Some(view) = controller.view(now)
        && let Some(confirmed) = view.last_confirmed
    {
        println!(
            "Last confirmed checkpoint: {} at {}{}",
            view.episode_id,
            format_clock(confirmed.position_seconds),
            if confirmed.completed { " (completed)" } else { "" }
        );
    }
    controller.close(&mut player, now);
    print_events(&mut controller, start, now);
}

fn print_events<C, S>(controller: &mut WatchController<C, S>, start: Instant, now: Instant)
where
    C: Catalog,
    S: ProgressStore,
{
    for event in controller.drain_events() {
        println!("{} {}", elapsed_label(start, now), describe_event(&event));
    }
}

fn elapsed_label(start: Instant, now: Instant) -> String {
    format!("[{:>9}]", format_clock(now.duration_since(start).as_secs_f64()))
}

pub(crate) fn describe_event(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::Opened {
            episode_id,
            resume_offset: Some(offset),
        } => format!("opened {episode_id}, resuming at {}", format_clock(*offset)),
        ControllerEvent::Opened { episode_id, .. } => format!("opened {episode_id}"),
        ControllerEvent::Ui { episode_id, event } => match event {
            UiEvent::StateChanged(state) => format!("{episode_id}: {state}"),
            UiEvent::SkipShown(window) => format!("{episode_id}: skip {window} available"),
            UiEvent::SkipHidden(window) => format!("{episode_id}: skip {window} hidden"),
            UiEvent::AutoplayScheduled {
                next_episode_id,
                delay,
            } => format!(
                "{episode_id}: next episode {next_episode_id} in {}s",
                delay.as_secs()
            ),
            UiEvent::AutoplayCancelled => format!("{episode_id}: autoplay cancelled"),
            UiEvent::Notice(message) => format!("{episode_id}: {message}"),
        },
        ControllerEvent::Checkpoint {
            episode_id,
            reason,
            position_seconds,
            completed,
            attempt,
            outcome,
        } => {
            let outcome = match outcome {
                CheckpointOutcome::Applied => "saved".to_string(),
                CheckpointOutcome::Stale => "ignored as stale".to_string(),
                CheckpointOutcome::Failed(err) => format!("failed: {err}"),
            };
            format!(
                "{episode_id}: checkpoint {reason} at {}{}{} {outcome}",
                format_clock(*position_seconds),
                if *completed { ", completed" } else { "" },
                if *attempt > 1 { " (retry)" } else { "" },
            )
        }
        ControllerEvent::Advanced { from, to } => format!("advancing {from} -> {to}"),
        ControllerEvent::EpisodeLimitReached => "episode limit reached".to_string(),
        ControllerEvent::Closed { episode_id } => format!("closed {episode_id}"),
    }
}

fn run_progress(store: &Backend, profile_id: &str) -> Result<()> {
    let records = store.list_progress(profile_id)?;
    if records.is_empty() {
        println!("No progress stored for profile {profile_id} yet.");
        return Ok(());
    }
    print_progress(&records);
    Ok(())
}

fn print_progress(records: &[ProgressRecord]) {
    println!(
        "{:<20} {:<20} {:<10} {:<6} {:<28}",
        "EPISODE", "SHOW", "POSITION", "DONE", "UPDATED"
    );
    for record in records {
        println!(
            "{:<20} {:<20} {:<10} {:<6} {:<28}",
            truncate(&record.episode_id, 20),
            truncate(&record.show_id, 20),
            format_clock(record.position_seconds),
            if record.completed { "yes" } else { "no" },
            format_updated_display(&record.updated_at.to_rfc3339())
        );
    }
}

fn run_catalog(store: &Backend) -> Result<()> {
    let mut resolver = EpisodeResolver::new(store.catalog());
    let index = resolver.index()?;
    if index.is_empty() {
        println!("Catalog is empty.");
        return Ok(());
    }

    for show in index.shows() {
        println!("{} ({})", show.title, show.show_id);
        if show.episodes.is_empty() {
            warn!(show_id = %show.show_id, "show has no episodes");
        }
        for episode in &show.episodes {
            let windows = episode
                .skip_windows
                .iter()
                .map(|window| {
                    format!(
                        "{} {}-{}",
                        window.name,
                        format_clock(window.start),
                        format_clock(window.end)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            println!(
                "  {:<12} {:<20} {:<40} {:>8}  {}",
                format!("S{} E{}", episode.season_number, episode.episode_number),
                truncate(&episode.episode_id, 20),
                truncate(&episode.title, 40),
                format_clock(episode.duration_seconds),
                windows
            );
        }
    }
    Ok(())
}

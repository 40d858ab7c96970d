use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use super::super::catalog::Catalog;
use super::super::episode::EpisodeResolver;
use super::checkpoint::CheckpointReason;
use super::resume::locate_resume;
use super::session::{
    PlaybackSession, PlayerCommand, SessionCommand, SessionState, SessionView, UiEvent,
};
use super::store::{ProgressStore, WriteAck};
use super::{PersistenceError, Player, PlayerError, PlayerEvent};
use crate::config::PlaybackConfig;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UserAction {
    TogglePlay,
    Play,
    Pause,
    Seek(f64),
    SeekBy(f64),
    Skip(String),
    SkipVisible,
    CancelAutoplay,
    NextEpisode,
    DismissNotice,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CheckpointOutcome {
    Applied,
    Stale,
    Failed(String),
}

/// What happened, in order, for whoever is driving the controller.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ControllerEvent {
    Opened {
        episode_id: String,
        resume_offset: Option<f64>,
    },
    Ui {
        episode_id: String,
        event: UiEvent,
    },
    Checkpoint {
        episode_id: String,
        reason: CheckpointReason,
        position_seconds: f64,
        completed: bool,
        attempt: u8,
        outcome: CheckpointOutcome,
    },
    Advanced {
        from: String,
        to: String,
    },
    EpisodeLimitReached,
    Closed {
        episode_id: String,
    },
}

/// Owns the live session and executes its commands against the catalog,
/// the progress store and the player.
pub(crate) struct WatchController<C, S> {
    resolver: EpisodeResolver<C>,
    store: S,
    profile_id: String,
    config: PlaybackConfig,
    session: Option<PlaybackSession>,
    opened: usize,
    episode_limit: Option<usize>,
    events: Vec<ControllerEvent>,
}

impl<C, S> WatchController<C, S>
where
    C: Catalog,
    S: ProgressStore,
{
    pub(crate) fn new(
        resolver: EpisodeResolver<C>,
        store: S,
        profile_id: &str,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            profile_id: profile_id.to_string(),
            config,
            session: None,
            opened: 0,
            episode_limit: None,
            events: Vec::new(),
        }
    }

    pub(crate) fn with_episode_limit(mut self, limit: Option<usize>) -> Self {
        self.episode_limit = limit.filter(|limit| *limit > 0);
        self
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn view(&self, now: Instant) -> Option<SessionView> {
        self.session.as_ref().map(|session| session.view(now))
    }

    pub(crate) fn drain_events(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Replaces any live session with a fresh one for `episode_id`.
    pub(crate) fn open(&mut self, episode_id: &str, player: &mut dyn Player, now: Instant) {
        self.close(player, now);

        let mut session =
            PlaybackSession::new(&self.profile_id, episode_id, self.config.clone(), Utc::now());
        let session_id = session.id().to_string();
        self.opened += 1;

        let mut resume_offset = None;
        match self.resolver.resolve(episode_id) {
            Ok(resolution) => {
                let resume = locate_resume(
                    &self.store,
                    &self.profile_id,
                    resolution.episode(),
                    self.config.resume_threshold_seconds,
                );
                resume_offset = resume.offset;
                session.on_resolved(resolution, resume);
                if self.config.autostart {
                    session.play(now);
                }
            }
            Err(err) => session.on_resolution_failed(&err),
        }

        self.events.push(ControllerEvent::Opened {
            episode_id: episode_id.to_string(),
            resume_offset,
        });
        self.session = Some(session);
        self.flush(&session_id, player, now);
    }

    /// Navigation away: tears the session down and flushes its unload write.
    pub(crate) fn close(&mut self, player: &mut dyn Player, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.teardown(now);
        let session_id = session.id().to_string();
        let episode_id = session.episode_id().to_string();
        self.flush(&session_id, player, now);
        self.session = None;
        self.events.push(ControllerEvent::Closed { episode_id });
    }

    pub(crate) fn handle_player_event(
        &mut self,
        event: PlayerEvent,
        player: &mut dyn Player,
        now: Instant,
    ) {
        let Some(session) = self.session.as_mut() else {
            debug!(?event, "player event without a session");
            return;
        };
        match event {
            PlayerEvent::Progress {
                episode_id,
                played_seconds,
            } => session.on_position_report(&episode_id, played_seconds),
            PlayerEvent::Ended { episode_id } => session.on_end_of_stream(&episode_id, now),
            PlayerEvent::Failed {
                episode_id,
                message,
            } => {
                if episode_id == session.episode_id() {
                    session.on_player_error(&PlayerError(message), now);
                }
            }
        }
        let session_id = session.id().to_string();
        self.flush(&session_id, player, now);
    }

    pub(crate) fn handle_action(&mut self, action: UserAction, player: &mut dyn Player, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match action {
            UserAction::TogglePlay => session.toggle_play(now),
            UserAction::Play => session.play(now),
            UserAction::Pause => session.pause(now),
            UserAction::Seek(to) => session.seek(to, now),
            UserAction::SeekBy(delta) => session.seek_by(delta, now),
            UserAction::Skip(window) => {
                session.skip(&window, now);
            }
            UserAction::SkipVisible => {
                session.skip_visible(now);
            }
            UserAction::CancelAutoplay => {
                session.cancel_autoplay();
            }
            UserAction::NextEpisode => {
                session.request_next_episode();
            }
            UserAction::DismissNotice => session.dismiss_notice(),
        }
        let session_id = session.id().to_string();
        self.flush(&session_id, player, now);
    }

    pub(crate) fn poll(&mut self, player: &mut dyn Player, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.poll(now);
        let session_id = session.id().to_string();
        self.flush(&session_id, player, now);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .and_then(PlaybackSession::next_deadline)
    }

    /// Routes a write result to the session that issued it; results for any
    /// other session are dropped.
    pub(crate) fn deliver_write_result(
        &mut self,
        session_id: &str,
        sequence: u64,
        result: Result<WriteAck, PersistenceError>,
        now: Instant,
    ) {
        match self.session.as_mut() {
            Some(session) if session.id() == session_id => {
                session.on_write_result(sequence, result, now);
            }
            _ => debug!(session_id, sequence, "dropping write result for a replaced session"),
        }
    }

    fn flush(&mut self, session_id: &str, player: &mut dyn Player, now: Instant) {
        let mut advance = None;
        loop {
            let commands = match self.session.as_mut() {
                Some(session) if session.id() == session_id => session.drain_commands(),
                _ => break,
            };
            if commands.is_empty() {
                break;
            }
            let episode_id = self
                .session
                .as_ref()
                .map(|session| session.episode_id().to_string())
                .unwrap_or_default();

            for command in commands {
                match command {
                    SessionCommand::Player(command) => apply_player_command(player, command),
                    SessionCommand::Persist(write) => {
                        let result = self.store.write_progress(&write);
                        let outcome = match &result {
                            Ok(ack) if ack.applied => CheckpointOutcome::Applied,
                            Ok(_) => CheckpointOutcome::Stale,
                            Err(err) => CheckpointOutcome::Failed(err.to_string()),
                        };
                        self.events.push(ControllerEvent::Checkpoint {
                            episode_id: write.episode_id.clone(),
                            reason: write.reason,
                            position_seconds: write.position_seconds,
                            completed: write.completed,
                            attempt: write.attempt,
                            outcome,
                        });
                        self.deliver_write_result(session_id, write.token.sequence, result, now);
                    }
                    SessionCommand::Advance { next_episode_id } => {
                        advance = Some(next_episode_id);
                    }
                    SessionCommand::Ui(event) => self.events.push(ControllerEvent::Ui {
                        episode_id: episode_id.clone(),
                        event,
                    }),
                }
            }
        }

        if let Some(next_episode_id) = advance {
            self.advance(next_episode_id, player, now);
        }
    }

    fn advance(&mut self, next_episode_id: String, player: &mut dyn Player, now: Instant) {
        let from = self
            .session
            .as_ref()
            .map(|session| session.episode_id().to_string())
            .unwrap_or_default();
        if self
            .episode_limit
            .is_some_and(|limit| self.opened >= limit)
        {
            info!(from = %from, to = %next_episode_id, "episode limit reached; not advancing");
            self.events.push(ControllerEvent::EpisodeLimitReached);
            self.close(player, now);
            return;
        }
        self.events.push(ControllerEvent::Advanced {
            from,
            to: next_episode_id.clone(),
        });
        self.open(&next_episode_id, player, now);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.session.as_ref().is_none_or(|session| {
            session.is_closed()
                || session.state() == SessionState::Failed
                || (session.state() == SessionState::Ended && !session.pending_advance())
        })
    }
}

fn apply_player_command(player: &mut dyn Player, command: PlayerCommand) {
    match command {
        PlayerCommand::Load {
            episode_id,
            media_url,
            duration_seconds,
        } => player.load(&episode_id, &media_url, duration_seconds),
        PlayerCommand::SeekTo(seconds) => player.seek_to(seconds),
        PlayerCommand::Play => player.play(),
        PlayerCommand::Pause => player.pause(),
    }
}

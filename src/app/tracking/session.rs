use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::super::episode::Resolution;
use super::autoplay::AutoplayCoordinator;
use super::checkpoint::{CheckpointReason, CheckpointTarget, Checkpointer, Confirmed};
use super::resume::ResumePoint;
use super::segments::{SegmentTransition, SegmentWatcher, WindowState};
use super::store::{ProgressWrite, WriteAck};
use super::{PersistenceError, PlayerError, ResolutionError};
use crate::config::PlaybackConfig;

const PLAYBACK_FAILED_NOTICE: &str = "Playback failed. Try again or pick another episode.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Initializing,
    Ready,
    Playing,
    Paused,
    Ended,
    Failed,
}

impl SessionState {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlayerCommand {
    Load {
        episode_id: String,
        media_url: String,
        duration_seconds: f64,
    },
    SeekTo(f64),
    Play,
    Pause,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UiEvent {
    StateChanged(SessionState),
    SkipShown(String),
    SkipHidden(String),
    AutoplayScheduled {
        next_episode_id: String,
        delay: Duration,
    },
    AutoplayCancelled,
    Notice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionCommand {
    Player(PlayerCommand),
    Persist(ProgressWrite),
    Advance { next_episode_id: String },
    Ui(UiEvent),
}

#[derive(Debug)]
struct ActivePlayback {
    resolution: Resolution,
    position: f64,
    segments: SegmentWatcher,
    checkpointer: Checkpointer,
    autoplay: AutoplayCoordinator,
}

/// One episode-watch. Never reused: advancing to another episode creates a new session.
#[derive(Debug)]
pub(crate) struct PlaybackSession {
    id: String,
    started_at: DateTime<Utc>,
    profile_id: String,
    episode_id: String,
    config: PlaybackConfig,
    state: SessionState,
    active: Option<ActivePlayback>,
    pending_advance: bool,
    advance_issued: bool,
    closed: bool,
    failure: Option<String>,
    notice: Option<String>,
    commands: Vec<SessionCommand>,
}

impl PlaybackSession {
    pub(crate) fn new(
        profile_id: &str,
        episode_id: &str,
        config: PlaybackConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        debug!(session_id = %id, episode_id, "session initializing");
        Self {
            id,
            started_at,
            profile_id: profile_id.to_string(),
            episode_id: episode_id.to_string(),
            config,
            state: SessionState::Initializing,
            active: None,
            pending_advance: false,
            advance_issued: false,
            closed: false,
            failure: None,
            notice: None,
            commands: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn pending_advance(&self) -> bool {
        self.pending_advance
    }

    pub(crate) fn resolution(&self) -> Option<&Resolution> {
        self.active.as_ref().map(|active| &active.resolution)
    }

    pub(crate) fn position(&self) -> f64 {
        self.active.as_ref().map_or(0.0, |active| active.position)
    }

    pub(crate) fn last_confirmed(&self) -> Option<Confirmed> {
        self.active
            .as_ref()
            .and_then(|active| active.checkpointer.last_confirmed())
    }

    #[cfg(test)]
    pub(crate) fn skip_state(&self, window: &str) -> Option<WindowState> {
        self.active
            .as_ref()
            .and_then(|active| active.segments.state(window))
    }

    pub(crate) fn on_resolved(&mut self, resolution: Resolution, resume: ResumePoint) {
        if self.closed || self.state != SessionState::Initializing {
            debug!(session_id = %self.id, "ignoring late resolution");
            return;
        }
        let episode = resolution.episode();
        let target = CheckpointTarget {
            profile_id: self.profile_id.clone(),
            episode_id: episode.episode_id.clone(),
            show_id: episode.show_id.clone(),
            duration_seconds: episode.duration_seconds,
        };
        let checkpointer = Checkpointer::new(target, &self.id, self.started_at, &self.config)
            .with_completed(resume.completed);
        let resume_offset = resume.offset;
        let position = resume_offset.map_or(0.0, |offset| episode.clamp_position(offset));

        self.commands.push(SessionCommand::Player(PlayerCommand::Load {
            episode_id: episode.episode_id.clone(),
            media_url: episode.media_url.clone(),
            duration_seconds: episode.duration_seconds,
        }));
        if resume_offset.is_some() {
            self.commands
                .push(SessionCommand::Player(PlayerCommand::SeekTo(position)));
        }
        info!(
            session_id = %self.id,
            episode_id = %episode.episode_id,
            resume = ?resume_offset,
            completed = resume.completed,
            "session ready"
        );

        let segments = SegmentWatcher::new(&episode.skip_windows);
        self.active = Some(ActivePlayback {
            resolution,
            position,
            segments,
            checkpointer,
            autoplay: AutoplayCoordinator::new(self.config.autoplay_delay),
        });
        self.set_state(SessionState::Ready);
        self.evaluate_segments();
    }

    pub(crate) fn on_resolution_failed(&mut self, err: &ResolutionError) {
        if self.closed || self.state != SessionState::Initializing {
            return;
        }
        warn!(session_id = %self.id, episode_id = %self.episode_id, error = %err, "session failed");
        self.failure = Some(err.to_string());
        self.set_state(SessionState::Failed);
        self.commands
            .push(SessionCommand::Ui(UiEvent::Notice(err.to_string())));
    }

    fn accepts_playback(&self) -> bool {
        !self.closed
            && matches!(
                self.state,
                SessionState::Ready | SessionState::Playing | SessionState::Paused
            )
    }

    fn is_current_episode(&self, episode_id: &str) -> bool {
        self.resolution()
            .is_some_and(|resolution| resolution.episode().episode_id == episode_id)
    }

    pub(crate) fn play(&mut self, now: Instant) {
        if !self.accepts_playback() || self.state == SessionState::Playing {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.checkpointer.start_periodic(now);
        }
        self.commands
            .push(SessionCommand::Player(PlayerCommand::Play));
        self.set_state(SessionState::Playing);
    }

    pub(crate) fn pause(&mut self, now: Instant) {
        if self.closed || self.state != SessionState::Playing {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.checkpointer.stop_periodic();
            active
                .checkpointer
                .request(CheckpointReason::Pause, active.position, now);
        }
        self.commands
            .push(SessionCommand::Player(PlayerCommand::Pause));
        self.set_state(SessionState::Paused);
    }

    pub(crate) fn toggle_play(&mut self, now: Instant) {
        if self.state == SessionState::Playing {
            self.pause(now);
        } else {
            self.play(now);
        }
    }

    pub(crate) fn on_position_report(&mut self, episode_id: &str, played_seconds: f64) {
        if !self.accepts_playback() || !self.is_current_episode(episode_id) {
            debug!(
                session_id = %self.id,
                episode_id,
                played_seconds,
                "dropping position report"
            );
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.position = active.resolution.episode().clamp_position(played_seconds);
        }
        self.evaluate_segments();
    }

    pub(crate) fn seek(&mut self, to: f64, now: Instant) {
        if !self.accepts_playback() {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let target = active.resolution.episode().clamp_position(to);
        active.position = target;
        active
            .checkpointer
            .request(CheckpointReason::SeekSettled, target, now);
        self.commands
            .push(SessionCommand::Player(PlayerCommand::SeekTo(target)));
        self.evaluate_segments();
    }

    pub(crate) fn seek_by(&mut self, delta: f64, now: Instant) {
        let target = self.position() + delta;
        self.seek(target, now);
    }

    /// Skips past the named window; ignored unless its affordance is showing.
    pub(crate) fn skip(&mut self, window: &str, now: Instant) -> bool {
        if !self.accepts_playback() {
            return false;
        }
        let Some(end) = self
            .active
            .as_mut()
            .and_then(|active| active.segments.dismiss(window))
        else {
            debug!(session_id = %self.id, window, "skip ignored; window not active");
            return false;
        };
        info!(session_id = %self.id, window, to = end, "skipping window");
        self.seek(end, now);
        true
    }

    pub(crate) fn skip_visible(&mut self, now: Instant) -> bool {
        let Some(window) = self
            .active
            .as_ref()
            .and_then(|active| active.segments.first_active())
            .map(str::to_string)
        else {
            return false;
        };
        self.skip(&window, now)
    }

    pub(crate) fn on_end_of_stream(&mut self, episode_id: &str, now: Instant) {
        if !self.accepts_playback() || !self.is_current_episode(episode_id) {
            debug!(session_id = %self.id, episode_id, "ignoring end of stream");
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let duration = active.resolution.episode().duration_seconds;
        active.position = duration;
        active.checkpointer.stop_periodic();
        active
            .checkpointer
            .request(CheckpointReason::Completion, duration, now);

        let next_episode_id = active
            .resolution
            .next_episode()
            .map(|episode| episode.episode_id.clone());
        let scheduled = active
            .autoplay
            .on_end_of_stream(next_episode_id.as_deref(), now);
        self.pending_advance = scheduled;
        let hidden = active.segments.deactivate_all();
        self.set_state(SessionState::Ended);
        self.push_segment_transitions(hidden);
        if scheduled && let Some(next_episode_id) = next_episode_id {
            self.commands
                .push(SessionCommand::Ui(UiEvent::AutoplayScheduled {
                    next_episode_id,
                    delay: self.config.autoplay_delay,
                }));
        }
    }

    pub(crate) fn cancel_autoplay(&mut self) -> bool {
        let cancelled = self
            .active
            .as_mut()
            .is_some_and(|active| active.autoplay.cancel());
        if cancelled {
            self.pending_advance = false;
            self.commands
                .push(SessionCommand::Ui(UiEvent::AutoplayCancelled));
        }
        cancelled
    }

    /// Moves to the next episode right away. Returns false when there is none
    /// or an advance was already issued.
    pub(crate) fn request_next_episode(&mut self) -> bool {
        if self.closed || self.advance_issued {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let Some(next_episode_id) = active
            .resolution
            .next_episode()
            .map(|episode| episode.episode_id.clone())
        else {
            return false;
        };
        active.autoplay.cancel();
        self.pending_advance = false;
        self.issue_advance(next_episode_id);
        true
    }

    fn issue_advance(&mut self, next_episode_id: String) {
        if self.advance_issued {
            return;
        }
        info!(session_id = %self.id, next_episode_id = %next_episode_id, "advancing");
        self.advance_issued = true;
        self.commands
            .push(SessionCommand::Advance { next_episode_id });
    }

    pub(crate) fn on_player_error(&mut self, err: &PlayerError, now: Instant) {
        if self.closed {
            return;
        }
        warn!(session_id = %self.id, error = %err, "player reported a failure");
        // The media element has stopped; keep what was watched so far.
        if self.state == SessionState::Playing
            && let Some(active) = self.active.as_mut()
        {
            active.checkpointer.stop_periodic();
            active
                .checkpointer
                .request(CheckpointReason::Pause, active.position, now);
            self.set_state(SessionState::Paused);
        }
        self.notice = Some(PLAYBACK_FAILED_NOTICE.to_string());
        self.commands
            .push(SessionCommand::Ui(UiEvent::Notice(PLAYBACK_FAILED_NOTICE.to_string())));
    }

    pub(crate) fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    pub(crate) fn on_write_result(
        &mut self,
        sequence: u64,
        result: Result<WriteAck, PersistenceError>,
        now: Instant,
    ) {
        if let Some(active) = self.active.as_mut() {
            active.checkpointer.on_write_result(sequence, result, now);
        }
    }

    pub(crate) fn poll(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.checkpointer.poll(now, active.position);
        if let Some(next_episode_id) = active.autoplay.poll(now) {
            self.pending_advance = false;
            self.issue_advance(next_episode_id);
        }
    }

    /// Navigation away or replacement: cancels timers and attempts a final unload write.
    pub(crate) fn teardown(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        let unload = matches!(
            self.state,
            SessionState::Ready | SessionState::Playing | SessionState::Paused
        );
        if let Some(active) = self.active.as_mut() {
            active.autoplay.cancel();
            active.checkpointer.close(active.position, unload, now);
        }
        self.pending_advance = false;
        self.closed = true;
        info!(session_id = %self.id, state = %self.state, unload, "session closed");
    }

    pub(crate) fn drain_commands(&mut self) -> Vec<SessionCommand> {
        if let Some(active) = self.active.as_mut() {
            let writes = active.checkpointer.drain_outbox();
            self.commands
                .extend(writes.into_iter().map(SessionCommand::Persist));
        }
        std::mem::take(&mut self.commands)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        let active = self.active.as_ref()?;
        [
            active.checkpointer.next_deadline(),
            active.autoplay.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(session_id = %self.id, from = %self.state, to = %state, "session state");
        self.state = state;
        self.commands
            .push(SessionCommand::Ui(UiEvent::StateChanged(state)));
    }

    fn evaluate_segments(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let transitions = active.segments.observe(active.position);
        self.push_segment_transitions(transitions);
    }

    fn push_segment_transitions(&mut self, transitions: Vec<SegmentTransition>) {
        for transition in transitions {
            self.commands.push(SessionCommand::Ui(match transition {
                SegmentTransition::Entered(name) => UiEvent::SkipShown(name),
                SegmentTransition::Exited(name) => UiEvent::SkipHidden(name),
            }));
        }
    }

    pub(crate) fn view(&self, now: Instant) -> SessionView {
        let mut view = SessionView {
            state: self.state,
            episode_id: self.episode_id.clone(),
            show_title: None,
            episode_label: None,
            position_seconds: self.position(),
            duration_seconds: 0.0,
            skip_affordances: Vec::new(),
            episode_ordinal: None,
            next_episode_available: false,
            next_episode_label: None,
            autoplay_remaining: None,
            failure: self.failure.clone(),
            notice: self.notice.clone(),
            last_confirmed: self.last_confirmed(),
        };
        if let Some(active) = &self.active {
            let episode = active.resolution.episode();
            view.show_title = Some(active.resolution.show().title.clone());
            view.episode_label = Some(episode.label());
            view.duration_seconds = episode.duration_seconds;
            view.skip_affordances = active
                .segments
                .states()
                .map(|(name, state)| SkipAffordance {
                    name: name.to_string(),
                    visible: state == WindowState::Active,
                })
                .collect();
            view.episode_ordinal = Some((
                active.resolution.ordinal(),
                active.resolution.siblings().len(),
            ));
            view.next_episode_available = active.resolution.has_next_episode();
            view.next_episode_label = active
                .resolution
                .next_episode()
                .map(|episode| episode.label());
            view.autoplay_remaining = active.autoplay.remaining(now);
        }
        view
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SkipAffordance {
    pub(crate) name: String,
    pub(crate) visible: bool,
}

/// Snapshot of a session for rendering.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionView {
    pub(crate) state: SessionState,
    pub(crate) episode_id: String,
    pub(crate) show_title: Option<String>,
    pub(crate) episode_label: Option<String>,
    pub(crate) position_seconds: f64,
    pub(crate) duration_seconds: f64,
    pub(crate) skip_affordances: Vec<SkipAffordance>,
    /// One-based place in the show, and the show's episode count.
    pub(crate) episode_ordinal: Option<(usize, usize)>,
    pub(crate) next_episode_available: bool,
    pub(crate) next_episode_label: Option<String>,
    pub(crate) autoplay_remaining: Option<Duration>,
    pub(crate) failure: Option<String>,
    pub(crate) notice: Option<String>,
    pub(crate) last_confirmed: Option<Confirmed>,
}

impl SessionView {
    #[cfg(test)]
    pub(crate) fn skip_visible(&self, window: &str) -> bool {
        self.skip_affordances
            .iter()
            .any(|affordance| affordance.name == window && affordance.visible)
    }

    pub(crate) fn progress_ratio(&self) -> f64 {
        if self.duration_seconds <= 0.0 {
            return 0.0;
        }
        (self.position_seconds / self.duration_seconds).clamp(0.0, 1.0)
    }
}

use std::time::{Duration, Instant};

use tracing::debug;

use super::tracking::{Player, PlayerEvent};

/// Stand-in for a media element: advances a position against the clock it is
/// polled with and reports it at a fixed interval.
#[derive(Debug)]
pub(crate) struct SimulatedPlayer {
    episode_id: Option<String>,
    media_url: String,
    duration: f64,
    position: f64,
    playing: bool,
    ended: bool,
    speed: f64,
    report_interval: Duration,
    last_advance: Option<Instant>,
    next_report: Option<Instant>,
    pending_failure: Option<String>,
}

impl SimulatedPlayer {
    pub(crate) fn new(report_interval: Duration, speed: f64) -> Self {
        Self {
            episode_id: None,
            media_url: String::new(),
            duration: 0.0,
            position: 0.0,
            playing: false,
            ended: false,
            speed: if speed.is_finite() && speed > 0.0 {
                speed
            } else {
                1.0
            },
            report_interval,
            last_advance: None,
            next_report: None,
            pending_failure: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> f64 {
        self.position
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.playing
    }

    pub(crate) fn media_url(&self) -> &str {
        &self.media_url
    }

    /// Queues an opaque playback failure, reported on the next advance.
    pub(crate) fn fail(&mut self, message: &str) {
        self.pending_failure = Some(message.to_string());
    }

    pub(crate) fn advance(&mut self, now: Instant) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        let Some(episode_id) = self.episode_id.clone() else {
            self.last_advance = Some(now);
            return events;
        };

        if let Some(message) = self.pending_failure.take() {
            self.playing = false;
            events.push(PlayerEvent::Failed {
                episode_id,
                message,
            });
            return events;
        }

        if let Some(last) = self.last_advance
            && self.playing
            && !self.ended
        {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.position = (self.position + elapsed * self.speed).min(self.duration);
        }
        self.last_advance = Some(now);

        if self.playing && !self.ended && self.position >= self.duration {
            self.ended = true;
            self.playing = false;
            events.push(PlayerEvent::Progress {
                episode_id: episode_id.clone(),
                played_seconds: self.position,
            });
            events.push(PlayerEvent::Ended { episode_id });
            return events;
        }

        let due = self.next_report.is_none_or(|next| next <= now);
        if due && !self.ended {
            events.push(PlayerEvent::Progress {
                episode_id,
                played_seconds: self.position,
            });
            self.next_report = Some(now + self.report_interval);
        }
        events
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if self.episode_id.is_none() || self.ended {
            return None;
        }
        self.next_report
    }
}

impl Player for SimulatedPlayer {
    fn load(&mut self, episode_id: &str, media_url: &str, duration_seconds: f64) {
        debug!(episode_id, media_url, duration_seconds, "player loading media");
        self.episode_id = Some(episode_id.to_string());
        self.media_url = media_url.to_string();
        self.duration = duration_seconds.max(0.0);
        self.position = 0.0;
        self.playing = false;
        self.ended = false;
        self.last_advance = None;
        self.next_report = None;
        self.pending_failure = None;
    }

    fn seek_to(&mut self, seconds: f64) {
        self.position = seconds.clamp(0.0, self.duration);
        self.ended = false;
        // Report the new position on the next advance.
        self.next_report = None;
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }
}

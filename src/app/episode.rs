use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::debug;

use super::catalog::Catalog;
use super::tracking::ResolutionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SkipWindow {
    pub(crate) name: String,
    pub(crate) start: f64,
    pub(crate) end: f64,
}

impl SkipWindow {
    pub(crate) fn contains(&self, position: f64) -> bool {
        position >= self.start && position <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Episode {
    pub(crate) episode_id: String,
    pub(crate) show_id: String,
    pub(crate) season_number: u32,
    pub(crate) episode_number: u32,
    pub(crate) title: String,
    pub(crate) duration_seconds: f64,
    pub(crate) media_url: String,
    pub(crate) skip_windows: Vec<SkipWindow>,
}

impl Episode {
    pub(crate) fn clamp_position(&self, position: f64) -> f64 {
        if !position.is_finite() {
            return 0.0;
        }
        position.clamp(0.0, self.duration_seconds.max(0.0))
    }

    pub(crate) fn label(&self) -> String {
        format!(
            "S{} E{} - {}",
            self.season_number, self.episode_number, self.title
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Show {
    pub(crate) show_id: String,
    pub(crate) title: String,
    pub(crate) episodes: Vec<Episode>,
}

impl Show {
    /// Builds a show whose episode list is in canonical watch order.
    pub(crate) fn new(show_id: String, title: String, mut episodes: Vec<Episode>) -> Self {
        sort_episodes(&mut episodes);
        Self {
            show_id,
            title,
            episodes,
        }
    }
}

pub(crate) fn compare_episode_order(a: &Episode, b: &Episode) -> Ordering {
    a.season_number
        .cmp(&b.season_number)
        .then(a.episode_number.cmp(&b.episode_number))
}

// Stable: ties keep catalog order, so the same show always sorts the same way.
pub(crate) fn sort_episodes(episodes: &mut [Episode]) {
    episodes.sort_by(compare_episode_order);
}

/// Result of resolving an episode id: the shared show and the episode's place in it.
#[derive(Debug, Clone)]
pub(crate) struct Resolution {
    show: Arc<Show>,
    index: usize,
}

impl Resolution {
    pub(crate) fn episode(&self) -> &Episode {
        &self.show.episodes[self.index]
    }

    pub(crate) fn show(&self) -> &Show {
        &self.show
    }

    pub(crate) fn siblings(&self) -> &[Episode] {
        &self.show.episodes
    }

    pub(crate) fn next_episode(&self) -> Option<&Episode> {
        self.show.episodes.get(self.index + 1)
    }

    pub(crate) fn has_next_episode(&self) -> bool {
        self.next_episode().is_some()
    }

    pub(crate) fn ordinal(&self) -> usize {
        self.index + 1
    }
}

#[derive(Debug, Default)]
pub(crate) struct EpisodeIndex {
    shows: Vec<Arc<Show>>,
    by_episode: HashMap<String, (usize, usize)>,
}

impl EpisodeIndex {
    pub(crate) fn build(shows: Vec<Show>) -> Self {
        let mut by_episode = HashMap::new();
        let mut indexed = Vec::with_capacity(shows.len());
        for (show_idx, mut show) in shows.into_iter().enumerate() {
            sort_episodes(&mut show.episodes);
            for (episode_idx, episode) in show.episodes.iter().enumerate() {
                // First occurrence wins if a catalog lists an id twice.
                by_episode
                    .entry(episode.episode_id.clone())
                    .or_insert((show_idx, episode_idx));
            }
            indexed.push(Arc::new(show));
        }
        Self {
            shows: indexed,
            by_episode,
        }
    }

    pub(crate) fn lookup(&self, episode_id: &str) -> Option<Resolution> {
        let (show_idx, index) = *self.by_episode.get(episode_id)?;
        Some(Resolution {
            show: Arc::clone(&self.shows[show_idx]),
            index,
        })
    }

    pub(crate) fn shows(&self) -> &[Arc<Show>] {
        &self.shows
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shows.is_empty()
    }
}

/// Resolves episode ids against the catalog, fetching it lazily and
/// re-fetching once when an id is unknown to the cached index.
pub(crate) struct EpisodeResolver<C> {
    catalog: C,
    index: Option<EpisodeIndex>,
}

impl<C: Catalog> EpisodeResolver<C> {
    pub(crate) fn new(catalog: C) -> Self {
        Self {
            catalog,
            index: None,
        }
    }

    pub(crate) fn resolve(&mut self, episode_id: &str) -> Result<Resolution, ResolutionError> {
        if let Some(index) = &self.index
            && let Some(found) = index.lookup(episode_id)
        {
            return Ok(found);
        }

        let index = self.refresh()?;
        index
            .lookup(episode_id)
            .ok_or_else(|| ResolutionError::NotFound(episode_id.to_string()))
    }

    pub(crate) fn refresh(&mut self) -> Result<&EpisodeIndex, ResolutionError> {
        let shows = self
            .catalog
            .fetch_show_catalog()
            .map_err(|err| ResolutionError::Catalog(err.to_string()))?;
        debug!(shows = shows.len(), "catalog fetched, rebuilding episode index");
        Ok(self.index.insert(EpisodeIndex::build(shows)))
    }

    pub(crate) fn index(&mut self) -> Result<&EpisodeIndex, ResolutionError> {
        if self.index.is_none() {
            return self.refresh();
        }
        self.index
            .as_ref()
            .ok_or_else(|| ResolutionError::Catalog("episode index unavailable".to_string()))
    }
}

pub(crate) fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_updated_display(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

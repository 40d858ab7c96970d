use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::episode::{Episode, Show, SkipWindow};

#[derive(Debug, Error)]
pub(crate) enum CatalogError {
    #[error("failed to read catalog at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode catalog: {0}")]
    Decode(String),
    #[error("catalog request failed: {0}")]
    Http(String),
}

pub(crate) trait Catalog {
    fn fetch_show_catalog(&self) -> Result<Vec<Show>, CatalogError>;
}

impl<T: Catalog + ?Sized> Catalog for &T {
    fn fetch_show_catalog(&self) -> Result<Vec<Show>, CatalogError> {
        (**self).fetch_show_catalog()
    }
}

impl<T: Catalog + ?Sized> Catalog for Box<T> {
    fn fetch_show_catalog(&self) -> Result<Vec<Show>, CatalogError> {
        (**self).fetch_show_catalog()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ShowRecord {
    pub(crate) anime_id: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) episodes: Vec<EpisodeRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EpisodeRecord {
    pub(crate) episode_id: String,
    #[serde(default)]
    pub(crate) anime_id: Option<String>,
    #[serde(default = "default_season")]
    pub(crate) season_number: u32,
    pub(crate) episode_number: u32,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) video_url: String,
    pub(crate) duration_seconds: f64,
    #[serde(default)]
    pub(crate) skip_intro_start: Option<f64>,
    #[serde(default)]
    pub(crate) skip_intro_end: Option<f64>,
    #[serde(default)]
    pub(crate) skip_recap_start: Option<f64>,
    #[serde(default)]
    pub(crate) skip_recap_end: Option<f64>,
    #[serde(default)]
    pub(crate) skip_windows: Vec<SkipWindowRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SkipWindowRecord {
    pub(crate) name: String,
    pub(crate) start: f64,
    pub(crate) end: f64,
}

fn default_season() -> u32 {
    1
}

impl EpisodeRecord {
    pub(crate) fn into_episode(self, show_id: &str) -> Episode {
        let duration = if self.duration_seconds.is_finite() && self.duration_seconds > 0.0 {
            self.duration_seconds
        } else {
            warn!(
                episode_id = %self.episode_id,
                duration = self.duration_seconds,
                "episode has no usable duration"
            );
            0.0
        };

        let mut raw_windows = Vec::new();
        if let (Some(start), Some(end)) = (self.skip_intro_start, self.skip_intro_end) {
            raw_windows.push(("intro".to_string(), start, end));
        }
        if let (Some(start), Some(end)) = (self.skip_recap_start, self.skip_recap_end) {
            raw_windows.push(("recap".to_string(), start, end));
        }
        for window in self.skip_windows {
            raw_windows.push((window.name, window.start, window.end));
        }

        let mut skip_windows: Vec<SkipWindow> = Vec::new();
        for (name, start, end) in raw_windows {
            let valid = start.is_finite() && end.is_finite() && start >= 0.0 && start <= end;
            if !valid || start > duration {
                warn!(
                    episode_id = %self.episode_id,
                    window = %name,
                    start,
                    end,
                    "dropping malformed skip window"
                );
                continue;
            }
            if skip_windows.iter().any(|existing| existing.name == name) {
                warn!(episode_id = %self.episode_id, window = %name, "duplicate skip window name");
                continue;
            }
            skip_windows.push(SkipWindow {
                name,
                start,
                end: end.min(duration),
            });
        }

        Episode {
            show_id: self.anime_id.unwrap_or_else(|| show_id.to_string()),
            episode_id: self.episode_id,
            season_number: self.season_number,
            episode_number: self.episode_number,
            title: self.title,
            duration_seconds: duration,
            media_url: self.video_url,
            skip_windows,
        }
    }
}

impl ShowRecord {
    pub(crate) fn into_show(self) -> Show {
        let show_id = self.anime_id;
        let episodes = self
            .episodes
            .into_iter()
            .map(|record| record.into_episode(&show_id))
            .collect();
        Show::new(show_id, self.title, episodes)
    }
}

pub(crate) fn parse_catalog(raw: &str) -> Result<Vec<Show>, CatalogError> {
    let records: Vec<ShowRecord> =
        serde_json::from_str(raw).map_err(|err| CatalogError::Decode(err.to_string()))?;
    Ok(records.into_iter().map(ShowRecord::into_show).collect())
}

/// Catalog backed by a JSON file of show records, re-read on every fetch.
#[derive(Debug, Clone)]
pub(crate) struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Catalog for FileCatalog {
    fn fetch_show_catalog(&self) -> Result<Vec<Show>, CatalogError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| CatalogError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        parse_catalog(&raw)
    }
}

/// Fixed in-memory catalog.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct StaticCatalog {
    shows: Vec<Show>,
}

#[cfg(test)]
impl StaticCatalog {
    pub(crate) fn new(shows: Vec<Show>) -> Self {
        Self { shows }
    }
}

#[cfg(test)]
impl Catalog for StaticCatalog {
    fn fetch_show_catalog(&self) -> Result<Vec<Show>, CatalogError> {
        Ok(self.shows.clone())
    }
}

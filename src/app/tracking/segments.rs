use super::super::episode::SkipWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WindowState {
    Inactive,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SegmentTransition {
    Entered(String),
    Exited(String),
}

#[derive(Debug, Clone)]
struct WatchedWindow {
    window: SkipWindow,
    state: WindowState,
    // Set by a skip; holds the window inactive until the position is seen outside it.
    dismissed: bool,
}

/// Tracks skip-window visibility. State is always re-derived from the latest
/// position, so arbitrarily large jumps never pass through a window.
#[derive(Debug, Clone, Default)]
pub(crate) struct SegmentWatcher {
    windows: Vec<WatchedWindow>,
}

impl SegmentWatcher {
    pub(crate) fn new(windows: &[SkipWindow]) -> Self {
        Self {
            windows: windows
                .iter()
                .cloned()
                .map(|window| WatchedWindow {
                    window,
                    state: WindowState::Inactive,
                    dismissed: false,
                })
                .collect(),
        }
    }

    pub(crate) fn observe(&mut self, position: f64) -> Vec<SegmentTransition> {
        let mut transitions = Vec::new();
        for watched in &mut self.windows {
            let inside = watched.window.contains(position);
            if !inside {
                watched.dismissed = false;
            }
            let next = if inside && !watched.dismissed {
                WindowState::Active
            } else {
                WindowState::Inactive
            };
            if next == watched.state {
                continue;
            }
            watched.state = next;
            let name = watched.window.name.clone();
            transitions.push(match next {
                WindowState::Active => SegmentTransition::Entered(name),
                WindowState::Inactive => SegmentTransition::Exited(name),
            });
        }
        transitions
    }

    /// Hides every active window, e.g. once the stream has ended.
    pub(crate) fn deactivate_all(&mut self) -> Vec<SegmentTransition> {
        self.windows
            .iter_mut()
            .filter(|watched| watched.state == WindowState::Active)
            .map(|watched| {
                watched.state = WindowState::Inactive;
                SegmentTransition::Exited(watched.window.name.clone())
            })
            .collect()
    }

    /// Marks an active window as skipped and returns the position to seek to.
    pub(crate) fn dismiss(&mut self, name: &str) -> Option<f64> {
        let watched = self
            .windows
            .iter_mut()
            .find(|watched| watched.window.name == name && watched.state == WindowState::Active)?;
        watched.dismissed = true;
        Some(watched.window.end)
    }

    #[cfg(test)]
    pub(crate) fn state(&self, name: &str) -> Option<WindowState> {
        self.windows
            .iter()
            .find(|watched| watched.window.name == name)
            .map(|watched| watched.state)
    }

    pub(crate) fn first_active(&self) -> Option<&str> {
        self.windows
            .iter()
            .find(|watched| watched.state == WindowState::Active)
            .map(|watched| watched.window.name.as_str())
    }

    pub(crate) fn states(&self) -> impl Iterator<Item = (&str, WindowState)> {
        self.windows
            .iter()
            .map(|watched| (watched.window.name.as_str(), watched.state))
    }
}

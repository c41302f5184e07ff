//! Lifecycle states and the transition table.

use crate::error::LifecycleError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    /// Loading resources before the first start
    #[default]
    Preloading,
    /// Running in the foreground
    Started,
    /// Visible but not focused
    Paused,
    /// Resources released
    Suspended,
    /// Terminal state
    Stopped,
}

impl ApplicationState {
    /// Every state, in declaration order
    pub const ALL: [Self; 5] = [
        Self::Preloading,
        Self::Started,
        Self::Paused,
        Self::Suspended,
        Self::Stopped,
    ];

    /// Whether the application has input focus in this state
    #[must_use]
    pub const fn has_focus(self) -> bool {
        matches!(self, Self::Started)
    }

    /// Whether `next` may directly follow this state
    ///
    /// Every state except `Stopped` may stop. Re-entering the current state
    /// is not a transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Stopped, _) => false,
            (_, Self::Stopped) => true,
            (Self::Preloading, Self::Started)
            | (Self::Started, Self::Paused)
            | (Self::Paused, Self::Suspended | Self::Started)
            | (Self::Suspended, Self::Paused) => true,
            _ => false,
        }
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preloading => "preloading",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Suspended => "suspended",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationState {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == name)
            .ok_or(LifecycleError::UnknownState { name })
    }
}

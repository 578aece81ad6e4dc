//! The three override slots the Steam client reads movies from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use steam_animation_config::Config;

/// An override slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationTarget {
    /// Shown when the client starts and on some resume paths.
    Boot,
    /// Shown when suspending from the client's own UI.
    Suspend,
    /// Shown when suspending from inside a game.
    Throbber,
}

impl AnimationTarget {
    /// All targets, in teardown order.
    pub const ALL: [AnimationTarget; 3] = [
        AnimationTarget::Boot,
        AnimationTarget::Suspend,
        AnimationTarget::Throbber,
    ];

    /// Fixed file name, used both in the override dir and inside an animation set.
    pub fn file_name(self) -> &'static str {
        match self {
            AnimationTarget::Boot => "deck_startup.webm",
            AnimationTarget::Suspend => "steam_os_suspend.webm",
            AnimationTarget::Throbber => "steam_os_suspend_from_throbber.webm",
        }
    }

    /// Destination path under the override directory.
    pub fn destination(self, override_dir: &Path) -> PathBuf {
        override_dir.join(self.file_name())
    }

    /// Explicitly configured clip for this target, if any.
    pub fn configured_path(self, config: &Config) -> Option<&Path> {
        let choice = match self {
            AnimationTarget::Boot => &config.animations.current_boot,
            AnimationTarget::Suspend => &config.animations.current_suspend,
            AnimationTarget::Throbber => &config.animations.current_throbber,
        };
        choice.as_deref()
    }
}

impl std::fmt::Display for AnimationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnimationTarget::Boot => write!(f, "boot"),
            AnimationTarget::Suspend => write!(f, "suspend"),
            AnimationTarget::Throbber => write!(f, "throbber"),
        }
    }
}

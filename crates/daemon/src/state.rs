//! In-memory daemon state, owned by the event monitor.

use crate::target::AnimationTarget;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the daemon currently believes about the system and the override slots.
///
/// Never persisted; rebuilt from scratch on every start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonState {
    /// Whether the watched process was present at the last poll
    pub steam_running: bool,
    /// Set by a suspend event, cleared by the matching resume
    pub was_suspended: bool,
    /// Selected source clip of every attached target
    pub mounts: BTreeMap<AnimationTarget, PathBuf>,
    /// Set directory picked for the current boot in per-set mode
    pub active_set: Option<PathBuf>,
}

impl DaemonState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mounted(&self, target: AnimationTarget) -> Option<&Path> {
        self.mounts.get(&target).map(PathBuf::as_path)
    }

    /// Targets with something attached, in a stable order.
    pub fn mounted_targets(&self) -> Vec<AnimationTarget> {
        self.mounts.keys().copied().collect()
    }
}

//! Select, transcode and attach, for one target at a time.

use crate::mount::{MountError, MountManager};
use crate::selector::{AnimationSelector, SelectionKind};
use crate::state::DaemonState;
use crate::target::AnimationTarget;
use crate::transcode::{TranscodeError, TranscodeOutcome, Transcoder};
use std::path::PathBuf;
use steam_animation_config::Config;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a target could not be prepared this cycle. Other targets are unaffected.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{target}: source clip missing: {}", path.display())]
    SourceMissing {
        target: AnimationTarget,
        path: PathBuf,
    },

    #[error("{target}: {source}")]
    Transcode {
        target: AnimationTarget,
        #[source]
        source: TranscodeError,
    },

    #[error("{target}: {source}")]
    Mount {
        target: AnimationTarget,
        #[source]
        source: MountError,
    },
}

/// The full pipeline behind every state transition.
pub struct AnimationEngine {
    selector: AnimationSelector,
    transcoder: Transcoder,
    mounts: MountManager,
}

impl Default for AnimationEngine {
    fn default() -> Self {
        Self::new(
            AnimationSelector::new(),
            Transcoder::default(),
            MountManager::new(),
        )
    }
}

impl AnimationEngine {
    pub fn new(selector: AnimationSelector, transcoder: Transcoder, mounts: MountManager) -> Self {
        Self {
            selector,
            transcoder,
            mounts,
        }
    }

    /// Resolve, optimize and attach a clip for `target`.
    ///
    /// Returns the selected source, or `None` when nothing should be shown
    /// and the slot was left as it is.
    pub fn prepare(
        &mut self,
        target: AnimationTarget,
        config: &Config,
        state: &mut DaemonState,
    ) -> Result<Option<PathBuf>, ApplyError> {
        let Some(selection) = self.selector.select(target, config, &mut state.active_set) else {
            debug!("No animation selected for {}", target);
            return Ok(None);
        };

        if !selection.path.is_file() {
            return Err(ApplyError::SourceMissing {
                target,
                path: selection.path,
            });
        }

        let outcome = self
            .transcoder
            .optimize(&selection.path, target, config)
            .map_err(|source| match source {
                TranscodeError::SourceMissing(path) => ApplyError::SourceMissing { target, path },
                source => ApplyError::Transcode { target, source },
            })?;

        if let TranscodeOutcome::Fallback { reason, .. } = &outcome {
            warn!("{} uses the unoptimized clip ({})", target, reason);
        }

        let dest = target.destination(&config.paths.override_dir);
        // apply tears the slot down first, so a failure leaves it empty
        let mechanism = match self.mounts.apply(outcome.output(), &dest) {
            Ok(mechanism) => mechanism,
            Err(source) => {
                state.mounts.remove(&target);
                return Err(ApplyError::Mount { target, source });
            }
        };

        let how = match selection.kind {
            SelectionKind::Explicit => "configured",
            SelectionKind::Random => "random",
        };
        info!(
            "Applied {} {} animation {} ({})",
            how,
            target,
            selection.path.display(),
            mechanism
        );
        state.mounts.insert(target, selection.path.clone());
        Ok(Some(selection.path))
    }

    /// Detach `target` and forget it.
    pub fn teardown(
        &self,
        target: AnimationTarget,
        config: &Config,
        state: &mut DaemonState,
    ) -> Result<(), MountError> {
        self.mounts
            .teardown(&target.destination(&config.paths.override_dir))?;
        state.mounts.remove(&target);
        Ok(())
    }

    /// Detach all three targets, continuing past failures.
    pub fn teardown_all(
        &self,
        config: &Config,
        state: &mut DaemonState,
    ) -> Vec<(AnimationTarget, MountError)> {
        let mut failures = Vec::new();
        for target in AnimationTarget::ALL {
            if let Err(e) = self.teardown(target, config, state) {
                warn!("Failed to restore {}: {}", target, e);
                failures.push((target, e));
            }
        }
        state.active_set = None;
        failures
    }
}

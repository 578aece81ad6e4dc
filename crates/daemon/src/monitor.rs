//! Event monitor
//!
//! Owns [`DaemonState`] and turns observations (poll ticks, journal events,
//! reload and shutdown requests) into engine calls. Every handler is
//! synchronous and runs to completion before the next event is looked at.

use crate::engine::AnimationEngine;
use crate::janitor::{CacheJanitor, JanitorReport};
use crate::journal::SystemEvent;
use crate::process::ProcessProbe;
use crate::state::DaemonState;
use crate::target::AnimationTarget;
use steam_animation_config::Config;
use tracing::{debug, error, info};

/// Edge detected on the watched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessTransition {
    Started,
    Stopped,
}

pub struct EventMonitor {
    state: DaemonState,
    probe: Box<dyn ProcessProbe>,
    engine: AnimationEngine,
    ticks: u64,
}

impl EventMonitor {
    pub fn new(engine: AnimationEngine, probe: Box<dyn ProcessProbe>) -> Self {
        Self {
            state: DaemonState::new(),
            probe,
            engine,
            ticks: 0,
        }
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    fn prepare(&mut self, target: AnimationTarget, config: &Config) {
        if let Err(e) = self.engine.prepare(target, config, &mut self.state) {
            error!("Could not prepare {} animation: {}", target, e);
        }
    }

    fn teardown_all(&mut self, config: &Config) {
        let failures = self.engine.teardown_all(config, &mut self.state);
        if !failures.is_empty() {
            error!("{} override(s) could not be restored", failures.len());
        }
    }

    /// One poll tick: detect process edges, and run maintenance when due.
    pub fn on_tick(&mut self, config: &Config) -> Option<ProcessTransition> {
        self.ticks = self.ticks.wrapping_add(1);

        let running = self.probe.is_running(&config.monitor.process_name);
        let transition = match (self.state.steam_running, running) {
            (false, true) => Some(ProcessTransition::Started),
            (true, false) => Some(ProcessTransition::Stopped),
            _ => None,
        };
        self.state.steam_running = running;

        match transition {
            Some(ProcessTransition::Started) => {
                info!("{} started", config.monitor.process_name);
                self.prepare(AnimationTarget::Boot, config);
            }
            Some(ProcessTransition::Stopped) => {
                info!("{} stopped, restoring defaults", config.monitor.process_name);
                self.teardown_all(config);
            }
            None => {}
        }

        if self.ticks % config.monitor.maintenance_ticks.max(1) == 0 {
            self.run_maintenance(config);
        }

        transition
    }

    /// Bound the cache now.
    pub fn run_maintenance(&mut self, config: &Config) -> JanitorReport {
        let report = CacheJanitor::from_config(config).sweep();
        if report.removed_files() > 0 || report.failed_deletions > 0 {
            info!(
                "Cache maintenance removed {} file(s), {} bytes; {} bytes remain",
                report.removed_files(),
                report.removed_bytes,
                report.remaining_bytes
            );
        } else {
            debug!("Cache maintenance: nothing to remove");
        }
        report
    }

    /// Handle a classified journal event. Returns whether it caused any work.
    pub fn on_system_event(&mut self, event: SystemEvent, config: &Config) -> bool {
        match event {
            SystemEvent::Suspend => {
                info!("System suspending");
                self.state.was_suspended = true;
                self.prepare(AnimationTarget::Suspend, config);
                self.prepare(AnimationTarget::Throbber, config);
                true
            }
            SystemEvent::Resume if self.state.was_suspended => {
                info!("System resumed");
                self.state.was_suspended = false;
                self.prepare(AnimationTarget::Boot, config);
                true
            }
            SystemEvent::Resume => {
                debug!("Resume without a preceding suspend, ignoring");
                false
            }
        }
    }

    /// Re-derive every attached target from a freshly loaded config.
    ///
    /// A target the new config selects nothing for goes back to the default.
    /// When the override directory moved, the old destinations are detached
    /// against `previous` first.
    pub fn on_reload(&mut self, previous: &Config, config: &Config) {
        let targets = self.state.mounted_targets();
        info!("Configuration reloaded, refreshing {} target(s)", targets.len());

        if previous.paths.override_dir != config.paths.override_dir {
            info!(
                "Override directory moved from {} to {}",
                previous.paths.override_dir.display(),
                config.paths.override_dir.display()
            );
            for &target in &targets {
                if let Err(e) = self.engine.teardown(target, previous, &mut self.state) {
                    error!("Could not restore old {} override: {}", target, e);
                }
            }
        }

        for target in targets {
            match self.engine.prepare(target, config, &mut self.state) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!("Nothing selected for {} any more, restoring default", target);
                    if let Err(e) = self.engine.teardown(target, config, &mut self.state) {
                        error!("Could not restore {}: {}", target, e);
                    }
                }
                Err(e) => error!("Could not prepare {} animation: {}", target, e),
            }
        }
    }

    /// Restore all override slots before exit.
    pub fn shutdown(&mut self, config: &Config) {
        info!("Shutting down, restoring defaults");
        self.teardown_all(config);
    }
}

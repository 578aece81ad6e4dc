//! Daemon startup and main loop
//!
//! One `select!` loop multiplexes the poll interval, the journal event
//! channel, SIGHUP and the shutdown signal. Every handler runs to completion
//! on the loop, so [`EventMonitor`] never sees two events at once.

use crate::engine::AnimationEngine;
use crate::journal::{spawn_journal_listener, SystemEvent};
use crate::lock::{InstanceLock, LockError};
use crate::monitor::EventMonitor;
use crate::notify::{Notifier, READY, RELOADING, STOPPING};
use crate::process::SysinfoProbe;
use crate::startup::run_startup_checks;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use steam_animation_config::{Config, ConfigError, ConfigStore};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be loaded at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Another instance holds the lock
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A signal handler could not be installed
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    store: ConfigStore,
    monitor: EventMonitor,
    lock: InstanceLock,
    notifier: Notifier,
}

fn poll_interval(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_event(events: &mut Option<mpsc::Receiver<SystemEvent>>) -> Option<SystemEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Daemon {
    /// Initialize the daemon from a config file
    ///
    /// 1. Load (or create) the config file
    /// 2. Take the single-instance lock
    /// 3. Run the non-fatal startup checks
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let store = ConfigStore::open(config_path)?;
        let config = store.current();
        let lock = InstanceLock::acquire(&config.paths.lock_file)?;
        info!(
            "Config {} loaded, randomize mode {}",
            store.path().display(),
            config.animations.randomize_mode
        );

        run_startup_checks(&config);

        let monitor = EventMonitor::new(AnimationEngine::default(), Box::new(SysinfoProbe::new()));
        Ok(Self::from_parts(store, monitor, lock).with_notifier(Notifier::from_env()))
    }

    /// Assemble a daemon from already built components
    pub fn from_parts(store: ConfigStore, monitor: EventMonitor, lock: InstanceLock) -> Self {
        Self {
            store,
            monitor,
            lock,
            notifier: Notifier::default(),
        }
    }

    /// Report readiness and shutdown through `notifier`
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> std::sync::Arc<Config> {
        self.store.current()
    }

    /// Run until SIGTERM or SIGINT
    pub async fn run(self) -> Result<(), DaemonError> {
        let mut terminate = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;
        let mut interrupt = signal(SignalKind::interrupt()).map_err(DaemonError::Signal)?;
        self.run_until(async move {
            tokio::select! {
                _ = terminate.recv() => info!("Received SIGTERM"),
                _ = interrupt.recv() => info!("Received SIGINT"),
            }
        })
        .await
    }

    /// Run the event loop until `shutdown` resolves, then restore every
    /// override slot
    ///
    /// Must be called on a multi-threaded runtime; handlers block.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> Result<(), DaemonError> {
        let mut hangup = signal(SignalKind::hangup()).map_err(DaemonError::Signal)?;

        let config = self.store.current();
        let (tx, rx) = mpsc::channel(16);
        let journal = if config.monitor.journal_units.is_empty() {
            info!("No journal units configured, suspend/resume detection disabled");
            None
        } else {
            Some(spawn_journal_listener(config.monitor.clone(), tx))
        };
        let mut events = journal.as_ref().map(|_| rx);

        let mut period = config.poll_interval();
        let mut ticker = poll_interval(period);
        info!(
            "Watching for {} every {:?} (lock {})",
            config.monitor.process_name,
            period,
            self.lock.path().display()
        );

        self.notifier.notify(READY);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let config = self.store.current();
                    block_in_place(|| self.monitor.on_tick(&config));
                }
                event = next_event(&mut events) => match event {
                    Some(event) => {
                        let config = self.store.current();
                        block_in_place(|| self.monitor.on_system_event(event, &config));
                    }
                    None => {
                        warn!("Journal listener stopped; continuing with process polling only");
                        events = None;
                    }
                },
                _ = hangup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    self.notifier.notify(RELOADING);
                    let previous = self.store.current();
                    match self.store.reload() {
                        Ok(config) => {
                            block_in_place(|| self.monitor.on_reload(&previous, &config));
                            if config.poll_interval() != period {
                                period = config.poll_interval();
                                ticker = poll_interval(period);
                            }
                        }
                        Err(e) => error!("Reload failed, keeping previous configuration: {}", e),
                    }
                    self.notifier.notify(READY);
                }
                _ = &mut shutdown => break,
            }
        }

        self.notifier.notify(STOPPING);
        if let Some(handle) = journal {
            handle.abort();
        }
        let config = self.store.current();
        block_in_place(|| self.monitor.shutdown(&config));
        info!("Daemon stopped");
        Ok(())
    }
}

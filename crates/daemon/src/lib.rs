//! Steam animation daemon
//!
//! Watches the Steam client and the system's sleep transitions and swaps the
//! boot and suspend movies the client plays for configured or randomly
//! chosen clips, transcoded to fit and cached.

pub mod daemon;
pub mod engine;
pub mod janitor;
pub mod journal;
pub mod lock;
pub mod monitor;
pub mod mount;
pub mod notify;
pub mod process;
pub mod selector;
pub mod startup;
pub mod state;
pub mod target;
pub mod transcode;

pub use daemon::{Daemon, DaemonError};
pub use engine::{AnimationEngine, ApplyError};
pub use janitor::{CacheJanitor, JanitorReport};
pub use journal::{classify_line, spawn_journal_listener, SystemEvent};
pub use lock::{read_pid, running_pid, InstanceLock, LockError};
pub use monitor::{EventMonitor, ProcessTransition};
pub use mount::{BindMount, CopyFile, MountError, MountManager, MountStrategy, Symlink};
pub use process::{ProcessProbe, SysinfoProbe};
pub use selector::{AnimationSelector, Candidate, Selection, SelectionKind};
pub use startup::{run_startup_checks, StartupError};
pub use state::DaemonState;
pub use steam_animation_config as config;
pub use steam_animation_config::Config;
pub use target::AnimationTarget;
pub use transcode::{TranscodeError, TranscodeOutcome, Transcoder};

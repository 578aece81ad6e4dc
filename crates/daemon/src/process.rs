//! Process presence detection.

use std::ffi::OsStr;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Answers whether a process with a given name currently exists.
pub trait ProcessProbe: Send {
    fn is_running(&mut self, name: &str) -> bool;
}

/// Exact comparison; "steam" must not match "steamwebhelper" or this daemon.
fn name_matches<S: AsRef<OsStr> + ?Sized>(actual: &S, wanted: &str) -> bool {
    actual.as_ref() == OsStr::new(wanted)
}

/// Process table lookup through sysinfo.
pub struct SysinfoProbe {
    system: System,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        Self { system }
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_running(&mut self, name: &str) -> bool {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::new());
        self.system
            .processes()
            .values()
            .any(|process| name_matches(process.name(), name))
    }
}

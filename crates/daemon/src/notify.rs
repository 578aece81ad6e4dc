//! Service manager readiness notifications.
//!
//! When started by systemd with `Type=notify`, `NOTIFY_SOCKET` names a
//! datagram socket that takes newline separated `KEY=VALUE` assignments.
//! Without it every call is a no-op.

use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use tracing::{debug, warn};

pub const READY: &str = "READY=1";
pub const STOPPING: &str = "STOPPING=1";
pub const RELOADING: &str = "RELOADING=1";

/// Where readiness notifications go, if anywhere.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    socket: Option<OsString>,
}

impl Notifier {
    pub fn new(socket: Option<OsString>) -> Self {
        Self { socket }
    }

    /// The socket named by `NOTIFY_SOCKET`, if set.
    pub fn from_env() -> Self {
        Self::new(env::var_os("NOTIFY_SOCKET"))
    }

    /// Send `state`. Failures are logged and otherwise ignored.
    pub fn notify(&self, state: &str) {
        let Some(socket) = &self.socket else {
            return;
        };
        match send(socket, state) {
            Ok(()) => debug!("Notified service manager: {}", state),
            Err(e) => warn!("Service manager notification {} failed: {}", state, e),
        }
    }
}

/// Send one notification datagram to `socket`. A leading `@` selects the
/// abstract namespace.
pub fn send(socket: &OsStr, state: &str) -> io::Result<()> {
    let addr = match socket.as_bytes() {
        [b'@', name @ ..] => SocketAddr::from_abstract_name(name)?,
        [] => return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty NOTIFY_SOCKET")),
        _ => SocketAddr::from_pathname(socket)?,
    };
    let sender = UnixDatagram::unbound()?;
    sender.send_to_addr(state.as_bytes(), &addr)?;
    Ok(())
}

//! Suspend/resume detection from the systemd journal.
//!
//! A background task follows `journalctl` for the sleep units and forwards
//! classified lines over a channel. It never touches daemon state itself.

use std::process::Stdio;
use steam_animation_config::MonitorConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A power transition seen in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    Suspend,
    Resume,
}

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| haystack.contains(&k))
}

/// Classify one journal line; resume keywords win over suspend keywords.
pub fn classify_line(line: &str, monitor: &MonitorConfig) -> Option<SystemEvent> {
    let lower = line.to_lowercase();
    if contains_any(&lower, &monitor.resume_keywords) {
        Some(SystemEvent::Resume)
    } else if contains_any(&lower, &monitor.suspend_keywords) {
        Some(SystemEvent::Suspend)
    } else {
        None
    }
}

/// `journalctl -f -n 0 -o cat -u <unit>...`
pub fn journal_command(monitor: &MonitorConfig) -> Command {
    let mut cmd = Command::new("journalctl");
    cmd.args(["-f", "-n", "0", "-o", "cat"]);
    for unit in &monitor.journal_units {
        cmd.arg("-u").arg(unit);
    }
    cmd
}

/// Follow the journal until the stream ends, the receiver goes away or the
/// task is aborted. Dropping the task kills `journalctl`.
pub fn spawn_journal_listener(
    monitor: MonitorConfig,
    tx: mpsc::Sender<SystemEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut child = match journal_command(&monitor)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "Cannot follow the journal ({}); suspend/resume will not be detected",
                    e
                );
                return;
            }
        };

        let Some(stdout) = child.stdout.take() else {
            warn!("journalctl has no stdout; suspend/resume will not be detected");
            return;
        };
        info!("Watching journal units: {}", monitor.journal_units.join(", "));

        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(event) = classify_line(&line, &monitor) else {
                        continue;
                    };
                    debug!("Journal: {:?} from {:?}", event, line);
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    warn!("Journal stream ended; continuing with process polling only");
                    break;
                }
                Err(e) => {
                    warn!(
                        "Journal stream failed ({}); continuing with process polling only",
                        e
                    );
                    break;
                }
            }
        }

        let _ = child.kill().await;
    })
}

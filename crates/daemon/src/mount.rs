//! Attaching optimized clips to the override paths.
//!
//! A destination is attached with the first mechanism that works out of an
//! ordered list (bind mount, symlink, copy) and detached by undoing whichever
//! one is present.

use crate::transcode::copy_replace;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const MOUNTINFO: &str = "/proc/self/mountinfo";
const MAX_STACKED_MOUNTS: usize = 8;

/// Errors from attaching or detaching a destination.
#[derive(Debug, Error)]
pub enum MountError {
    /// Every mechanism failed for this destination.
    #[error("all mount mechanisms failed for {}: {}", dest.display(), describe(attempts))]
    AllStrategiesFailed {
        dest: PathBuf,
        attempts: Vec<(&'static str, io::Error)>,
    },

    /// Whatever was attached could not be removed.
    #[error("failed to tear down {}: {source}", dest.display())]
    Teardown {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The destination directory could not be created.
    #[error("failed to prepare {}: {source}", dir.display())]
    Prepare {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn describe(attempts: &[(&'static str, io::Error)]) -> String {
    attempts
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One way of making `source` visible at `dest`.
pub trait MountStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attach `source` at `dest`. `dest` does not exist when this is called.
    fn attach(&self, source: &Path, dest: &Path) -> io::Result<()>;
}

/// Kernel bind mount over an empty placeholder file. Needs CAP_SYS_ADMIN.
#[derive(Debug, Default, Clone, Copy)]
pub struct BindMount;

impl MountStrategy for BindMount {
    fn name(&self) -> &'static str {
        "bind mount"
    }

    fn attach(&self, source: &Path, dest: &Path) -> io::Result<()> {
        File::create(dest)?;
        if let Err(errno) = mount(
            Some(source),
            dest,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        ) {
            let _ = fs::remove_file(dest);
            return Err(io::Error::from(errno));
        }
        Ok(())
    }
}

/// Symbolic link from the destination to the (absolute) source.
#[derive(Debug, Default, Clone, Copy)]
pub struct Symlink;

impl MountStrategy for Symlink {
    fn name(&self) -> &'static str {
        "symlink"
    }

    fn attach(&self, source: &Path, dest: &Path) -> io::Result<()> {
        let target = fs::canonicalize(source)?;
        symlink(target, dest)
    }
}

/// Plain copy; always works given space, but no longer tracks the source.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyFile;

impl MountStrategy for CopyFile {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn attach(&self, source: &Path, dest: &Path) -> io::Result<()> {
        copy_replace(source, dest)
    }
}

/// The default mechanism order.
pub fn default_strategies() -> Vec<Box<dyn MountStrategy>> {
    vec![Box::new(BindMount), Box::new(Symlink), Box::new(CopyFile)]
}

/// Undo the escaping the kernel applies to paths in mountinfo (`\040` etc).
fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(b) = u8::try_from(value) {
                    out.push(b);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount points listed in a mountinfo document.
pub fn parse_mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape_mountinfo(field)))
        .collect()
}

/// Whether `path` is itself a mount point of the current namespace.
///
/// The parent directory is canonicalized (the override dir usually sits
/// behind `~/.steam/root` symlinks) but the final component is not, so a
/// symlink at `path` is never mistaken for its target.
pub fn is_mount_point(path: &Path) -> bool {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return false;
    };
    let Ok(parent) = fs::canonicalize(parent) else {
        return false;
    };
    let resolved = parent.join(name);

    match fs::read_to_string(MOUNTINFO) {
        Ok(info) => parse_mount_points(&info).iter().any(|p| *p == resolved),
        Err(_) => false,
    }
}

/// Unmount `dest` until nothing is mounted there any more.
///
/// Bind mounts can stack on one path, and each `umount2` only pops the top
/// one. Gives up after [`MAX_STACKED_MOUNTS`] layers. Returns how many were
/// removed.
fn unmount_stacked(
    dest: &Path,
    mut is_mounted: impl FnMut(&Path) -> bool,
    mut unmount: impl FnMut(&Path) -> io::Result<()>,
) -> Result<usize, MountError> {
    let mut count = 0;
    while is_mounted(dest) {
        if count == MAX_STACKED_MOUNTS {
            return Err(MountError::Teardown {
                dest: dest.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::Other,
                    format!("still mounted after {} unmounts", MAX_STACKED_MOUNTS),
                ),
            });
        }
        unmount(dest).map_err(|source| MountError::Teardown {
            dest: dest.to_path_buf(),
            source,
        })?;
        count += 1;
    }
    if count > 1 {
        debug!("Removed {} stacked mounts from {}", count, dest.display());
    }
    Ok(count)
}

/// Attaches and detaches clips at destination paths.
pub struct MountManager {
    strategies: Vec<Box<dyn MountStrategy>>,
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MountManager {
    /// Manager using bind mount, then symlink, then copy.
    pub fn new() -> Self {
        Self::with_strategies(default_strategies())
    }

    pub fn with_strategies(strategies: Vec<Box<dyn MountStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the mechanisms, in the order they are tried.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Tear down `dest`, then attach `source` with the first mechanism that works.
    ///
    /// Returns the name of the mechanism used.
    pub fn apply(&self, source: &Path, dest: &Path) -> Result<&'static str, MountError> {
        self.teardown(dest)?;

        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir).map_err(|source| MountError::Prepare {
                dir: dir.to_path_buf(),
                source,
            })?;
        }

        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            match strategy.attach(source, dest) {
                Ok(()) => {
                    info!(
                        "Attached {} -> {} via {}",
                        dest.display(),
                        source.display(),
                        strategy.name()
                    );
                    return Ok(strategy.name());
                }
                Err(e) => {
                    debug!("{} failed for {}: {}", strategy.name(), dest.display(), e);
                    // a failed attempt must not leave anything for the next one to trip over
                    if fs::symlink_metadata(dest).is_ok() && !is_mount_point(dest) {
                        let _ = fs::remove_file(dest);
                    }
                    attempts.push((strategy.name(), e));
                }
            }
        }

        Err(MountError::AllStrategiesFailed {
            dest: dest.to_path_buf(),
            attempts,
        })
    }

    /// Detach whatever is at `dest`. A no-op when nothing is there.
    ///
    /// Returns whether anything was removed.
    pub fn teardown(&self, dest: &Path) -> Result<bool, MountError> {
        let mut removed = false;

        let unmounted = unmount_stacked(dest, is_mount_point, |path| {
            umount2(path, MntFlags::MNT_DETACH).map_err(io::Error::from)
        })?;
        if unmounted > 0 {
            removed = true;
        }

        match fs::symlink_metadata(dest) {
            Ok(_) => {
                fs::remove_file(dest).map_err(|source| MountError::Teardown {
                    dest: dest.to_path_buf(),
                    source,
                })?;
                removed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(MountError::Teardown {
                    dest: dest.to_path_buf(),
                    source,
                })
            }
        }

        if removed {
            debug!("Tore down {}", dest.display());
        }
        Ok(removed)
    }
}

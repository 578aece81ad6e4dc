//! Startup checks
//!
//! Preflight checks run before the daemon starts its loop:
//! - ffmpeg availability and version
//! - the VP9 and Opus encoders the transcoder needs
//! - the directories the daemon reads from and writes to
//!
//! None of these are fatal. A missing ffmpeg means every transcode falls
//! back to the original clip.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use steam_animation_config::Config;
use thiserror::Error;
use tracing::{info, warn};

/// Encoders the transcode command line relies on
const REQUIRED_ENCODERS: &[&str] = &["libvpx-vp9", "libopus"];

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("ffmpeg lacks required encoders: {}", .0.join(", "))]
    MissingEncoders(Vec<&'static str>),

    #[error("cannot create {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse ffmpeg `-version` output and extract the major version number
///
/// Handles both release strings ("ffmpeg version 6.1.1 ...") and git builds
/// ("ffmpeg version n6.1-3-gabcdef ...").
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    version_part
        .trim_start_matches('n')
        .split(|c| c == '.' || c == '-')
        .next()?
        .parse()
        .ok()
}

/// Encoders from `wanted` that do not appear in `ffmpeg -encoders` output
pub fn missing_encoders(encoders_output: &str, wanted: &[&'static str]) -> Vec<&'static str> {
    wanted
        .iter()
        .copied()
        .filter(|name| {
            !encoders_output
                .lines()
                .filter_map(|line| line.split_whitespace().nth(1))
                .any(|listed| listed == *name)
        })
        .collect()
}

fn run_ffmpeg(ffmpeg: &Path, args: &[&str]) -> Result<String, StartupError> {
    let output = Command::new(ffmpeg).args(args).output().map_err(|e| {
        StartupError::FfmpegUnavailable(format!(
            "{} {} failed; is ffmpeg installed and in PATH? Error: {}",
            ffmpeg.display(),
            args.join(" "),
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} {} exited with {}",
            ffmpeg.display(),
            args.join(" "),
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Probe `ffmpeg -version`; returns the major version when it can be parsed
pub fn check_ffmpeg_available(ffmpeg: &Path) -> Result<Option<u32>, StartupError> {
    let output = run_ffmpeg(ffmpeg, &["-version"])?;
    Ok(parse_ffmpeg_version(&output))
}

/// Probe `ffmpeg -encoders` for the VP9 and Opus encoders
pub fn check_required_encoders(ffmpeg: &Path) -> Result<(), StartupError> {
    let output = run_ffmpeg(ffmpeg, &["-hide_banner", "-encoders"])?;
    let missing = missing_encoders(&output, REQUIRED_ENCODERS);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StartupError::MissingEncoders(missing))
    }
}

/// Create every directory the daemon works in
pub fn ensure_directories(config: &Config) -> Result<(), StartupError> {
    for dir in config.required_dirs() {
        fs::create_dir_all(dir).map_err(|source| StartupError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Run all startup checks, logging instead of failing
///
/// Returns whether ffmpeg is usable.
pub fn run_startup_checks(config: &Config) -> bool {
    if let Err(e) = ensure_directories(config) {
        warn!("{}", e);
    }

    let ffmpeg = &config.transcode.ffmpeg_path;
    match check_ffmpeg_available(ffmpeg) {
        Ok(Some(major)) => info!("Found ffmpeg {}", major),
        Ok(None) => info!("Found ffmpeg (unrecognized version string)"),
        Err(e) => {
            warn!("{}; clips will be used without optimization", e);
            return false;
        }
    }

    if let Err(e) = check_required_encoders(ffmpeg) {
        warn!("{}; transcodes will likely fall back to the original clips", e);
    }
    true
}

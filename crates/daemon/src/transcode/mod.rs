//! Transcode-and-cache pipeline
//!
//! Turns a selected clip into the file that gets attached to an override
//! target. Cache hits skip the encoder entirely; an unavailable or failing
//! encoder degrades to the untouched source instead of failing the mount.

pub mod cache;
pub mod ffmpeg;

pub use cache::{cache_key, cache_key_for, copy_replace};
pub use ffmpeg::{
    build_ffmpeg_command, EncodeError, EncodeParams, Encoder, FfmpegEncoder, TranscodeSettings,
};

use crate::target::AnimationTarget;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use steam_animation_config::Config;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hard failures; encoder problems are not errors, see [`TranscodeOutcome::Fallback`]
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The selected clip vanished before it could be read
    #[error("source clip missing: {0}")]
    SourceMissing(PathBuf),

    /// The cache or staging area could not be written
    #[error("failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What the transcoder produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// A previous encode was reused
    CacheHit { output: PathBuf, key: String },
    /// The encoder ran and its result was cached
    Encoded { output: PathBuf, key: String },
    /// The encoder was unavailable or failed; `output` is the original source,
    /// so duration and resolution limits do not hold for it
    Fallback { output: PathBuf, reason: String },
}

impl TranscodeOutcome {
    /// File to attach to the override target
    pub fn output(&self) -> &Path {
        match self {
            TranscodeOutcome::CacheHit { output, .. }
            | TranscodeOutcome::Encoded { output, .. }
            | TranscodeOutcome::Fallback { output, .. } => output,
        }
    }

    pub fn is_optimized(&self) -> bool {
        !matches!(self, TranscodeOutcome::Fallback { .. })
    }
}

/// Produces optimized clips with content-addressed caching
pub struct Transcoder {
    encoder: Box<dyn Encoder>,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(Box::new(FfmpegEncoder))
    }
}

impl Transcoder {
    pub fn new(encoder: Box<dyn Encoder>) -> Self {
        Self { encoder }
    }

    /// Optimize `source` for `target` using the settings in `config`
    ///
    /// The result is staged at `<staging_dir>/<target file name>` unless the
    /// encoder failed, in which case the source itself is returned.
    pub fn optimize(
        &self,
        source: &Path,
        target: AnimationTarget,
        config: &Config,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let settings = TranscodeSettings::from_config(config);
        let key = cache_key_for(source, &settings)
            .map_err(|_| TranscodeError::SourceMissing(source.to_path_buf()))?;

        let cache_dir = &config.paths.cache_dir;
        let entry = cache::entry_path(cache_dir, &key);
        let staged = config.paths.staging_dir.join(target.file_name());

        if entry.is_file() {
            debug!("Cache hit for {} ({})", source.display(), key);
            if let Err(e) = cache::touch(&entry) {
                debug!("Could not touch cache entry {}: {}", entry.display(), e);
            }
            stage(&entry, &staged)?;
            return Ok(TranscodeOutcome::CacheHit {
                output: staged,
                key,
            });
        }

        fs::create_dir_all(cache_dir).map_err(|source| TranscodeError::Stage {
            path: cache_dir.clone(),
            source,
        })?;

        info!("Optimizing {} for {}", source.display(), target);
        let partial = cache::partial_path(cache_dir, &key);
        let params = EncodeParams::new(source.to_path_buf(), partial.clone(), settings);

        if let Err(e) = self.encoder.encode(&params).and_then(|()| {
            fs::rename(&partial, &entry).map_err(EncodeError::Io)
        }) {
            let _ = fs::remove_file(&partial);
            warn!(
                "Transcode of {} failed, using the original clip: {}",
                source.display(),
                e
            );
            return Ok(TranscodeOutcome::Fallback {
                output: source.to_path_buf(),
                reason: e.to_string(),
            });
        }

        stage(&entry, &staged)?;
        info!("Cached optimized clip {}", entry.display());
        Ok(TranscodeOutcome::Encoded {
            output: staged,
            key,
        })
    }
}

fn stage(entry: &Path, staged: &Path) -> Result<(), TranscodeError> {
    copy_replace(entry, staged).map_err(|source| TranscodeError::Stage {
        path: staged.to_path_buf(),
        source,
    })
}

/// Test doubles shared by the daemon's unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes a marker derived from the input instead of running ffmpeg.
    #[derive(Clone, Default)]
    pub struct FakeEncoder {
        pub calls: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl FakeEncoder {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Encoder for FakeEncoder {
        fn encode(&self, params: &EncodeParams) -> Result<(), EncodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EncodeError::FfmpegFailed {
                    code: 1,
                    stderr: "invalid data found when processing input".to_string(),
                });
            }
            let input = fs::read(&params.input_path)?;
            let mut out = format!(
                "encoded t={} {}x{} crf={}:",
                params.settings.max_duration_secs,
                params.settings.target_width,
                params.settings.target_height,
                params.settings.video_quality
            )
            .into_bytes();
            out.extend_from_slice(&input);
            fs::write(&params.output_path, out)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeEncoder;
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.paths.cache_dir = root.join("cache");
        config.paths.staging_dir = root.join("staging");
        config
    }

    #[test]
    fn test_second_transcode_is_byte_identical_cache_hit() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path());
        config.transcode.max_duration_secs = 5;
        let source = temp_dir.path().join("deck_startup.webm");
        fs::write(&source, b"twelve second clip").unwrap();

        let encoder = FakeEncoder::default();
        let transcoder = Transcoder::new(Box::new(encoder.clone()));

        let first = transcoder
            .optimize(&source, AnimationTarget::Boot, &config)
            .unwrap();
        assert!(matches!(first, TranscodeOutcome::Encoded { .. }));
        let first_bytes = fs::read(first.output()).unwrap();
        assert!(first_bytes.starts_with(b"encoded t=5 "));

        let second = transcoder
            .optimize(&source, AnimationTarget::Boot, &config)
            .unwrap();
        assert!(matches!(second, TranscodeOutcome::CacheHit { .. }));
        assert_eq!(fs::read(second.output()).unwrap(), first_bytes);
        assert_eq!(encoder.call_count(), 1);
    }

    #[test]
    fn test_changed_mtime_misses_cache() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let source = temp_dir.path().join("clip.webm");
        fs::write(&source, b"clip").unwrap();

        let encoder = FakeEncoder::default();
        let transcoder = Transcoder::new(Box::new(encoder.clone()));
        transcoder
            .optimize(&source, AnimationTarget::Suspend, &config)
            .unwrap();

        let later = SystemTime::now() + Duration::from_secs(60);
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let outcome = transcoder
            .optimize(&source, AnimationTarget::Suspend, &config)
            .unwrap();
        assert!(matches!(outcome, TranscodeOutcome::Encoded { .. }));
        assert_eq!(encoder.call_count(), 2);
    }

    #[test]
    fn test_encoder_failure_falls_back_to_source() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let source = temp_dir.path().join("broken.webm");
        fs::write(&source, b"not a video").unwrap();

        let transcoder = Transcoder::new(Box::new(FakeEncoder::failing()));
        let outcome = transcoder
            .optimize(&source, AnimationTarget::Boot, &config)
            .unwrap();

        assert!(!outcome.is_optimized());
        assert_eq!(outcome.output(), source.as_path());

        // nothing half-written stays in the cache
        let entries: Vec<_> = fs::read_dir(&config.paths.cache_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let transcoder = Transcoder::new(Box::new(FakeEncoder::default()));

        let result = transcoder.optimize(
            &temp_dir.path().join("gone.webm"),
            AnimationTarget::Boot,
            &config,
        );
        assert!(matches!(result, Err(TranscodeError::SourceMissing(_))));
    }

    #[test]
    fn test_staged_output_is_named_after_target() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let source = temp_dir.path().join("anything.webm");
        fs::write(&source, b"clip").unwrap();

        let transcoder = Transcoder::new(Box::new(FakeEncoder::default()));
        let outcome = transcoder
            .optimize(&source, AnimationTarget::Throbber, &config)
            .unwrap();
        assert_eq!(
            outcome.output(),
            config
                .paths
                .staging_dir
                .join("steam_os_suspend_from_throbber.webm")
        );
    }
}

//! Content-addressed cache of transcoded clips.
//!
//! Entries are named by a key derived from the source's identity (path, size,
//! modification time) and the transcode settings, so an edited source or a
//! settings change always misses.

use super::ffmpeg::TranscodeSettings;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hex characters kept from the digest.
const KEY_LEN: usize = 16;

/// Extension of finished cache entries
pub const ENTRY_EXTENSION: &str = "webm";

/// Derive the cache key for a source clip.
pub fn cache_key(
    source: &Path,
    size_bytes: u64,
    modified: SystemTime,
    settings: &TranscodeSettings,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_os_str().as_bytes());
    hasher.update(size_bytes.to_le_bytes());

    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    hasher.update(since_epoch.as_secs().to_le_bytes());
    hasher.update(since_epoch.subsec_nanos().to_le_bytes());

    hasher.update(settings.max_duration_secs.to_le_bytes());
    hasher.update(settings.video_quality.to_le_bytes());
    hasher.update(settings.target_width.to_le_bytes());
    hasher.update(settings.target_height.to_le_bytes());

    let digest = hasher.finalize();
    let mut key = String::with_capacity(KEY_LEN);
    for b in digest.iter().take(KEY_LEN / 2) {
        key.push_str(&format!("{:02x}", b));
    }
    key
}

/// Key for the file at `source`, reading its metadata.
pub fn cache_key_for(source: &Path, settings: &TranscodeSettings) -> io::Result<String> {
    let metadata = fs::metadata(source)?;
    let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
    Ok(cache_key(source, metadata.len(), modified, settings))
}

/// Path of the finished entry for `key`.
pub fn entry_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
}

/// Path the encoder writes to before the entry is published.
pub fn partial_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(format!("{}.partial.{}", key, ENTRY_EXTENSION))
}

/// Bump an entry's mtime so age-ordered eviction treats it as recently used.
pub fn touch(path: &Path) -> io::Result<()> {
    File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

/// Copy `from` to `to` through a temporary sibling and a rename.
///
/// `to` is replaced by a new inode, so anything still bound to the old file
/// keeps seeing the old content.
pub fn copy_replace(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = to.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(e) = fs::copy(from, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, to) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use steam_animation_config::Config;
    use tempfile::TempDir;

    fn settings() -> TranscodeSettings {
        TranscodeSettings::from_config(&Config::default())
    }

    // *For any* fixed (path, size, mtime) the key is stable; a different mtime
    // yields a different key.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_cache_key_stable_and_mtime_sensitive(
            path in "/[a-z]{1,10}/[a-z]{1,10}\\.webm",
            size in any::<u64>(),
            secs in 0u64..4_000_000_000,
            delta in 1u64..1_000_000,
        ) {
            let mtime = UNIX_EPOCH + Duration::from_secs(secs);
            let later = mtime + Duration::from_secs(delta);
            let s = settings();

            let a = cache_key(Path::new(&path), size, mtime, &s);
            let b = cache_key(Path::new(&path), size, mtime, &s);
            let c = cache_key(Path::new(&path), size, later, &s);

            prop_assert_eq!(a.len(), KEY_LEN);
            prop_assert_eq!(&a, &b);
            prop_assert_ne!(&a, &c);
        }
    }

    #[test]
    fn test_settings_change_misses() {
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let path = Path::new("/a/deck_startup.webm");
        let base = settings();
        let mut longer = base.clone();
        longer.max_duration_secs = 10;

        assert_ne!(
            cache_key(path, 10, mtime, &base),
            cache_key(path, 10, mtime, &longer)
        );
    }

    #[test]
    fn test_ffmpeg_path_does_not_affect_key() {
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let path = Path::new("/a/deck_startup.webm");
        let base = settings();
        let mut other = base.clone();
        other.ffmpeg_path = PathBuf::from("/usr/local/bin/ffmpeg");

        assert_eq!(
            cache_key(path, 10, mtime, &base),
            cache_key(path, 10, mtime, &other)
        );
    }

    #[test]
    fn test_entry_and_partial_paths() {
        let dir = Path::new("/cache");
        assert_eq!(entry_path(dir, "abc"), PathBuf::from("/cache/abc.webm"));
        assert_eq!(
            partial_path(dir, "abc"),
            PathBuf::from("/cache/abc.partial.webm")
        );
    }

    #[test]
    fn test_copy_replace_creates_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("from.webm");
        let to = temp_dir.path().join("staging").join("to.webm");
        fs::write(&from, b"clip").unwrap();

        copy_replace(&from, &to).unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"clip");

        fs::write(&from, b"newer clip").unwrap();
        copy_replace(&from, &to).unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"newer clip");

        // no temporary file left behind
        let leftovers: Vec<_> = fs::read_dir(to.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_copy_replace_missing_source_fails_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        let to = temp_dir.path().join("to.webm");
        assert!(copy_replace(&temp_dir.path().join("missing.webm"), &to).is_err());
        assert!(!to.exists());
    }

    #[test]
    fn test_touch_updates_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("entry.webm");
        fs::write(&path, b"x").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        touch(&path).unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified > old + Duration::from_secs(1800));
    }
}

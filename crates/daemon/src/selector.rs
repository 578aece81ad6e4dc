//! Animation selection.
//!
//! Resolves which clip should be attached to a target next: an explicitly
//! configured clip wins, otherwise a random candidate is drawn from the
//! animation sets (and, for the boot target, the downloads directory).

use crate::target::AnimationTarget;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use steam_animation_config::{Config, RandomizeMode};
use tracing::debug;
use walkdir::WalkDir;

/// Extensions accepted from the downloads directory (case-insensitive).
pub const CLIP_EXTENSIONS: &[&str] = &[".webm"];

/// A clip that may be picked at random.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Full path to the clip.
    pub path: PathBuf,
    /// Path relative to the animations or downloads root, `/`-separated.
    pub relative: String,
    /// Name of the animation set directory, `None` for downloads.
    pub set_name: Option<String>,
}

impl Candidate {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// An exclusion entry matches the file name, the relative path or the set name.
    pub fn is_excluded(&self, exclusions: &[String]) -> bool {
        exclusions.iter().map(|e| e.trim()).any(|e| {
            e == self.file_name()
                || e == self.relative
                || self.set_name.as_deref() == Some(e)
        })
    }
}

/// Where a selection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    Explicit,
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub path: PathBuf,
    pub kind: SelectionKind,
}

/// Checks if a file has a clip extension (case-insensitive).
pub fn is_clip_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            CLIP_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Lists visible animation set directories, sorted by name.
pub fn scan_sets(animations_dir: &Path) -> Vec<PathBuf> {
    let mut sets: Vec<PathBuf> = WalkDir::new(animations_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| !e.file_name().to_str().map(is_hidden).unwrap_or(true))
        .map(|e| e.into_path())
        .collect();
    sets.sort();
    sets
}

fn set_clip(animations_dir: &Path, set_dir: &Path, target: AnimationTarget) -> Option<Candidate> {
    let path = set_dir.join(target.file_name());
    if !path.is_file() {
        return None;
    }
    let set_name = set_dir.file_name()?.to_str()?.to_string();
    let relative = path
        .strip_prefix(animations_dir)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| format!("{}/{}", set_name, target.file_name()));
    Some(Candidate {
        path,
        relative,
        set_name: Some(set_name),
    })
}

/// Collects every set's clip for `target`.
pub fn scan_set_clips(animations_dir: &Path, target: AnimationTarget) -> Vec<Candidate> {
    scan_sets(animations_dir)
        .iter()
        .filter_map(|set| set_clip(animations_dir, set, target))
        .collect()
}

/// Collects downloaded clips (flat directory, hidden files skipped).
pub fn scan_downloads(downloads_dir: &Path) -> Vec<Candidate> {
    let mut clips: Vec<Candidate> = WalkDir::new(downloads_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_clip_file(e.path()))
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            if is_hidden(&name) {
                return None;
            }
            Some(Candidate {
                path: e.into_path(),
                relative: name,
                set_name: None,
            })
        })
        .collect();
    clips.sort_by(|a, b| a.path.cmp(&b.path));
    clips
}

/// Resolves an explicit choice to an existing file.
///
/// Relative paths are tried against the animations dir, then the downloads dir.
pub fn resolve_explicit(config: &Config, choice: &Path) -> Option<PathBuf> {
    if choice.as_os_str().is_empty() {
        return None;
    }
    if choice.is_absolute() {
        return choice.is_file().then(|| choice.to_path_buf());
    }
    [&config.paths.animations_dir, &config.paths.downloads_dir]
        .iter()
        .map(|root| root.join(choice))
        .find(|p| p.is_file())
}

/// Picks clips for targets.
pub struct AnimationSelector {
    rng: StdRng,
}

impl Default for AnimationSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationSelector {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic selector for tests and reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Random candidates for `target`, exclusions already removed.
    pub fn candidates(config: &Config, target: AnimationTarget) -> Vec<Candidate> {
        let mut candidates = scan_set_clips(&config.paths.animations_dir, target);
        if target == AnimationTarget::Boot {
            candidates.extend(scan_downloads(&config.paths.downloads_dir));
        }
        candidates.retain(|c| !c.is_excluded(&config.animations.shuffle_exclusions));
        candidates
    }

    /// Returns the clip to show for `target`, or `None` to leave it untouched.
    ///
    /// `active_set` carries the set chosen for the current boot in
    /// [`RandomizeMode::PerSet`]; it is updated when a boot clip is drawn.
    pub fn select(
        &mut self,
        target: AnimationTarget,
        config: &Config,
        active_set: &mut Option<PathBuf>,
    ) -> Option<Selection> {
        if let Some(choice) = target.configured_path(config) {
            match resolve_explicit(config, choice) {
                Some(path) => {
                    return Some(Selection {
                        path,
                        kind: SelectionKind::Explicit,
                    })
                }
                None => debug!(
                    "Configured {} animation {} does not exist, ignoring",
                    target,
                    choice.display()
                ),
            }
        }

        let path = match config.animations.randomize_mode {
            RandomizeMode::Disabled => None,
            RandomizeMode::PerBoot => self.pick(Self::candidates(config, target)),
            RandomizeMode::PerSet => self.pick_from_set(target, config, active_set),
        }?;

        Some(Selection {
            path,
            kind: SelectionKind::Random,
        })
    }

    fn pick(&mut self, candidates: Vec<Candidate>) -> Option<PathBuf> {
        candidates.choose(&mut self.rng).map(|c| c.path.clone())
    }

    fn pick_from_set(
        &mut self,
        target: AnimationTarget,
        config: &Config,
        active_set: &mut Option<PathBuf>,
    ) -> Option<PathBuf> {
        let animations_dir = &config.paths.animations_dir;
        let exclusions = &config.animations.shuffle_exclusions;

        if target == AnimationTarget::Boot {
            let sets: Vec<Candidate> = scan_set_clips(animations_dir, target)
                .into_iter()
                .filter(|c| !c.is_excluded(exclusions))
                .collect();
            let chosen = sets.choose(&mut self.rng).cloned();
            *active_set = chosen
                .as_ref()
                .and_then(|c| c.path.parent().map(Path::to_path_buf));
            return chosen.map(|c| c.path);
        }

        if let Some(set_dir) = active_set.as_deref() {
            if let Some(clip) = set_clip(animations_dir, set_dir, target) {
                if !clip.is_excluded(exclusions) {
                    return Some(clip.path);
                }
            }
        }

        // the active set has no usable clip for this target
        let candidates = scan_set_clips(animations_dir, target)
            .into_iter()
            .filter(|c| !c.is_excluded(exclusions))
            .collect();
        self.pick(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    struct Layout {
        _temp: TempDir,
        config: Config,
    }

    impl Layout {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let mut config = Config::default();
            config.paths.animations_dir = temp.path().join("animations");
            config.paths.downloads_dir = temp.path().join("downloads");
            fs::create_dir_all(&config.paths.animations_dir).unwrap();
            fs::create_dir_all(&config.paths.downloads_dir).unwrap();
            Self {
                _temp: temp,
                config,
            }
        }

        fn add_set_clip(&self, set: &str, target: AnimationTarget) -> PathBuf {
            let dir = self.config.paths.animations_dir.join(set);
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(target.file_name());
            File::create(&path).unwrap();
            path
        }

        fn add_download(&self, name: &str) -> PathBuf {
            let path = self.config.paths.downloads_dir.join(name);
            File::create(&path).unwrap();
            path
        }
    }

    #[test]
    fn test_is_clip_file() {
        assert!(is_clip_file(Path::new("/d/intro.webm")));
        assert!(is_clip_file(Path::new("/d/intro.WEBM")));
        assert!(!is_clip_file(Path::new("/d/intro.mp4")));
        assert!(!is_clip_file(Path::new("/d/intro")));
    }

    #[test]
    fn test_explicit_path_wins_over_randomization() {
        let mut layout = Layout::new();
        layout.add_set_clip("retro", AnimationTarget::Boot);
        let explicit = layout.add_download("chosen.webm");
        layout.config.animations.current_boot = Some(explicit.clone());
        layout.config.animations.randomize_mode = RandomizeMode::PerBoot;

        let mut selector = AnimationSelector::with_seed(1);
        for _ in 0..10 {
            let selection = selector
                .select(AnimationTarget::Boot, &layout.config, &mut None)
                .unwrap();
            assert_eq!(selection.path, explicit);
            assert_eq!(selection.kind, SelectionKind::Explicit);
        }
    }

    #[test]
    fn test_relative_explicit_path_resolves_against_roots() {
        let mut layout = Layout::new();
        let clip = layout.add_set_clip("retro", AnimationTarget::Suspend);
        layout.config.animations.current_suspend =
            Some(PathBuf::from("retro/steam_os_suspend.webm"));

        let selection = AnimationSelector::with_seed(0)
            .select(AnimationTarget::Suspend, &layout.config, &mut None)
            .unwrap();
        assert_eq!(selection.path, clip);
    }

    #[test]
    fn test_missing_explicit_path_falls_through() {
        let mut layout = Layout::new();
        layout.config.animations.current_boot = Some(PathBuf::from("/nonexistent/boot.webm"));
        layout.config.animations.randomize_mode = RandomizeMode::Disabled;

        let selection =
            AnimationSelector::with_seed(0).select(AnimationTarget::Boot, &layout.config, &mut None);
        assert_eq!(selection, None);
    }

    #[test]
    fn test_disabled_without_explicit_returns_none() {
        let layout = Layout::new();
        layout.add_set_clip("retro", AnimationTarget::Boot);
        layout.add_download("boot1.webm");

        let selection =
            AnimationSelector::with_seed(0).select(AnimationTarget::Boot, &layout.config, &mut None);
        assert_eq!(selection, None);
    }

    #[test]
    fn test_per_boot_single_download_is_selected() {
        let mut layout = Layout::new();
        let boot1 = layout.add_download("boot1.webm");
        layout.config.animations.randomize_mode = RandomizeMode::PerBoot;

        let selection = AnimationSelector::with_seed(7)
            .select(AnimationTarget::Boot, &layout.config, &mut None)
            .unwrap();
        assert_eq!(selection.path, boot1);
        assert_eq!(selection.kind, SelectionKind::Random);
    }

    #[test]
    fn test_downloads_are_not_suspend_candidates() {
        let mut layout = Layout::new();
        layout.add_download("steam_os_suspend.webm");
        layout.config.animations.randomize_mode = RandomizeMode::PerBoot;

        let selection = AnimationSelector::with_seed(0).select(
            AnimationTarget::Suspend,
            &layout.config,
            &mut None,
        );
        assert_eq!(selection, None);
    }

    #[test]
    fn test_hidden_sets_and_files_are_skipped() {
        let layout = Layout::new();
        layout.add_set_clip(".trash", AnimationTarget::Boot);
        layout.add_download(".partial.webm");
        let visible = layout.add_set_clip("visible", AnimationTarget::Boot);

        let candidates = AnimationSelector::candidates(&layout.config, AnimationTarget::Boot);
        let paths: Vec<_> = candidates.into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec![visible]);
    }

    #[test]
    fn test_exclusion_by_relative_path_and_set_name() {
        let mut layout = Layout::new();
        layout.add_set_clip("retro", AnimationTarget::Boot);
        layout.add_set_clip("neon", AnimationTarget::Boot);
        let kept = layout.add_set_clip("plain", AnimationTarget::Boot);
        layout.config.animations.shuffle_exclusions =
            vec!["retro/deck_startup.webm".to_string(), "neon".to_string()];

        let candidates = AnimationSelector::candidates(&layout.config, AnimationTarget::Boot);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, kept);
    }

    #[test]
    fn test_all_excluded_returns_none() {
        let mut layout = Layout::new();
        layout.add_download("only.webm");
        layout.config.animations.randomize_mode = RandomizeMode::PerBoot;
        layout.config.animations.shuffle_exclusions = vec!["only.webm".to_string()];

        let selection =
            AnimationSelector::with_seed(0).select(AnimationTarget::Boot, &layout.config, &mut None);
        assert_eq!(selection, None);
    }

    #[test]
    fn test_per_set_takes_suspend_from_boot_set() {
        let mut layout = Layout::new();
        for set in ["a", "b", "c"] {
            for target in AnimationTarget::ALL {
                layout.add_set_clip(set, target);
            }
        }
        layout.add_download("loose.webm");
        layout.config.animations.randomize_mode = RandomizeMode::PerSet;

        let mut selector = AnimationSelector::with_seed(42);
        for _ in 0..10 {
            let mut active = None;
            let boot = selector
                .select(AnimationTarget::Boot, &layout.config, &mut active)
                .unwrap();
            let set_dir = boot.path.parent().unwrap().to_path_buf();
            assert_eq!(active.as_deref(), Some(set_dir.as_path()));

            for target in [AnimationTarget::Suspend, AnimationTarget::Throbber] {
                let clip = selector
                    .select(target, &layout.config, &mut active)
                    .unwrap();
                assert_eq!(clip.path, set_dir.join(target.file_name()));
            }
        }
    }

    #[test]
    fn test_per_set_falls_back_when_active_set_lacks_clip() {
        let mut layout = Layout::new();
        layout.add_set_clip("bootonly", AnimationTarget::Boot);
        let other = layout.add_set_clip("other", AnimationTarget::Suspend);
        layout.config.animations.randomize_mode = RandomizeMode::PerSet;

        let mut active = None;
        let mut selector = AnimationSelector::with_seed(3);
        selector
            .select(AnimationTarget::Boot, &layout.config, &mut active)
            .unwrap();
        let suspend = selector
            .select(AnimationTarget::Suspend, &layout.config, &mut active)
            .unwrap();
        assert_eq!(suspend.path, other);
    }

    // *For any* set of candidates and exclusions, the selector never returns a
    // clip whose file name is excluded.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_selector_never_returns_excluded(
            names in proptest::collection::btree_set("[a-z]{1,8}", 1..8),
            excluded_mask in proptest::collection::vec(proptest::bool::ANY, 8),
            seed in any::<u64>(),
        ) {
            let mut layout = Layout::new();
            layout.config.animations.randomize_mode = RandomizeMode::PerBoot;

            let mut excluded = Vec::new();
            for (i, name) in names.iter().enumerate() {
                let file = format!("{}.webm", name);
                layout.add_download(&file);
                if excluded_mask[i] {
                    excluded.push(file);
                }
            }
            layout.config.animations.shuffle_exclusions = excluded.clone();

            let mut selector = AnimationSelector::with_seed(seed);
            match selector.select(AnimationTarget::Boot, &layout.config, &mut None) {
                Some(selection) => {
                    let name = selection.path.file_name().unwrap().to_str().unwrap().to_string();
                    prop_assert!(!excluded.contains(&name), "{} is excluded", name);
                }
                None => prop_assert_eq!(excluded.len(), names.len()),
            }
        }
    }
}

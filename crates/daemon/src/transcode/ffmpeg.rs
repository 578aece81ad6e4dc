//! ffmpeg encoder module
//!
//! Builds and executes the ffmpeg command that turns an arbitrary clip into a
//! short, letterboxed VP9/Opus WebM sized for the Deck's screen.

use std::io;
use std::path::PathBuf;
use std::process::Command;
use steam_animation_config::Config;
use thiserror::Error;

/// Fixed VP9 speed/threading flags; quality comes from the CRF setting
const VP9_TUNING: &[&str] = &[
    "-speed",
    "4",
    "-row-mt",
    "1",
    "-tile-columns",
    "2",
    "-frame-parallel",
    "1",
];

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg could not be started (usually not installed)
    #[error("ffmpeg unavailable: {0}")]
    Unavailable(io::Error),

    /// ffmpeg exited with non-zero status
    #[error("ffmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    /// ffmpeg was terminated by a signal
    #[error("ffmpeg was terminated by signal")]
    FfmpegTerminated,

    /// ffmpeg reported success but wrote nothing usable
    #[error("encoder produced an empty output")]
    EmptyOutput,

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Transcode parameters taken from the configuration on each call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranscodeSettings {
    pub max_duration_secs: u64,
    pub video_quality: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub ffmpeg_path: PathBuf,
}

impl TranscodeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_duration_secs: config.transcode.max_duration_secs,
            video_quality: config.transcode.video_quality,
            target_width: config.transcode.target_width,
            target_height: config.transcode.target_height,
            ffmpeg_path: config.transcode.ffmpeg_path.clone(),
        }
    }

    /// Scale to fit inside the target box, then pad to it with black bars.
    pub fn video_filter(&self) -> String {
        let (w, h) = (self.target_width, self.target_height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black"
        )
    }
}

/// Parameters for a single encode
#[derive(Debug, Clone)]
pub struct EncodeParams {
    /// Path to the source clip
    pub input_path: PathBuf,
    /// Path the encoded WebM is written to
    pub output_path: PathBuf,
    pub settings: TranscodeSettings,
}

impl EncodeParams {
    pub fn new(input_path: PathBuf, output_path: PathBuf, settings: TranscodeSettings) -> Self {
        Self {
            input_path,
            output_path,
            settings,
        }
    }
}

/// Something that can turn a source clip into an optimized one.
pub trait Encoder: Send + Sync {
    fn encode(&self, params: &EncodeParams) -> Result<(), EncodeError>;
}

/// Build the ffmpeg command for an encode
///
/// The command:
/// - overwrites the output and never reads stdin
/// - truncates to `max_duration_secs`
/// - scales and letterboxes to the target resolution
/// - encodes VP9 at the configured CRF with Opus audio into WebM
pub fn build_ffmpeg_command(params: &EncodeParams) -> Command {
    let settings = &params.settings;
    let mut cmd = Command::new(&settings.ffmpeg_path);

    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]);
    cmd.arg("-i").arg(&params.input_path);
    cmd.arg("-t").arg(settings.max_duration_secs.to_string());
    cmd.arg("-vf").arg(settings.video_filter());

    cmd.arg("-c:v").arg("libvpx-vp9");
    cmd.arg("-crf").arg(settings.video_quality.to_string());
    cmd.arg("-b:v").arg("0");
    cmd.args(VP9_TUNING);

    cmd.arg("-c:a").arg("libopus");
    cmd.arg("-b:a").arg("64k");

    cmd.arg("-f").arg("webm");
    cmd.arg(&params.output_path);

    cmd
}

/// Production encoder backed by the ffmpeg binary
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegEncoder;

impl Encoder for FfmpegEncoder {
    fn encode(&self, params: &EncodeParams) -> Result<(), EncodeError> {
        let output = build_ffmpeg_command(params)
            .output()
            .map_err(EncodeError::Unavailable)?;

        if !output.status.success() {
            return match output.status.code() {
                Some(code) => Err(EncodeError::FfmpegFailed {
                    code,
                    stderr: last_lines(&String::from_utf8_lossy(&output.stderr), 5),
                }),
                None => Err(EncodeError::FfmpegTerminated),
            };
        }

        let written = std::fs::metadata(&params.output_path)?.len();
        if written == 0 {
            return Err(EncodeError::EmptyOutput);
        }

        Ok(())
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    /// Helper to convert Command args to a Vec of strings for easier testing
    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    // Strategy for generating valid path-like strings
    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9_/.-]{1,50}")
            .unwrap()
            .prop_filter("non-empty path", |s| !s.is_empty())
    }

    // *For any* encode parameters, the built command SHALL carry the input,
    // the duration cap, the scale/pad filter, the CRF and the output path last.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_command_completeness(
            input_path in path_strategy(),
            output_path in path_strategy(),
            max_duration_secs in 1u64..=30,
            video_quality in 10u32..=50,
            target_width in 1u32..4096,
            target_height in 1u32..4096,
        ) {
            let settings = TranscodeSettings {
                max_duration_secs,
                video_quality,
                target_width,
                target_height,
                ffmpeg_path: PathBuf::from("ffmpeg"),
            };
            let params = EncodeParams::new(
                PathBuf::from(&input_path),
                PathBuf::from(&output_path),
                settings.clone(),
            );

            let cmd = build_ffmpeg_command(&params);
            let args = get_command_args(&cmd);

            prop_assert_eq!(cmd.get_program(), OsStr::new("ffmpeg"));
            prop_assert!(has_flag_with_value(&args, "-i", &input_path), "args: {:?}", args);
            prop_assert!(
                has_flag_with_value(&args, "-t", &max_duration_secs.to_string()),
                "args: {:?}", args
            );
            prop_assert!(has_flag_with_value(&args, "-vf", &settings.video_filter()));
            prop_assert!(has_flag_with_value(&args, "-c:v", "libvpx-vp9"));
            prop_assert!(has_flag_with_value(&args, "-crf", &video_quality.to_string()));
            prop_assert!(has_flag_with_value(&args, "-f", "webm"));
            prop_assert!(args.iter().any(|a| a == "-y"));
            prop_assert_eq!(args.last(), Some(&output_path));
        }
    }

    #[test]
    fn test_video_filter_letterboxes() {
        let settings = TranscodeSettings::from_config(&Config::default());
        assert_eq!(
            settings.video_filter(),
            "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2:black"
        );
    }

    #[test]
    fn test_custom_ffmpeg_path_is_used() {
        let mut config = Config::default();
        config.transcode.ffmpeg_path = PathBuf::from("/opt/ffmpeg/bin/ffmpeg");
        let params = EncodeParams::new(
            PathBuf::from("in.webm"),
            PathBuf::from("out.webm"),
            TranscodeSettings::from_config(&config),
        );
        let cmd = build_ffmpeg_command(&params);
        assert_eq!(cmd.get_program(), OsStr::new("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let mut config = Config::default();
        config.transcode.ffmpeg_path = PathBuf::from("/nonexistent/ffmpeg-binary");
        let params = EncodeParams::new(
            PathBuf::from("in.webm"),
            PathBuf::from("out.webm"),
            TranscodeSettings::from_config(&config),
        );
        let result = FfmpegEncoder.encode(&params);
        assert!(matches!(result, Err(EncodeError::Unavailable(_))));
    }

    #[test]
    fn test_last_lines_keeps_tail() {
        assert_eq!(last_lines("a\nb\nc", 2), "b | c");
        assert_eq!(last_lines("only", 5), "only");
        assert_eq!(last_lines("", 5), "");
    }
}

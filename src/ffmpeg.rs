//! Process-wide FFmpeg state.
//!
//! FFmpeg has its own internal logging system, separate from the Rust
//! [`log`](https://crates.io/crates/log) crate. By default it prints
//! warnings and errors to stderr, which is noisy in library usage. The
//! first [`VideoSource`](crate::VideoSource) constructed in a process
//! runs a one-shot initialisation that registers the FFmpeg libraries
//! and silences their console output. Callers who want FFmpeg's own
//! diagnostics back can override it at any time with
//! [`set_ffmpeg_verbosity`].
//!
//! This controls **FFmpeg's own console output**, not the Rust-side
//! diagnostics emitted via the `log` crate. Configure those with a
//! standard `log` subscriber such as `env_logger`.

use std::sync::Once;

use ffmpeg_next::util::log::Level;

static INIT: Once = Once::new();

/// Run the process-wide FFmpeg initialisation exactly once.
///
/// Registers the FFmpeg libraries and applies the silent default.
/// Safe to call from every engine constructor; only the first call has
/// any effect.
pub(crate) fn init() {
    INIT.call_once(|| {
        if let Err(error) = ffmpeg_next::init() {
            log::warn!("FFmpeg initialisation failed: {error}");
        }
        set_ffmpeg_verbosity(FfmpegVerbosity::Silent);
    });
}

/// How chatty the FFmpeg libraries are allowed to be on stderr.
///
/// Deliberately coarser than FFmpeg's nine-step `AV_LOG_*` ladder:
/// these are the three settings a library consumer actually reaches
/// for. Seek recovery intentionally provokes decode errors on bad seek
/// points, so anything between "errors" and "everything" mostly prints
/// noise the engine already handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FfmpegVerbosity {
    /// No FFmpeg output at all. Applied on first use.
    #[default]
    Silent,
    /// Errors only.
    Errors,
    /// Everything FFmpeg considers worth mentioning, including decoder
    /// diagnostics. Useful when investigating a file that misdecodes.
    Diagnostic,
}

impl FfmpegVerbosity {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegVerbosity::Silent => Level::Quiet,
            FfmpegVerbosity::Errors => Level::Error,
            FfmpegVerbosity::Diagnostic => Level::Verbose,
        }
    }

    fn from_ffmpeg_level(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegVerbosity::Silent,
            Level::Panic | Level::Fatal | Level::Error => FfmpegVerbosity::Errors,
            _ => FfmpegVerbosity::Diagnostic,
        }
    }
}

/// Set how much the FFmpeg libraries print to stderr.
///
/// Process-wide: affects every engine in the process. Overrides the
/// silent default applied by the one-shot initialisation.
pub fn set_ffmpeg_verbosity(verbosity: FfmpegVerbosity) {
    ffmpeg_next::util::log::set_level(verbosity.to_ffmpeg_level());
}

/// The verbosity currently in effect, rounded to the nearest
/// [`FfmpegVerbosity`] step.
pub fn ffmpeg_verbosity() -> FfmpegVerbosity {
    ffmpeg_next::util::log::get_level()
        .map(FfmpegVerbosity::from_ffmpeg_level)
        .unwrap_or(FfmpegVerbosity::Silent)
}

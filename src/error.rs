//! Error types for the `frameseek` crate.
//!
//! This module defines [`FrameSeekError`], the unified error type returned by
//! all fallible operations in the crate. Errors carry enough context to
//! diagnose the problem without additional logging at the call site.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all `frameseek` operations.
///
/// Every public method that can fail returns `Result<T, FrameSeekError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameSeekError {
    /// The source file could not be opened, the selected track is not a
    /// video track, or no decoder is available for its codec.
    #[error("Failed to open video source at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::VideoSource::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// A negative track selector did not resolve to any video track.
    #[error("No video track found for track selector {track}")]
    TrackNotFound {
        /// The track selector that was requested.
        track: i32,
    },

    /// The probe frame uses a pixel format the engine cannot represent,
    /// such as a palette format.
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Sequential indexing of the track decoded zero frames.
    #[error("Indexing of {path} track #{track} produced no frames")]
    IndexingFailed {
        /// Path of the source file that was being indexed.
        path: PathBuf,
        /// The resolved track number.
        track: i32,
    },

    /// The first indexed frame reports a negative repeat-field count. This
    /// is an unclassified field repetition pattern that must not be guessed
    /// around.
    #[error(
        "Found an unexpected repeat-field quirk, please file a bug report and attach the source file"
    )]
    RepeatFieldQuirk,

    /// An option or argument is outside its permitted range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested frame number is outside the track's frame range.
    #[error("Frame {frame_number} is out of range (track has {total_frames} frames)")]
    FrameOutOfRange {
        /// The frame number that was requested.
        frame_number: i64,
        /// The total number of frames available.
        total_frames: i64,
    },

    /// The decoder produced no usable frame for the request, after all seek
    /// retries and the linear fallback were exhausted. Deleting the index
    /// file and retrying with `threads = 1` sometimes helps.
    #[error("Failed to decode frame {frame_number}: no usable frame was produced")]
    DecodeFailed {
        /// The frame number that was requested.
        frame_number: i64,
    },

    /// The frame's pixel format cannot be exported as planar data.
    #[error("Planar export failed: {0}")]
    ExportFailed(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing index files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),
}

impl From<FfmpegError> for FrameSeekError {
    fn from(error: FfmpegError) -> Self {
        FrameSeekError::FfmpegError(error.to_string())
    }
}

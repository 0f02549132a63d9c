//! Source configuration.
//!
//! [`SourceOptions`] is a builder for everything that can be configured on
//! a [`VideoSource`](crate::VideoSource) before it is opened: track
//! selection, decoding knobs, the output timeline, caching, and the
//! indexing progress callback.
//!
//! # Example
//!
//! ```no_run
//! use frameseek::{SourceOptions, VideoSource};
//!
//! let options = SourceOptions::new()
//!     .with_track(-1)
//!     .with_threads(4)
//!     .with_cache_size_mib(512)
//!     .with_seek_pre_roll(2);
//! let mut source = VideoSource::open("input.mkv", options)?;
//! # Ok::<(), frameseek::FrameSeekError>(())
//! ```

use std::{
    collections::BTreeMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    path::PathBuf,
    sync::Arc,
};

use crate::{
    error::FrameSeekError,
    progress::{IndexProgress, NoOpProgress},
};

/// Configuration for opening a [`VideoSource`](crate::VideoSource).
///
/// All fields have defaults; a default-constructed value opens the first
/// video track with software decoding and the plain source timeline.
#[derive(Clone)]
pub struct SourceOptions {
    /// Track index, or a negative "pick the n-th video track" selector.
    pub(crate) track: i32,
    /// Allow mid-stream format changes instead of dropping deviating
    /// frames.
    pub(crate) variable_format: bool,
    /// Constant-frame-rate numerator. Disabled while non-positive.
    pub(crate) fps_num: i64,
    /// Constant-frame-rate denominator.
    pub(crate) fps_den: i64,
    /// Serve requests on the repeat-field-expanded timeline.
    pub(crate) rff: bool,
    /// Decoder thread count. Zero or less picks a default.
    pub(crate) threads: i32,
    /// Frames decoded before the requested one as a safety margin.
    pub(crate) seek_pre_roll: i64,
    /// Extra frames to allocate in the hardware frame pool.
    pub(crate) extra_hw_frames: i32,
    /// Hardware device name. Empty selects software decoding.
    pub(crate) hw_device: String,
    /// Index file location. Defaults to a path next to the source.
    pub(crate) cache_path: Option<PathBuf>,
    /// Frame cache budget in MiB.
    pub(crate) cache_size_mib: Option<usize>,
    /// Options passed through to the container demuxer.
    pub(crate) container_options: BTreeMap<String, String>,
    /// Indexing progress callback.
    pub(crate) progress: Arc<dyn IndexProgress>,
}

impl Debug for SourceOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SourceOptions")
            .field("track", &self.track)
            .field("variable_format", &self.variable_format)
            .field("fps_num", &self.fps_num)
            .field("fps_den", &self.fps_den)
            .field("rff", &self.rff)
            .field("threads", &self.threads)
            .field("seek_pre_roll", &self.seek_pre_roll)
            .field("extra_hw_frames", &self.extra_hw_frames)
            .field("hw_device", &self.hw_device)
            .field("cache_path", &self.cache_path)
            .field("cache_size_mib", &self.cache_size_mib)
            .field("container_options", &self.container_options)
            .finish_non_exhaustive()
    }
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            track: -1,
            variable_format: false,
            fps_num: -1,
            fps_den: 1,
            rff: false,
            threads: 0,
            seek_pre_roll: 1,
            extra_hw_frames: 9,
            hw_device: String::new(),
            cache_path: None,
            cache_size_mib: None,
            container_options: BTreeMap::new(),
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Select a track.
    ///
    /// A non-negative value is an absolute stream index that must refer to
    /// a video stream. `-1` picks the first video track, `-2` the second,
    /// and so on. Defaults to `-1`.
    #[must_use]
    pub fn with_track(mut self, track: i32) -> Self {
        self.track = track;
        self
    }

    /// Allow mid-stream format changes.
    ///
    /// When disabled (the default), frames that deviate from the first
    /// seen format are dropped during decoding.
    #[must_use]
    pub fn with_variable_format(mut self, variable_format: bool) -> Self {
        self.variable_format = variable_format;
        self
    }

    /// Remap the output timeline to a constant frame rate.
    ///
    /// Frame `N` is then resolved by presentation time instead of source
    /// frame number. Mutually exclusive with
    /// [`with_rff`](SourceOptions::with_rff). A non-positive numerator
    /// disables the remapping.
    #[must_use]
    pub fn with_fps(mut self, fps_num: i64, fps_den: i64) -> Self {
        self.fps_num = fps_num;
        self.fps_den = fps_den;
        self
    }

    /// Serve requests on the repeat-field-expanded timeline.
    ///
    /// Mutually exclusive with [`with_fps`](SourceOptions::with_fps).
    #[must_use]
    pub fn with_rff(mut self, rff: bool) -> Self {
        self.rff = rff;
        self
    }

    /// Set the decoder thread count. Zero or less (the default) picks the
    /// hardware concurrency, capped per decoding mode.
    #[must_use]
    pub fn with_threads(mut self, threads: i32) -> Self {
        self.threads = threads;
        self
    }

    /// Set the number of frames decoded before the requested one as a
    /// safety margin around codec reference windows. Must be within
    /// 0..=40. Defaults to 1.
    #[must_use]
    pub fn with_seek_pre_roll(mut self, frames: i64) -> Self {
        self.seek_pre_roll = frames;
        self
    }

    /// Set the number of extra frames allocated in the hardware frame
    /// pool. Must not be negative. Defaults to 9.
    #[must_use]
    pub fn with_extra_hw_frames(mut self, frames: i32) -> Self {
        self.extra_hw_frames = frames;
        self
    }

    /// Decode on a hardware device, e.g. `"cuda"` or `"vaapi"`. An empty
    /// string (the default) selects software decoding.
    #[must_use]
    pub fn with_hw_device(mut self, device: impl Into<String>) -> Self {
        self.hw_device = device.into();
        self
    }

    /// Store the index file at a location derived from this path instead
    /// of next to the source file.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Set the frame cache budget in MiB.
    #[must_use]
    pub fn with_cache_size_mib(mut self, mib: usize) -> Self {
        self.cache_size_mib = Some(mib);
        self
    }

    /// Pass an option through to the container demuxer.
    #[must_use]
    pub fn with_container_option(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.container_options.insert(key.into(), value.into());
        self
    }

    /// Attach an indexing progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn IndexProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Check option combinations and ranges.
    pub(crate) fn validate(&self) -> Result<(), FrameSeekError> {
        if self.extra_hw_frames < 0 {
            return Err(FrameSeekError::InvalidArgument(
                "extra_hw_frames must be 0 or greater".to_string(),
            ));
        }
        if !(0..=40).contains(&self.seek_pre_roll) {
            return Err(FrameSeekError::InvalidArgument(
                "seek_pre_roll must be between 0 and 40".to_string(),
            ));
        }
        if self.fps_den < 1 {
            return Err(FrameSeekError::InvalidArgument(
                "FPS denominator needs to be 1 or greater".to_string(),
            ));
        }
        if self.fps_num > 0 && self.rff {
            return Err(FrameSeekError::InvalidArgument(
                "Cannot combine constant-frame-rate and repeat-field modes".to_string(),
            ));
        }
        Ok(())
    }
}

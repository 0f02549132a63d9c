//! Indexing progress reporting.
//!
//! Building a track index decodes the whole track once, which can take a
//! while on long sources. [`IndexProgress`] lets callers observe that pass.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use frameseek::{IndexProgress, SourceOptions, VideoSource};
//!
//! struct PrintProgress;
//!
//! impl IndexProgress for PrintProgress {
//!     fn on_progress(&self, track: i32, current: i64, total: i64) {
//!         if current == i64::MAX && total == i64::MAX {
//!             println!("track {track}: indexing done");
//!         } else if total > 0 {
//!             println!("track {track}: {:.1}%", current as f64 * 100.0 / total as f64);
//!         }
//!     }
//! }
//!
//! let options = SourceOptions::new().with_progress(Arc::new(PrintProgress));
//! let source = VideoSource::open("input.mkv", options)?;
//! # Ok::<(), frameseek::FrameSeekError>(())
//! ```

/// Trait for receiving progress updates during index construction.
///
/// `current` and `total` are byte positions within the source file. After
/// the last frame has been indexed the callback fires once more with both
/// values equal to `i64::MAX` to signal completion.
///
/// Callbacks run synchronously on the indexing thread and must not
/// re-enter the engine. Implementations must be [`Send`] and [`Sync`].
pub trait IndexProgress: Send + Sync {
    /// Called after each indexed frame, and once at completion.
    fn on_progress(&self, track: i32, current: i64, total: i64);
}

/// Discards all progress notifications. The default when no callback is
/// configured.
pub(crate) struct NoOpProgress;

impl IndexProgress for NoOpProgress {
    fn on_progress(&self, _track: i32, _current: i64, _total: i64) {}
}

//! # frameseek
//!
//! Frame-accurate random access to video tracks whose native access model
//! is sequential packet streaming, powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! Ask for "frame N" or "the frame at time T" and get the decoded pixel
//! data with its full metadata back, regardless of how the container
//! feels about random access. The heavy lifting is a per-frame index
//! built in one offline pass and persisted next to the source, plus a
//! seek engine that recovers the true frame number after every keyframe
//! seek by matching frame content hashes, blacklisting seek points that
//! lie, and falling back to plain forward decoding when a file turns out
//! to be hostile.
//!
//! ## Quick Start
//!
//! ```no_run
//! use frameseek::{SourceOptions, VideoSource};
//!
//! let mut source = VideoSource::open("input.mkv", SourceOptions::new())?;
//!
//! // Exact frame by number, in any order.
//! let frame = source.frame(1234)?;
//! println!("{}x{} pts {}", frame.width, frame.height, frame.pts);
//!
//! // Or by time; picks the frame with the nearest presentation time.
//! let frame = source.frame_by_time(42.5)?;
//! # Ok::<(), frameseek::FrameSeekError>(())
//! ```
//!
//! ## Features
//!
//! - **Frame-accurate seeking** via content hashing; a returned frame N
//!   is always frame N, never "whatever the demuxer landed on"
//! - **Persistent indexing**: one sequential decode pass per file, reused
//!   across sessions and invalidated when the file or open parameters
//!   change
//! - **Decoder pooling**: up to four warm decoders reused across
//!   requests with LRU eviction
//! - **Frame caching** with a configurable byte budget
//! - **Repeat-field expansion** of telecined content into a virtual
//!   progressive timeline with field merging
//! - **Constant-frame-rate remapping** and time-based lookup
//! - **Hardware decoding** (CUDA, VAAPI, and friends) via FFmpeg device
//!   contexts
//! - **Rich metadata**: HDR mastering display, content light level,
//!   Dolby Vision RPU and HDR10+ payloads, rotation and stereo 3D tags
//! - **Timecode export** in "timecode format v2"
//!
//! ## Requirements
//!
//! FFmpeg development libraries (6.1 or newer) must be installed on the
//! system.

mod cache;
mod decoder;
pub mod error;
pub mod ffmpeg;
pub mod frame;
mod hash;
pub mod index;
pub mod options;
pub mod progress;
pub mod properties;
pub mod source;

pub use error::FrameSeekError;
pub use ffmpeg_next::Rational;
pub use ffmpeg::{ffmpeg_verbosity, set_ffmpeg_verbosity, FfmpegVerbosity};
pub use frame::SourceFrame;
pub use index::{index_cache_path, FrameInfo, IndexParameters, TrackIndex};
pub use options::SourceOptions;
pub use progress::IndexProgress;
pub use properties::{
    ColorFamily, ContentLightLevel, MasteringDisplayLuminance, MasteringDisplayPrimaries,
    VideoFormat, VideoProperties,
};
pub use source::VideoSource;

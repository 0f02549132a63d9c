//! Per-track frame index.
//!
//! The index is the engine's map of the track: one [`FrameInfo`] per
//! decoded frame, in decode order, so the position in the sequence is the
//! frame number. It is built by a single sequential decode pass and then
//! persisted next to the source (or at a caller-chosen location) so later
//! sessions skip the pass entirely.
//!
//! The on-disk format is little-endian binary: a magic/version header, the
//! parameters the file was opened with, and the frame records. Readers
//! compare every stored parameter against the current open parameters and
//! silently reject the file on any mismatch, which causes re-indexing.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ffmpeg_next::Rational;

use crate::{
    decoder::RawDecoder, error::FrameSeekError, hash::frame_hash, progress::IndexProgress,
};

/// Magic bytes identifying a video track index file.
const INDEX_MAGIC: &[u8; 4] = b"BS2V";
/// Bumped whenever the file layout changes; older files are re-indexed.
const INDEX_VERSION: u8 = 1;

/// Everything indexed about a single source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// 64-bit content digest of the frame's visible samples.
    pub hash: u64,
    /// Presentation timestamp in the track time base, or FFmpeg's
    /// no-timestamp sentinel for frames that can never be seek targets.
    pub pts: i64,
    /// Number of repeated fields. Non-negative on well-formed tracks.
    pub repeat_pict: i32,
    /// Whether the frame is decodable without prior frames.
    pub key_frame: bool,
    /// Whether the top field is presented first.
    pub top_field_first: bool,
}

/// The per-frame manifest of a video track.
///
/// `frames` is non-empty after a successful build and the position in the
/// vector is the frame number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackIndex {
    /// One entry per decoded frame, in decode order.
    pub frames: Vec<FrameInfo>,
    /// Duration of the last frame in track time base units.
    pub last_frame_duration: i64,
}

/// The open parameters an index file is validated against.
///
/// A stored index is only reused when every field matches the session that
/// wants to read it; anything else means the cached data may describe a
/// different decode of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParameters {
    /// Total byte size of the source file at index time.
    pub source_size: i64,
    /// Resolved track number.
    pub track: i32,
    /// Whether mid-stream format changes were allowed.
    pub variable_format: bool,
    /// Hardware device name, empty for software decoding.
    pub hw_device: String,
    /// Options passed to the container demuxer.
    pub container_options: BTreeMap<String, String>,
}

/// Derive the index file location for a track of the given source or
/// cache path.
pub fn index_cache_path(base: &Path, track: i32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{track}.fsindex"));
    PathBuf::from(name)
}

impl TrackIndex {
    /// Build the index by decoding the whole track once.
    ///
    /// `progress` is invoked with the source byte position after each
    /// frame and once with `(i64::MAX, i64::MAX)` at completion.
    pub(crate) fn build(
        mut decoder: RawDecoder,
        progress: &dyn IndexProgress,
    ) -> Result<TrackIndex, FrameSeekError> {
        let track = decoder.track();
        let source_size = decoder.source_size();
        let mut index = TrackIndex::default();

        while let Some(frame) = decoder.next_frame() {
            index.frames.push(FrameInfo {
                hash: frame_hash(&frame),
                pts: frame.pts().unwrap_or(ffmpeg_sys_next::AV_NOPTS_VALUE),
                repeat_pict: unsafe { (*frame.as_ptr()).repeat_pict },
                key_frame: frame_flag(&frame, ffmpeg_sys_next::AV_FRAME_FLAG_KEY as i32),
                top_field_first: frame_flag(
                    &frame,
                    ffmpeg_sys_next::AV_FRAME_FLAG_TOP_FIELD_FIRST as i32,
                ),
            });
            index.last_frame_duration = unsafe { (*frame.as_ptr()).duration };
            progress.on_progress(track, decoder.source_position(), source_size);
        }

        progress.on_progress(track, i64::MAX, i64::MAX);

        if index.frames.is_empty() {
            return Err(FrameSeekError::IndexingFailed {
                path: decoder.source().to_path_buf(),
                track,
            });
        }

        log::info!(
            "Indexed track {track}: {} frames, last frame duration {}",
            index.frames.len(),
            index.last_frame_duration,
        );

        Ok(index)
    }

    /// Persist the index.
    pub fn write(
        &self,
        path: &Path,
        parameters: &IndexParameters,
    ) -> Result<(), FrameSeekError> {
        let mut writer = BufWriter::new(File::create(path)?);

        writer.write_all(INDEX_MAGIC)?;
        writer.write_u8(INDEX_VERSION)?;
        writer.write_i64::<LittleEndian>(parameters.source_size)?;
        writer.write_i32::<LittleEndian>(parameters.track)?;
        writer.write_i32::<LittleEndian>(parameters.variable_format as i32)?;
        write_string(&mut writer, &parameters.hw_device)?;

        writer.write_i32::<LittleEndian>(parameters.container_options.len() as i32)?;
        for (key, value) in &parameters.container_options {
            write_string(&mut writer, key)?;
            write_string(&mut writer, value)?;
        }

        writer.write_i64::<LittleEndian>(self.frames.len() as i64)?;
        writer.write_i64::<LittleEndian>(self.last_frame_duration)?;

        for frame in &self.frames {
            writer.write_u64::<LittleEndian>(frame.hash)?;
            writer.write_i64::<LittleEndian>(frame.pts)?;
            writer.write_i32::<LittleEndian>(frame.repeat_pict)?;
            let flags = frame.key_frame as i32 | (frame.top_field_first as i32) << 1;
            writer.write_i32::<LittleEndian>(flags)?;
        }

        writer.flush()?;
        log::debug!("Wrote index with {} frames to {}", self.frames.len(), path.display());
        Ok(())
    }

    /// Load a previously written index.
    ///
    /// Returns `None` when the file is missing, malformed, or was written
    /// with parameters that differ from `parameters`; the caller then
    /// re-indexes. Mismatches are not errors.
    pub fn read(path: &Path, parameters: &IndexParameters) -> Option<TrackIndex> {
        let file = File::open(path).ok()?;
        match read_index(BufReader::new(file), parameters) {
            Some(index) => {
                log::debug!(
                    "Reusing index with {} frames from {}",
                    index.frames.len(),
                    path.display(),
                );
                Some(index)
            }
            None => {
                log::debug!("Index at {} is stale or malformed, re-indexing", path.display());
                None
            }
        }
    }

    /// Export frame timestamps as a "timecode format v2" file: one line
    /// per frame with the presentation time in milliseconds.
    pub fn write_timecodes(
        &self,
        path: &Path,
        time_base: Rational,
    ) -> Result<(), FrameSeekError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "# timecode format v2")?;
        for frame in &self.frames {
            let milliseconds = (frame.pts as f64 * time_base.numerator() as f64)
                / time_base.denominator() as f64;
            writeln!(writer, "{milliseconds:.2}")?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn frame_flag(frame: &ffmpeg_next::frame::Video, flag: i32) -> bool {
    unsafe { (*frame.as_ptr()).flags & flag != 0 }
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> std::io::Result<()> {
    writer.write_i32::<LittleEndian>(value.len() as i32)?;
    writer.write_all(value.as_bytes())
}

fn read_string<R: Read>(reader: &mut R) -> Option<String> {
    let length = reader.read_i32::<LittleEndian>().ok()?;
    if !(0..=4096).contains(&length) {
        return None;
    }
    let mut bytes = vec![0u8; length as usize];
    reader.read_exact(&mut bytes).ok()?;
    String::from_utf8(bytes).ok()
}

fn read_index<R: Read>(mut reader: R, parameters: &IndexParameters) -> Option<TrackIndex> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).ok()?;
    if &magic != INDEX_MAGIC {
        return None;
    }
    if reader.read_u8().ok()? != INDEX_VERSION {
        return None;
    }
    if reader.read_i64::<LittleEndian>().ok()? != parameters.source_size {
        return None;
    }
    if reader.read_i32::<LittleEndian>().ok()? != parameters.track {
        return None;
    }
    if reader.read_i32::<LittleEndian>().ok()? != parameters.variable_format as i32 {
        return None;
    }
    if read_string(&mut reader)? != parameters.hw_device {
        return None;
    }

    let option_count = reader.read_i32::<LittleEndian>().ok()?;
    if option_count < 0 {
        return None;
    }
    let mut stored_options = BTreeMap::new();
    for _ in 0..option_count {
        let key = read_string(&mut reader)?;
        let value = read_string(&mut reader)?;
        stored_options.insert(key, value);
    }
    if stored_options != parameters.container_options {
        return None;
    }

    let num_frames = reader.read_i64::<LittleEndian>().ok()?;
    if num_frames <= 0 {
        return None;
    }
    // Cap the pre-allocation so a corrupt count cannot exhaust memory;
    // the vector grows normally past it.
    let mut index = TrackIndex {
        frames: Vec::with_capacity(num_frames.min(1 << 20) as usize),
        last_frame_duration: reader.read_i64::<LittleEndian>().ok()?,
    };

    for _ in 0..num_frames {
        let hash = reader.read_u64::<LittleEndian>().ok()?;
        let pts = reader.read_i64::<LittleEndian>().ok()?;
        let repeat_pict = reader.read_i32::<LittleEndian>().ok()?;
        let flags = reader.read_i32::<LittleEndian>().ok()?;
        index.frames.push(FrameInfo {
            hash,
            pts,
            repeat_pict,
            key_frame: flags & 1 != 0,
            top_field_first: flags & 2 != 0,
        });
    }

    Some(index)
}

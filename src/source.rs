//! Frame-accurate random access to a video track.
//!
//! [`VideoSource`] is the main entry point of the crate. It combines a
//! small pool of forward-only decoders, the persistent track index, a
//! content hasher and a byte-bounded frame cache into an engine that can
//! serve "give me frame N" on media whose only positioning primitive is
//! "seek to the nearest keyframe at or before a timestamp, then decode
//! forward".
//!
//! Algorithm summary:
//!
//! 1. If a pooled decoder is already in the zone between the chosen
//!    keyframe and the requested frame, decode forward from it.
//! 2. If the best seek point lies within the first 100 frames, decode
//!    linearly instead; seeks close to the start are unreliable.
//! 3. Otherwise seek with an existing or fresh decoder and identify the
//!    landing position by matching frame hashes against the index,
//!    extending the match run up to ten frames for duplicate content.
//! 4. When the landing cannot be identified, lies beyond the target, or
//!    yields corrupt output, mark the keyframe as a bad seek location and
//!    retry at least 100 frames earlier.
//! 5. After three failed retries fall back to linear decoding for the
//!    rest of the session.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use ffmpeg_next::frame::Video as VideoFrame;

use crate::{
    cache::FrameCache,
    decoder::RawDecoder,
    error::FrameSeekError,
    frame::SourceFrame,
    hash::frame_hash,
    index::{index_cache_path, FrameInfo, IndexParameters, TrackIndex},
    options::SourceOptions,
    properties::VideoProperties,
};

/// Number of decoder slots kept alive per source.
const MAX_VIDEO_SOURCES: usize = 4;
/// Seek retries before the engine gives up and goes linear for good.
const RETRY_SEEK_ATTEMPTS: usize = 3;
/// Frames from the start of the track below which seeking is not
/// attempted; early seek points routinely land wrong.
const MIN_SEEK_FRAME: i64 = 100;
/// Longest hash run used to disambiguate a seek landing position.
const MAX_IDENTIFY_RUN: usize = 10;

struct DecoderSlot {
    decoder: Option<RawDecoder>,
    last_use: u64,
}

/// Which timeline frame numbers are resolved against.
enum OutputTimeline {
    /// Frame numbers are source frame numbers.
    Source,
    /// Frame numbers map to presentation times at a caller-chosen rate.
    ConstantRate {
        fps_num: i64,
        fps_den: i64,
        num_frames: i64,
    },
    /// Frame numbers address the repeat-field-expanded timeline.
    RepeatField,
}

/// Lazily built repeat-field state.
enum RffTimeline {
    /// Not needed yet.
    Pending,
    /// Every frame maps to itself; no expansion required.
    Collapsed,
    /// `(top_source_frame, bottom_source_frame)` per expanded frame.
    Fields(Vec<(i64, i64)>),
}

/// How a hash-run comparison against the index turned out.
enum SeekIdentity {
    /// Exactly one suitable position matches the run.
    Unique(i64),
    /// Several positions match; decode another frame and retry.
    NeedMoreFrames,
    /// Several positions still match at the run cap or end of stream.
    AmbiguityCapped,
    /// No match at or before the target frame.
    Unsuitable,
}

/// Frame-accurate random access to one video track of a container file.
///
/// # Example
///
/// ```no_run
/// use frameseek::{SourceOptions, VideoSource};
///
/// let mut source = VideoSource::open("input.mkv", SourceOptions::new())?;
/// let frame = source.frame(120)?;
/// println!("pts {} key {}", frame.pts, frame.key_frame);
/// # Ok::<(), frameseek::FrameSeekError>(())
/// ```
pub struct VideoSource {
    source: PathBuf,
    hw_device: String,
    extra_hw_frames: i32,
    track: i32,
    variable_format: bool,
    threads: i32,
    container_options: BTreeMap<String, String>,
    properties: VideoProperties,
    index: TrackIndex,
    cache: FrameCache,
    slots: [DecoderSlot; MAX_VIDEO_SOURCES],
    sequence: u64,
    bad_seek_locations: BTreeSet<i64>,
    pre_roll: i64,
    linear_mode: bool,
    rff: RffTimeline,
    mode: OutputTimeline,
}

impl VideoSource {
    /// Open a video track for frame-accurate access.
    ///
    /// Consults the on-disk index first; when it is missing or stale the
    /// whole track is decoded once to rebuild it, reporting progress
    /// through the options' callback.
    ///
    /// # Errors
    ///
    /// - [`FrameSeekError::InvalidArgument`] for out-of-range options.
    /// - [`FrameSeekError::FileOpen`] / [`FrameSeekError::TrackNotFound`]
    ///   when the source or track cannot be opened.
    /// - [`FrameSeekError::UnsupportedFormat`] when the probe frame uses
    ///   a pixel format the engine cannot represent.
    /// - [`FrameSeekError::IndexingFailed`] when indexing decodes zero
    ///   frames.
    /// - [`FrameSeekError::RepeatFieldQuirk`] on an unclassified repeat
    ///   field pattern.
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: SourceOptions,
    ) -> Result<VideoSource, FrameSeekError> {
        options.validate()?;
        crate::ffmpeg::init();

        let source = path.as_ref().to_path_buf();
        let mut decoder = RawDecoder::open(
            &source,
            &options.hw_device,
            options.extra_hw_frames,
            options.track,
            options.variable_format,
            options.threads,
            &options.container_options,
        )?;

        let mut properties = decoder.video_properties()?;
        let track = decoder.track();

        let cache_base = options.cache_path.clone().unwrap_or_else(|| source.clone());
        let index_path = index_cache_path(&cache_base, track);
        let parameters = IndexParameters {
            source_size: decoder.source_size(),
            track,
            variable_format: options.variable_format,
            hw_device: options.hw_device.clone(),
            container_options: options.container_options.clone(),
        };

        let index = match TrackIndex::read(&index_path, &parameters) {
            Some(index) => index,
            None => {
                let index_decoder = RawDecoder::open(
                    &source,
                    &options.hw_device,
                    options.extra_hw_frames,
                    track,
                    options.variable_format,
                    options.threads,
                    &options.container_options,
                )?;
                let index = TrackIndex::build(index_decoder, options.progress.as_ref())?;
                if let Err(error) = index.write(&index_path, &parameters) {
                    log::warn!(
                        "Failed to write index to {}: {error}",
                        index_path.display(),
                    );
                }
                index
            }
        };

        let first = match index.frames.first().copied() {
            Some(first) => first,
            None => {
                return Err(FrameSeekError::IndexingFailed {
                    path: source,
                    track,
                })
            }
        };
        if first.repeat_pict < 0 {
            return Err(FrameSeekError::RepeatFieldQuirk);
        }
        let last = index.frames[index.frames.len() - 1];

        properties.num_frames = index.frames.len() as i64;
        properties.duration = (last.pts - first.pts) + index.last_frame_duration.max(1);

        let num_fields: i64 = index
            .frames
            .iter()
            .map(|frame| frame.repeat_pict as i64 + 2)
            .sum();
        properties.num_rff_frames = (num_fields + 1) / 2;

        let rff = if properties.num_frames == properties.num_rff_frames {
            RffTimeline::Collapsed
        } else {
            RffTimeline::Pending
        };

        let mode = resolve_timeline(&options, &properties);

        let mut cache = FrameCache::new();
        if let Some(mib) = options.cache_size_mib {
            cache.set_max_size(mib * 1024 * 1024);
        }

        let mut slots = std::array::from_fn(|_| DecoderSlot {
            decoder: None,
            last_use: 0,
        });
        slots[0] = DecoderSlot {
            decoder: Some(decoder),
            last_use: 0,
        };

        Ok(VideoSource {
            source,
            hw_device: options.hw_device,
            extra_hw_frames: options.extra_hw_frames,
            track,
            variable_format: options.variable_format,
            threads: options.threads,
            container_options: options.container_options,
            properties,
            index,
            cache,
            slots,
            sequence: 0,
            bad_seek_locations: BTreeSet::new(),
            pre_roll: options.seek_pre_roll,
            linear_mode: false,
            rff,
            mode,
        })
    }

    /// Track-level properties, with exact frame and duration counts.
    pub fn properties(&self) -> &VideoProperties {
        &self.properties
    }

    /// The per-frame manifest of the opened track.
    pub fn index(&self) -> &TrackIndex {
        &self.index
    }

    /// The resolved track number.
    pub fn track(&self) -> i32 {
        self.track
    }

    /// Number of frames on the configured output timeline.
    pub fn num_frames(&self) -> i64 {
        match self.mode {
            OutputTimeline::Source => self.properties.num_frames,
            OutputTimeline::ConstantRate { num_frames, .. } => num_frames,
            OutputTimeline::RepeatField => self.properties.num_rff_frames,
        }
    }

    /// Set the frame cache budget in bytes.
    pub fn set_max_cache_size(&mut self, bytes: usize) {
        self.cache.set_max_size(bytes);
    }

    /// Set the number of frames decoded before a requested frame as a
    /// safety margin around codec reference windows. Must be within
    /// 0..=40.
    pub fn set_seek_pre_roll(&mut self, frames: i64) -> Result<(), FrameSeekError> {
        if !(0..=40).contains(&frames) {
            return Err(FrameSeekError::InvalidArgument(
                "seek_pre_roll must be between 0 and 40".to_string(),
            ));
        }
        self.pre_roll = frames;
        Ok(())
    }

    /// Permanently switch to forward-only decoding.
    ///
    /// Useful when the access pattern is known to be sequential. Linear
    /// mode cannot be exited for the lifetime of this source.
    pub fn force_linear_mode(&mut self) {
        self.enter_linear_mode();
    }

    /// Get a frame by number on the configured output timeline.
    pub fn frame(&mut self, frame_number: i64) -> Result<SourceFrame, FrameSeekError> {
        self.output_frame(frame_number, false)
    }

    /// Like [`frame`](VideoSource::frame), but hints that access is
    /// sequential so the engine decodes forward instead of seeking.
    pub fn frame_linear(&mut self, frame_number: i64) -> Result<SourceFrame, FrameSeekError> {
        self.output_frame(frame_number, true)
    }

    /// Get the source frame whose presentation time is nearest to
    /// `seconds`, with ties broken toward the later frame. Times past the
    /// end of the track yield the last frame.
    pub fn frame_by_time(&mut self, seconds: f64) -> Result<SourceFrame, FrameSeekError> {
        self.fetch_frame_by_time(seconds, false)
    }

    /// Get a frame on the repeat-field-expanded timeline.
    ///
    /// Frames whose top and bottom fields come from different source
    /// frames are merged row-interleaved.
    pub fn frame_with_rff(&mut self, frame_number: i64) -> Result<SourceFrame, FrameSeekError> {
        self.fetch_frame_with_rff(frame_number, false)
    }

    /// Whether a frame is top-field-first, on either the source timeline
    /// or the repeat-field timeline. Out-of-range frame numbers are
    /// reported as `false`.
    pub fn frame_is_tff(&mut self, frame_number: i64, rff: bool) -> bool {
        let limit = if rff {
            self.properties.num_rff_frames
        } else {
            self.properties.num_frames
        };
        if frame_number < 0 || frame_number >= limit {
            return false;
        }
        if rff {
            self.ensure_rff_fields();
            if let RffTimeline::Fields(fields) = &self.rff {
                let (top, bottom) = fields[frame_number as usize];
                return top < bottom;
            }
        }
        self.index.frames[frame_number as usize].top_field_first
    }

    /// Export the track's frame timestamps as a "timecode format v2"
    /// file.
    pub fn write_timecodes<P: AsRef<Path>>(&self, path: P) -> Result<(), FrameSeekError> {
        self.index
            .write_timecodes(path.as_ref(), self.properties.time_base)
    }

    fn output_frame(
        &mut self,
        frame_number: i64,
        linear: bool,
    ) -> Result<SourceFrame, FrameSeekError> {
        match self.mode {
            OutputTimeline::Source => self.fetch_frame(frame_number, linear),
            OutputTimeline::RepeatField => self.fetch_frame_with_rff(frame_number, linear),
            OutputTimeline::ConstantRate {
                fps_num,
                fps_den,
                num_frames,
            } => {
                if frame_number < 0 || frame_number >= num_frames {
                    return Err(FrameSeekError::FrameOutOfRange {
                        frame_number,
                        total_frames: num_frames,
                    });
                }
                let seconds = self.properties.start_time
                    + (frame_number * fps_den) as f64 / fps_num as f64;
                self.fetch_frame_by_time(seconds, linear)
            }
        }
    }

    fn fetch_frame(
        &mut self,
        frame_number: i64,
        linear: bool,
    ) -> Result<SourceFrame, FrameSeekError> {
        if frame_number < 0 || frame_number >= self.properties.num_frames {
            return Err(FrameSeekError::FrameOutOfRange {
                frame_number,
                total_frames: self.properties.num_frames,
            });
        }

        if let Some(frame) = self.cache.get(frame_number)? {
            return SourceFrame::new(frame);
        }

        let produced = if linear || self.linear_mode {
            self.frame_linear_internal(frame_number, -1, 0, false)?
        } else {
            self.frame_seeking_internal(frame_number)?
        };

        produced.ok_or(FrameSeekError::DecodeFailed { frame_number })
    }

    fn fetch_frame_by_time(
        &mut self,
        seconds: f64,
        linear: bool,
    ) -> Result<SourceFrame, FrameSeekError> {
        let time_base = self.properties.time_base;
        let pts = (seconds * 1000.0 * time_base.denominator() as f64
            / time_base.numerator() as f64
            + 0.001) as i64;
        let position = nearest_frame_by_pts(&self.index.frames, pts);
        self.fetch_frame(position as i64, linear)
    }

    fn fetch_frame_with_rff(
        &mut self,
        frame_number: i64,
        linear: bool,
    ) -> Result<SourceFrame, FrameSeekError> {
        self.ensure_rff_fields();

        let pair = match &self.rff {
            RffTimeline::Fields(fields) => {
                if frame_number < 0 || frame_number >= fields.len() as i64 {
                    return Err(FrameSeekError::FrameOutOfRange {
                        frame_number,
                        total_frames: fields.len() as i64,
                    });
                }
                Some(fields[frame_number as usize])
            }
            RffTimeline::Collapsed | RffTimeline::Pending => None,
        };

        match pair {
            None => self.fetch_frame(frame_number, linear),
            Some((top, bottom)) if top == bottom => self.fetch_frame(top, linear),
            Some((top, bottom)) => {
                // The frame with the smaller source index hosts the
                // merge; the other contributes its field.
                if top < bottom {
                    let mut host = self.fetch_frame(top, linear)?;
                    let other = self.fetch_frame(bottom, linear)?;
                    host.merge_field(false, &other)?;
                    Ok(host)
                } else {
                    let mut host = self.fetch_frame(bottom, linear)?;
                    let other = self.fetch_frame(top, linear)?;
                    host.merge_field(true, &other)?;
                    Ok(host)
                }
            }
        }
    }

    fn ensure_rff_fields(&mut self) {
        if matches!(self.rff, RffTimeline::Pending) {
            let fields = build_rff_fields(&self.index.frames, self.properties.num_rff_frames);
            self.rff = RffTimeline::Fields(fields);
        }
    }

    fn new_decoder(&self) -> Result<RawDecoder, FrameSeekError> {
        RawDecoder::open(
            &self.source,
            &self.hw_device,
            self.extra_hw_frames,
            self.track,
            self.variable_format,
            self.threads,
            &self.container_options,
        )
    }

    fn touch(&mut self, slot: usize) {
        self.sequence += 1;
        self.slots[slot].last_use = self.sequence;
    }

    fn empty_or_lru_slot(&self) -> usize {
        let mut empty = None;
        let mut least_recently_used = 0;
        for i in 0..MAX_VIDEO_SOURCES {
            if self.slots[i].decoder.is_none() {
                empty = Some(i);
            } else if self.slots[i].last_use < self.slots[least_recently_used].last_use {
                least_recently_used = i;
            }
        }
        empty.unwrap_or(least_recently_used)
    }

    fn enter_linear_mode(&mut self) {
        if !self.linear_mode {
            log::info!("Linear decoding mode is now forced");
            self.linear_mode = true;
            self.cache.clear();
            for slot in &mut self.slots {
                slot.decoder = None;
            }
        }
    }

    fn select_seek_frame(&self, frame_number: i64) -> i64 {
        choose_seek_frame(
            &self.index.frames,
            &self.bad_seek_locations,
            frame_number,
            self.pre_roll,
        )
    }

    fn frame_seeking_internal(
        &mut self,
        frame_number: i64,
    ) -> Result<Option<SourceFrame>, FrameSeekError> {
        let seek_frame = self.select_seek_frame(frame_number);
        if seek_frame < MIN_SEEK_FRAME {
            return self.frame_linear_internal(frame_number, -1, 0, false);
        }

        // A pooled decoder already between the seek point and the target
        // is close enough; no reseek needed.
        for i in 0..MAX_VIDEO_SOURCES {
            let close_enough = self.slots[i].decoder.as_ref().is_some_and(|decoder| {
                decoder.frame_number() <= frame_number && decoder.frame_number() >= seek_frame
            });
            if close_enough {
                return self.frame_linear_internal(frame_number, -1, 0, false);
            }
        }

        let slot = self.empty_or_lru_slot();
        if self.slots[slot].decoder.is_none() {
            self.slots[slot].decoder = Some(self.new_decoder()?);
        }
        self.touch(slot);

        self.seek_and_decode(frame_number, seek_frame, slot, 0)
    }

    /// Blacklist a failed seek point and either retry further back or
    /// fall back to linear decoding.
    fn retry_after_bad_seek(
        &mut self,
        frame_number: i64,
        seek_frame: i64,
        slot: usize,
        depth: usize,
        force_unseeked_on_exhaust: bool,
    ) -> Result<Option<SourceFrame>, FrameSeekError> {
        if seek_frame >= 0 {
            self.bad_seek_locations.insert(seek_frame);
        }

        if depth < RETRY_SEEK_ATTEMPTS {
            let next_seek = self.select_seek_frame(seek_frame - MIN_SEEK_FRAME);
            log::debug!("Retrying seek for frame {frame_number} at keyframe {next_seek}");
            if next_seek < MIN_SEEK_FRAME {
                self.slots[slot].decoder = None;
                self.frame_linear_internal(frame_number, -1, 0, false)
            } else {
                self.seek_and_decode(frame_number, next_seek, slot, depth + 1)
            }
        } else {
            log::info!(
                "Maximum number of seek attempts made for frame {frame_number}, \
                 switching to linear decoding"
            );
            self.enter_linear_mode();
            self.frame_linear_internal(frame_number, -1, 0, force_unseeked_on_exhaust)
        }
    }

    fn seek_and_decode(
        &mut self,
        frame_number: i64,
        seek_frame: i64,
        slot: usize,
        depth: usize,
    ) -> Result<Option<SourceFrame>, FrameSeekError> {
        let pts = self.index.frames[seek_frame as usize].pts;
        let seek_ok = match self.slots[slot].decoder.as_mut() {
            Some(decoder) => decoder.seek(pts),
            None => false,
        };
        if !seek_ok {
            log::info!("Source is unseekable, switching to linear decoding");
            self.enter_linear_mode();
            return self.frame_linear_internal(frame_number, -1, 0, false);
        }

        let mut run: Vec<(VideoFrame, u64)> = Vec::new();
        loop {
            let next = self
                .slots[slot]
                .decoder
                .as_mut()
                .and_then(RawDecoder::next_frame);
            if next.is_none() && run.is_empty() {
                log::debug!(
                    "No frame could be decoded after seeking to {seek_frame}, \
                     added as bad seek location"
                );
                return self.retry_after_bad_seek(frame_number, seek_frame, slot, depth, false);
            }

            let at_eof = next.is_none();
            if let Some(frame) = next {
                let hash = frame_hash(&frame);
                run.push((frame, hash));
            }

            let hashes: Vec<u64> = run.iter().map(|(_, hash)| *hash).collect();
            let candidates = hash_run_candidates(&self.index.frames, &hashes, at_eof);

            match classify_seek_identity(&candidates, frame_number, at_eof, run.len()) {
                SeekIdentity::Unique(matched) => {
                    if let Some(decoder) = self.slots[slot].decoder.as_mut() {
                        decoder.set_frame_number(matched + run.len() as i64);
                    }

                    let mut produced = None;
                    for (offset, (frame, _)) in run.into_iter().enumerate() {
                        let position = matched + offset as i64;
                        if position >= frame_number - self.pre_roll {
                            if position == frame_number {
                                produced = Some(SourceFrame::from_decoded(&frame)?);
                            }
                            self.cache.insert(position, frame);
                        }
                    }

                    if produced.is_some() {
                        return Ok(produced);
                    }
                    // Position is known and everything decoded so far is
                    // cached; forward decoding covers the rest.
                    return self.frame_linear_internal(frame_number, seek_frame, 0, false);
                }
                SeekIdentity::NeedMoreFrames => {}
                SeekIdentity::Unsuitable | SeekIdentity::AmbiguityCapped => {
                    log::debug!(
                        "No destination frame number could be determined after seeking \
                         to {seek_frame}, added as bad seek location"
                    );
                    return self.retry_after_bad_seek(
                        frame_number,
                        seek_frame,
                        slot,
                        depth,
                        false,
                    );
                }
            }
        }
    }

    fn frame_linear_internal(
        &mut self,
        frame_number: i64,
        seek_frame: i64,
        depth: usize,
        force_unseeked: bool,
    ) -> Result<Option<SourceFrame>, FrameSeekError> {
        // Prefer the decoder already closest behind the target.
        let mut best: Option<(usize, i64)> = None;
        let mut empty = None;
        let mut least_recently_used = 0;
        for i in 0..MAX_VIDEO_SOURCES {
            match self.slots[i].decoder.as_ref() {
                Some(decoder) => {
                    let usable = (!force_unseeked || !decoder.has_seeked())
                        && decoder.frame_number() <= frame_number;
                    if usable
                        && best.map_or(true, |(_, position)| position < decoder.frame_number())
                    {
                        best = Some((i, decoder.frame_number()));
                    }
                    if self.slots[i].last_use < self.slots[least_recently_used].last_use {
                        least_recently_used = i;
                    }
                }
                None => empty = Some(i),
            }
        }

        let slot = match best {
            Some((slot, _)) => slot,
            None => {
                let slot = empty.unwrap_or(least_recently_used);
                self.slots[slot].decoder = Some(self.new_decoder()?);
                slot
            }
        };
        self.touch(slot);

        let mut produced = None;
        loop {
            let Some((position, has_more)) = self.slots[slot]
                .decoder
                .as_ref()
                .map(|decoder| (decoder.frame_number(), decoder.has_more_frames()))
            else {
                break;
            };
            if position > frame_number || !has_more {
                break;
            }

            if position >= frame_number - self.pre_roll {
                let frame = self
                    .slots[slot]
                    .decoder
                    .as_mut()
                    .and_then(RawDecoder::next_frame);

                // The central sanity check. It primarily catches decoders
                // that seeked, had their location identified, and still
                // return frames out of order.
                let expected = self.index.frames[position as usize].hash;
                let frame = frame.filter(|frame| frame_hash(frame) == expected);

                let Some(frame) = frame else {
                    let seeked = self
                        .slots[slot]
                        .decoder
                        .as_ref()
                        .is_some_and(RawDecoder::has_seeked);
                    if seeked {
                        log::debug!(
                            "Decoded frame {position} does not match the indexed hash, \
                             marking seek point {seek_frame} as bad"
                        );
                        return self.retry_after_bad_seek(
                            frame_number,
                            seek_frame,
                            slot,
                            depth,
                            true,
                        );
                    }
                    log::warn!(
                        "Linear decoding produced a mismatching frame at {position}; \
                         deleting the index and using threads=1 sometimes helps"
                    );
                    return Ok(None);
                };

                if position == frame_number {
                    produced = Some(SourceFrame::from_decoded(&frame)?);
                }
                self.cache.insert(position, frame);
            } else {
                let skip = frame_number - self.pre_roll - position;
                if let Some(decoder) = self.slots[slot].decoder.as_mut() {
                    decoder.skip_frames(skip);
                }
            }

            let exhausted = !self
                .slots[slot]
                .decoder
                .as_ref()
                .is_some_and(RawDecoder::has_more_frames);
            if exhausted {
                self.slots[slot].decoder = None;
            }
        }

        Ok(produced)
    }
}

/// Pick the output timeline from the configured options.
fn resolve_timeline(options: &SourceOptions, properties: &VideoProperties) -> OutputTimeline {
    if options.rff {
        return OutputTimeline::RepeatField;
    }
    if options.fps_num <= 0 {
        return OutputTimeline::Source;
    }

    let (fps_num, fps_den) = reduce_fraction(options.fps_num, options.fps_den);
    let (source_num, source_den) = reduce_fraction(
        properties.fps.numerator() as i64,
        properties.fps.denominator() as i64,
    );
    if (fps_num, fps_den) == (source_num, source_den) {
        return OutputTimeline::Source;
    }

    let duration_seconds = properties.duration as f64 * properties.time_base.numerator() as f64
        / (properties.time_base.denominator() as f64 * 1000.0);
    let num_frames = ((duration_seconds * fps_num as f64) / fps_den as f64) as i64;
    OutputTimeline::ConstantRate {
        fps_num,
        fps_den,
        num_frames: num_frames.max(1),
    }
}

fn reduce_fraction(mut num: i64, mut den: i64) -> (i64, i64) {
    let mut a = num.abs().max(1);
    let mut b = den.abs().max(1);
    while b != 0 {
        let remainder = a % b;
        a = b;
        b = remainder;
    }
    num /= a;
    den /= a;
    (num, den)
}

/// Walk downward from `frame_number - pre_roll` and return the closest
/// usable seek point: a keyframe with a known PTS, at least
/// [`MIN_SEEK_FRAME`] frames in, and not previously found bad. Returns -1
/// when none exists.
fn choose_seek_frame(
    frames: &[FrameInfo],
    bad_seek_locations: &BTreeSet<i64>,
    frame_number: i64,
    pre_roll: i64,
) -> i64 {
    let mut i = frame_number - pre_roll;
    while i >= MIN_SEEK_FRAME {
        let frame = &frames[i as usize];
        if frame.key_frame
            && frame.pts != ffmpeg_sys_next::AV_NOPTS_VALUE
            && !bad_seek_locations.contains(&i)
        {
            return i;
        }
        i -= 1;
    }
    -1
}

/// Index of the frame whose PTS is nearest to `pts`, ties broken toward
/// the later frame. `frames` must be non-empty.
fn nearest_frame_by_pts(frames: &[FrameInfo], pts: i64) -> usize {
    let position = frames.partition_point(|frame| frame.pts < pts);
    if position == frames.len() {
        return frames.len() - 1;
    }
    if position == 0
        || (frames[position].pts - pts).abs() <= (frames[position - 1].pts - pts).abs()
    {
        position
    } else {
        position - 1
    }
}

/// All index positions where the hashes of `run` occur consecutively.
///
/// At end of stream the run can only end at the last frame, so a single
/// position is checked.
fn hash_run_candidates(frames: &[FrameInfo], run: &[u64], at_eof: bool) -> Vec<i64> {
    if run.is_empty() || run.len() > frames.len() {
        return Vec::new();
    }

    let matches_at =
        |start: usize| run.iter().enumerate().all(|(j, hash)| frames[start + j].hash == *hash);

    if at_eof {
        let start = frames.len() - run.len();
        if matches_at(start) {
            return vec![start as i64];
        }
        return Vec::new();
    }

    (0..=frames.len() - run.len())
        .filter(|&start| matches_at(start))
        .map(|start| start as i64)
        .collect()
}

fn classify_seek_identity(
    candidates: &[i64],
    frame_number: i64,
    at_eof: bool,
    run_len: usize,
) -> SeekIdentity {
    let suitable = candidates.iter().any(|&candidate| candidate <= frame_number);
    if !suitable {
        return SeekIdentity::Unsuitable;
    }
    if candidates.len() > 1 {
        if at_eof || run_len >= MAX_IDENTIFY_RUN {
            return SeekIdentity::AmbiguityCapped;
        }
        return SeekIdentity::NeedMoreFrames;
    }
    SeekIdentity::Unique(candidates[0])
}

/// Expand per-frame repeat counts into the field table of the virtual
/// repeat-field timeline.
///
/// Each source frame emits `repeat_pict + 2` field decisions alternating
/// between top and bottom starting from its field order; a trailing
/// half-filled entry duplicates its neighbour on the short side.
fn build_rff_fields(frames: &[FrameInfo], num_rff_frames: i64) -> Vec<(i64, i64)> {
    let mut fields = vec![(0i64, 0i64); num_rff_frames.max(0) as usize];
    let mut top_cursor = 0usize;
    let mut bottom_cursor = 0usize;

    for (n, frame) in frames.iter().enumerate() {
        let repeated_fields = frame.repeat_pict.max(0) + 2;
        let mut write_top = frame.top_field_first;
        for _ in 0..repeated_fields {
            if write_top {
                debug_assert!(top_cursor <= bottom_cursor);
                if let Some(slot) = fields.get_mut(top_cursor) {
                    slot.0 = n as i64;
                }
                top_cursor += 1;
            } else {
                debug_assert!(top_cursor >= bottom_cursor);
                if let Some(slot) = fields.get_mut(bottom_cursor) {
                    slot.1 = n as i64;
                }
                bottom_cursor += 1;
            }
            write_top = !write_top;
        }
    }

    if top_cursor > bottom_cursor {
        if bottom_cursor > 0 {
            if let Some(carry) = fields.get(bottom_cursor - 1).map(|pair| pair.1) {
                if let Some(slot) = fields.get_mut(bottom_cursor) {
                    slot.1 = carry;
                }
            }
        }
    } else if top_cursor < bottom_cursor {
        if top_cursor > 0 {
            if let Some(carry) = fields.get(top_cursor - 1).map(|pair| pair.0) {
                if let Some(slot) = fields.get_mut(top_cursor) {
                    slot.0 = carry;
                }
            }
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_info(hash: u64, pts: i64, key_frame: bool) -> FrameInfo {
        FrameInfo {
            hash,
            pts,
            repeat_pict: 0,
            key_frame,
            top_field_first: false,
        }
    }

    fn rff_frame(repeat_pict: i32, top_field_first: bool) -> FrameInfo {
        FrameInfo {
            hash: 0,
            pts: 0,
            repeat_pict,
            key_frame: false,
            top_field_first,
        }
    }

    fn num_rff_frames(frames: &[FrameInfo]) -> i64 {
        let fields: i64 = frames.iter().map(|f| f.repeat_pict as i64 + 2).sum();
        (fields + 1) / 2
    }

    #[test]
    fn progressive_frames_map_to_themselves() {
        let frames: Vec<FrameInfo> = (0..5).map(|_| rff_frame(0, true)).collect();
        let count = num_rff_frames(&frames);
        assert_eq!(count, 5);
        let fields = build_rff_fields(&frames, count);
        assert_eq!(fields, vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 4)]);
    }

    #[test]
    fn a_double_repeat_spreads_one_frame_over_two() {
        let frames = vec![rff_frame(2, true)];
        let count = num_rff_frames(&frames);
        assert_eq!(count, 2);
        let fields = build_rff_fields(&frames, count);
        assert_eq!(fields, vec![(0, 0), (0, 0)]);
    }

    #[test]
    fn mixed_repeats_duplicate_the_short_side() {
        let frames = vec![rff_frame(0, true), rff_frame(1, true), rff_frame(0, false)];
        let count = num_rff_frames(&frames);
        assert_eq!(count, 4);
        let fields = build_rff_fields(&frames, count);
        assert_eq!(fields, vec![(0, 0), (1, 1), (1, 2), (2, 2)]);
        // Every referenced source frame stays in range.
        for (top, bottom) in fields {
            assert!((0..frames.len() as i64).contains(&top));
            assert!((0..frames.len() as i64).contains(&bottom));
        }
    }

    #[test]
    fn field_count_invariant_holds() {
        let frames = vec![
            rff_frame(1, true),
            rff_frame(0, false),
            rff_frame(2, true),
            rff_frame(1, false),
        ];
        let count = num_rff_frames(&frames);
        let total_fields: i64 = frames.iter().map(|f| f.repeat_pict as i64 + 2).sum();
        assert!((total_fields - 2 * count).abs() <= 1);
        assert_eq!(build_rff_fields(&frames, count).len() as i64, count);
    }

    #[test]
    fn seek_frame_selection_respects_keyframes_and_blacklist() {
        let mut frames: Vec<FrameInfo> = (0..300)
            .map(|i| frame_info(i as u64, i, i % 50 == 0))
            .collect();
        let mut bad = BTreeSet::new();

        assert_eq!(choose_seek_frame(&frames, &bad, 260, 1), 250);

        bad.insert(250);
        assert_eq!(choose_seek_frame(&frames, &bad, 260, 1), 200);

        // Keyframes below the floor are never chosen.
        assert_eq!(choose_seek_frame(&frames, &bad, 90, 1), -1);

        // A keyframe without a timestamp is unusable as a seek target.
        frames[200].pts = ffmpeg_sys_next::AV_NOPTS_VALUE;
        assert_eq!(choose_seek_frame(&frames, &bad, 260, 1), 150);
    }

    #[test]
    fn pre_roll_moves_the_search_start() {
        let frames: Vec<FrameInfo> = (0..300)
            .map(|i| frame_info(i as u64, i, i % 50 == 0))
            .collect();
        let bad = BTreeSet::new();
        assert_eq!(choose_seek_frame(&frames, &bad, 251, 1), 250);
        assert_eq!(choose_seek_frame(&frames, &bad, 251, 2), 200);
    }

    #[test]
    fn nearest_pts_picks_the_closer_neighbour() {
        let frames: Vec<FrameInfo> =
            [0, 33, 66, 100].iter().map(|&pts| frame_info(0, pts, true)).collect();

        assert_eq!(nearest_frame_by_pts(&frames, 0), 0);
        assert_eq!(nearest_frame_by_pts(&frames, 40), 1);
        // Equidistant or closer to the later frame resolves forward.
        assert_eq!(nearest_frame_by_pts(&frames, 50), 2);
        assert_eq!(nearest_frame_by_pts(&frames, 1_000_000), 3);
    }

    #[test]
    fn hash_runs_narrow_down_ambiguous_positions() {
        let hashes = [1u64, 2, 3, 2, 3, 4];
        let frames: Vec<FrameInfo> =
            hashes.iter().enumerate().map(|(i, &h)| frame_info(h, i as i64, false)).collect();

        assert_eq!(hash_run_candidates(&frames, &[2, 3], false), vec![1, 3]);
        assert_eq!(hash_run_candidates(&frames, &[2, 3, 4], false), vec![3]);
        assert_eq!(hash_run_candidates(&frames, &[9], false), Vec::<i64>::new());

        // At end of stream the run can only sit at the tail.
        assert_eq!(hash_run_candidates(&frames, &[3, 4], true), vec![4]);
        assert_eq!(hash_run_candidates(&frames, &[2, 3], true), Vec::<i64>::new());
    }

    #[test]
    fn seek_identity_classification() {
        assert!(matches!(
            classify_seek_identity(&[3], 10, false, 3),
            SeekIdentity::Unique(3)
        ));
        assert!(matches!(
            classify_seek_identity(&[1, 3], 10, false, 2),
            SeekIdentity::NeedMoreFrames
        ));
        assert!(matches!(
            classify_seek_identity(&[1, 3], 10, false, MAX_IDENTIFY_RUN),
            SeekIdentity::AmbiguityCapped
        ));
        assert!(matches!(
            classify_seek_identity(&[1, 3], 10, true, 2),
            SeekIdentity::AmbiguityCapped
        ));
        // Candidates beyond the target cannot serve the request.
        assert!(matches!(
            classify_seek_identity(&[15], 10, false, 2),
            SeekIdentity::Unsuitable
        ));
        assert!(matches!(
            classify_seek_identity(&[], 10, false, 1),
            SeekIdentity::Unsuitable
        ));
    }

    #[test]
    fn fraction_reduction() {
        assert_eq!(reduce_fraction(30000, 1001), (30000, 1001));
        assert_eq!(reduce_fraction(50, 2), (25, 1));
        assert_eq!(reduce_fraction(24, 24), (1, 1));
    }
}

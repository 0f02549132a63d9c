//! Forward-only decoder adapter.
//!
//! [`RawDecoder`] wraps an FFmpeg demuxer and video decoder pair as a
//! forward iterator over decoded frames of a single track, with one coarse
//! positioning primitive: seek to the nearest keyframe at or before a
//! timestamp. Everything smarter than that (identifying where a seek
//! actually landed, retrying bad seek points) is the engine's job.

use std::{
    collections::BTreeMap,
    ffi::CString,
    path::{Path, PathBuf},
    thread,
};

use ffmpeg_next::{
    codec::{context::Context as CodecContext, Id},
    decoder,
    format::{self, context::Input, Pixel},
    frame::Video as VideoFrame,
    media::Type,
    Dictionary, Error as FfmpegError, Packet, Rational,
};
use ffmpeg_sys_next as sys;

use crate::{
    error::FrameSeekError,
    frame::{format_summary, read_content_light, read_mastering_display},
    properties::VideoProperties,
};

const SEEK_CUR: i32 = 1;

/// Owned hardware device context plus the scratch frame decoded into
/// before transfer to system memory.
struct HwContext {
    device: *mut sys::AVBufferRef,
    frame: VideoFrame,
}

impl Drop for HwContext {
    fn drop(&mut self) {
        unsafe {
            sys::av_buffer_unref(&mut self.device);
        }
    }
}

/// A forward-only decoder over one video track.
pub(crate) struct RawDecoder {
    source: PathBuf,
    input: Input,
    decoder: decoder::Video,
    track: i32,
    is_h264: bool,
    variable_format: bool,
    hw: Option<HwContext>,
    /// Index of the next frame this decoder will produce. `i64::MIN`
    /// after a seek, until the engine has identified the position.
    current_frame: i64,
    decode_ok: bool,
    seeked: bool,
    eof_sent: bool,
    /// First decoded format; deviating frames are dropped while
    /// `variable_format` is off.
    pinned_format: Option<(Pixel, u32, u32)>,
}

impl RawDecoder {
    /// Open a source file and prepare a decoder for one of its video
    /// tracks.
    ///
    /// A negative `track` selects the `-track - 1`-th video track; a
    /// non-negative one is an absolute stream index that must refer to a
    /// video stream. All other streams are discarded at the demuxer.
    pub(crate) fn open(
        source: &Path,
        hw_device: &str,
        extra_hw_frames: i32,
        track: i32,
        variable_format: bool,
        threads: i32,
        container_options: &BTreeMap<String, String>,
    ) -> Result<RawDecoder, FrameSeekError> {
        crate::ffmpeg::init();

        let open_error = |reason: String| FrameSeekError::FileOpen {
            path: source.to_path_buf(),
            reason,
        };

        let hw_type = if hw_device.is_empty() {
            None
        } else {
            let name = CString::new(hw_device)
                .map_err(|_| open_error("Invalid hardware device name".to_string()))?;
            let device_type = unsafe { sys::av_hwdevice_find_type_by_name(name.as_ptr()) };
            if device_type == sys::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
                return Err(open_error(format!("Unknown hardware device: {hw_device}")));
            }
            Some(device_type)
        };

        let mut dictionary = Dictionary::new();
        for (key, value) in container_options {
            dictionary.set(key, value);
        }
        let mut input = format::input_with_dictionary(&source, dictionary)
            .map_err(|error| open_error(error.to_string()))?;

        // Resolve negative selectors to the n-th video stream.
        let mut resolved = track;
        if resolved < 0 {
            for stream in input.streams() {
                if stream.parameters().medium() == Type::Video {
                    if resolved == -1 {
                        resolved = stream.index() as i32;
                        break;
                    }
                    resolved += 1;
                }
            }
        }
        if track < 0 && resolved < 0 {
            return Err(FrameSeekError::TrackNotFound { track });
        }

        let stream_count = input.streams().count();
        if resolved < 0 || resolved as usize >= stream_count {
            return Err(open_error(format!("Invalid track index {resolved}")));
        }

        let (parameters, stream_index) = {
            let stream = input
                .stream(resolved as usize)
                .ok_or_else(|| open_error(format!("Invalid track index {resolved}")))?;
            if stream.parameters().medium() != Type::Video {
                return Err(open_error(format!("Track {resolved} is not a video track")));
            }
            (stream.parameters(), stream.index())
        };

        unsafe {
            let raw_input = input.as_mut_ptr();
            for i in 0..(*raw_input).nb_streams as usize {
                if i != stream_index {
                    (*(*(*raw_input).streams.add(i))).discard = sys::AVDiscard::AVDISCARD_ALL;
                }
            }
        }

        let codec_id = parameters.id();
        let codec = if hw_type.is_some() && codec_id == Id::AV1 {
            decoder::find_by_name("av1")
        } else {
            decoder::find(codec_id)
        }
        .ok_or_else(|| open_error("Video codec not found".to_string()))?;

        let mut hw_pix_fmt = sys::AVPixelFormat::AV_PIX_FMT_NONE;
        if let Some(device_type) = hw_type {
            let mut i = 0;
            loop {
                let config = unsafe { sys::avcodec_get_hw_config(codec.as_ptr(), i) };
                if config.is_null() {
                    return Err(open_error(format!(
                        "Decoder {} does not support device type {hw_device}",
                        codec.name(),
                    )));
                }
                let supported = unsafe {
                    (*config).methods & sys::AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as i32 != 0
                        && (*config).device_type == device_type
                };
                if supported {
                    hw_pix_fmt = unsafe { (*config).pix_fmt };
                    break;
                }
                i += 1;
            }
        }

        let mut context = CodecContext::from_parameters(parameters)
            .map_err(|error| open_error(format!("Could not copy codec parameters: {error}")))?;

        let mut thread_count = threads;
        if thread_count < 1 {
            let hardware_concurrency = thread::available_parallelism()
                .map(|n| n.get() as i32)
                .unwrap_or(1);
            thread_count = if hw_type.is_some() {
                // H.264 hardware decoding misbehaves with threaded setup.
                if codec_id == Id::H264 {
                    1
                } else {
                    hardware_concurrency.min(2)
                }
            } else {
                hardware_concurrency.min(16)
            };
        }

        let is_h264 = codec_id == Id::H264;
        let mut hw = None;
        unsafe {
            let raw_context = context.as_mut_ptr();
            (*raw_context).thread_count = thread_count;

            // Full explanation available at
            // https://github.com/Nevcairiel/LAVFilters/issues/113:
            // a partially declared reorder buffer delays frame output,
            // and 15 is the maximum possible value for H.264.
            if is_h264 && (*raw_context).has_b_frames != 0 {
                (*raw_context).has_b_frames = 15;
            }

            if let Some(device_type) = hw_type {
                let mut device: *mut sys::AVBufferRef = std::ptr::null_mut();
                let created = sys::av_hwdevice_ctx_create(
                    &mut device,
                    device_type,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                    0,
                );
                if created < 0 {
                    return Err(open_error(format!(
                        "Failed to create hardware device {hw_device}"
                    )));
                }
                (*raw_context).extra_hw_frames = extra_hw_frames;
                (*raw_context).pix_fmt = hw_pix_fmt;
                (*raw_context).hw_device_ctx = sys::av_buffer_ref(device);
                hw = Some(HwContext {
                    device,
                    frame: VideoFrame::empty(),
                });
            }
        }

        let decoder = context
            .decoder()
            .open_as(codec)
            .map_err(|error| open_error(format!("Could not open video codec: {error}")))?
            .video()
            .map_err(|error| open_error(error.to_string()))?;

        Ok(RawDecoder {
            source: source.to_path_buf(),
            input,
            decoder,
            track: resolved,
            is_h264,
            variable_format,
            hw,
            current_frame: 0,
            decode_ok: true,
            seeked: false,
            eof_sent: false,
            pinned_format: None,
        })
    }

    /// Decode the next frame, optionally without materialising output.
    fn decode_next(&mut self, skip_output: bool) -> Option<VideoFrame> {
        loop {
            let mut output = VideoFrame::empty();
            let received = match self.hw.as_mut() {
                Some(hw) => self.decoder.receive_frame(&mut hw.frame).is_ok(),
                None => self.decoder.receive_frame(&mut output).is_ok(),
            };

            if received {
                let decoded = match self.hw.as_ref() {
                    Some(hw) => (hw.frame.format(), hw.frame.width(), hw.frame.height()),
                    None => (output.format(), output.width(), output.height()),
                };
                if !self.variable_format {
                    match self.pinned_format {
                        None => self.pinned_format = Some(decoded),
                        Some(pinned) if pinned != decoded => {
                            log::debug!(
                                "Dropping frame with mid-stream format change: {decoded:?}"
                            );
                            continue;
                        }
                        Some(_) => {}
                    }
                }

                if let Some(hw) = self.hw.as_mut() {
                    if !skip_output {
                        unsafe {
                            let transferred = sys::av_hwframe_transfer_data(
                                output.as_mut_ptr(),
                                hw.frame.as_ptr(),
                                0,
                            );
                            if transferred < 0 {
                                return None;
                            }
                            sys::av_frame_copy_props(output.as_mut_ptr(), hw.frame.as_ptr());
                        }
                    }
                }
                return Some(output);
            }

            if self.eof_sent {
                return None;
            }

            // The decoder wants input. Feed it the next packet of our
            // track, or signal end of stream.
            loop {
                let mut packet = Packet::empty();
                match packet.read(&mut self.input) {
                    Ok(()) => {
                        if packet.stream() == self.track as usize {
                            if let Err(error) = self.decoder.send_packet(&packet) {
                                log::debug!("send_packet failed: {error}");
                            }
                            break;
                        }
                    }
                    Err(FfmpegError::Eof) => {
                        let _ = self.decoder.send_eof();
                        self.eof_sent = true;
                        break;
                    }
                    Err(error) => {
                        // A demuxer that cannot produce packets any more
                        // is treated as end of stream.
                        log::debug!("Packet read failed: {error}");
                        let _ = self.decoder.send_eof();
                        self.eof_sent = true;
                        break;
                    }
                }
            }
        }
    }

    /// Return the next decoded frame and advance the frame counter, or
    /// `None` at end of stream or on a fatal decode error.
    pub(crate) fn next_frame(&mut self) -> Option<VideoFrame> {
        if !self.decode_ok {
            return None;
        }
        match self.decode_next(false) {
            Some(frame) => {
                self.current_frame += 1;
                Some(frame)
            }
            None => {
                self.decode_ok = false;
                None
            }
        }
    }

    /// Decode and discard `count` frames.
    pub(crate) fn skip_frames(&mut self, count: i64) -> bool {
        for _ in 0..count {
            if !self.decode_ok {
                break;
            }
            if self.decode_next(true).is_some() {
                self.current_frame += 1;
            } else {
                self.decode_ok = false;
            }
        }
        self.decode_ok
    }

    /// Whether the decoder can still produce frames.
    pub(crate) fn has_more_frames(&self) -> bool {
        self.decode_ok
    }

    /// Request a backward seek to `pts` on this decoder's track.
    ///
    /// Flushes the codec and invalidates the frame counter; the engine
    /// restores it once the landing position has been identified. Returns
    /// whether the demuxer accepted the seek.
    pub(crate) fn seek(&mut self, pts: i64) -> bool {
        // The decoder has to see the broken SEI in the first frame to
        // compensate for it later. Why is it always H.264?
        if !self.seeked && self.is_h264 {
            self.skip_frames(1);
        }
        self.seeked = true;
        self.decoder.flush();
        self.eof_sent = false;
        self.current_frame = i64::MIN;
        self.decode_ok = unsafe {
            sys::av_seek_frame(
                self.input.as_mut_ptr(),
                self.track,
                pts,
                sys::AVSEEK_FLAG_BACKWARD as i32,
            ) >= 0
        };
        self.decode_ok
    }

    /// Whether this decoder has ever seeked.
    pub(crate) fn has_seeked(&self) -> bool {
        self.seeked
    }

    /// Index of the next frame this decoder will produce.
    pub(crate) fn frame_number(&self) -> i64 {
        self.current_frame
    }

    /// Restore the frame counter after the engine identified where a
    /// seek landed.
    pub(crate) fn set_frame_number(&mut self, frame_number: i64) {
        self.current_frame = frame_number;
    }

    /// The resolved track number.
    pub(crate) fn track(&self) -> i32 {
        self.track
    }

    pub(crate) fn source(&self) -> &Path {
        &self.source
    }

    /// Total byte size of the source file.
    pub(crate) fn source_size(&self) -> i64 {
        unsafe { sys::avio_size((*self.input.as_ptr()).pb) }
    }

    /// Current byte position within the source file.
    pub(crate) fn source_position(&self) -> i64 {
        unsafe { sys::avio_seek((*self.input.as_ptr()).pb, 0, SEEK_CUR) }
    }

    /// Probe the track and derive its [`VideoProperties`].
    ///
    /// May only be called once, on a fresh decoder, before any frame has
    /// been handed out: it decodes one probe frame to resolve the pixel
    /// format, dimensions and start time.
    pub(crate) fn video_properties(&mut self) -> Result<VideoProperties, FrameSeekError> {
        debug_assert_eq!(self.current_frame, 0);

        let probe = self.next_frame().ok_or_else(|| FrameSeekError::FileOpen {
            path: self.source.clone(),
            reason: "Could not decode a probe frame".to_string(),
        })?;
        let format = format_summary(probe.format())?;

        let stream = self
            .input
            .stream(self.track as usize)
            .ok_or_else(|| FrameSeekError::FileOpen {
                path: self.source.clone(),
                reason: format!("Invalid track index {}", self.track),
            })?;
        let stream_time_base = stream.time_base();

        let mut fps = unsafe { Rational::from((*self.decoder.as_ptr()).framerate) };
        if fps.numerator() <= 0 || fps.denominator() <= 0 {
            fps = stream.rate();
        }

        let duration = stream.duration();
        let mut num_frames = stream.frames();
        if num_frames <= 0 && duration > 0 && fps.numerator() > 0 && fps.denominator() > 0 {
            num_frames = duration * fps.numerator() as i64 / fps.denominator() as i64;
        }
        if num_frames <= 0 {
            num_frames = -1;
        }
        if fps.numerator() <= 0 || fps.denominator() <= 0 {
            fps = Rational::new(30, 1);
        }

        let start_time = match probe.pts() {
            Some(pts) => {
                stream_time_base.numerator() as f64 * pts as f64
                    / stream_time_base.denominator() as f64
            }
            None => 0.0,
        };

        let mut sar = unsafe { Rational::from((*self.decoder.as_ptr()).sample_aspect_ratio) };
        let parameters = stream.parameters();
        if sar.numerator() <= 0 || sar.denominator() <= 0 {
            sar = unsafe { Rational::from((*parameters.as_ptr()).sample_aspect_ratio) };
        }

        let mut stereo3d_type = 0;
        let mut stereo3d_flags = 0;
        let mut mastering_display_primaries = None;
        let mut mastering_display_luminance = None;
        let mut content_light = None;
        let mut rotation = 0;
        let mut flip_horizontal = false;
        let mut flip_vertical = false;

        unsafe {
            let raw_parameters = parameters.as_ptr();

            let stereo = sys::av_packet_side_data_get(
                (*raw_parameters).coded_side_data,
                (*raw_parameters).nb_coded_side_data,
                sys::AVPacketSideDataType::AV_PKT_DATA_STEREO3D,
            );
            if !stereo.is_null() {
                let stereo3d = (*stereo).data as *const sys::AVStereo3D;
                stereo3d_type = (*stereo3d).type_ as i32;
                stereo3d_flags = (*stereo3d).flags;
            }

            let mastering = sys::av_packet_side_data_get(
                (*raw_parameters).coded_side_data,
                (*raw_parameters).nb_coded_side_data,
                sys::AVPacketSideDataType::AV_PKT_DATA_MASTERING_DISPLAY_METADATA,
            );
            if !mastering.is_null() {
                let metadata = (*mastering).data as *const sys::AVMasteringDisplayMetadata;
                let (primaries, luminance) = read_mastering_display(&*metadata);
                mastering_display_primaries = primaries;
                mastering_display_luminance = luminance;
            }

            let light = sys::av_packet_side_data_get(
                (*raw_parameters).coded_side_data,
                (*raw_parameters).nb_coded_side_data,
                sys::AVPacketSideDataType::AV_PKT_DATA_CONTENT_LIGHT_LEVEL,
            );
            if !light.is_null() {
                let metadata = (*light).data as *const sys::AVContentLightMetadata;
                content_light = read_content_light(&*metadata);
            }

            let display = sys::av_packet_side_data_get(
                (*raw_parameters).coded_side_data,
                (*raw_parameters).nb_coded_side_data,
                sys::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
            );
            if !display.is_null() && (*display).size >= std::mem::size_of::<[i32; 9]>() {
                let mut matrix = [0i32; 9];
                std::ptr::copy_nonoverlapping(
                    (*display).data as *const i32,
                    matrix.as_mut_ptr(),
                    9,
                );
                let determinant =
                    matrix[0] as i64 * matrix[4] as i64 - matrix[1] as i64 * matrix[3] as i64;
                if determinant < 0 {
                    // Assume a horizontal flip and decouple it from the
                    // rotation; a 180 degree reading below turns it into
                    // a vertical flip instead.
                    flip_horizontal = true;
                    sys::av_display_matrix_flip(matrix.as_mut_ptr(), 1, 0);
                }

                let mut degrees = sys::av_display_rotation_get(matrix.as_ptr()).round() as i32;
                if degrees == 180 && determinant < 0 {
                    flip_vertical = true;
                } else {
                    // A 90/270 rotation combined with a flip applies to
                    // the video frame rather than the rendering frame, so
                    // negate to cancel the conversion below.
                    if flip_horizontal || flip_vertical {
                        degrees = -degrees;
                    }
                    rotation = -degrees;
                    if rotation < 0 {
                        rotation += 360;
                    }
                }
            }
        }

        Ok(VideoProperties {
            width: self.decoder.width(),
            height: self.decoder.height(),
            format,
            fps,
            duration,
            time_base: Rational::new(
                stream_time_base.numerator() * 1000,
                stream_time_base.denominator(),
            ),
            num_frames,
            num_rff_frames: 0,
            start_time,
            sar,
            stereo3d_type,
            stereo3d_flags,
            rotation,
            flip_horizontal,
            flip_vertical,
            mastering_display_primaries,
            mastering_display_luminance,
            content_light,
        })
    }
}

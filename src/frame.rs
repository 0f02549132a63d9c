//! Decoded frames as returned to callers.
//!
//! [`SourceFrame`] owns a reference-counted clone of a decoded FFmpeg
//! frame together with a flat view of its per-frame metadata, so callers
//! never touch the engine's cached instances. Field merging for the
//! repeat-field timeline and visible-byte planar export live here too.

use ffmpeg_next::{
    chroma, color, format::Pixel, frame::Video as VideoFrame, Rational,
};
use ffmpeg_sys_next::{
    av_dynamic_hdr_plus_to_t35, av_frame_get_side_data, av_frame_make_writable, av_frame_ref,
    av_freep, av_get_picture_type_char, av_pix_fmt_desc_get, AVContentLightMetadata,
    AVDynamicHDRPlus, AVFrameSideDataType, AVMasteringDisplayMetadata, AVPixFmtDescriptor,
    AVPixelFormat,
};

use crate::{
    error::FrameSeekError,
    properties::{
        ColorFamily, ContentLightLevel, MasteringDisplayLuminance, MasteringDisplayPrimaries,
        VideoFormat,
    },
};

/// A decoded frame plus its presentation metadata.
///
/// The pixel data is shared with FFmpeg's reference-counted buffers;
/// cloning the underlying frame is cheap and mutation never leaks back
/// into the engine's cache.
pub struct SourceFrame {
    frame: VideoFrame,
    /// Pixel format summary.
    pub format: VideoFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Presentation timestamp in the track time base.
    pub pts: i64,
    /// Frame duration in track time base units.
    pub duration: i64,
    /// Whether the frame is decodable without prior frames.
    pub key_frame: bool,
    /// FFmpeg picture type character: 'I', 'P', 'B', ...
    pub pict_type: char,
    /// Number of repeated fields.
    pub repeat_pict: i32,
    /// Whether the content is interlaced.
    pub interlaced: bool,
    /// Whether the top field is presented first.
    pub top_field_first: bool,
    /// Colour matrix coefficients.
    pub matrix: color::Space,
    /// Colour primaries.
    pub primaries: color::Primaries,
    /// Transfer characteristics.
    pub transfer: color::TransferCharacteristic,
    /// Chroma sample location.
    pub chroma_location: chroma::Location,
    /// Colour range.
    pub color_range: color::Range,
    /// Mastering display primaries carried as frame side data.
    pub mastering_display_primaries: Option<MasteringDisplayPrimaries>,
    /// Mastering display luminance carried as frame side data.
    pub mastering_display_luminance: Option<MasteringDisplayLuminance>,
    /// Content light level carried as frame side data.
    pub content_light: Option<ContentLightLevel>,
    /// Raw Dolby Vision RPU side data, when present.
    pub dolby_vision_rpu: Option<Vec<u8>>,
    /// HDR10+ dynamic metadata serialised as an ITU-T T.35 payload.
    pub hdr10_plus: Option<Vec<u8>>,
}

impl SourceFrame {
    /// Build a caller-owned frame from a decoded one without copying
    /// pixel data.
    pub(crate) fn from_decoded(frame: &VideoFrame) -> Result<Self, FrameSeekError> {
        Self::new(clone_frame_ref(frame)?)
    }

    pub(crate) fn new(frame: VideoFrame) -> Result<Self, FrameSeekError> {
        let format = format_summary(frame.format())?;

        unsafe {
            let raw = frame.as_ptr();

            let mut mastering_display_primaries = None;
            let mut mastering_display_luminance = None;
            let mastering = av_frame_get_side_data(
                raw,
                AVFrameSideDataType::AV_FRAME_DATA_MASTERING_DISPLAY_METADATA,
            );
            if !mastering.is_null() {
                let metadata = (*mastering).data as *const AVMasteringDisplayMetadata;
                let (primaries, luminance) = read_mastering_display(&*metadata);
                mastering_display_primaries = primaries;
                mastering_display_luminance = luminance;
            }

            let mut content_light = None;
            let light = av_frame_get_side_data(
                raw,
                AVFrameSideDataType::AV_FRAME_DATA_CONTENT_LIGHT_LEVEL,
            );
            if !light.is_null() {
                let metadata = (*light).data as *const AVContentLightMetadata;
                content_light = read_content_light(&*metadata);
            }

            let dovi = av_frame_get_side_data(
                raw,
                AVFrameSideDataType::AV_FRAME_DATA_DOVI_RPU_BUFFER,
            );
            let dolby_vision_rpu = if dovi.is_null() {
                None
            } else {
                Some(std::slice::from_raw_parts((*dovi).data, (*dovi).size).to_vec())
            };

            let hdr10_plus = read_hdr10_plus(raw);

            Ok(Self {
                format,
                width: frame.width(),
                height: frame.height(),
                pts: frame.pts().unwrap_or(ffmpeg_sys_next::AV_NOPTS_VALUE),
                duration: (*raw).duration,
                key_frame: (*raw).flags & ffmpeg_sys_next::AV_FRAME_FLAG_KEY as i32 != 0,
                pict_type: av_get_picture_type_char((*raw).pict_type) as u8 as char,
                repeat_pict: (*raw).repeat_pict,
                interlaced: (*raw).flags & ffmpeg_sys_next::AV_FRAME_FLAG_INTERLACED as i32 != 0,
                top_field_first: (*raw).flags
                    & ffmpeg_sys_next::AV_FRAME_FLAG_TOP_FIELD_FIRST as i32
                    != 0,
                matrix: color::Space::from((*raw).colorspace),
                primaries: color::Primaries::from((*raw).color_primaries),
                transfer: color::TransferCharacteristic::from((*raw).color_trc),
                chroma_location: chroma::Location::from((*raw).chroma_location),
                color_range: color::Range::from((*raw).color_range),
                mastering_display_primaries,
                mastering_display_luminance,
                content_light,
                dolby_vision_rpu,
                hdr10_plus,
                frame,
            })
        }
    }

    /// Borrow the underlying decoded frame.
    pub fn frame(&self) -> &VideoFrame {
        &self.frame
    }

    /// The 64-bit content digest of this frame's visible samples, the
    /// same value recorded in the track index.
    pub fn content_hash(&self) -> u64 {
        crate::hash::frame_hash(&self.frame)
    }

    /// Copy the rows of one field parity from `other` into this frame.
    ///
    /// `top` selects which field of this frame is overwritten: rows
    /// 0, 2, 4, ... when `true`, rows 1, 3, 5, ... otherwise. The host
    /// frame is made writable first so shared buffers are not mutated.
    pub(crate) fn merge_field(
        &mut self,
        top: bool,
        other: &SourceFrame,
    ) -> Result<(), FrameSeekError> {
        let source = &other.frame;
        if self.frame.format() != source.format()
            || self.frame.width() != source.width()
            || self.frame.height() != source.height()
        {
            return Err(FrameSeekError::InvalidArgument(
                "merged fields must share the same format and dimensions".to_string(),
            ));
        }

        unsafe {
            if av_frame_make_writable(self.frame.as_mut_ptr()) < 0 {
                return Err(FrameSeekError::FfmpegError(
                    "failed to make the host frame writable".to_string(),
                ));
            }

            let desc = av_pix_fmt_desc_get(AVPixelFormat::from(self.frame.format()));
            let dst = self.frame.as_mut_ptr();
            let src = source.as_ptr();

            for plane in 0..self.frame.planes() {
                let dst_stride = (*dst).linesize[plane] as usize;
                let src_stride = (*src).linesize[plane] as usize;
                let line = dst_stride.min(src_stride);

                let mut plane_height = (*dst).height as usize;
                if plane == 1 || plane == 2 {
                    plane_height >>= (*desc).log2_chroma_h;
                }

                let first_row = if top { 0 } else { 1 };
                let mut dst_row = (*dst).data[plane].add(first_row * dst_stride);
                let mut src_row = (*src).data[plane].add(first_row * src_stride);
                let mut row = first_row;
                while row < plane_height {
                    std::ptr::copy_nonoverlapping(src_row, dst_row, line);
                    dst_row = dst_row.add(2 * dst_stride);
                    src_row = src_row.add(2 * src_stride);
                    row += 2;
                }
            }
        }

        Ok(())
    }

    /// Copy the visible bytes of each plane into caller-provided buffers.
    ///
    /// Only truly planar formats are representable this way; packed
    /// formats yield [`FrameSeekError::ExportFailed`]. `planes` must hold
    /// one destination per base plane (one for gray, three otherwise) and
    /// `strides` the matching row strides in bytes. The alpha plane, when
    /// present and requested, is written to `alpha`.
    pub fn export_planar(
        &self,
        planes: &mut [&mut [u8]],
        strides: &[usize],
        alpha: Option<(&mut [u8], usize)>,
    ) -> Result<(), FrameSeekError> {
        unsafe {
            let desc = av_pix_fmt_desc_get(AVPixelFormat::from(self.frame.format()));
            if desc.is_null() || !is_real_planar(&*desc) {
                return Err(FrameSeekError::ExportFailed(format!(
                    "{:?} is not a planar pixel format",
                    self.frame.format()
                )));
            }

            let bytes_per_sample = match self.format.bits {
                1..=8 => 1usize,
                9..=16 => 2,
                17..=32 => 4,
                33..=64 => 8,
                _ => {
                    return Err(FrameSeekError::ExportFailed(format!(
                        "unsupported bit depth {}",
                        self.format.bits
                    )))
                }
            };

            let base_planes = match self.format.color_family {
                ColorFamily::Gray => 1,
                ColorFamily::Rgb | ColorFamily::Yuv => 3,
            };
            if planes.len() < base_planes || strides.len() < base_planes {
                return Err(FrameSeekError::ExportFailed(format!(
                    "expected {base_planes} destination planes"
                )));
            }

            let raw = self.frame.as_ptr();
            for plane in 0..base_planes {
                let mut plane_width = (*raw).width as usize;
                let mut plane_height = (*raw).height as usize;
                if plane > 0 {
                    plane_width >>= (*desc).log2_chroma_w;
                    plane_height >>= (*desc).log2_chroma_h;
                }

                let src_plane = (*desc).comp[plane].plane as usize;
                copy_plane(
                    (*raw).data[src_plane],
                    (*raw).linesize[src_plane] as usize,
                    planes[plane],
                    strides[plane],
                    plane_width * bytes_per_sample,
                    plane_height,
                )?;
            }

            if let (true, Some((alpha_dst, alpha_stride))) = (self.format.alpha, alpha) {
                copy_plane(
                    (*raw).data[3],
                    (*raw).linesize[3] as usize,
                    alpha_dst,
                    alpha_stride,
                    (*raw).width as usize * bytes_per_sample,
                    (*raw).height as usize,
                )?;
            }
        }

        Ok(())
    }
}

/// Clone a frame by taking new references on its buffers.
pub(crate) fn clone_frame_ref(frame: &VideoFrame) -> Result<VideoFrame, FrameSeekError> {
    let mut cloned = VideoFrame::empty();
    let status = unsafe { av_frame_ref(cloned.as_mut_ptr(), frame.as_ptr()) };
    if status < 0 {
        return Err(FrameSeekError::FfmpegError(format!(
            "av_frame_ref failed with {status}"
        )));
    }
    Ok(cloned)
}

/// Summarise a pixel format from its FFmpeg descriptor.
///
/// Palette formats have no meaningful per-plane sample layout and are
/// rejected.
pub(crate) fn format_summary(pixel: Pixel) -> Result<VideoFormat, FrameSeekError> {
    unsafe {
        let desc = av_pix_fmt_desc_get(AVPixelFormat::from(pixel));
        if desc.is_null() {
            return Err(FrameSeekError::UnsupportedFormat(format!("{pixel:?}")));
        }
        let flags = (*desc).flags;
        if flags & ffmpeg_sys_next::AV_PIX_FMT_FLAG_PAL as u64 != 0 {
            return Err(FrameSeekError::UnsupportedFormat(format!(
                "{pixel:?} is a palette format"
            )));
        }

        let color_family = if (*desc).nb_components <= 2 {
            ColorFamily::Gray
        } else if flags & ffmpeg_sys_next::AV_PIX_FMT_FLAG_RGB as u64 != 0 {
            ColorFamily::Rgb
        } else {
            ColorFamily::Yuv
        };

        Ok(VideoFormat {
            color_family,
            float_samples: flags & ffmpeg_sys_next::AV_PIX_FMT_FLAG_FLOAT as u64 != 0,
            alpha: flags & ffmpeg_sys_next::AV_PIX_FMT_FLAG_ALPHA as u64 != 0,
            bits: (*desc).comp[0].depth,
            sub_sampling_w: (*desc).log2_chroma_w as i32,
            sub_sampling_h: (*desc).log2_chroma_h as i32,
        })
    }
}

/// A format is truly planar when every component lives on its own plane.
fn is_real_planar(desc: &AVPixFmtDescriptor) -> bool {
    let mut max_plane = 0;
    for component in desc.comp.iter().take(desc.nb_components as usize) {
        max_plane = max_plane.max(component.plane);
    }
    (max_plane + 1) as usize == desc.nb_components as usize
}

unsafe fn copy_plane(
    mut src: *const u8,
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(), FrameSeekError> {
    for row in 0..rows {
        let dst_row = dst
            .get_mut(row * dst_stride..row * dst_stride + row_bytes)
            .ok_or_else(|| {
                FrameSeekError::ExportFailed("destination buffer too small".to_string())
            })?;
        dst_row.copy_from_slice(std::slice::from_raw_parts(src, row_bytes));
        src = src.add(src_stride);
    }
    Ok(())
}

pub(crate) fn read_mastering_display(
    metadata: &AVMasteringDisplayMetadata,
) -> (
    Option<MasteringDisplayPrimaries>,
    Option<MasteringDisplayLuminance>,
) {
    let mut primaries = None;
    if metadata.has_primaries != 0 {
        let display = MasteringDisplayPrimaries {
            primaries: [
                [
                    Rational::from(metadata.display_primaries[0][0]),
                    Rational::from(metadata.display_primaries[0][1]),
                ],
                [
                    Rational::from(metadata.display_primaries[1][0]),
                    Rational::from(metadata.display_primaries[1][1]),
                ],
                [
                    Rational::from(metadata.display_primaries[2][0]),
                    Rational::from(metadata.display_primaries[2][1]),
                ],
            ],
            white_point: [
                Rational::from(metadata.white_point[0]),
                Rational::from(metadata.white_point[1]),
            ],
        };
        let complete = display
            .primaries
            .iter()
            .flatten()
            .chain(display.white_point.iter())
            .all(|value| value.numerator() != 0);
        if complete {
            primaries = Some(display);
        }
    }

    // The minimum luminance is allowed to be zero; only the maximum
    // decides whether the block is present.
    let mut luminance = None;
    if metadata.has_luminance != 0 {
        let max = Rational::from(metadata.max_luminance);
        if max.numerator() != 0 {
            luminance = Some(MasteringDisplayLuminance {
                min: Rational::from(metadata.min_luminance),
                max,
            });
        }
    }

    (primaries, luminance)
}

pub(crate) fn read_content_light(metadata: &AVContentLightMetadata) -> Option<ContentLightLevel> {
    if metadata.MaxCLL == 0 && metadata.MaxFALL == 0 {
        return None;
    }
    Some(ContentLightLevel {
        max_cll: metadata.MaxCLL,
        max_fall: metadata.MaxFALL,
    })
}

unsafe fn read_hdr10_plus(raw: *const ffmpeg_sys_next::AVFrame) -> Option<Vec<u8>> {
    let side_data =
        av_frame_get_side_data(raw, AVFrameSideDataType::AV_FRAME_DATA_DYNAMIC_HDR_PLUS);
    if side_data.is_null() {
        return None;
    }

    let mut payload: *mut u8 = std::ptr::null_mut();
    let mut payload_size: usize = 0;
    let status = av_dynamic_hdr_plus_to_t35(
        (*side_data).data as *const AVDynamicHDRPlus,
        &mut payload,
        &mut payload_size,
    );
    if status < 0 || payload.is_null() {
        log::warn!("HDR10+ dynamic metadata could not be serialised");
        return None;
    }

    let bytes = std::slice::from_raw_parts(payload, payload_size).to_vec();
    av_freep(&mut payload as *mut *mut u8 as *mut std::ffi::c_void);
    Some(bytes)
}

//! Track-level video properties.
//!
//! [`VideoProperties`] is populated once when a
//! [`VideoSource`](crate::VideoSource) is opened: the pixel format summary
//! and start time come from a probe frame, the rest from codec and
//! container metadata plus stream side data. Frame and duration counts are
//! replaced with exact values once the track index is available.

use ffmpeg_next::Rational;

/// Colour model of a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFamily {
    /// Single luma plane, optionally with alpha.
    Gray,
    /// Red/green/blue components.
    Rgb,
    /// Luma plus two chroma components.
    Yuv,
}

/// Summary of a pixel format, derived from its FFmpeg descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    /// Colour model.
    pub color_family: ColorFamily,
    /// `true` when samples are floating point.
    pub float_samples: bool,
    /// `true` when the format carries an alpha component.
    pub alpha: bool,
    /// Bit depth of the first component.
    pub bits: i32,
    /// Log2 horizontal chroma subsampling shift.
    pub sub_sampling_w: i32,
    /// Log2 vertical chroma subsampling shift.
    pub sub_sampling_h: i32,
}

/// Mastering display colour volume (SMPTE ST 2086).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasteringDisplayPrimaries {
    /// CIE xy chromaticity of the red, green and blue primaries.
    pub primaries: [[Rational; 2]; 3],
    /// CIE xy chromaticity of the white point.
    pub white_point: [Rational; 2],
}

/// Mastering display luminance range in candela per square metre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasteringDisplayLuminance {
    /// Minimum display luminance. Zero is a valid value.
    pub min: Rational,
    /// Maximum display luminance.
    pub max: Rational,
}

/// Content light level information (CTA-861.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLightLevel {
    /// Maximum content light level.
    pub max_cll: u32,
    /// Maximum frame-average light level.
    pub max_fall: u32,
}

/// Properties of an opened video track.
#[derive(Debug, Clone)]
pub struct VideoProperties {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format summary of the probe frame.
    pub format: VideoFormat,
    /// Container frame rate. Falls back to the container's real frame
    /// rate, then to 30/1 when neither is usable.
    pub fps: Rational,
    /// Track duration in [`time_base`](VideoProperties::time_base) units.
    /// Replaced with the exact PTS span once the index is built.
    pub duration: i64,
    /// Track time base, millisecond scaled: the stream time base with its
    /// numerator multiplied by 1000, so `pts * num / den` is a timestamp
    /// in milliseconds.
    pub time_base: Rational,
    /// Exact number of frames in the track.
    pub num_frames: i64,
    /// Number of frames on the repeat-field-expanded timeline.
    pub num_rff_frames: i64,
    /// Presentation time of the first frame in seconds.
    pub start_time: f64,
    /// Sample aspect ratio. Falls back to the container value when the
    /// codec reports none.
    pub sar: Rational,
    /// Stereoscopic packing, as an FFmpeg `AVStereo3DType` code.
    /// Zero means flat 2D content.
    pub stereo3d_type: i32,
    /// Stereoscopic flags, as FFmpeg `AV_STEREO3D_FLAG_*` bits.
    pub stereo3d_flags: i32,
    /// Display rotation in degrees: 0, 90, 180 or 270.
    pub rotation: i32,
    /// Whether the display matrix requests a horizontal flip.
    pub flip_horizontal: bool,
    /// Whether the display matrix requests a vertical flip.
    pub flip_vertical: bool,
    /// Mastering display primaries, when the stream carries them.
    pub mastering_display_primaries: Option<MasteringDisplayPrimaries>,
    /// Mastering display luminance, when the stream carries it.
    pub mastering_display_luminance: Option<MasteringDisplayLuminance>,
    /// Content light level, when the stream carries it.
    pub content_light: Option<ContentLightLevel>,
}

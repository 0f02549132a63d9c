//! Frame content hashing.
//!
//! A frame's identity is a 64-bit XXH3 digest over its visible sample
//! bytes, plane by plane, with row padding skipped. Two frames with the
//! same digest are treated as the same source frame by the seek engine;
//! the digest is collision resistant enough to tell adjacent frames apart
//! but makes no cryptographic claims.

use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_sys_next::{av_pix_fmt_desc_get, AVPixelFormat};
use xxhash_rust::xxh3::Xxh3;

/// Compute the content digest of a decoded frame.
///
/// For each plane the visible width is the frame width (shifted right by
/// the chroma subsampling for the chroma planes) multiplied by the plane's
/// byte step, and exactly that many bytes of each row are hashed.
pub(crate) fn frame_hash(frame: &VideoFrame) -> u64 {
    let mut state = Xxh3::new();

    unsafe {
        let raw = frame.as_ptr();
        let desc = av_pix_fmt_desc_get(AVPixelFormat::from(frame.format()));
        if desc.is_null() {
            return state.digest();
        }

        let mut num_planes = 0usize;
        let mut sample_size = [0usize; 4];
        for component in (*desc).comp.iter().take((*desc).nb_components as usize) {
            let plane = component.plane as usize;
            sample_size[plane] = sample_size[plane].max(component.step as usize);
            num_planes = num_planes.max(plane + 1);
        }

        for plane in 0..num_planes {
            let mut width = (*raw).width as usize;
            let mut height = (*raw).height as usize;
            if plane == 1 || plane == 2 {
                width >>= (*desc).log2_chroma_w;
                height >>= (*desc).log2_chroma_h;
            }
            width *= sample_size[plane];

            let stride = (*raw).linesize[plane] as usize;
            let mut row = (*raw).data[plane];
            for _ in 0..height {
                state.update(std::slice::from_raw_parts(row, width));
                row = row.add(stride);
            }
        }
    }

    state.digest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::format::Pixel;

    fn filled_frame(seed: u8) -> VideoFrame {
        ffmpeg_next::init().expect("FFmpeg initialisation failed");
        let mut frame = VideoFrame::new(Pixel::YUV420P, 64, 48);
        for plane in 0..frame.planes() {
            let stride = frame.stride(plane);
            let height = frame.plane_height(plane) as usize;
            let data = frame.data_mut(plane);
            for row in 0..height {
                for (column, sample) in data[row * stride..][..stride].iter_mut().enumerate() {
                    *sample = seed
                        .wrapping_add(row as u8)
                        .wrapping_mul(31)
                        .wrapping_add(column as u8);
                }
            }
        }
        frame
    }

    #[test]
    fn identical_content_hashes_identically() {
        let first = filled_frame(7);
        let second = filled_frame(7);
        assert_eq!(frame_hash(&first), frame_hash(&second));
    }

    #[test]
    fn different_content_hashes_differently() {
        let first = filled_frame(7);
        let second = filled_frame(8);
        assert_ne!(frame_hash(&first), frame_hash(&second));
    }

    #[test]
    fn padding_does_not_affect_the_digest() {
        // Poke a byte that lies beyond the visible width but inside the
        // stride; the digest must not change.
        let reference = filled_frame(3);
        let mut padded = filled_frame(3);
        let stride = padded.stride(0);
        let width = padded.width() as usize;
        if stride > width {
            padded.data_mut(0)[width] ^= 0xFF;
            assert_eq!(frame_hash(&reference), frame_hash(&padded));
        }
    }
}

//! Size-bounded frame cache.
//!
//! Decoding forward from a keyframe produces every frame between the seek
//! point and the request, so those frames are kept around: a request for a
//! nearby frame is then a cache hit instead of another seek-and-decode
//! pass. The cache is ordered most recently used first and bounded by a
//! byte budget over the frames' underlying buffer sizes.

use std::collections::VecDeque;

use ffmpeg_next::frame::Video as VideoFrame;

use crate::{error::FrameSeekError, frame::clone_frame_ref};

/// Default byte budget: 1 GiB.
const DEFAULT_MAX_SIZE: usize = 1024 * 1024 * 1024;

struct CacheBlock {
    frame_number: i64,
    frame: VideoFrame,
    size: usize,
}

/// LRU cache of decoded frames, bounded by a byte budget.
///
/// The cache exclusively owns its frames. Hits return a cheap
/// reference-counted clone, never the cached instance itself.
pub(crate) struct FrameCache {
    /// Front is most recently used, back least recently used.
    blocks: VecDeque<CacheBlock>,
    total_size: usize,
    max_size: usize,
}

impl FrameCache {
    pub(crate) fn new() -> Self {
        Self {
            blocks: VecDeque::new(),
            total_size: 0,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Set the byte budget and evict from the tail until it is respected.
    pub(crate) fn set_max_size(&mut self, bytes: usize) {
        self.max_size = bytes;
        self.apply_max_size();
    }

    /// Insert a frame at the head of the cache.
    ///
    /// An existing entry with the same frame number is removed first. A
    /// single frame larger than the whole budget is evicted immediately.
    pub(crate) fn insert(&mut self, frame_number: i64, frame: VideoFrame) {
        if let Some(position) = self
            .blocks
            .iter()
            .position(|block| block.frame_number == frame_number)
        {
            if let Some(block) = self.blocks.remove(position) {
                self.total_size -= block.size;
            }
        }

        let size = frame_buffer_size(&frame);
        self.blocks.push_front(CacheBlock {
            frame_number,
            frame,
            size,
        });
        self.total_size += size;
        self.apply_max_size();
    }

    /// Look up a frame, refreshing its LRU position on a hit.
    ///
    /// Hits return a reference-counted clone; the cached instance never
    /// leaves the cache.
    pub(crate) fn get(
        &mut self,
        frame_number: i64,
    ) -> Result<Option<VideoFrame>, FrameSeekError> {
        let Some(position) = self
            .blocks
            .iter()
            .position(|block| block.frame_number == frame_number)
        else {
            return Ok(None);
        };
        if position != 0 {
            if let Some(block) = self.blocks.remove(position) {
                self.blocks.push_front(block);
            }
        }
        match self.blocks.front() {
            Some(block) => Ok(Some(clone_frame_ref(&block.frame)?)),
            None => Ok(None),
        }
    }

    /// Drop every cached frame.
    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
        self.total_size = 0;
    }

    fn apply_max_size(&mut self) {
        while self.total_size > self.max_size {
            if let Some(block) = self.blocks.pop_back() {
                self.total_size -= block.size;
            } else {
                break;
            }
        }
    }
}

/// Sum of the frame's underlying buffer sizes.
fn frame_buffer_size(frame: &VideoFrame) -> usize {
    let mut size = 0usize;
    unsafe {
        let raw = frame.as_ptr();
        for buffer in (*raw).buf.iter() {
            if !buffer.is_null() {
                size += (**buffer).size;
            }
        }
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::format::Pixel;

    fn test_frame() -> VideoFrame {
        ffmpeg_next::init().expect("FFmpeg initialisation failed");
        VideoFrame::new(Pixel::YUV420P, 64, 48)
    }

    fn single_frame_size() -> usize {
        frame_buffer_size(&test_frame())
    }

    fn lookup(cache: &mut FrameCache, frame_number: i64) -> Option<VideoFrame> {
        cache.get(frame_number).expect("cache lookup failed")
    }

    #[test]
    fn hit_returns_a_frame_and_miss_returns_none() {
        let mut cache = FrameCache::new();
        cache.insert(3, test_frame());
        assert!(lookup(&mut cache, 3).is_some());
        assert!(lookup(&mut cache, 4).is_none());
    }

    #[test]
    fn budget_is_never_exceeded() {
        let size = single_frame_size();
        let mut cache = FrameCache::new();
        cache.set_max_size(size * 3);
        for n in 0..10 {
            cache.insert(n, test_frame());
            assert!(cache.total_size <= cache.max_size);
        }
        assert_eq!(cache.blocks.len(), 3);
    }

    #[test]
    fn eviction_drops_the_least_recently_used_entry() {
        let size = single_frame_size();
        let mut cache = FrameCache::new();
        cache.set_max_size(size * 3);
        for n in 0..3 {
            cache.insert(n, test_frame());
        }
        // Touch frame 0 so frame 1 becomes the eviction candidate.
        assert!(lookup(&mut cache, 0).is_some());
        cache.insert(3, test_frame());
        assert!(lookup(&mut cache, 1).is_none());
        assert!(lookup(&mut cache, 0).is_some());
        assert!(lookup(&mut cache, 2).is_some());
        assert!(lookup(&mut cache, 3).is_some());
    }

    #[test]
    fn reinserting_a_frame_number_replaces_the_old_entry() {
        let size = single_frame_size();
        let mut cache = FrameCache::new();
        cache.insert(5, test_frame());
        cache.insert(5, test_frame());
        assert_eq!(cache.blocks.len(), 1);
        assert_eq!(cache.total_size, size);
    }

    #[test]
    fn an_oversized_frame_is_evicted_immediately() {
        let size = single_frame_size();
        let mut cache = FrameCache::new();
        cache.set_max_size(size / 2);
        cache.insert(0, test_frame());
        assert!(lookup(&mut cache, 0).is_none());
        assert_eq!(cache.total_size, 0);
    }

    #[test]
    fn shrinking_the_budget_evicts_from_the_tail() {
        let size = single_frame_size();
        let mut cache = FrameCache::new();
        for n in 0..4 {
            cache.insert(n, test_frame());
        }
        cache.set_max_size(size);
        assert_eq!(cache.blocks.len(), 1);
        assert!(lookup(&mut cache, 3).is_some());
    }
}

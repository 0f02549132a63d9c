//! End-to-end tests against a real media fixture.
//!
//! These tests are skipped when `tests/fixtures/sample_video.mp4` is not
//! present. Any short file with a couple of hundred frames works, e.g.:
//!
//! ```text
//! ffmpeg -f lavfi -i testsrc2=duration=10:size=320x240:rate=25 \
//!     tests/fixtures/sample_video.mp4
//! ```

use std::path::Path;

use frameseek::{FrameSeekError, SourceOptions, VideoSource};

const FIXTURE: &str = "tests/fixtures/sample_video.mp4";

/// Open the fixture with its index redirected into a temp dir, so test
/// runs never pollute the repository.
fn open_fixture(dir: &tempfile::TempDir) -> Option<VideoSource> {
    if !Path::new(FIXTURE).exists() {
        return None;
    }
    let source = VideoSource::open(
        FIXTURE,
        SourceOptions::new().with_cache_path(dir.path().join("fixture")),
    )
    .expect("Failed to open fixture");
    Some(source)
}

#[test]
fn sequential_scan_returns_every_frame_with_its_indexed_hash() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    let num_frames = source.properties().num_frames;
    assert!(num_frames > 0);

    for n in 0..num_frames {
        let frame = source.frame(n).expect("Failed to get frame");
        assert_eq!(
            frame.content_hash(),
            source.index().frames[n as usize].hash,
            "hash mismatch at frame {n}",
        );
    }
}

#[test]
fn reverse_scan_still_returns_exact_frames() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    let num_frames = source.properties().num_frames;
    for n in (0..num_frames).rev() {
        let frame = source.frame(n).expect("Failed to get frame");
        assert_eq!(
            frame.content_hash(),
            source.index().frames[n as usize].hash,
            "hash mismatch at frame {n}",
        );
    }
}

#[test]
fn random_access_returns_exact_frames() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    let last = source.properties().num_frames - 1;
    let targets = [
        last,
        0,
        last / 2,
        last / 4,
        last.saturating_sub(1),
        1.min(last),
        3 * last / 4,
    ];
    for &n in &targets {
        let frame = source.frame(n).expect("Failed to get frame");
        assert_eq!(
            frame.content_hash(),
            source.index().frames[n as usize].hash,
            "hash mismatch at frame {n}",
        );
    }
}

#[test]
fn repeated_requests_are_identical() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    let n = source.properties().num_frames / 2;
    let first = source.frame(n).expect("Failed to get frame");
    let second = source.frame(n).expect("Failed to get frame");
    assert_eq!(first.content_hash(), second.content_hash());
    assert_eq!(first.pts, second.pts);
}

#[test]
fn out_of_range_requests_fail() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    let num_frames = source.properties().num_frames;
    assert!(matches!(
        source.frame(num_frames),
        Err(FrameSeekError::FrameOutOfRange { .. })
    ));
    assert!(matches!(
        source.frame(-1),
        Err(FrameSeekError::FrameOutOfRange { .. })
    ));
}

#[test]
fn time_lookup_past_the_end_yields_the_last_frame() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    let last = source.properties().num_frames - 1;
    let frame = source
        .frame_by_time(1_000_000.0)
        .expect("Failed to get frame by time");
    assert_eq!(frame.pts, source.index().frames[last as usize].pts);
}

#[test]
fn the_index_is_reused_on_a_second_open() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(source) = open_fixture(&dir) else { return };

    let index_file = frameseek::index_cache_path(&dir.path().join("fixture"), source.track());
    assert!(index_file.exists(), "Index file should have been written");
    let first_index = source.index().clone();
    drop(source);

    // Second open must load the same index from disk.
    let reopened = open_fixture(&dir).expect("Fixture disappeared mid-test");
    assert_eq!(first_index, *reopened.index());
}

#[test]
fn linear_hint_matches_seeking_results() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    let num_frames = source.properties().num_frames;
    for n in 0..num_frames.min(50) {
        let frame = source.frame_linear(n).expect("Failed to get frame");
        assert_eq!(frame.content_hash(), source.index().frames[n as usize].hash);
    }
}

#[test]
fn forced_linear_mode_still_serves_random_access() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(mut source) = open_fixture(&dir) else { return };

    source.force_linear_mode();
    let last = source.properties().num_frames - 1;
    for &n in &[last / 2, 0, last] {
        let frame = source.frame(n).expect("Failed to get frame");
        assert_eq!(frame.content_hash(), source.index().frames[n as usize].hash);
    }
}

#[test]
fn timecode_export_writes_one_line_per_frame() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let Some(source) = open_fixture(&dir) else { return };

    let timecodes = dir.path().join("timecodes.txt");
    source
        .write_timecodes(&timecodes)
        .expect("Failed to write timecodes");

    let contents = std::fs::read_to_string(&timecodes).expect("Failed to read timecodes");
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("# timecode format v2"));
    assert_eq!(
        lines.count() as i64,
        source.properties().num_frames,
        "one timecode per frame",
    );
}

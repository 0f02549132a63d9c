//! Index file round-trip and invalidation tests.
//!
//! These run against synthetic indexes and need no media fixtures.

use std::{collections::BTreeMap, fs, path::Path};

use frameseek::{index_cache_path, FrameInfo, IndexParameters, Rational, TrackIndex};

fn sample_index() -> TrackIndex {
    let frames = (0..250)
        .map(|i| FrameInfo {
            hash: 0x1234_5678_9ABC_DEF0u64.wrapping_mul(i as u64 + 1),
            pts: i * 40,
            repeat_pict: (i % 3) as i32,
            key_frame: i % 25 == 0,
            top_field_first: i % 2 == 0,
        })
        .collect();
    TrackIndex {
        frames,
        last_frame_duration: 40,
    }
}

fn sample_parameters() -> IndexParameters {
    let mut container_options = BTreeMap::new();
    container_options.insert("fflags".to_string(), "+genpts".to_string());
    IndexParameters {
        source_size: 123_456_789,
        track: 0,
        variable_format: false,
        hw_device: String::new(),
        container_options,
    }
}

#[test]
fn round_trip_preserves_the_index_exactly() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("roundtrip.fsindex");

    let index = sample_index();
    let parameters = sample_parameters();
    index.write(&path, &parameters).expect("Failed to write index");

    let restored = TrackIndex::read(&path, &parameters).expect("Index should be readable");
    assert_eq!(index, restored);
}

#[test]
fn a_changed_source_size_invalidates_the_index() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("stale.fsindex");

    let index = sample_index();
    let parameters = sample_parameters();
    index.write(&path, &parameters).expect("Failed to write index");

    // The same file grown by one byte must be treated as a different
    // source.
    let mut grown = sample_parameters();
    grown.source_size += 1;
    assert!(TrackIndex::read(&path, &grown).is_none());
}

#[test]
fn changed_open_parameters_invalidate_the_index() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("params.fsindex");

    let index = sample_index();
    let parameters = sample_parameters();
    index.write(&path, &parameters).expect("Failed to write index");

    let mut other_track = sample_parameters();
    other_track.track = 1;
    assert!(TrackIndex::read(&path, &other_track).is_none());

    let mut variable = sample_parameters();
    variable.variable_format = true;
    assert!(TrackIndex::read(&path, &variable).is_none());

    let mut hw = sample_parameters();
    hw.hw_device = "cuda".to_string();
    assert!(TrackIndex::read(&path, &hw).is_none());

    let mut options = sample_parameters();
    options
        .container_options
        .insert("probesize".to_string(), "32".to_string());
    assert!(TrackIndex::read(&path, &options).is_none());

    let mut fewer_options = sample_parameters();
    fewer_options.container_options.clear();
    assert!(TrackIndex::read(&path, &fewer_options).is_none());
}

#[test]
fn truncated_and_corrupt_files_are_rejected() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("corrupt.fsindex");

    let index = sample_index();
    let parameters = sample_parameters();
    index.write(&path, &parameters).expect("Failed to write index");

    let bytes = fs::read(&path).expect("Failed to read index back");

    // Cut off mid-record.
    fs::write(&path, &bytes[..bytes.len() - 7]).expect("Failed to truncate");
    assert!(TrackIndex::read(&path, &parameters).is_none());

    // Flip the magic.
    let mut mangled = bytes.clone();
    mangled[0] ^= 0xFF;
    fs::write(&path, &mangled).expect("Failed to mangle");
    assert!(TrackIndex::read(&path, &parameters).is_none());

    // Unknown version byte.
    let mut versioned = bytes;
    versioned[4] = 0xEE;
    fs::write(&path, &versioned).expect("Failed to mangle version");
    assert!(TrackIndex::read(&path, &parameters).is_none());
}

#[test]
fn a_missing_file_reads_as_no_index() {
    assert!(TrackIndex::read(Path::new("does/not/exist.fsindex"), &sample_parameters()).is_none());
}

#[test]
fn cache_paths_are_derived_per_track() {
    let base = Path::new("/media/movie.mkv");
    assert_eq!(
        index_cache_path(base, 0),
        Path::new("/media/movie.mkv.0.fsindex")
    );
    assert_eq!(
        index_cache_path(base, 3),
        Path::new("/media/movie.mkv.3.fsindex")
    );
}

#[test]
fn timecodes_are_written_in_v2_format() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("timecodes.txt");

    let index = TrackIndex {
        frames: [0i64, 33, 66, 100]
            .iter()
            .map(|&pts| FrameInfo {
                hash: 0,
                pts,
                repeat_pict: 0,
                key_frame: true,
                top_field_first: false,
            })
            .collect(),
        last_frame_duration: 33,
    };

    // A 1/1000 stream time base, millisecond scaled.
    index
        .write_timecodes(&path, Rational::new(1000, 1000))
        .expect("Failed to write timecodes");

    let contents = fs::read_to_string(&path).expect("Failed to read timecodes");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines,
        vec!["# timecode format v2", "0.00", "33.00", "66.00", "100.00"]
    );
}

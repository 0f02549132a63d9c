//! Option validation tests.
//!
//! Invalid options are rejected before the source file is even touched,
//! so these tests run against a path that does not exist.

use frameseek::{FrameSeekError, SourceOptions, VideoSource};

const MISSING: &str = "this_file_does_not_exist.mkv";

fn expect_invalid_argument(options: SourceOptions, needle: &str) {
    let result = VideoSource::open(MISSING, options);
    match result {
        Err(FrameSeekError::InvalidArgument(message)) => {
            assert!(
                message.contains(needle),
                "Expected message mentioning {needle}: {message}",
            );
        }
        Err(other) => panic!("Expected InvalidArgument, got: {other}"),
        Ok(_) => panic!("Expected InvalidArgument, got a source"),
    }
}

#[test]
fn negative_extra_hw_frames_are_rejected() {
    expect_invalid_argument(
        SourceOptions::new().with_extra_hw_frames(-1),
        "extra_hw_frames",
    );
}

#[test]
fn seek_pre_roll_outside_range_is_rejected() {
    expect_invalid_argument(SourceOptions::new().with_seek_pre_roll(41), "seek_pre_roll");
    expect_invalid_argument(SourceOptions::new().with_seek_pre_roll(-1), "seek_pre_roll");
}

#[test]
fn boundary_pre_roll_values_pass_validation() {
    // 0 and 40 are valid, so the failure must come from opening the file.
    for pre_roll in [0, 40] {
        let result = VideoSource::open(MISSING, SourceOptions::new().with_seek_pre_roll(pre_roll));
        assert!(matches!(result, Err(FrameSeekError::FileOpen { .. })));
    }
}

#[test]
fn cfr_denominator_below_one_is_rejected() {
    expect_invalid_argument(SourceOptions::new().with_fps(25, 0), "denominator");
}

#[test]
fn cfr_and_rff_are_mutually_exclusive() {
    expect_invalid_argument(
        SourceOptions::new().with_fps(25, 1).with_rff(true),
        "Cannot combine",
    );
}

#[test]
fn disabled_cfr_combines_with_rff() {
    // fps_num <= 0 means "no remapping", which is fine alongside RFF.
    let result = VideoSource::open(MISSING, SourceOptions::new().with_fps(-1, 1).with_rff(true));
    assert!(matches!(result, Err(FrameSeekError::FileOpen { .. })));
}

#[test]
fn opening_a_missing_file_reports_the_path() {
    let error = VideoSource::open(MISSING, SourceOptions::new())
        .err()
        .expect("Expected an error for a missing file");
    let message = error.to_string();
    assert!(
        message.contains(MISSING),
        "Error message should mention the path: {message}",
    );
}

//! Integration tests for the trick-speed protocol and live-sync control.

mod common;

use lockstep::time::{ClockScale, MediaTicks};
use lockstep::trick::{
    speed_entry, Direction, LiveCorrection, LiveSyncConfig, SpeedLevel, SpeedState, TrickPlay,
    SPEED_TABLE,
};

use common::test_pipeline;

/// Applying every (direction, level) pair yields the documented scale and
/// mute flag, with exactly one decoder flush per actual change.
#[test]
fn test_speed_table_conformance_through_the_stack() {
    let (driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());
    pipeline.clock().start(false, false).unwrap();

    let mut expected_flushes = driver.count_calls("flush video-decoder");
    for entry in &SPEED_TABLE {
        if entry.state == trick.speed() {
            continue;
        }
        let changed = trick.request_speed(entry.state).unwrap();
        assert!(changed);
        expected_flushes += 1;

        assert_eq!(trick.speed(), entry.state);
        assert_eq!(pipeline.clock().scale(), entry.scale, "scale at {}", entry.state);
        assert_eq!(trick.audio_muted(), entry.mute_audio, "mute at {}", entry.state);
        assert_eq!(
            driver.count_calls("flush video-decoder"),
            expected_flushes,
            "flush count at {}",
            entry.state
        );
    }

    pipeline.deinit().unwrap();
}

/// Requesting the current state is a no-op and produces zero flushes.
#[test]
fn test_same_speed_request_does_not_flush() {
    let (driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());

    let baseline = driver.count_calls("flush");
    assert!(!trick.request_speed(SpeedState::normal()).unwrap());
    assert_eq!(driver.count_calls("flush"), baseline);

    trick
        .request_speed(SpeedState::new(Direction::Forward, SpeedLevel::Fast))
        .unwrap();
    let after_change = driver.count_calls("flush");
    assert!(after_change > baseline);

    assert!(!trick
        .request_speed(SpeedState::new(Direction::Forward, SpeedLevel::Fast))
        .unwrap());
    assert_eq!(driver.count_calls("flush"), after_change);

    pipeline.deinit().unwrap();
}

/// Normal -> Fast: one flush, the Fast scale, audio muted.
#[test]
fn test_fast_forward_from_normal() {
    let (driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());
    pipeline.clock().start(false, false).unwrap();

    assert!(!trick.audio_muted());
    let flushes = driver.count_calls("flush video-decoder");

    let fast = SpeedState::new(Direction::Forward, SpeedLevel::Fast);
    assert!(trick.request_speed(fast).unwrap());

    assert_eq!(driver.count_calls("flush video-decoder"), flushes + 1);
    assert_eq!(pipeline.clock().scale(), speed_entry(fast).scale);
    assert_eq!(pipeline.clock().scale(), ClockScale::from_permille(2000));
    assert!(trick.audio_muted());
    assert_eq!(driver.count_calls("configure audio-render Mute(true)"), 1);

    pipeline.deinit().unwrap();
}

/// Pause freezes the clock without stopping it.
#[test]
fn test_pause_freezes_clock() {
    let (_driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());
    pipeline.clock().start(false, false).unwrap();

    trick
        .request_speed(SpeedState::new(Direction::Forward, SpeedLevel::Pause))
        .unwrap();
    assert!(pipeline.clock().is_frozen());
    assert!(pipeline.clock().is_running());

    let frozen = pipeline.clock().stc();
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(pipeline.clock().stc(), frozen);

    pipeline.deinit().unwrap();
}

/// A direction change also flushes the render stage.
#[test]
fn test_direction_change_flushes_render() {
    let (driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());

    trick
        .request_speed(SpeedState::new(Direction::Forward, SpeedLevel::Fast))
        .unwrap();
    assert_eq!(driver.count_calls("flush video-render"), 0);

    trick
        .request_speed(SpeedState::new(Direction::Backward, SpeedLevel::Fast))
        .unwrap();
    assert_eq!(driver.count_calls("flush video-render"), 1);

    pipeline.deinit().unwrap();
}

/// However large the measured drift, the correction level advances at most
/// one step per evaluation.
#[test]
fn test_live_sync_steps_at_most_one_level_per_call() {
    let (_driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());
    pipeline.clock().start(false, false).unwrap();

    // Hours of drift, far past every threshold.
    trick.note_video_pts(MediaTicks::from_secs(3600));

    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::Positive);
    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::MaxPositive);
    // Saturates at the extreme level.
    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::MaxPositive);
    assert_eq!(
        pipeline.clock().scale(),
        LiveCorrection::MaxPositive.scale()
    );

    pipeline.deinit().unwrap();
}

/// The level decays back to None one step at a time once drift re-enters
/// tolerance, and the scale returns to normal.
#[test]
fn test_live_sync_decays_inside_tolerance() {
    let (_driver, pipeline) = test_pipeline();
    let config = LiveSyncConfig::default();
    let trick = TrickPlay::with_config(pipeline.clone(), config);
    pipeline.clock().start(false, false).unwrap();

    trick.note_video_pts(MediaTicks::from_secs(3600));
    trick.adjust_live_speed().unwrap();
    trick.adjust_live_speed().unwrap();
    assert_eq!(trick.live_correction(), LiveCorrection::MaxPositive);

    // Drift back on target: one step down per evaluation.
    let on_target = || pipeline.clock().stc().saturating_add(config.target_latency);
    trick.note_video_pts(on_target());
    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::Positive);
    trick.note_video_pts(on_target());
    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::None);
    assert_eq!(pipeline.clock().scale(), ClockScale::NORMAL);

    pipeline.deinit().unwrap();
}

/// Draining too low steps toward negative correction.
#[test]
fn test_live_sync_slows_down_when_underrun_threatens() {
    let (_driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());
    pipeline.clock().start(false, false).unwrap();

    // Video PTS far behind the target latency.
    trick.note_video_pts(MediaTicks::from_ticks(1));
    std::thread::sleep(std::time::Duration::from_millis(20));

    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::Negative);
    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::MaxNegative);

    pipeline.deinit().unwrap();
}

/// Live correction only runs during normal forward playback.
#[test]
fn test_live_sync_inactive_during_trick_play() {
    let (_driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());
    pipeline.clock().start(false, false).unwrap();

    trick
        .request_speed(SpeedState::new(Direction::Forward, SpeedLevel::Faster))
        .unwrap();
    trick.note_video_pts(MediaTicks::from_secs(3600));

    assert_eq!(trick.adjust_live_speed().unwrap(), LiveCorrection::None);
    assert_eq!(
        pipeline.clock().scale(),
        speed_entry(SpeedState::new(Direction::Forward, SpeedLevel::Faster)).scale
    );

    pipeline.deinit().unwrap();
}

/// A speed change resets the live correction state.
#[test]
fn test_speed_change_resets_live_correction() {
    let (_driver, pipeline) = test_pipeline();
    let trick = TrickPlay::new(pipeline.clone());
    pipeline.clock().start(false, false).unwrap();

    trick.note_video_pts(MediaTicks::from_secs(3600));
    trick.adjust_live_speed().unwrap();
    assert_eq!(trick.live_correction(), LiveCorrection::Positive);

    trick
        .request_speed(SpeedState::new(Direction::Forward, SpeedLevel::Slow))
        .unwrap();
    assert_eq!(trick.live_correction(), LiveCorrection::None);

    pipeline.deinit().unwrap();
}

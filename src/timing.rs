//! Frame-count timing.
//!
//! All visual-phase durations are expressed as integer numbers of buffer
//! swaps, derived from the measured display refresh rate. The blocking
//! `swap()` call is the single clock source; nothing in a trial is timed
//! with sleeps, which accumulate drift across hundreds of swaps.
//!
//! The [`FrameTable`] is computed exactly once per session, right after the
//! refresh rate has been measured, and frozen thereafter. Tone buffers are
//! generated with duration `frames * frame_duration`, so audio length and
//! swap count can never drift apart.

use crate::config::TimingSettings;

/// Hold after the "close your eyes" cue.
pub const CLOSE_EYES_WAIT_SECS: f64 = 5.0;
/// Hold after the "starting" cue, before the first measurement beep.
pub const STARTING_WAIT_SECS: f64 = 2.0;
/// Hold after a post-measurement instruction cue.
pub const POST_WAIT_SECS: f64 = 5.0;
/// Extra recording time after the last measurement silence, so no trailing
/// signal is clipped.
pub const RECORDING_MARGIN_SECS: f64 = 1.0;

/// Convert a duration in seconds to the nearest frame count, minimum 1.
pub fn duration_to_frames(seconds: f64, refresh_hz: f64) -> u32 {
    let frames = (seconds * refresh_hz).round();
    if frames < 1.0 {
        1
    } else {
        frames as u32
    }
}

/// Per-session frame counts for every phase, frozen after refresh-rate
/// measurement.
#[derive(Debug, Clone)]
pub struct FrameTable {
    pub refresh_hz: f64,
    pub training_shape: u32,
    pub training_blank: u32,
    pub measurement_beep: u32,
    pub measurement_silence: u32,
    pub close_eyes_wait: u32,
    pub starting_wait: u32,
    pub post_wait: u32,
    pub recording_margin: u32,
    /// 0 when the inter-trial delay is disabled.
    pub inter_trial_delay: u32,
}

impl FrameTable {
    pub fn derive(timing: &TimingSettings, refresh_hz: f64) -> Self {
        let delay = timing.training_to_measurement_delay_secs;
        Self {
            refresh_hz,
            training_shape: duration_to_frames(timing.training_shape_secs, refresh_hz),
            training_blank: duration_to_frames(timing.training_blank_secs, refresh_hz),
            measurement_beep: duration_to_frames(timing.measurement_beep_secs, refresh_hz),
            measurement_silence: duration_to_frames(timing.measurement_silence_secs, refresh_hz),
            close_eyes_wait: duration_to_frames(CLOSE_EYES_WAIT_SECS, refresh_hz),
            starting_wait: duration_to_frames(STARTING_WAIT_SECS, refresh_hz),
            post_wait: duration_to_frames(POST_WAIT_SECS, refresh_hz),
            recording_margin: duration_to_frames(RECORDING_MARGIN_SECS, refresh_hz),
            inter_trial_delay: if delay > 0.0 {
                duration_to_frames(delay, refresh_hz)
            } else {
                0
            },
        }
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration(&self) -> f64 {
        1.0 / self.refresh_hz
    }

    /// Frame count for an ad-hoc duration, against the frozen refresh rate.
    pub fn frames_for(&self, seconds: f64) -> u32 {
        duration_to_frames(seconds, self.refresh_hz)
    }

    /// Exact tone duration matching a frame count. Audio buffers generated
    /// with this length are inherently duration-matched to the swap loop.
    pub fn tone_duration(&self, frames: u32) -> f64 {
        frames as f64 * self.frame_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_frame() {
        assert_eq!(duration_to_frames(1.5, 60.0), 90);
        assert_eq!(duration_to_frames(0.5, 59.94), 30);
        assert_eq!(duration_to_frames(1.0, 144.0), 144);
        // 0.0249s at 60 Hz = 1.494 frames -> rounds to 1
        assert_eq!(duration_to_frames(0.0249, 60.0), 1);
    }

    #[test]
    fn never_below_one_frame() {
        assert_eq!(duration_to_frames(0.0, 60.0), 1);
        assert_eq!(duration_to_frames(0.001, 60.0), 1);
    }

    #[test]
    fn matches_max_one_round_property() {
        for rate in [59.94_f64, 60.0, 75.0, 120.0, 144.0, 240.0] {
            for secs in [0.0, 0.001, 0.5, 1.5, 2.0, 5.0] {
                let expected = (secs * rate).round().max(1.0) as u32;
                assert_eq!(duration_to_frames(secs, rate), expected);
            }
        }
    }

    #[test]
    fn table_is_idempotent_for_fixed_rate() {
        let timing = TimingSettings::default();
        let a = FrameTable::derive(&timing, 60.0);
        let b = FrameTable::derive(&timing, 60.0);
        assert_eq!(a.training_shape, b.training_shape);
        assert_eq!(a.measurement_silence, b.measurement_silence);
        assert_eq!(a.frames_for(3.2), b.frames_for(3.2));
    }

    #[test]
    fn tone_duration_equals_frames_times_frame_duration() {
        let table = FrameTable::derive(&TimingSettings::default(), 59.94);
        let frames = table.training_shape;
        assert_eq!(
            table.tone_duration(frames),
            frames as f64 * table.frame_duration()
        );
    }

    #[test]
    fn zero_delay_disables_inter_trial_phase() {
        let mut timing = TimingSettings::default();
        timing.training_to_measurement_delay_secs = 0.0;
        assert_eq!(FrameTable::derive(&timing, 60.0).inter_trial_delay, 0);
        timing.training_to_measurement_delay_secs = 1.0;
        assert_eq!(FrameTable::derive(&timing, 60.0).inter_trial_delay, 60);
    }
}

//! Single-trial state machine.
//!
//! One trial presents a stimulus `training_repetitions` times with a paired
//! tone, then records physiological data through `measurement_repetitions`
//! beep/silence cycles while the participant imagines the stimulus with eyes
//! closed, and ends with a spoken instruction.
//!
//! Every visual phase is timed in integer frames against the blocking
//! [`DisplayAdapter::swap`] vsync clock; there are no sleeps. Audio onsets
//! and offsets that must coincide with a visual change are scheduled as swap
//! callbacks, so they fire at the instant the frame becomes visible.
//!
//! Interruption (pause or abort, via the shared flag) is observed at frame
//! boundaries only. When it is observed, the protocol stops any playing tone
//! and closes any open recording before returning
//! [`TrialOutcome::Interrupted`] — never an error, never a dangling handle.

use crate::config::TimingSettings;
use crate::data::EventLogger;
use crate::error::Result;
use crate::experiment::state::TrialPhase;
use crate::hardware::{AudioAdapter, DisplayAdapter, InstructionCue, RecordingAdapter, Tone};
use crate::stimulus::Stimulus;
use crate::sync::AtomicFlag;
use crate::timing::{FrameTable, POST_WAIT_SECS};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a trial ended. Interruption is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Completed { frames_captured: u64 },
    Interrupted,
}

/// Progress callbacks for the operator UI. All methods default to no-ops.
pub trait TrialObserver {
    fn phase_changed(&mut self, _phase: TrialPhase, _remaining_secs: f64) {}
    fn stimulus_update(&mut self, _text: &str) {}
    fn beep_progress(&mut self, _current: u32, _total: u32) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl TrialObserver for NullObserver {}

/// Per-trial inputs decided by the session loop.
pub struct TrialContext<'a> {
    pub stimulus: &'a Stimulus,
    pub subject: &'a str,
    pub repetition: u32,
    pub video_path: &'a Path,
    /// Last stimulus of the current queue item.
    pub is_last_stimulus: bool,
    /// Last stimulus of the last queue item in the whole session.
    pub is_last_queue_item: bool,
}

/// Runs one trial against borrowed, worker-thread-owned hardware.
pub struct TrialProtocol<'a> {
    timing: &'a TimingSettings,
    frames: &'a FrameTable,
    camera_rate_hz: f64,
    display: &'a mut dyn DisplayAdapter,
    audio: &'a Arc<dyn AudioAdapter>,
    camera: &'a mut dyn RecordingAdapter,
    events: &'a Arc<EventLogger>,
    interrupt: &'a AtomicFlag,
}

impl<'a> TrialProtocol<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timing: &'a TimingSettings,
        frames: &'a FrameTable,
        camera_rate_hz: f64,
        display: &'a mut dyn DisplayAdapter,
        audio: &'a Arc<dyn AudioAdapter>,
        camera: &'a mut dyn RecordingAdapter,
        events: &'a Arc<EventLogger>,
        interrupt: &'a AtomicFlag,
    ) -> Self {
        Self {
            timing,
            frames,
            camera_rate_hz,
            display,
            audio,
            camera,
            events,
            interrupt,
        }
    }

    /// Run the whole trial. `Ok(Completed { .. })` only if every phase ran to
    /// its full frame count; the post-instruction phase is uninterruptible
    /// because the recording is already closed by then.
    pub fn run(
        &mut self,
        ctx: &TrialContext<'_>,
        observer: &mut dyn TrialObserver,
    ) -> Result<TrialOutcome> {
        if !self.training_phase(ctx, observer)? {
            return Ok(TrialOutcome::Interrupted);
        }
        if !self.inter_trial_delay(observer) {
            return Ok(TrialOutcome::Interrupted);
        }
        if !self.instruction_phase(ctx, observer) {
            return Ok(TrialOutcome::Interrupted);
        }
        let Some(frames_captured) = self.measurement_phase(ctx, observer)? else {
            return Ok(TrialOutcome::Interrupted);
        };
        self.post_instruction(ctx, observer);
        Ok(TrialOutcome::Completed { frames_captured })
    }

    /// True if interrupted. Stops tones and closes an open recording so no
    /// hardware is left dangling, whatever frame the interruption landed on.
    fn bail_if_interrupted(&mut self) -> bool {
        if !self.interrupt.is_set() {
            return false;
        }
        self.audio.stop(Tone::Training);
        self.audio.stop(Tone::Measurement);
        if self.camera.is_recording() {
            if let Err(e) = self.camera.stop_recording() {
                warn!(error = %e, "stopping interrupted recording failed");
            }
        }
        debug!("trial interrupted at frame boundary");
        true
    }

    /// Hold for `frames` swaps, checking for interruption before each one.
    /// Returns false if interrupted.
    fn hold(&mut self, frames: u32) -> bool {
        for _ in 0..frames {
            if self.bail_if_interrupted() {
                return false;
            }
            self.display.swap();
        }
        true
    }

    fn hold_uninterruptible(&mut self, frames: u32) {
        for _ in 0..frames {
            self.display.swap();
        }
    }

    fn schedule_tone_on(&mut self, tone: Tone) {
        let audio = Arc::clone(self.audio);
        self.display
            .schedule_on_swap(Box::new(move || audio.play(tone)));
    }

    fn schedule_tone_off(&mut self, tone: Tone) {
        let audio = Arc::clone(self.audio);
        self.display
            .schedule_on_swap(Box::new(move || audio.stop(tone)));
    }

    /// Schedule an event-log row for the moment the next swap is visible, so
    /// the logged timestamp is the onset timestamp.
    fn schedule_log(&mut self, event: &'static str, ctx: &TrialContext<'_>, detail: String) {
        let events = Arc::clone(self.events);
        let subject = ctx.subject.to_string();
        let stimulus = ctx.stimulus.display_name();
        let repetition = ctx.repetition;
        self.display.schedule_on_swap(Box::new(move || {
            events.log(event, &subject, &stimulus, repetition, &detail);
        }));
    }

    fn log_now(&self, event: &str, ctx: &TrialContext<'_>, detail: &str) {
        self.events
            .log(event, ctx.subject, &ctx.stimulus.display_name(), ctx.repetition, detail);
    }

    fn beep_total(&self) -> u32 {
        self.timing.training_repetitions + self.timing.measurement_repetitions
    }

    /// Shape-with-tone / blank cycles. Tone onset, visual onset and the log
    /// row land on the same swap; tone offset lands on the blank's first swap.
    fn training_phase(
        &mut self,
        ctx: &TrialContext<'_>,
        observer: &mut dyn TrialObserver,
    ) -> Result<bool> {
        let shape_secs = self.frames.tone_duration(self.frames.training_shape);
        let blank_secs = self.frames.tone_duration(self.frames.training_blank);
        observer.stimulus_update(&ctx.stimulus.display_name());

        for rep in 1..=self.timing.training_repetitions {
            if self.bail_if_interrupted() {
                return Ok(false);
            }
            observer.beep_progress(rep, self.beep_total());
            observer.phase_changed(TrialPhase::TrainingShape, shape_secs);

            self.schedule_tone_on(Tone::Training);
            self.schedule_log("SHAPE_ON", ctx, format!("rep={rep}"));
            self.display.draw_stimulus(ctx.stimulus);
            self.display.swap();
            for _ in 1..self.frames.training_shape {
                if self.bail_if_interrupted() {
                    return Ok(false);
                }
                self.display.draw_stimulus(ctx.stimulus);
                self.display.swap();
            }

            observer.phase_changed(TrialPhase::TrainingBlank, blank_secs);
            self.schedule_tone_off(Tone::Training);
            self.schedule_log("SHAPE_OFF", ctx, format!("rep={rep}"));
            self.display.swap();
            if !self.hold(self.frames.training_blank.saturating_sub(1)) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn inter_trial_delay(&mut self, observer: &mut dyn TrialObserver) -> bool {
        if self.frames.inter_trial_delay == 0 {
            return true;
        }
        observer.phase_changed(
            TrialPhase::InterTrial,
            self.frames.tone_duration(self.frames.inter_trial_delay),
        );
        self.hold(self.frames.inter_trial_delay)
    }

    /// "Close your eyes" and "starting" cues with their fixed holds.
    /// Instruction audio is fire-and-continue: the cue plays over the fixed
    /// wait, it never adds frames of its own.
    fn instruction_phase(
        &mut self,
        ctx: &TrialContext<'_>,
        observer: &mut dyn TrialObserver,
    ) -> bool {
        let close_dur = self.audio.instruction_duration(InstructionCue::CloseYourEyes);
        observer.phase_changed(TrialPhase::InstructionCloseEyes, close_dur);
        self.log_now("INSTRUCTION", ctx, InstructionCue::CloseYourEyes.name());
        self.audio.play_instruction(InstructionCue::CloseYourEyes);
        observer.phase_changed(
            TrialPhase::InstructionWait,
            self.frames.tone_duration(self.frames.close_eyes_wait),
        );
        if !self.hold(self.frames.close_eyes_wait) {
            return false;
        }

        let starting_dur = self.audio.instruction_duration(InstructionCue::Starting);
        observer.phase_changed(TrialPhase::InstructionStarting, starting_dur);
        self.log_now("INSTRUCTION", ctx, InstructionCue::Starting.name());
        self.audio.play_instruction(InstructionCue::Starting);
        observer.phase_changed(
            TrialPhase::InstructionReady,
            self.frames.tone_duration(self.frames.starting_wait),
        );
        self.hold(self.frames.starting_wait)
    }

    /// Recording bracketed beep/silence cycles. The recording starts before
    /// the first beep and is stopped (blocking) after a fixed margin past the
    /// last silence. Returns captured frame count, or `None` on interruption.
    fn measurement_phase(
        &mut self,
        ctx: &TrialContext<'_>,
        observer: &mut dyn TrialObserver,
    ) -> Result<Option<u64>> {
        if self.bail_if_interrupted() {
            return Ok(None);
        }
        self.camera.start_recording(ctx.video_path, self.camera_rate_hz)?;
        self.log_now(
            "RECORDING_START",
            ctx,
            &ctx.video_path.display().to_string(),
        );

        let beep_secs = self.frames.tone_duration(self.frames.measurement_beep);
        let silence_secs = self.frames.tone_duration(self.frames.measurement_silence);

        for rep in 1..=self.timing.measurement_repetitions {
            if self.bail_if_interrupted() {
                return Ok(None);
            }
            observer.beep_progress(self.timing.training_repetitions + rep, self.beep_total());
            observer.phase_changed(TrialPhase::MeasurementBeep, beep_secs);

            self.schedule_tone_on(Tone::Measurement);
            self.schedule_log("BEEP_ON", ctx, format!("rep={rep}"));
            self.display.swap();
            for _ in 1..self.frames.measurement_beep {
                if self.bail_if_interrupted() {
                    return Ok(None);
                }
                self.display.swap();
            }

            observer.phase_changed(TrialPhase::MeasurementSilence, silence_secs);
            self.schedule_tone_off(Tone::Measurement);
            self.schedule_log("BEEP_OFF", ctx, format!("rep={rep}"));
            self.display.swap();
            if !self.hold(self.frames.measurement_silence.saturating_sub(1)) {
                return Ok(None);
            }
        }

        // Margin so no trailing signal is clipped at the capture side.
        if !self.hold(self.frames.recording_margin) {
            return Ok(None);
        }

        let frames_captured = self.camera.stop_recording()?;
        self.log_now("RECORDING_STOP", ctx, &format!("frames={frames_captured}"));
        Ok(Some(frames_captured))
    }

    /// Closing instruction: open-eyes between stimuli, next-participant
    /// between queue items, experiment-completed at the very end (held long
    /// enough for the cue to finish). The recording is already closed, so
    /// this phase runs to completion even under a pending interruption.
    fn post_instruction(&mut self, ctx: &TrialContext<'_>, observer: &mut dyn TrialObserver) {
        let (cue, hold_frames) = if !ctx.is_last_stimulus {
            (InstructionCue::OpenYourEyes, self.frames.post_wait)
        } else if ctx.is_last_queue_item {
            let cue = InstructionCue::ExperimentCompleted;
            let secs = POST_WAIT_SECS.max(self.audio.instruction_duration(cue) + 1.0);
            (cue, self.frames.frames_for(secs))
        } else {
            (InstructionCue::NextParticipant, self.frames.post_wait)
        };
        observer.phase_changed(
            TrialPhase::InstructionPost,
            self.frames.tone_duration(hold_frames),
        );
        self.log_now("INSTRUCTION", ctx, cue.name());
        self.audio.play_instruction(cue);
        self.hold_uninterruptible(hold_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioSettings;
    use crate::hardware::sim::{CallLog, SimAudio, SimDisplay, SimRecorder};
    use std::path::PathBuf;

    struct Rig {
        display: SimDisplay,
        audio: Arc<dyn AudioAdapter>,
        camera: SimRecorder,
        events: Arc<EventLogger>,
        interrupt: AtomicFlag,
        log: CallLog,
        timing: TimingSettings,
        frames: FrameTable,
        video_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn rig(timing: TimingSettings, refresh_hz: f64) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::new();
        let frames = FrameTable::derive(&timing, refresh_hz);
        Rig {
            display: SimDisplay::new(refresh_hz, false, log.clone()),
            audio: Arc::new(SimAudio::new(AudioSettings::default(), log.clone())),
            camera: SimRecorder::new(log.clone()),
            events: Arc::new(EventLogger::create(&dir.path().join("events.csv")).unwrap()),
            interrupt: AtomicFlag::new(),
            log,
            timing,
            frames,
            video_path: dir.path().join("trial.mp4"),
            _dir: dir,
        }
    }

    fn short_timing() -> TimingSettings {
        TimingSettings {
            training_shape_secs: 0.05,
            training_blank_secs: 0.05,
            training_repetitions: 2,
            measurement_beep_secs: 0.05,
            measurement_silence_secs: 0.05,
            measurement_repetitions: 2,
            training_to_measurement_delay_secs: 0.0,
        }
    }

    fn run_trial(r: &mut Rig, is_last_stimulus: bool, is_last_queue_item: bool) -> TrialOutcome {
        let stimulus = Stimulus::Shape(crate::stimulus::ShapeKind::Circle);
        let video_path = r.video_path.clone();
        let ctx = TrialContext {
            stimulus: &stimulus,
            subject: "alice",
            repetition: 1,
            video_path: &video_path,
            is_last_stimulus,
            is_last_queue_item,
        };
        let mut protocol = TrialProtocol::new(
            &r.timing,
            &r.frames,
            500.0,
            &mut r.display,
            &r.audio,
            &mut r.camera,
            &r.events,
            &r.interrupt,
        );
        protocol.run(&ctx, &mut NullObserver).unwrap()
    }

    #[test]
    fn full_trial_completes_with_paired_tone_calls() {
        let mut r = rig(short_timing(), 100.0);
        let outcome = run_trial(&mut r, false, false);
        assert!(matches!(outcome, TrialOutcome::Completed { .. }));
        assert_eq!(r.log.count_of("play:training"), 2);
        assert_eq!(r.log.count_of("stop:training"), 2);
        assert_eq!(r.log.count_of("play:measurement"), 2);
        assert_eq!(r.log.count_of("stop:measurement"), 2);
        assert_eq!(r.log.count_of("start_recording"), 1);
        assert_eq!(r.log.count_of("stop_recording"), 1);
        assert!(r.log.contains("play_instruction:open_your_eyes"));
    }

    #[test]
    fn interrupt_before_start_skips_everything() {
        let mut r = rig(short_timing(), 100.0);
        r.interrupt.set();
        let outcome = run_trial(&mut r, false, false);
        assert_eq!(outcome, TrialOutcome::Interrupted);
        assert_eq!(r.log.count_of("play:"), 0);
        assert_eq!(r.log.count_of("start_recording"), 0);
    }

    #[test]
    fn interrupt_mid_measurement_closes_recording() {
        let mut r = rig(short_timing(), 100.0);
        let stimulus = Stimulus::Shape(crate::stimulus::ShapeKind::Circle);
        let video_path = r.video_path.clone();
        let ctx = TrialContext {
            stimulus: &stimulus,
            subject: "alice",
            repetition: 1,
            video_path: &video_path,
            is_last_stimulus: false,
            is_last_queue_item: false,
        };
        // Run phases manually so the flag can be set once recording is live.
        let mut protocol = TrialProtocol::new(
            &r.timing,
            &r.frames,
            500.0,
            &mut r.display,
            &r.audio,
            &mut r.camera,
            &r.events,
            &r.interrupt,
        );
        assert!(protocol.training_phase(&ctx, &mut NullObserver).unwrap());
        assert!(protocol.instruction_phase(&ctx, &mut NullObserver));
        protocol.camera.start_recording(&r.video_path, 500.0).unwrap();
        assert!(protocol.camera.is_recording());
        protocol.interrupt.set();
        assert!(protocol.bail_if_interrupted());
        assert!(!protocol.camera.is_recording());
        assert_eq!(r.log.count_of("stop_recording"), 1);
    }

    #[test]
    fn last_trial_of_session_plays_completed_cue() {
        let mut r = rig(short_timing(), 100.0);
        let outcome = run_trial(&mut r, true, true);
        assert!(matches!(outcome, TrialOutcome::Completed { .. }));
        assert!(r.log.contains("play_instruction:experiment_completed"));
        assert!(!r.log.contains("play_instruction:open_your_eyes"));
    }

    #[test]
    fn last_stimulus_of_turn_plays_next_participant() {
        let mut r = rig(short_timing(), 100.0);
        let outcome = run_trial(&mut r, true, false);
        assert!(matches!(outcome, TrialOutcome::Completed { .. }));
        assert!(r.log.contains("play_instruction:next_participant_please"));
    }

    #[test]
    fn instruction_phase_holds_only_the_fixed_waits() {
        // Cues play over the fixed waits; their own durations add no frames.
        let mut r = rig(short_timing(), 100.0);
        let stimulus = Stimulus::Shape(crate::stimulus::ShapeKind::Circle);
        let video_path = r.video_path.clone();
        let ctx = TrialContext {
            stimulus: &stimulus,
            subject: "alice",
            repetition: 1,
            video_path: &video_path,
            is_last_stimulus: false,
            is_last_queue_item: false,
        };
        let mut protocol = TrialProtocol::new(
            &r.timing,
            &r.frames,
            500.0,
            &mut r.display,
            &r.audio,
            &mut r.camera,
            &r.events,
            &r.interrupt,
        );
        assert!(protocol.instruction_phase(&ctx, &mut NullObserver));
        assert_eq!(
            r.display.swap_count(),
            u64::from(r.frames.close_eyes_wait + r.frames.starting_wait)
        );
        assert!(r.log.contains("play_instruction:close_your_eyes"));
        assert!(r.log.contains("play_instruction:starting"));
    }

    #[test]
    fn training_swap_count_matches_frame_table() {
        let timing = short_timing();
        let mut r = rig(timing.clone(), 100.0);
        let stimulus = Stimulus::Shape(crate::stimulus::ShapeKind::Square);
        let video_path = r.video_path.clone();
        let ctx = TrialContext {
            stimulus: &stimulus,
            subject: "alice",
            repetition: 1,
            video_path: &video_path,
            is_last_stimulus: false,
            is_last_queue_item: false,
        };
        let mut protocol = TrialProtocol::new(
            &r.timing,
            &r.frames,
            500.0,
            &mut r.display,
            &r.audio,
            &mut r.camera,
            &r.events,
            &r.interrupt,
        );
        assert!(protocol.training_phase(&ctx, &mut NullObserver).unwrap());
        let per_rep = r.frames.training_shape + r.frames.training_blank;
        assert_eq!(
            r.display.swap_count(),
            u64::from(per_rep * timing.training_repetitions)
        );
    }
}

//! Hardware adapter contracts.
//!
//! The core never touches devices directly; it drives three adapters whose
//! contracts are defined here. Real implementations (OpenGL window, audio
//! backend, camera driver) live outside this crate; [`sim`] provides
//! simulated implementations for headless runs and tests.
//!
//! # Thread binding
//!
//! Display and audio contexts are bound to the thread that creates them.
//! [`HardwareFactory::create`] therefore runs on the engine worker thread,
//! and the resulting handles never cross a thread boundary; only flags,
//! gates and channel messages do.
//!
//! # Swap-scheduled callbacks
//!
//! [`DisplayAdapter::schedule_on_swap`] registers a one-shot callback that
//! the adapter invokes synchronously, immediately after the next
//! [`DisplayAdapter::swap`] is confirmed visible and before any further
//! drawing work. This is the mechanism that makes visual onset and audio
//! onset a single event instead of two independently scheduled actions.

pub mod sim;

use crate::error::Result;
use crate::stimulus::Stimulus;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Pre-generated, frame-duration-matched tones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    Training,
    Measurement,
}

impl Tone {
    pub fn name(&self) -> &'static str {
        match self {
            Tone::Training => "training",
            Tone::Measurement => "measurement",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Spoken instruction cues, played fire-and-continue (not swap-locked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionCue {
    CloseYourEyes,
    Starting,
    OpenYourEyes,
    NextParticipant,
    ExperimentCompleted,
}

impl InstructionCue {
    pub fn name(&self) -> &'static str {
        match self {
            InstructionCue::CloseYourEyes => "close_your_eyes",
            InstructionCue::Starting => "starting",
            InstructionCue::OpenYourEyes => "open_your_eyes",
            InstructionCue::NextParticipant => "next_participant_please",
            InstructionCue::ExperimentCompleted => "experiment_completed",
        }
    }
}

impl fmt::Display for InstructionCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One-shot callback fired atomically with a swap becoming visible.
pub type SwapCallback = Box<dyn FnOnce() + Send>;

/// Fullscreen stimulus display with vsync-locked buffer swaps.
pub trait DisplayAdapter: Send {
    /// Measure the actual refresh rate of the target display in Hz.
    /// Called once per session, before the frame table is frozen.
    fn measure_refresh_rate(&mut self) -> Result<f64>;

    /// Pre-build drawing resources for a stimulus so that later
    /// [`Self::draw_stimulus`] calls are allocation-free.
    fn prepare_stimulus(&mut self, stimulus: &Stimulus) -> Result<()>;

    /// Draw a prepared stimulus to the back buffer (does not swap).
    fn draw_stimulus(&mut self, stimulus: &Stimulus);

    /// Register a callback for the exact moment the next swap becomes
    /// visible. Callbacks run FIFO, synchronously on the calling thread.
    fn schedule_on_swap(&mut self, callback: SwapCallback);

    /// Swap buffers, blocking until the display's vertical blank, then run
    /// all scheduled callbacks. Returns a timestamp in seconds.
    fn swap(&mut self) -> f64;

    /// Release the display surface. Idempotent.
    fn close(&mut self);
}

/// Audio cue playback. Tone `play`/`stop` must be non-blocking and
/// allocation-free so they are safe as swap-scheduled callbacks.
pub trait AudioAdapter: Send + Sync {
    /// Pre-generate a tone buffer of exactly `duration_secs` seconds.
    fn prepare_tone(&self, tone: Tone, duration_secs: f64) -> Result<()>;

    fn play(&self, tone: Tone);

    fn stop(&self, tone: Tone);

    /// Start an instruction cue and return immediately.
    fn play_instruction(&self, cue: InstructionCue);

    fn stop_instruction(&self, cue: InstructionCue);

    /// Duration of an instruction cue in seconds; 0.0 when unknown.
    fn instruction_duration(&self, cue: InstructionCue) -> f64;
}

/// High-speed camera capture. Frame capture and encoding happen on an
/// adapter-internal thread; `start_recording`/`stop_recording` are the only
/// synchronization points with the engine worker.
pub trait RecordingAdapter: Send {
    fn start_recording(&mut self, path: &Path, capture_rate_hz: f64) -> Result<()>;

    /// Stop capture, blocking until the adapter has flushed and closed its
    /// output. Returns the number of frames captured; after this returns the
    /// video file is complete and no longer being written.
    fn stop_recording(&mut self) -> Result<u64>;

    fn is_recording(&self) -> bool;
}

/// The thread-bound hardware bundle owned by the engine worker.
pub struct Hardware {
    pub display: Box<dyn DisplayAdapter>,
    pub audio: Arc<dyn AudioAdapter>,
    pub camera: Box<dyn RecordingAdapter>,
}

/// Creates the hardware bundle on the calling thread.
pub trait HardwareFactory: Send + Sync {
    fn create(&self, screen_index: usize) -> Result<Hardware>;
}

//! Session and trial state types, and the engine's event stream.

use crate::data::TrialStatus;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a session, owned by the engine and mirrored to controllers
/// through [`EngineEvent::StateChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentState {
    Idle,
    Running,
    Paused,
    /// Blocked on per-turn confirmation before the next queue item.
    WaitingConfirm,
    Completed,
    Aborted,
    Error,
}

impl ExperimentState {
    /// Terminal states are never left; the worker has exited.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExperimentState::Completed | ExperimentState::Aborted | ExperimentState::Error
        )
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExperimentState::Idle => "Idle",
            ExperimentState::Running => "Running",
            ExperimentState::Paused => "Paused",
            ExperimentState::WaitingConfirm => "WaitingConfirm",
            ExperimentState::Completed => "Completed",
            ExperimentState::Aborted => "Aborted",
            ExperimentState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// The phase a trial is currently in, reported to observers with the
/// remaining phase duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    TrainingShape,
    TrainingBlank,
    InterTrial,
    InstructionCloseEyes,
    InstructionWait,
    InstructionStarting,
    InstructionReady,
    MeasurementBeep,
    MeasurementSilence,
    InstructionPost,
}

impl fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrialPhase::TrainingShape => "training shape",
            TrialPhase::TrainingBlank => "training blank",
            TrialPhase::InterTrial => "inter-trial delay",
            TrialPhase::InstructionCloseEyes => "close your eyes",
            TrialPhase::InstructionWait => "eyes closing",
            TrialPhase::InstructionStarting => "starting",
            TrialPhase::InstructionReady => "ready",
            TrialPhase::MeasurementBeep => "measurement beep",
            TrialPhase::MeasurementSilence => "measurement silence",
            TrialPhase::InstructionPost => "post instruction",
        };
        f.write_str(s)
    }
}

/// Events streamed from the engine worker to any number of controller-side
/// consumers (GUI, CLI, tests) over a crossbeam channel.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged(ExperimentState),
    PhaseChanged {
        phase: TrialPhase,
        remaining_secs: f64,
    },
    /// Mirror text for the operator screen (what the participant sees).
    StimulusUpdate(String),
    BeepProgress {
        current: u32,
        total: u32,
    },
    /// Free-form operator status line.
    ProgressText(String),
    /// The queue cursor moved; `index` is the new current index.
    QueueAdvanced {
        index: usize,
    },
    TrialFinished {
        subject: String,
        stimulus: String,
        repetition: u32,
        status: TrialStatus,
    },
    /// A pause-interrupted recording was deleted before retry.
    RecordingDiscarded(PathBuf),
    ErrorOccurred(String),
    /// The worker has exited; the state is terminal.
    SessionFinished,
}

//! Frame-synchronized visual-imagery training and physiological measurement
//! sessions.
//!
//! A session alternates visual training cues with camera-recorded
//! measurement periods, for a queue of subjects interleaved across
//! repetitions. Everything visual is timed in integer display frames against
//! a blocking vsync swap; tones that must coincide with a visual change are
//! scheduled as swap callbacks so both land on the same frame.
//!
//! The crate is organized around three seams:
//! - [`hardware`] defines the adapter contracts the core drives (display,
//!   audio, camera) plus simulated implementations for headless runs;
//! - [`experiment`] holds the single-trial state machine
//!   ([`experiment::TrialProtocol`]) and the worker-thread session
//!   orchestrator ([`experiment::ExperimentEngine`]);
//! - [`session`] and [`data`] cover the work queue, on-disk session layout
//!   and the CSV/JSON data products.
//!
//! Hardware is created and owned by the engine's worker thread (display and
//! audio contexts are thread-bound); controllers steer the session through
//! an [`experiment::EngineHandle`] and observe it on a channel of
//! [`experiment::EngineEvent`]s.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod session;
pub mod stimulus;
pub mod sync;
pub mod timing;

pub use error::{EngineError, Result};
pub use experiment::{EngineEvent, EngineHandle, ExperimentEngine, ExperimentState};

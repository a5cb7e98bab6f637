//! Trial protocol and session engine.

mod engine;
mod protocol;
mod state;

pub use engine::{EngineHandle, ExperimentEngine};
pub use protocol::{NullObserver, TrialContext, TrialObserver, TrialOutcome, TrialProtocol};
pub use state::{EngineEvent, ExperimentState, TrialPhase};

//! Session data products: event audit trail, per-trial log, cross-session
//! overview.

mod event_log;
mod monitor;
mod trial_log;

pub use event_log::EventLogger;
pub use monitor::{SessionMonitor, SessionSummary};
pub use trial_log::{TrialLog, TrialStatus};

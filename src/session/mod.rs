//! Session work list and on-disk layout.

mod layout;
mod queue;

pub use layout::SessionLayout;
pub use queue::{ProgressItem, ProgressSnapshot, QueueItem, SessionQueue};

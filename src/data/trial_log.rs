//! Per-trial status log.
//!
//! One CSV row per finished trial: completed trials keep their video,
//! aborted trials keep whatever was recorded and are marked as such.
//! Pause-interrupted trials never appear here; their recording is discarded
//! and the trial is retried.

use crate::error::Result;
use chrono::Local;
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStatus {
    Completed,
    Aborted,
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialStatus::Completed => f.write_str("completed"),
            TrialStatus::Aborted => f.write_str("aborted"),
        }
    }
}

pub struct TrialLog {
    writer: Mutex<csv::Writer<File>>,
}

impl TrialLog {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        writer.write_record(["timestamp", "subject", "stimulus", "repetition", "status", "video"])?;
        writer.flush()?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    pub fn log_trial(
        &self,
        subject: &str,
        stimulus: &str,
        repetition: u32,
        status: TrialStatus,
        video_file: &str,
    ) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let repetition = repetition.to_string();
        let status = status.to_string();
        let mut writer = self.writer.lock();
        let result = writer
            .write_record([
                stamp.as_str(),
                subject,
                stimulus,
                repetition.as_str(),
                status.as_str(),
                video_file,
            ])
            .and_then(|()| writer.flush().map_err(csv::Error::from));
        if let Err(e) = result {
            warn!(subject, stimulus, error = %e, "failed to append trial log row");
        }
    }
}

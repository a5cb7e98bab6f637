//! Cross-session overview.
//!
//! Appends one summary row per finished session to a CSV in the output base
//! directory, so every session run on a rig accumulates into a single
//! overview file. Best-effort: a failure to append is reported but never
//! fails the session itself.

use crate::error::Result;
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub started: DateTime<Local>,
    pub ended: DateTime<Local>,
    pub status: String,
    pub participants: Vec<String>,
    pub stimuli: Vec<String>,
    pub repetitions: u32,
    pub shape_reps_per_subsession: u32,
    pub camera_summary: String,
    pub session_folder: PathBuf,
}

pub struct SessionMonitor {
    path: PathBuf,
}

impl SessionMonitor {
    pub fn new(output_base: &Path) -> Self {
        Self {
            path: output_base.join("sessions_overview.csv"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_session(&self, summary: &SessionSummary) -> Result<()> {
        let fresh = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            writer.write_record([
                "started",
                "ended",
                "status",
                "participants",
                "stimuli",
                "repetitions",
                "shape_reps_per_subsession",
                "camera",
                "session_folder",
            ])?;
        }
        writer.write_record(&[
            summary.started.format("%Y-%m-%d %H:%M:%S").to_string(),
            summary.ended.format("%Y-%m-%d %H:%M:%S").to_string(),
            summary.status.clone(),
            summary.participants.join(";"),
            summary.stimuli.join(";"),
            summary.repetitions.to_string(),
            summary.shape_reps_per_subsession.to_string(),
            summary.camera_summary.clone(),
            summary.session_folder.display().to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(status: &str) -> SessionSummary {
        SessionSummary {
            started: Local::now(),
            ended: Local::now(),
            status: status.to_string(),
            participants: vec!["alice".into(), "bob".into()],
            stimuli: vec!["circle".into()],
            repetitions: 2,
            shape_reps_per_subsession: 1,
            camera_summary: "128x128 Mono8 1000us 17.7dB 500fps".into(),
            session_folder: PathBuf::from("/tmp/session_x"),
        }
    }

    #[test]
    fn header_written_once_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = SessionMonitor::new(dir.path());
        monitor.log_session(&summary("Completed")).unwrap();
        monitor.log_session(&summary("Aborted")).unwrap();

        let contents = std::fs::read_to_string(monitor.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("started,ended,status"));
        assert!(lines[1].contains("alice;bob"));
        assert!(lines[2].contains("Aborted"));
    }
}

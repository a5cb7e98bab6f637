//! Append-only event audit trail.
//!
//! Every timing-relevant event in a session (trial start, shape on/off,
//! beeps, recording start/stop, instructions) is appended as one CSV row
//! with a timestamp relative to session start. The log is an audit trail,
//! not a control-flow mechanism: write failures are reported through
//! `tracing` and never interrupt a running trial, because `log` is also
//! invoked from swap-scheduled callbacks that cannot propagate errors.

use crate::error::Result;
use parking_lot::Mutex;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::warn;

pub struct EventLogger {
    writer: Mutex<csv::Writer<File>>,
    clock: Mutex<Option<Instant>>,
}

impl EventLogger {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        writer.write_record(["elapsed_s", "event", "subject", "stimulus", "repetition", "detail"])?;
        writer.flush()?;
        Ok(Self {
            writer: Mutex::new(writer),
            clock: Mutex::new(None),
        })
    }

    /// Start the relative clock. Events logged before this carry 0.0.
    pub fn start_clock(&self) {
        *self.clock.lock() = Some(Instant::now());
    }

    fn elapsed(&self) -> f64 {
        self.clock
            .lock()
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Append one trial-scoped event row. Flushed immediately.
    pub fn log(&self, event: &str, subject: &str, stimulus: &str, repetition: u32, detail: &str) {
        self.write_row(event, subject, stimulus, &repetition.to_string(), detail);
    }

    /// Append a session-scoped event (no subject/stimulus context).
    pub fn log_session(&self, event: &str) {
        self.write_row(event, "", "", "", "");
    }

    pub fn log_session_detail(&self, event: &str, detail: &str) {
        self.write_row(event, "", "", "", detail);
    }

    fn write_row(&self, event: &str, subject: &str, stimulus: &str, repetition: &str, detail: &str) {
        let elapsed = format!("{:.4}", self.elapsed());
        let mut writer = self.writer.lock();
        let result = writer
            .write_record([elapsed.as_str(), event, subject, stimulus, repetition, detail])
            .and_then(|()| writer.flush().map_err(csv::Error::from));
        if let Err(e) = result {
            warn!(event, error = %e, "failed to append event log row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event_log.csv");
        let logger = EventLogger::create(&path).unwrap();
        logger.start_clock();
        logger.log_session("SESSION_START");
        logger.log("TRIAL_START", "alice", "circle", 1, "");
        logger.log("RECORDING_STOP", "alice", "circle", 1, "frames=1234");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("elapsed_s,event"));
        assert!(lines[1].contains("SESSION_START"));
        assert!(lines[2].contains("alice,circle,1"));
        assert!(lines[3].contains("frames=1234"));
    }

    #[test]
    fn events_before_clock_start_carry_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event_log.csv");
        let logger = EventLogger::create(&path).unwrap();
        logger.log_session("SESSION_START");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.lines().nth(1).unwrap().starts_with("0.0000,"));
    }
}

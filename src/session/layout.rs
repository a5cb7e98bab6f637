//! Session directory layout and progress persistence.
//!
//! One timestamped directory per session, with a `videos/<subject>/` tree
//! for trial recordings, CSV logs at the top level, and a `progress.json`
//! snapshot rewritten after every successful queue advance so an external
//! session manager can recover from a crash.

use crate::error::Result;
use crate::session::queue::ProgressSnapshot;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug)]
pub struct SessionLayout {
    session_dir: PathBuf,
}

impl SessionLayout {
    /// Create the session directory tree under `output_base`.
    pub fn create(output_base: &Path, subjects: &[String]) -> Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let session_dir = output_base.join(format!("session_{stamp}"));
        fs::create_dir_all(&session_dir)?;
        for subject in subjects {
            fs::create_dir_all(session_dir.join("videos").join(subject))?;
        }
        info!(dir = %session_dir.display(), "session directories created");
        Ok(Self { session_dir })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.session_dir.join("event_log.csv")
    }

    pub fn trial_log_path(&self) -> PathBuf {
        self.session_dir.join("trial_log.csv")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.session_dir.join("progress.json")
    }

    /// Destination path for one trial recording. `instance` disambiguates
    /// repeated occurrences of the same stimulus within a turn.
    pub fn trial_video_path(
        &self,
        subject: &str,
        repetition: u32,
        stimulus_name: &str,
        instance: usize,
        stamp: &str,
    ) -> PathBuf {
        self.session_dir.join("videos").join(subject).join(format!(
            "{subject}_rep{repetition}_{stimulus_name}_{instance}_{stamp}.mp4"
        ))
    }

    /// Persist a progress snapshot for external crash recovery.
    pub fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(self.progress_path(), json)?;
        Ok(())
    }
}

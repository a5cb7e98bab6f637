//! Interleaved subject x repetition queue.

use crate::error::{EngineError, Result};
use crate::stimulus::Stimulus;
use serde::{Deserialize, Serialize};

/// One entry in the session queue: a subject's full stimulus set for one
/// repetition (a "turn"). Immutable except for `completed`.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub subject: String,
    pub repetition: u32,
    pub stimuli: Vec<Stimulus>,
    pub completed: bool,
}

impl QueueItem {
    pub fn label(&self) -> String {
        format!("{} - Rep {}", self.subject, self.repetition)
    }
}

/// Flat, replayable snapshot of queue progress for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub cursor_index: usize,
    pub items: Vec<ProgressItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressItem {
    pub subject: String,
    pub repetition: u32,
    pub completed: bool,
}

/// Builds and iterates the interleaved experiment queue.
///
/// Subjects are interleaved within each repetition:
/// rep 1: subject A, subject B, ...; rep 2: subject A, subject B, ...
/// Each item carries the full stimulus set, repeated
/// `shape_reps_per_subsession` times. Iteration is strictly forward; the
/// cursor only ever increases.
#[derive(Debug)]
pub struct SessionQueue {
    items: Vec<QueueItem>,
    index: usize,
}

impl SessionQueue {
    pub fn build(
        subjects: &[String],
        repetitions: u32,
        stimuli: &[Stimulus],
        shape_reps_per_subsession: u32,
    ) -> Result<Self> {
        if subjects.is_empty() {
            return Err(EngineError::Config("queue requires at least one subject".into()));
        }
        if stimuli.is_empty() {
            return Err(EngineError::Config("queue requires at least one stimulus".into()));
        }
        if repetitions < 1 || shape_reps_per_subsession < 1 {
            return Err(EngineError::Config(
                "repetitions and shape reps must be >= 1".into(),
            ));
        }

        let mut expanded = Vec::with_capacity(stimuli.len() * shape_reps_per_subsession as usize);
        for _ in 0..shape_reps_per_subsession {
            expanded.extend_from_slice(stimuli);
        }

        let mut items = Vec::with_capacity(subjects.len() * repetitions as usize);
        for rep in 1..=repetitions {
            for subject in subjects {
                items.push(QueueItem {
                    subject: subject.clone(),
                    repetition: rep,
                    stimuli: expanded.clone(),
                    completed: false,
                });
            }
        }
        Ok(Self { items, index: 0 })
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.items.get(self.index)
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn is_done(&self) -> bool {
        self.index >= self.items.len()
    }

    /// Mark the current item completed and move the cursor forward.
    /// Returns the new current item, if any.
    pub fn advance(&mut self) -> Option<&QueueItem> {
        if self.index < self.items.len() {
            self.items[self.index].completed = true;
            self.index += 1;
        }
        self.current()
    }

    /// Clear the completed flag on the in-progress item without moving the
    /// cursor. Used for retry.
    pub fn reset_current(&mut self) {
        if let Some(item) = self.items.get_mut(self.index) {
            item.completed = false;
        }
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            cursor_index: self.index,
            items: self
                .items
                .iter()
                .map(|item| ProgressItem {
                    subject: item.subject.clone(),
                    repetition: item.repetition,
                    completed: item.completed,
                })
                .collect(),
        }
    }
}

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use log::*;
use serde::Serialize;

use super::Job;

const DEFAULT_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub job_id: u64,
    pub job: Job,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Jobs that will not be retried again, kept for an operator to look at. Only the most recent `capacity` entries are
/// kept.
#[derive(Clone)]
pub struct DeadLetterQueue {
    entries: Arc<Mutex<VecDeque<DeadLetter>>>,
    capacity: usize,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DeadLetterQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))), capacity: capacity.max(1) }
    }

    pub fn push(&self, letter: DeadLetter) {
        error!(
            "📬️ Job #{} ({}) dead-lettered after {} attempt(s): {}. Payload: {}",
            letter.job_id,
            letter.job.name(),
            letter.attempts,
            letter.error,
            serde_json::to_string(&letter.job).unwrap_or_default()
        );
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(letter);
    }

    /// Most recent first.
    pub fn list(&self) -> Vec<DeadLetter> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

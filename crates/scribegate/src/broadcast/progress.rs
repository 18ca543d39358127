//! Progress events, the per-run channel registry, and the recorder
//! that worker threads publish through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::{progress_repo, Database};
use crate::db::progress_repo::NewProgress;
use crate::error::Result;

/// Severity of a progress event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// One progress event for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub run_id: i64,
    /// Free-text stage name, e.g. `PROCESSING`.
    pub phase: String,
    pub severity: Severity,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Percent complete, 0-100.
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(run_id: i64, phase: &str, message: &str, progress: u8) -> Self {
        Self {
            run_id,
            phase: phase.to_string(),
            severity: Severity::Info,
            message: message.to_string(),
            progress: progress.min(100),
            timestamp: Utc::now(),
            details: None,
        }
    }

    /// Terminal success event, always 100%.
    pub fn success(run_id: i64, phase: &str, message: &str) -> Self {
        Self {
            run_id,
            phase: phase.to_string(),
            severity: Severity::Success,
            message: message.to_string(),
            progress: 100,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn warning(run_id: i64, phase: &str, message: &str, progress: u8) -> Self {
        Self {
            run_id,
            phase: phase.to_string(),
            severity: Severity::Warning,
            message: message.to_string(),
            progress: progress.min(100),
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn error(run_id: i64, phase: &str, message: &str) -> Self {
        Self {
            run_id,
            phase: phase.to_string(),
            severity: Severity::Error,
            message: message.to_string(),
            progress: 0,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Per-run event channels. Subscribing to a run only yields that run's
/// events; finished runs are pruned from the registry.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    channels: Arc<Mutex<HashMap<i64, broadcast::Sender<ProgressEvent>>>>,
    capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribes to a run's events, creating the channel on first use.
    pub fn subscribe(&self, run_id: i64) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends an event to the run's subscribers, if any.
    pub fn send(&self, event: ProgressEvent) {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = channels.get(&event.run_id) {
            // No active receivers is fine.
            let _ = sender.send(event);
        }
    }

    /// Drops the run's channel. Subscribers see the stream end.
    pub fn close(&self, run_id: i64) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(&run_id);
    }

    /// Number of runs with live channels.
    pub fn active_runs(&self) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.len()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Where engine adapters report progress. Object-safe so handles can
/// hold a `Box<dyn ProgressSink>`.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Publishes events live and keeps a buffered copy for the durable
/// trail. The buffer is written in one batch when the run reaches a
/// terminal state, so mid-run crashes cost history but never leave a
/// half-written trail.
pub struct ProgressRecorder {
    run_id: i64,
    broadcaster: ProgressBroadcaster,
    buffer: Mutex<Vec<ProgressEvent>>,
}

impl ProgressRecorder {
    pub fn new(run_id: i64, broadcaster: ProgressBroadcaster) -> Self {
        Self {
            run_id,
            broadcaster,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Writes the buffered trail to the database and clears the buffer.
    pub fn flush(&self, db: &Database) -> Result<()> {
        let events: Vec<ProgressEvent> = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.drain(..).collect()
        };
        if events.is_empty() {
            return Ok(());
        }
        let rows: Vec<NewProgress> = events
            .iter()
            .map(|e| NewProgress {
                run_id: e.run_id,
                timestamp: crate::db::format_timestamp(e.timestamp),
                phase: e.phase.clone(),
                severity: e.severity.as_str().to_string(),
                message: e.message.clone(),
                progress: e.progress as i64,
                details: e.details.as_ref().map(|d| d.to_string()),
            })
            .collect();
        progress_repo::insert_batch(db, &rows)?;
        log::debug!("Flushed {} progress events for run {}", rows.len(), self.run_id);
        Ok(())
    }
}

impl ProgressSink for ProgressRecorder {
    fn report(&self, event: ProgressEvent) {
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(event.clone());
        }
        self.broadcaster.send(event);
    }
}

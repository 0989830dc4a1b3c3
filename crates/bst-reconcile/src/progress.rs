use std::path::PathBuf;
use std::sync::mpsc;

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::{BatchStatus, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Effective root status (`global AND individual`).
    Root,
    Rw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    BatchStarted {
        operation: Operation,
        items: usize,
    },
    ProcessesStopped {
        found: usize,
        failures: usize,
    },
    ItemUpdated {
        unique_id: String,
        status: StatusKind,
        value: String,
    },
    ItemFailed {
        unique_id: String,
        operation: Operation,
        error: String,
    },
    GlobalUpdated {
        config_path: PathBuf,
        value: bool,
    },
    BatchFinished {
        operation: Operation,
        status: BatchStatus,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, ev: ProgressEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _ev: ProgressEvent) {}
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, ev: ProgressEvent) {
        match ev {
            ProgressEvent::BatchStarted { operation, items } => {
                info!(operation = operation.label(), items, "batch started");
            }
            ProgressEvent::ProcessesStopped { found, failures } => {
                if failures > 0 {
                    warn!(found, failures, "emulator processes not fully stopped; continuing");
                } else {
                    info!(found, "emulator processes stopped");
                }
            }
            ProgressEvent::ItemUpdated {
                unique_id,
                status,
                value,
            } => {
                info!(id = %unique_id, status = ?status, value = %value, "instance updated");
            }
            ProgressEvent::ItemFailed {
                unique_id,
                operation,
                error,
            } => {
                warn!(id = %unique_id, operation = operation.label(), error = %error, "instance update failed");
            }
            ProgressEvent::GlobalUpdated { config_path, value } => {
                info!(config = %config_path.display(), value, "global root flag set");
            }
            ProgressEvent::BatchFinished { operation, status } => {
                info!(operation = operation.label(), status = status.label(), "batch finished");
            }
        }
    }
}

/// Delivers events to another thread (e.g. a UI loop).
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, ev: ProgressEvent) {
        let _ = self.tx.send(ev);
    }
}

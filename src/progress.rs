//! Progress Channel: an append-only event stream consumed by the external
//! transport layer.
//!
//! Implemented as an MPSC channel of a serializable event enum, the same
//! shape `dashflow`'s `GraphEvent` takes for its own node-start/node-end
//! callbacks (see `dashflow/examples/graph_events.rs`), but transport-neutral:
//! the core only ever sends, never assumes a particular wire format.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        run_id: Uuid,
    },
    StageStarted {
        run_id: Uuid,
        stage: String,
    },
    StageSkipped {
        run_id: Uuid,
        stage: String,
        reason: String,
    },
    StageCompleted {
        run_id: Uuid,
        stage: String,
        duration_ms: u64,
        usage: Option<serde_json::Value>,
    },
    StageFailed {
        run_id: Uuid,
        stage: String,
        error_kind: String,
        message: String,
    },
    ImageGenerated {
        run_id: Uuid,
        index: usize,
        path: String,
    },
    CaptionAdded {
        run_id: Uuid,
        image_index: usize,
        version: u32,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
    RunFailed {
        run_id: Uuid,
        error_kind: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
}

/// The sending half handed to the Executor. Cloneable and safe for
/// concurrent appenders — per-variant sub-tasks each hold a clone and emit
/// `image_generated`/diagnostics independently.
#[derive(Clone)]
pub struct ProgressSender {
    inner: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn emit(&self, event: ProgressEvent) {
        // A disconnected receiver (transport layer gone away) must never
        // fail the run; dropping the event is the correct behavior.
        let _ = self.inner.send(event);
    }
}

pub struct ProgressReceiver {
    inner: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressReceiver {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.inner.recv().await
    }
}

/// Creates a fresh progress channel for one run.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { inner: tx }, ProgressReceiver { inner: rx })
}

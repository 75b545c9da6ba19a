//! Typed pipeline events over bounded channels.
//!
//! The core emits events; front-ends subscribe. Sends block when the channel
//! is full, so a slow consumer applies back-pressure instead of losing events
//! or buffering without bound.

#![allow(missing_docs)]

use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::core::types::ItemStatus;

/// Executor phase reported on transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    Preparing,
    Executing,
    Finalizing,
    Completed,
}

impl ExecPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Executing => "executing",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        }
    }
}

/// Events emitted by the scan and execute stages.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Non-fatal scanner trouble: permission denied, broken symlink, size cap hit.
    ScanWarning {
        path: PathBuf,
        code: &'static str,
        message: String,
    },
    /// A root finished (or was found entirely inaccessible).
    ScanRootCompleted {
        root: PathBuf,
        items_found: u64,
    },
    /// Emitted after every executed item, once its state is persisted.
    ExecProgress {
        plan_id: String,
        current_index: usize,
        total: usize,
    },
    /// Executor phase transition.
    ExecPhase {
        plan_id: String,
        phase: ExecPhase,
    },
    /// Terminal state reached for one item.
    ItemFinished {
        plan_id: String,
        item_id: i64,
        status: ItemStatus,
    },
}

/// Cheaply-cloneable sending half.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<PipelineEvent>,
}

impl EventSender {
    /// Blocking send. A disconnected receiver is fine (front-end shut down);
    /// the event is discarded in that case.
    pub fn send(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Build a bounded event channel.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventSender, Receiver<PipelineEvent>) {
    let (tx, rx) = bounded(capacity);
    (EventSender { tx }, rx)
}

/// An event sink that discards everything (for headless library use).
#[must_use]
pub fn null_sender() -> EventSender {
    // Capacity 0 would rendezvous; drop the receiver so sends become no-ops.
    let (tx, _rx) = bounded(1);
    drop(_rx);
    EventSender { tx }
}

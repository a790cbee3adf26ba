//! Events broadcast by the queue for observers (UI mirrors, logging, tests).

use serde::Serialize;

use crate::error::ErrorCode;
use crate::operation::OperationKind;
use crate::types::{BatchId, ItemId};

/// Broadcast channel capacity for queue events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    ItemAdded {
        item_id: ItemId,
        parent_id: Option<ItemId>,
        batch_id: Option<BatchId>,
    },
    OperationStarted {
        item_id: ItemId,
        operation: OperationKind,
    },
    OperationFinished {
        item_id: ItemId,
        operation: OperationKind,
        remaining: usize,
    },
    /// Item paused to avoid racing another upload to the same post.
    ItemPaused {
        item_id: ItemId,
        post: Option<u64>,
    },
    ItemResumed {
        item_id: ItemId,
    },
    ItemCompleted {
        item_id: ItemId,
    },
    ItemCancelled {
        item_id: ItemId,
        code: ErrorCode,
    },
    BatchCompleted {
        batch_id: BatchId,
    },
    QueuePaused,
    QueueResumed,
    /// The shared image worker was released because the queue drained.
    WorkerTerminated,
}

impl QueueEvent {
    /// Item this event is about, if any.
    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            QueueEvent::ItemAdded { item_id, .. }
            | QueueEvent::OperationStarted { item_id, .. }
            | QueueEvent::OperationFinished { item_id, .. }
            | QueueEvent::ItemPaused { item_id, .. }
            | QueueEvent::ItemResumed { item_id }
            | QueueEvent::ItemCompleted { item_id }
            | QueueEvent::ItemCancelled { item_id, .. } => Some(item_id),
            QueueEvent::BatchCompleted { .. }
            | QueueEvent::QueuePaused
            | QueueEvent::QueueResumed
            | QueueEvent::WorkerTerminated => None,
        }
    }
}

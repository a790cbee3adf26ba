//! Queue state: items, the global pause flag, the preview registry and settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::blob::BlobRegistry;
use crate::config::QueueSettings;
use crate::error::UploadError;
use crate::operation::{Operation, OperationKind};
use crate::types::{AdditionalData, Attachment, BatchId, ItemId, MediaFile};

/// Status of a queue item.
///
/// The scheduler only moves items between `Processing` and `Paused`; the
/// other values exist for callers that mirror the queue in a UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Queued,
    Processing,
    Paused,
    Uploaded,
    Error,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Queued => write!(f, "queued"),
            ItemStatus::Processing => write!(f, "processing"),
            ItemStatus::Paused => write!(f, "paused"),
            ItemStatus::Uploaded => write!(f, "uploaded"),
            ItemStatus::Error => write!(f, "error"),
        }
    }
}

pub type AttachmentCallback = Arc<dyn Fn(&Attachment) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&UploadError) + Send + Sync>;
pub type BatchCallback = Arc<dyn Fn() + Send + Sync>;

/// Callbacks attached to a queue item.
///
/// They are never invoked while the queue state is locked, so a callback may
/// safely submit new commands.
#[derive(Clone, Default)]
pub struct ItemCallbacks {
    pub on_change: Option<AttachmentCallback>,
    pub on_success: Option<AttachmentCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_batch_success: Option<BatchCallback>,
}

impl ItemCallbacks {
    pub fn on_change(mut self, f: impl Fn(&Attachment) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&Attachment) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&UploadError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_batch_success(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_batch_success = Some(Arc::new(f));
        self
    }

    /// Share an existing batch callback (all items of a batch usually do).
    pub fn with_batch_callback(mut self, callback: BatchCallback) -> Self {
        self.on_batch_success = Some(callback);
        self
    }
}

impl fmt::Debug for ItemCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemCallbacks")
            .field("on_change", &self.on_change.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_batch_success", &self.on_batch_success.is_some())
            .finish()
    }
}

/// One file's journey through the pipeline.
#[derive(Debug)]
pub struct QueueItem {
    pub id: ItemId,
    /// The file as added, kept to derive thumbnails at full quality.
    pub source_file: MediaFile,
    /// The current working file, replaced by every transform.
    pub file: MediaFile,
    pub attachment: Option<Attachment>,
    pub status: ItemStatus,
    pub additional_data: AdditionalData,
    pub current_operation: Option<OperationKind>,
    /// Remaining work, front first.
    pub operations: VecDeque<Operation>,
    pub error: Option<UploadError>,
    pub retry_count: u32,
    pub progress: u8,
    pub batch_id: Option<BatchId>,
    pub parent_id: Option<ItemId>,
    pub abort: CancellationToken,
    pub callbacks: ItemCallbacks,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(id: ItemId, file: MediaFile) -> Self {
        Self {
            id,
            source_file: file.clone(),
            file,
            attachment: None,
            status: ItemStatus::Processing,
            additional_data: AdditionalData::new(),
            current_operation: None,
            operations: VecDeque::from([Operation::new(OperationKind::Prepare)]),
            error: None,
            retry_count: 0,
            progress: 0,
            batch_id: None,
            parent_id: None,
            abort: CancellationToken::new(),
            callbacks: ItemCallbacks::default(),
            created_at: Utc::now(),
        }
    }

    pub fn next_operation(&self) -> Option<&Operation> {
        self.operations.front()
    }

    pub fn next_kind(&self) -> Option<OperationKind> {
        self.operations.front().map(|op| op.kind)
    }

    pub fn is_sideload(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.status == ItemStatus::Paused
    }

    /// No operation in flight.
    pub fn is_idle(&self) -> bool {
        self.current_operation.is_none()
    }

    /// Idle, not paused and waiting to run `kind` next.
    pub fn is_waiting_for(&self, kind: OperationKind) -> bool {
        self.is_idle() && !self.is_paused() && self.next_kind() == Some(kind)
    }

    fn is_waiting_for_image_processing(&self) -> bool {
        self.is_idle()
            && !self.is_paused()
            && self.next_kind().is_some_and(|k| k.is_image_processing())
    }

    /// Apply the result of a finished operation.
    pub fn apply_update(&mut self, update: ItemUpdate) {
        if let Some(file) = update.file {
            self.file = file;
        }
        if let Some(attachment) = update.attachment {
            match self.attachment.as_mut() {
                Some(existing) => existing.merge(attachment),
                None => self.attachment = Some(attachment),
            }
        }
        if let Some(data) = update.additional_data {
            self.additional_data.merge(data);
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id.clone(),
            file_name: self.file.name.clone(),
            mime_type: self.file.mime_type.clone(),
            status: self.status,
            current_operation: self.current_operation,
            operations: self.operations.iter().cloned().collect(),
            attachment: self.attachment.clone(),
            additional_data: self.additional_data.clone(),
            error: self.error.as_ref().map(|e| e.to_string()),
            retry_count: self.retry_count,
            progress: self.progress,
            batch_id: self.batch_id.clone(),
            parent_id: self.parent_id.clone(),
        }
    }
}

/// Partial update produced by a finished operation.
///
/// `attachment` and `additional_data` are merged into the item, every other
/// present field overwrites the stored value.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub file: Option<MediaFile>,
    pub attachment: Option<Attachment>,
    pub additional_data: Option<AdditionalData>,
    pub progress: Option<u8>,
    pub status: Option<ItemStatus>,
}

impl ItemUpdate {
    pub fn file(file: MediaFile) -> Self {
        Self {
            file: Some(file),
            ..Default::default()
        }
    }

    pub fn attachment(attachment: Attachment) -> Self {
        Self {
            attachment: Some(attachment),
            ..Default::default()
        }
    }
}

/// Read-only copy of an item for callers outside the queue lock.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub file_name: String,
    pub mime_type: String,
    pub status: ItemStatus,
    pub current_operation: Option<OperationKind>,
    pub operations: Vec<Operation>,
    pub attachment: Option<Attachment>,
    pub additional_data: AdditionalData,
    pub error: Option<String>,
    pub retry_count: u32,
    pub progress: u8,
    pub batch_id: Option<BatchId>,
    pub parent_id: Option<ItemId>,
}

/// Everything the scheduler owns.
#[derive(Debug)]
pub struct QueueState {
    items: Vec<QueueItem>,
    paused: bool,
    pub blobs: BlobRegistry,
    settings: Arc<QueueSettings>,
}

impl QueueState {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            items: Vec::new(),
            paused: false,
            blobs: BlobRegistry::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &Arc<QueueSettings> {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: QueueSettings) {
        self.settings = Arc::new(settings);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
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

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    pub fn get(&self, id: &ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    pub fn insert(&mut self, item: QueueItem) {
        self.items.push(item);
    }

    /// Remove an item and release its previews.
    pub fn remove(&mut self, id: &ItemId) -> Option<QueueItem> {
        let idx = self.items.iter().position(|item| &item.id == id)?;
        self.blobs.revoke(id);
        Some(self.items.remove(idx))
    }

    /// Number of items with `kind` in flight.
    pub fn count_in_flight(&self, kind: OperationKind) -> usize {
        self.items
            .iter()
            .filter(|item| item.current_operation == Some(kind))
            .count()
    }

    pub fn image_processing_in_flight(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.current_operation.is_some_and(|k| k.is_image_processing()))
            .count()
    }

    /// Whether some item other than `except` is uploading to `post`.
    pub fn is_uploading_to_post(&self, post: u64, except: &ItemId) -> bool {
        self.items.iter().any(|item| {
            &item.id != except
                && item.current_operation == Some(OperationKind::Upload)
                && item.additional_data.post() == Some(post)
        })
    }

    /// Whether any item still names `parent_id` as its parent.
    pub fn has_children(&self, parent_id: &ItemId) -> bool {
        self.items
            .iter()
            .any(|item| item.parent_id.as_ref() == Some(parent_id))
    }

    /// Idle items whose next operation is an upload, in queue order.
    pub fn pending_uploads(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|item| item.is_waiting_for(OperationKind::Upload))
            .map(|item| item.id.clone())
            .collect()
    }

    /// Idle items whose next operation is a resize or rotate, in queue order.
    pub fn pending_image_processing(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|item| item.is_waiting_for_image_processing())
            .map(|item| item.id.clone())
            .collect()
    }

    /// First paused item targeting `post`.
    pub fn paused_item_for_post(&self, post: u64) -> Option<&QueueItem> {
        self.items
            .iter()
            .find(|item| item.is_paused() && item.additional_data.post() == Some(post))
    }

    pub fn children_of(&self, parent_id: &ItemId) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|item| item.parent_id.as_ref() == Some(parent_id))
            .map(|item| item.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdditionalData;

    fn item(id: &str) -> QueueItem {
        QueueItem::new(
            ItemId::from(id),
            MediaFile::new(format!("{id}.jpg"), "image/jpeg", vec![0u8; 8]),
        )
    }

    #[test]
    fn test_new_item_defaults_to_prepare() {
        let item = item("a");
        assert_eq!(item.status, ItemStatus::Processing);
        assert_eq!(item.next_kind(), Some(OperationKind::Prepare));
        assert!(item.is_idle());
        assert!(!item.is_sideload());
    }

    #[test]
    fn test_apply_update_merges_attachment_and_data() {
        let mut item = item("a");
        item.additional_data = AdditionalData::new().with("post", 1);
        item.apply_update(ItemUpdate::attachment(Attachment::with_id(10)));
        item.apply_update(ItemUpdate {
            attachment: Some(Attachment {
                url: Some("https://example.com/a.jpg".to_string()),
                ..Default::default()
            }),
            additional_data: Some(AdditionalData::new().with("caption", "hi")),
            progress: Some(250),
            ..Default::default()
        });

        let attachment = item.attachment.as_ref().unwrap();
        assert_eq!(attachment.id, Some(10));
        assert_eq!(attachment.url.as_deref(), Some("https://example.com/a.jpg"));
        assert_eq!(item.additional_data.post(), Some(1));
        assert!(item.additional_data.get("caption").is_some());
        assert_eq!(item.progress, 100);
    }

    #[test]
    fn test_uploading_to_post_ignores_self() {
        let mut state = QueueState::new(QueueSettings::default());
        let mut a = item("a");
        a.additional_data = AdditionalData::new().with("post", 123);
        a.current_operation = Some(OperationKind::Upload);
        state.insert(a);

        assert!(!state.is_uploading_to_post(123, &ItemId::from("a")));
        assert!(state.is_uploading_to_post(123, &ItemId::from("b")));
        assert!(!state.is_uploading_to_post(7, &ItemId::from("b")));
    }

    #[test]
    fn test_remove_revokes_previews() {
        let mut state = QueueState::new(QueueSettings::default());
        let a = item("a");
        let file = a.file.clone();
        state.insert(a);
        state.blobs.create(&ItemId::from("a"), &file);

        assert!(state.remove(&ItemId::from("a")).is_some());
        assert!(state.blobs.is_empty());
        assert!(state.remove(&ItemId::from("a")).is_none());
    }
}

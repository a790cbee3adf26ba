//! Admission-controlled scheduler and completion coordinator.
//!
//! The scheduler is a synchronous state machine over an owned [`QueueState`].
//! Every transition is a [`Command`] passed to [`Scheduler::submit`], which
//! returns the [`Effect`]s the caller has to carry out:
//! - executor jobs for operations that were admitted
//! - item callbacks, always invoked outside the state lock
//! - queue events for observers
//!
//! Deferred work is never polled. Whenever an upload or an image operation
//! finishes (or is cancelled) the items waiting on that admission gate are
//! swept once and re-evaluated.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blob::Blob;
use crate::config::QueueSettings;
use crate::error::UploadError;
use crate::events::QueueEvent;
use crate::operation::{Operation, OperationKind};
use crate::state::{
    AttachmentCallback, BatchCallback, ErrorCallback, ItemCallbacks, ItemStatus, ItemUpdate,
    QueueItem, QueueState,
};
use crate::types::{AdditionalData, Attachment, BatchId, ItemId, MediaFile};

/// A file to add to the queue.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub id: ItemId,
    pub file: MediaFile,
    pub additional_data: AdditionalData,
    pub batch_id: Option<BatchId>,
    pub callbacks: ItemCallbacks,
}

impl NewItem {
    pub fn new(file: MediaFile) -> Self {
        Self {
            id: ItemId::new(),
            file,
            additional_data: AdditionalData::new(),
            batch_id: None,
            callbacks: ItemCallbacks::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_additional_data(mut self, additional_data: AdditionalData) -> Self {
        self.additional_data = additional_data;
        self
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_callbacks(mut self, callbacks: ItemCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// A child item that adds data to its parent's attachment.
#[derive(Debug, Clone)]
pub struct NewSideloadItem {
    pub id: ItemId,
    pub parent_id: ItemId,
    pub file: MediaFile,
    pub source_file: MediaFile,
    pub batch_id: Option<BatchId>,
    pub additional_data: AdditionalData,
    /// Explicit plan. Empty means `[Prepare]`.
    pub operations: Vec<Operation>,
    pub callbacks: ItemCallbacks,
}

impl NewSideloadItem {
    pub fn new(parent_id: ItemId, file: MediaFile) -> Self {
        Self {
            id: ItemId::new(),
            parent_id,
            source_file: file.clone(),
            file,
            batch_id: None,
            additional_data: AdditionalData::new(),
            operations: Vec::new(),
            callbacks: ItemCallbacks::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source_file(mut self, source_file: MediaFile) -> Self {
        self.source_file = source_file;
        self
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_additional_data(mut self, additional_data: AdditionalData) -> Self {
        self.additional_data = additional_data;
        self
    }

    pub fn with_operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_callbacks(mut self, callbacks: ItemCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// Every state transition of the queue.
pub enum Command {
    AddItem(NewItem),
    /// Add several files as one batch sharing `on_batch_success`.
    AddItems {
        items: Vec<NewItem>,
        on_batch_success: Option<BatchCallback>,
    },
    AddSideloadItem(NewSideloadItem),
    /// Run the next operation of an item if it may run now.
    ProcessItem(ItemId),
    /// Append operations to an item's plan.
    ExtendPlan {
        id: ItemId,
        operations: Vec<Operation>,
    },
    /// Record the result of the operation in flight.
    FinishOperation { id: ItemId, update: ItemUpdate },
    /// Abort an item and remove it from the queue.
    CancelItem {
        id: ItemId,
        error: UploadError,
        /// Skip `on_error`.
        silent: bool,
    },
    PauseQueue,
    ResumeQueue,
    PauseItem(ItemId),
    ResumeItem(ItemId),
    /// Resume the first paused item targeting `post`.
    ResumeItemByPostId(u64),
    RetryItem(ItemId),
    UpdateProgress { id: ItemId, progress: u8 },
    UpdateSettings(QueueSettings),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AddItem(new) => f.debug_tuple("AddItem").field(new).finish(),
            Command::AddItems {
                items,
                on_batch_success,
            } => f
                .debug_struct("AddItems")
                .field("items", items)
                .field("on_batch_success", &on_batch_success.is_some())
                .finish(),
            Command::AddSideloadItem(new) => f.debug_tuple("AddSideloadItem").field(new).finish(),
            Command::ProcessItem(id) => f.debug_tuple("ProcessItem").field(id).finish(),
            Command::ExtendPlan { id, operations } => f
                .debug_struct("ExtendPlan")
                .field("id", id)
                .field("operations", operations)
                .finish(),
            Command::FinishOperation { id, update } => f
                .debug_struct("FinishOperation")
                .field("id", id)
                .field("update", update)
                .finish(),
            Command::CancelItem { id, error, silent } => f
                .debug_struct("CancelItem")
                .field("id", id)
                .field("error", error)
                .field("silent", silent)
                .finish(),
            Command::PauseQueue => f.write_str("PauseQueue"),
            Command::ResumeQueue => f.write_str("ResumeQueue"),
            Command::PauseItem(id) => f.debug_tuple("PauseItem").field(id).finish(),
            Command::ResumeItem(id) => f.debug_tuple("ResumeItem").field(id).finish(),
            Command::ResumeItemByPostId(post) => {
                f.debug_tuple("ResumeItemByPostId").field(post).finish()
            }
            Command::RetryItem(id) => f.debug_tuple("RetryItem").field(id).finish(),
            Command::UpdateProgress { id, progress } => f
                .debug_struct("UpdateProgress")
                .field("id", id)
                .field("progress", progress)
                .finish(),
            Command::UpdateSettings(settings) => {
                f.debug_tuple("UpdateSettings").field(settings).finish()
            }
        }
    }
}

/// Everything an executor needs to run one operation.
///
/// A snapshot taken when the operation starts; the executor never touches the
/// queue state directly.
#[derive(Debug, Clone)]
pub struct Job {
    pub item_id: ItemId,
    pub operation: Operation,
    pub file: MediaFile,
    pub source_file: MediaFile,
    pub attachment: Option<Attachment>,
    pub additional_data: AdditionalData,
    pub parent_id: Option<ItemId>,
    /// Latest preview of the item.
    pub preview: Option<Blob>,
    pub settings: Arc<QueueSettings>,
    pub abort: CancellationToken,
}

impl Job {
    pub fn kind(&self) -> OperationKind {
        self.operation.kind
    }

    pub fn is_sideload(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// A user callback ready to be invoked.
pub enum Callback {
    Change(AttachmentCallback, Attachment),
    Success(AttachmentCallback, Attachment),
    Error(ErrorCallback, UploadError),
    BatchSuccess(BatchCallback),
}

impl Callback {
    pub fn invoke(&self) {
        match self {
            Callback::Change(f, attachment) | Callback::Success(f, attachment) => f(attachment),
            Callback::Error(f, error) => f(error),
            Callback::BatchSuccess(f) => f(),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Change(_, attachment) => f.debug_tuple("Change").field(attachment).finish(),
            Callback::Success(_, attachment) => f.debug_tuple("Success").field(attachment).finish(),
            Callback::Error(_, error) => f.debug_tuple("Error").field(error).finish(),
            Callback::BatchSuccess(_) => f.write_str("BatchSuccess"),
        }
    }
}

/// Side effect requested by the scheduler.
#[derive(Debug)]
pub enum Effect {
    /// Run an operation that was just started.
    Execute(Job),
    Callback(Callback),
    Emit(QueueEvent),
    /// Tell the image engine to abort work for this item.
    CancelProcessing(ItemId),
    /// The queue drained; release the image worker.
    TerminateWorker,
}

/// Batch callbacks and events already fired while resolving one completion.
#[derive(Default)]
struct Settled {
    callbacks: Vec<BatchCallback>,
    batches: HashSet<BatchId>,
}

/// The single dispatch point for queue state transitions.
#[derive(Debug)]
pub struct Scheduler {
    state: QueueState,
}

impl Scheduler {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: QueueState::new(settings),
        }
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut QueueState {
        &mut self.state
    }

    /// Apply one command and return the effects to carry out, in order.
    pub fn submit(&mut self, command: Command) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.apply(command, &mut effects);
        effects
    }

    fn apply(&mut self, command: Command, effects: &mut Vec<Effect>) {
        match command {
            Command::AddItem(new) => {
                if let Some(id) = self.add_item(new, effects) {
                    self.process_item(&id, effects);
                }
            }
            Command::AddItems {
                items,
                on_batch_success,
            } => {
                let batch_id = BatchId::new();
                let mut ids = Vec::with_capacity(items.len());
                for mut new in items {
                    new.batch_id = Some(batch_id.clone());
                    if let Some(callback) = &on_batch_success {
                        new.callbacks.on_batch_success = Some(callback.clone());
                    }
                    ids.extend(self.add_item(new, effects));
                }
                for id in ids {
                    self.process_item(&id, effects);
                }
            }
            Command::AddSideloadItem(new) => {
                if let Some(id) = self.add_sideload_item(new, effects) {
                    self.process_item(&id, effects);
                }
            }
            Command::ProcessItem(id) => self.process_item(&id, effects),
            Command::ExtendPlan { id, operations } => self.extend_plan(&id, operations),
            Command::FinishOperation { id, update } => self.finish_operation(&id, update, effects),
            Command::CancelItem { id, error, silent } => {
                self.cancel_item(&id, error, silent, effects)
            }
            Command::PauseQueue => self.pause_queue(effects),
            Command::ResumeQueue => self.resume_queue(effects),
            Command::PauseItem(id) => self.pause_item(&id, effects),
            Command::ResumeItem(id) => self.resume_item(&id, effects),
            Command::ResumeItemByPostId(post) => self.resume_item_by_post_id(post, effects),
            Command::RetryItem(id) => self.retry_item(&id, effects),
            Command::UpdateProgress { id, progress } => {
                if let Some(item) = self.state.get_mut(&id) {
                    item.progress = progress.min(100);
                }
            }
            Command::UpdateSettings(settings) => {
                info!(
                    max_concurrent_uploads = settings.max_concurrent_uploads,
                    max_concurrent_image_processing = settings.max_concurrent_image_processing,
                    "Updated queue settings"
                );
                self.state.set_settings(settings);
                // New limits may admit deferred work.
                for id in self.state.ids() {
                    self.process_item(&id, effects);
                }
            }
        }
    }

    fn add_item(&mut self, new: NewItem, effects: &mut Vec<Effect>) -> Option<ItemId> {
        if self.state.get(&new.id).is_some() {
            warn!(item_id = %new.id, "Ignoring item with a duplicate id");
            return None;
        }

        let NewItem {
            id,
            file,
            additional_data,
            batch_id,
            callbacks,
        } = new;

        let mut item = QueueItem::new(id.clone(), file);
        item.additional_data = additional_data;
        item.batch_id = batch_id;
        item.callbacks = callbacks;

        self.state.blobs.create(&id, &item.file);

        info!(
            item_id = %id,
            file = %item.file.name,
            mime_type = %item.file.mime_type,
            size = item.file.size(),
            "Added item to upload queue"
        );
        effects.push(Effect::Emit(QueueEvent::ItemAdded {
            item_id: id.clone(),
            parent_id: None,
            batch_id: item.batch_id.clone(),
        }));

        self.state.insert(item);
        Some(id)
    }

    fn add_sideload_item(
        &mut self,
        new: NewSideloadItem,
        effects: &mut Vec<Effect>,
    ) -> Option<ItemId> {
        if self.state.get(&new.id).is_some() {
            warn!(item_id = %new.id, "Ignoring sideload item with a duplicate id");
            return None;
        }

        let NewSideloadItem {
            id,
            parent_id,
            file,
            source_file,
            batch_id,
            additional_data,
            operations,
            callbacks,
        } = new;

        let mut item = QueueItem::new(id.clone(), file);
        item.source_file = source_file;
        item.parent_id = Some(parent_id.clone());
        item.batch_id = batch_id;
        item.additional_data = additional_data;
        item.callbacks = callbacks;
        if !operations.is_empty() {
            item.operations = operations.into();
        }

        debug!(
            item_id = %id,
            parent_id = %parent_id,
            image_size = item.additional_data.image_size().unwrap_or("-"),
            operations = item.operations.len(),
            "Added sideload item"
        );
        effects.push(Effect::Emit(QueueEvent::ItemAdded {
            item_id: id.clone(),
            parent_id: Some(parent_id),
            batch_id: item.batch_id.clone(),
        }));

        self.state.insert(item);
        Some(id)
    }

    fn extend_plan(&mut self, id: &ItemId, operations: Vec<Operation>) {
        let Some(item) = self.state.get_mut(id) else {
            debug!(item_id = %id, "Ignoring plan for an item that is no longer queued");
            return;
        };
        debug!(
            item_id = %id,
            added = operations.len(),
            "Extended operation plan"
        );
        item.operations.extend(operations);
    }

    /// Decide whether the item's next operation may run now.
    ///
    /// Rules are evaluated in order and the first one that applies decides.
    fn process_item(&mut self, id: &ItemId, effects: &mut Vec<Effect>) {
        if self.state.is_paused() {
            return;
        }

        let Some(item) = self.state.get(id) else {
            return;
        };
        if !item.is_idle() || item.is_paused() {
            return;
        }

        let next = item.next_kind();
        let settings = self.state.settings();

        // Two writers against one server-side record would race.
        if next == Some(OperationKind::Upload) && item.is_sideload() {
            if let Some(post) = item.additional_data.post() {
                if self.state.is_uploading_to_post(post, id) {
                    self.pause_item(id, effects);
                    return;
                }
            }
        }

        match next {
            Some(OperationKind::Upload)
                if self.state.count_in_flight(OperationKind::Upload)
                    >= settings.max_concurrent_uploads =>
            {
                debug!(item_id = %id, "Upload deferred, admission pool is full");
                return;
            }
            Some(kind)
                if kind.is_image_processing()
                    && self.state.image_processing_in_flight()
                        >= settings.max_concurrent_image_processing =>
            {
                debug!(item_id = %id, operation = %kind, "Image processing deferred, admission pool is full");
                return;
            }
            _ => {}
        }

        if let (Some(callback), Some(attachment)) = (&item.callbacks.on_change, &item.attachment) {
            effects.push(Effect::Callback(Callback::Change(
                callback.clone(),
                attachment.clone(),
            )));
        }

        match next {
            None => self.complete_item(id, effects),
            Some(_) => self.start_operation(id, effects),
        }
    }

    fn start_operation(&mut self, id: &ItemId, effects: &mut Vec<Effect>) {
        let preview = self.state.blobs.latest(id).cloned();
        let settings = self.state.settings().clone();
        let Some(item) = self.state.get_mut(id) else {
            return;
        };
        let Some(operation) = item.next_operation().cloned() else {
            return;
        };

        item.current_operation = Some(operation.kind);
        debug!(item_id = %id, operation = %operation.kind, "Starting operation");

        effects.push(Effect::Emit(QueueEvent::OperationStarted {
            item_id: id.clone(),
            operation: operation.kind,
        }));
        effects.push(Effect::Execute(Job {
            item_id: id.clone(),
            operation,
            file: item.file.clone(),
            source_file: item.source_file.clone(),
            attachment: item.attachment.clone(),
            additional_data: item.additional_data.clone(),
            parent_id: item.parent_id.clone(),
            preview,
            settings,
            abort: item.abort.clone(),
        }));
    }

    fn finish_operation(&mut self, id: &ItemId, update: ItemUpdate, effects: &mut Vec<Effect>) {
        let Some(item) = self.state.get_mut(id) else {
            debug!(item_id = %id, "Ignoring result for an item that is no longer queued");
            return;
        };
        let Some(finished) = item.current_operation.take() else {
            warn!(item_id = %id, "Ignoring result, no operation in flight");
            return;
        };

        let new_file = update.file.clone();
        item.apply_update(update);
        item.operations.pop_front();
        let remaining = item.operations.len();
        let post = item.additional_data.post();

        if let Some(file) = new_file {
            self.state.blobs.create(id, &file);
        }

        debug!(item_id = %id, operation = %finished, remaining, "Finished operation");
        effects.push(Effect::Emit(QueueEvent::OperationFinished {
            item_id: id.clone(),
            operation: finished,
            remaining,
        }));

        self.process_item(id, effects);
        self.release_capacity(finished, post, effects);
    }

    /// Re-evaluate the items waiting on the admission gate `finished` held.
    ///
    /// Starting an operation only consumes capacity, so one pass over the
    /// waiting set reaches the fixpoint.
    fn release_capacity(
        &mut self,
        finished: OperationKind,
        post: Option<u64>,
        effects: &mut Vec<Effect>,
    ) {
        if finished == OperationKind::Upload {
            for waiting in self.state.pending_uploads() {
                self.process_item(&waiting, effects);
            }
            if let Some(post) = post {
                self.resume_item_by_post_id(post, effects);
            }
        } else if finished.is_image_processing() {
            for waiting in self.state.pending_image_processing() {
                self.process_item(&waiting, effects);
            }
        }
    }

    /// The item ran out of operations.
    fn complete_item(&mut self, id: &ItemId, effects: &mut Vec<Effect>) {
        if self.state.has_children(id) {
            debug!(item_id = %id, "Item finished, waiting for its sideload items");
            return;
        }

        let Some(item) = self.state.remove(id) else {
            return;
        };
        info!(item_id = %id, retries = item.retry_count, "Item completed");
        Self::push_success(&item, effects);

        let mut settled = Settled::default();
        self.resolve_batches(&item, &mut settled, effects);
        self.terminate_if_drained(effects);
    }

    /// Batch and parent resolution after `item` left the queue.
    fn resolve_batches(&mut self, item: &QueueItem, settled: &mut Settled, effects: &mut Vec<Effect>) {
        // A parent sharing the batch of its children must not hold the batch
        // open when it is removed in the same step.
        let completing_parent = item.parent_id.as_ref().filter(|parent_id| {
            self.is_waiting_on_children(parent_id)
                && !self.state.has_children(parent_id)
                && item
                    .batch_id
                    .as_ref()
                    .is_none_or(|batch_id| self.is_batch_settled(batch_id, Some(parent_id)))
        });

        self.settle_batch(item, completing_parent, settled, effects);

        if let Some(parent_id) = completing_parent {
            let parent_id = parent_id.clone();
            self.complete_parent(&parent_id, settled, effects);
        }
    }

    fn complete_parent(&mut self, parent_id: &ItemId, settled: &mut Settled, effects: &mut Vec<Effect>) {
        let Some(parent) = self.state.remove(parent_id) else {
            return;
        };
        info!(item_id = %parent_id, "Item completed after its sideload items");
        Self::push_success(&parent, effects);
        self.settle_batch(&parent, None, settled, effects);
    }

    /// A parent that finished its own plan and only waits for children.
    fn is_waiting_on_children(&self, parent_id: &ItemId) -> bool {
        self.state
            .get(parent_id)
            .is_some_and(|parent| parent.is_idle() && parent.operations.is_empty())
    }

    fn is_batch_settled(&self, batch_id: &BatchId, ignoring: Option<&ItemId>) -> bool {
        !self
            .state
            .items()
            .iter()
            .any(|item| item.batch_id.as_ref() == Some(batch_id) && Some(&item.id) != ignoring)
    }

    /// Fire the batch callback of `item` if its batch just emptied.
    ///
    /// `ignoring` is a parent that is about to be removed in the same step.
    fn settle_batch(
        &self,
        item: &QueueItem,
        ignoring: Option<&ItemId>,
        settled: &mut Settled,
        effects: &mut Vec<Effect>,
    ) {
        let Some(batch_id) = &item.batch_id else {
            return;
        };
        if !self.is_batch_settled(batch_id, ignoring) {
            return;
        }

        if let Some(callback) = &item.callbacks.on_batch_success {
            if !settled.callbacks.iter().any(|fired| Arc::ptr_eq(fired, callback)) {
                settled.callbacks.push(callback.clone());
                effects.push(Effect::Callback(Callback::BatchSuccess(callback.clone())));
            }
        }
        if settled.batches.insert(batch_id.clone()) {
            info!(batch_id = %batch_id, "Batch completed");
            effects.push(Effect::Emit(QueueEvent::BatchCompleted {
                batch_id: batch_id.clone(),
            }));
        }
    }

    fn push_success(item: &QueueItem, effects: &mut Vec<Effect>) {
        if let Some(callback) = &item.callbacks.on_success {
            effects.push(Effect::Callback(Callback::Success(
                callback.clone(),
                item.attachment.clone().unwrap_or_default(),
            )));
        }
        effects.push(Effect::Emit(QueueEvent::ItemCompleted {
            item_id: item.id.clone(),
        }));
    }

    fn terminate_if_drained(&self, effects: &mut Vec<Effect>) {
        if self.state.is_empty() {
            debug!("Upload queue drained");
            effects.push(Effect::TerminateWorker);
        }
    }

    /// Cancel an item, its sideload children first.
    ///
    /// The item is removed either way; `silent` only suppresses `on_error`.
    fn cancel_item(
        &mut self,
        id: &ItemId,
        error: UploadError,
        silent: bool,
        effects: &mut Vec<Effect>,
    ) {
        if self.state.get(id).is_none() {
            debug!(item_id = %id, "Ignoring cancellation of an item that is no longer queued");
            return;
        }

        let mut released = Vec::new();
        let mut posts = Vec::new();
        for child in self.state.children_of(id) {
            if let Some(child) = self.remove_cancelled(&child, UploadError::cancelled(), true, effects) {
                released.extend(child.current_operation.map(|k| (k, child.additional_data.post())));
                posts.extend(child.additional_data.post());
            }
        }

        let Some(item) = self.remove_cancelled(id, error, silent, effects) else {
            return;
        };
        released.extend(item.current_operation.map(|k| (k, item.additional_data.post())));
        posts.extend(item.additional_data.post());

        let mut settled = Settled::default();
        self.resolve_batches(&item, &mut settled, effects);

        for (kind, post) in released {
            self.release_capacity(kind, post, effects);
        }

        // A removed item may have been the one its paused siblings waited on.
        posts.sort_unstable();
        posts.dedup();
        for post in posts {
            if !self.state.is_uploading_to_post(post, id) {
                self.resume_item_by_post_id(post, effects);
            }
        }
        self.terminate_if_drained(effects);
    }

    fn remove_cancelled(
        &mut self,
        id: &ItemId,
        error: UploadError,
        silent: bool,
        effects: &mut Vec<Effect>,
    ) -> Option<QueueItem> {
        let mut item = self.state.remove(id)?;
        item.abort.cancel();

        if silent {
            debug!(item_id = %id, code = %error.code, "Cancelled item silently");
        } else {
            error!(item_id = %id, code = %error.code, error = %error, "Cancelled item");
        }

        effects.push(Effect::CancelProcessing(id.clone()));
        if !silent {
            if let Some(callback) = &item.callbacks.on_error {
                effects.push(Effect::Callback(Callback::Error(callback.clone(), error.clone())));
            }
        }
        effects.push(Effect::Emit(QueueEvent::ItemCancelled {
            item_id: id.clone(),
            code: error.code,
        }));

        item.status = ItemStatus::Error;
        item.error = Some(error);
        Some(item)
    }

    fn pause_queue(&mut self, effects: &mut Vec<Effect>) {
        if self.state.is_paused() {
            return;
        }
        self.state.set_paused(true);
        info!("Upload queue paused");
        effects.push(Effect::Emit(QueueEvent::QueuePaused));
    }

    fn resume_queue(&mut self, effects: &mut Vec<Effect>) {
        if !self.state.is_paused() {
            return;
        }
        self.state.set_paused(false);
        info!(items = self.state.len(), "Upload queue resumed");
        effects.push(Effect::Emit(QueueEvent::QueueResumed));
        for id in self.state.ids() {
            self.process_item(&id, effects);
        }
    }

    fn pause_item(&mut self, id: &ItemId, effects: &mut Vec<Effect>) {
        let Some(item) = self.state.get_mut(id) else {
            return;
        };
        if item.is_paused() {
            return;
        }
        item.status = ItemStatus::Paused;
        let post = item.additional_data.post();
        debug!(item_id = %id, post = ?post, "Item paused");
        effects.push(Effect::Emit(QueueEvent::ItemPaused {
            item_id: id.clone(),
            post,
        }));
    }

    fn resume_item(&mut self, id: &ItemId, effects: &mut Vec<Effect>) {
        let Some(item) = self.state.get_mut(id) else {
            return;
        };
        if !item.is_paused() {
            return;
        }
        item.status = ItemStatus::Processing;
        debug!(item_id = %id, "Item resumed");
        effects.push(Effect::Emit(QueueEvent::ItemResumed { item_id: id.clone() }));
        self.process_item(id, effects);
    }

    fn resume_item_by_post_id(&mut self, post: u64, effects: &mut Vec<Effect>) {
        let Some(id) = self.state.paused_item_for_post(post).map(|item| item.id.clone()) else {
            return;
        };
        self.resume_item(&id, effects);
    }

    fn retry_item(&mut self, id: &ItemId, effects: &mut Vec<Effect>) {
        let Some(item) = self.state.get_mut(id) else {
            return;
        };
        let Some(previous) = item.error.take() else {
            debug!(item_id = %id, "Ignoring retry of an item without error");
            return;
        };
        item.retry_count += 1;
        item.status = ItemStatus::Processing;
        info!(
            item_id = %id,
            retry_count = item.retry_count,
            previous_error = %previous.code,
            "Retrying item"
        );
        self.process_item(id, effects);
    }
}

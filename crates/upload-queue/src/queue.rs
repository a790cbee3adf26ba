//! The async upload queue.
//!
//! [`UploadQueue`] serializes every command through the [`Scheduler`] behind a
//! single lock and carries out the resulting effects once the lock is
//! released: executor jobs run as tokio tasks and feed their results back as
//! commands, callbacks run on the calling task, events go to a broadcast
//! channel.
//!
//! All methods that may start work must be called from within a tokio runtime.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::collaborators::{ImageProcessorFactory, MediaTransport};
use crate::config::QueueSettings;
use crate::error::{Error, Result, UploadError};
use crate::events::{EVENT_CHANNEL_CAPACITY, QueueEvent};
use crate::executor::Executor;
use crate::scheduler::{Command, Effect, Job, NewItem, NewSideloadItem, Scheduler};
use crate::state::{BatchCallback, ItemSnapshot};
use crate::types::ItemId;
use crate::worker::ImageWorker;

/// Client-side media upload queue.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Mutex<Scheduler>,
    executor: Executor,
    worker: Arc<ImageWorker>,
    event_tx: broadcast::Sender<QueueEvent>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    /// Executor tasks that have not fed their result back yet.
    in_flight: AtomicUsize,
    idle: Notify,
}

impl UploadQueue {
    /// Create a queue. Fails if `settings` do not validate.
    pub fn new(
        settings: QueueSettings,
        transport: Arc<dyn MediaTransport>,
        images: Arc<dyn ImageProcessorFactory>,
    ) -> Result<Self> {
        settings.validate()?;

        let worker = Arc::new(ImageWorker::new(images));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            max_concurrent_uploads = settings.max_concurrent_uploads,
            max_concurrent_image_processing = settings.max_concurrent_image_processing,
            big_image_size_threshold = ?settings.big_image_size_threshold,
            "Created upload queue"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                scheduler: Mutex::new(Scheduler::new(settings)),
                executor: Executor::new(transport, worker.clone()),
                worker,
                event_tx,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        })
    }

    /// Apply a raw command.
    pub fn submit(&self, command: Command) {
        self.inner.dispatch(vec![command]);
    }

    pub fn add_item(&self, item: NewItem) -> ItemId {
        let id = item.id.clone();
        self.submit(Command::AddItem(item));
        id
    }

    /// Add files as one batch; `on_batch_success` fires once all of them
    /// (and their sideloads) are done.
    pub fn add_items(
        &self,
        items: Vec<NewItem>,
        on_batch_success: Option<BatchCallback>,
    ) -> Vec<ItemId> {
        let ids = items.iter().map(|item| item.id.clone()).collect();
        self.submit(Command::AddItems {
            items,
            on_batch_success,
        });
        ids
    }

    pub fn add_sideload_item(&self, item: NewSideloadItem) -> ItemId {
        let id = item.id.clone();
        self.submit(Command::AddSideloadItem(item));
        id
    }

    /// Cancel an item, reporting `error` through its `on_error` unless
    /// `silent`.
    pub fn cancel_item(&self, id: &ItemId, error: UploadError, silent: bool) {
        self.submit(Command::CancelItem {
            id: id.clone(),
            error,
            silent,
        });
    }

    /// Cancel an item on behalf of the user.
    pub fn cancel(&self, id: &ItemId) {
        self.cancel_item(id, UploadError::cancelled(), false);
    }

    pub fn pause(&self) {
        self.submit(Command::PauseQueue);
    }

    pub fn resume(&self) {
        self.submit(Command::ResumeQueue);
    }

    pub fn pause_item(&self, id: &ItemId) {
        self.submit(Command::PauseItem(id.clone()));
    }

    pub fn resume_item(&self, id: &ItemId) {
        self.submit(Command::ResumeItem(id.clone()));
    }

    pub fn resume_item_by_post_id(&self, post: u64) {
        self.submit(Command::ResumeItemByPostId(post));
    }

    pub fn retry_item(&self, id: &ItemId) {
        self.submit(Command::RetryItem(id.clone()));
    }

    pub fn update_progress(&self, id: &ItemId, progress: u8) {
        self.submit(Command::UpdateProgress {
            id: id.clone(),
            progress,
        });
    }

    /// Replace the settings. Invalid settings are rejected and the current
    /// ones kept.
    pub fn update_settings(&self, settings: QueueSettings) -> Result<()> {
        settings.validate()?;
        self.submit(Command::UpdateSettings(settings));
        Ok(())
    }

    pub fn settings(&self) -> Arc<QueueSettings> {
        self.inner.scheduler.lock().state().settings().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn item(&self, id: &ItemId) -> Result<ItemSnapshot> {
        self.inner
            .scheduler
            .lock()
            .state()
            .get(id)
            .map(|item| item.snapshot())
            .ok_or_else(|| Error::not_found("queue item", id.as_str()))
    }

    pub fn items(&self) -> Vec<ItemSnapshot> {
        self.inner
            .scheduler
            .lock()
            .state()
            .items()
            .iter()
            .map(|item| item.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.scheduler.lock().state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.scheduler.lock().state().is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.scheduler.lock().state().is_paused()
    }

    /// Whether the image engine is currently alive.
    pub fn is_worker_running(&self) -> bool {
        self.inner.worker.is_running()
    }

    /// Wait until no operation is in flight.
    ///
    /// Items left in the queue afterwards are paused, or the queue is.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop all running operations and release the image engine.
    ///
    /// Items stay in the queue; results of aborted operations are dropped.
    pub async fn shutdown(&self) {
        info!("Shutting down upload queue");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        if self.inner.worker.terminate() {
            let _ = self.inner.event_tx.send(QueueEvent::WorkerTerminated);
        }
        info!("Upload queue stopped");
    }
}

impl Inner {
    fn dispatch(self: &Arc<Self>, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }

        let effects = {
            let mut scheduler = self.scheduler.lock();
            let mut effects = Vec::new();
            for command in commands {
                effects.extend(scheduler.submit(command));
            }
            // Tear the engine down under the lock, so a job started by a
            // concurrent dispatch cannot pick up an engine about to go away.
            if effects.iter().any(|e| matches!(e, Effect::TerminateWorker))
                && scheduler.state().is_empty()
                && self.worker.terminate()
            {
                effects.push(Effect::Emit(QueueEvent::WorkerTerminated));
            }
            effects
        };

        for effect in effects {
            self.perform(effect);
        }
    }

    fn perform(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::Execute(job) => self.spawn_job(job),
            Effect::Callback(callback) => callback.invoke(),
            Effect::Emit(event) => {
                // No subscribers is fine.
                let _ = self.event_tx.send(event);
            }
            Effect::CancelProcessing(id) => self.worker.cancel_operations(&id),
            Effect::TerminateWorker => {}
        }
    }

    fn spawn_job(self: &Arc<Self>, job: Job) {
        if self.shutdown.is_cancelled() {
            debug!(item_id = %job.item_id, operation = %job.kind(), "Queue stopped, not starting operation");
            return;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = self.clone();
        self.tracker.spawn(async move {
            let commands = tokio::select! {
                _ = inner.shutdown.cancelled() => Vec::new(),
                commands = inner.executor.run(job) => commands,
            };
            inner.dispatch(commands);

            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            inner.idle.notify_waiters();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_utils::{MockImageProcessor, MockTransport, factory_for, init_tracing};
    use crate::types::MediaFile;

    fn queue(transport: MockTransport) -> (UploadQueue, Arc<MockImageProcessor>) {
        init_tracing();
        let engine = Arc::new(MockImageProcessor::default());
        let queue = UploadQueue::new(
            QueueSettings::default(),
            Arc::new(transport),
            factory_for(engine.clone()),
        )
        .unwrap();
        (queue, engine)
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let result = UploadQueue::new(
            QueueSettings {
                max_concurrent_uploads: 0,
                ..Default::default()
            },
            Arc::new(MockTransport::default()),
            factory_for(Arc::new(MockImageProcessor::default())),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_document_upload_completes() {
        let (queue, engine) = queue(MockTransport::default());
        let successes = Arc::new(Mutex::new(Vec::new()));
        let sink = successes.clone();

        queue.add_item(
            NewItem::new(MediaFile::new("report.pdf", "application/pdf", vec![1u8; 64]))
                .with_callbacks(
                    crate::state::ItemCallbacks::default()
                        .on_success(move |attachment| sink.lock().push(attachment.id)),
                ),
        );
        queue.wait_idle().await;

        assert!(queue.is_empty());
        assert_eq!(*successes.lock(), vec![Some(1)]);
        // Nothing image related ran, so no engine was ever created.
        assert_eq!(engine.terminations(), 0);
    }

    #[tokio::test]
    async fn test_cancel_blocked_upload() {
        let (queue, engine) = queue(MockTransport::default().blocking());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let mut events = queue.subscribe();

        let id = queue.add_item(
            NewItem::new(MediaFile::new("a.pdf", "application/pdf", vec![1u8; 8])).with_callbacks(
                crate::state::ItemCallbacks::default().on_error(move |e| sink.lock().push(e.code)),
            ),
        );

        // Wait for the upload to start.
        loop {
            match events.recv().await.unwrap() {
                QueueEvent::OperationStarted { operation, .. }
                    if operation == crate::operation::OperationKind::Upload =>
                {
                    break;
                }
                _ => {}
            }
        }

        queue.cancel(&id);
        queue.wait_idle().await;

        assert!(queue.is_empty());
        assert_eq!(*errors.lock(), vec![ErrorCode::Cancelled]);
        // No engine was running, so the cancel hook had nothing to reach.
        assert!(engine.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_update_settings_validates() {
        let (queue, _) = queue(MockTransport::default());
        assert!(
            queue
                .update_settings(QueueSettings {
                    image_quality: 3.0,
                    ..Default::default()
                })
                .is_err()
        );
        assert_eq!(queue.settings().image_quality, 0.82);

        queue
            .update_settings(QueueSettings {
                max_concurrent_uploads: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(queue.settings().max_concurrent_uploads, 1);
    }

    #[tokio::test]
    async fn test_item_snapshot_not_found() {
        let (queue, _) = queue(MockTransport::default());
        assert!(matches!(
            queue.item(&ItemId::from("missing")),
            Err(Error::NotFound { .. })
        ));
    }
}

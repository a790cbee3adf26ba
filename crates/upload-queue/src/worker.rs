//! Lazily created, shared image-processing engine.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::collaborators::{ImageProcessor, ImageProcessorFactory};
use crate::types::ItemId;

/// Owner of the image engine.
///
/// The engine is created on first use and torn down whenever the queue
/// drains, releasing the memory it holds. The next image operation creates a
/// fresh one through the factory.
pub struct ImageWorker {
    factory: Arc<dyn ImageProcessorFactory>,
    processor: Mutex<Option<Arc<dyn ImageProcessor>>>,
    /// Number of engines created so far.
    generation: AtomicU64,
}

impl ImageWorker {
    pub fn new(factory: Arc<dyn ImageProcessorFactory>) -> Self {
        Self {
            factory,
            processor: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The running engine, created if needed.
    pub fn get(&self) -> Arc<dyn ImageProcessor> {
        let mut processor = self.processor.lock();
        if let Some(processor) = processor.as_ref() {
            return processor.clone();
        }

        let created = self.factory.create();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Created image worker");
        *processor = Some(created.clone());
        created
    }

    /// The running engine, without creating one.
    pub fn current(&self) -> Option<Arc<dyn ImageProcessor>> {
        self.processor.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.processor.lock().is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Abort engine work for one item. No-op without a running engine.
    pub fn cancel_operations(&self, item_id: &ItemId) {
        if let Some(processor) = self.current() {
            processor.cancel_operations(item_id);
        }
    }

    /// Tear the engine down. Returns whether one was running.
    pub fn terminate(&self) -> bool {
        let Some(processor) = self.processor.lock().take() else {
            return false;
        };
        processor.terminate();
        info!(generation = self.generation(), "Terminated image worker");
        true
    }
}

impl std::fmt::Debug for ImageWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageWorker")
            .field("running", &self.is_running())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockImageProcessor;

    #[test]
    fn test_lazy_creation_and_teardown() {
        let engine = Arc::new(MockImageProcessor::default());
        let shared = engine.clone();
        let factory: Arc<dyn ImageProcessorFactory> =
            Arc::new(move || shared.clone() as Arc<dyn ImageProcessor>);
        let worker = ImageWorker::new(factory);

        assert!(!worker.is_running());
        assert!(!worker.terminate());

        worker.get();
        worker.get();
        assert!(worker.is_running());
        assert_eq!(worker.generation(), 1);

        worker.cancel_operations(&ItemId::from("a"));
        assert_eq!(engine.cancelled(), vec![ItemId::from("a")]);

        assert!(worker.terminate());
        assert!(!worker.is_running());
        assert_eq!(engine.terminations(), 1);

        // Recreated on next use.
        worker.get();
        assert_eq!(worker.generation(), 2);
    }
}

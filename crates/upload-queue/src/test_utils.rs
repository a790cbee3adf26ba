//! Test helpers: tracing setup and in-memory collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::blob::Blob;
use crate::collaborators::{
    CollaboratorResult, ImageProcessor, ImageProcessorFactory, MediaTransport, SideloadRequest,
    UploadRequest, resized_name,
};
use crate::config::ImageSize;
use crate::error::CollaboratorError;
use crate::operation::SuffixPolicy;
use crate::types::{Attachment, ItemId, MediaFile};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Transport that records requests and hands out increasing attachment ids.
#[derive(Default)]
pub struct MockTransport {
    uploads: Arc<Mutex<Vec<UploadRequest>>>,
    sideloads: Arc<Mutex<Vec<SideloadRequest>>>,
    next_id: AtomicU64,
    fail_uploads: bool,
    no_sideload: bool,
    block: bool,
}

impl MockTransport {
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    pub fn without_sideload(mut self) -> Self {
        self.no_sideload = true;
        self
    }

    /// Uploads never finish on their own, only through cancellation.
    pub fn blocking(mut self) -> Self {
        self.block = true;
        self
    }

    pub fn uploads(&self) -> Arc<Mutex<Vec<UploadRequest>>> {
        self.uploads.clone()
    }

    pub fn sideloads(&self) -> Arc<Mutex<Vec<SideloadRequest>>> {
        self.sideloads.clone()
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn upload(
        &self,
        request: UploadRequest,
        cancel: CancellationToken,
    ) -> CollaboratorResult<Attachment> {
        if self.block {
            cancel.cancelled().await;
            return Err(CollaboratorError::Aborted);
        }
        self.uploads.lock().push(request);
        if self.fail_uploads {
            return Err(CollaboratorError::failed("HTTP 500"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Attachment::with_id(id))
    }

    async fn sideload(
        &self,
        request: SideloadRequest,
        _cancel: CancellationToken,
    ) -> CollaboratorResult<Option<Attachment>> {
        self.sideloads.lock().push(request);
        Ok(None)
    }

    fn supports_sideload(&self) -> bool {
        !self.no_sideload
    }
}

/// Image engine that renames files instead of touching pixels.
#[derive(Default)]
pub struct MockImageProcessor {
    transparency: bool,
    fail_transparency: bool,
    fail_rotation: bool,
    rotations: AtomicUsize,
    terminations: AtomicUsize,
    cancelled: Mutex<Vec<ItemId>>,
}

impl MockImageProcessor {
    pub fn with_transparency(mut self, transparency: bool) -> Self {
        self.transparency = transparency;
        self
    }

    pub fn failing_transparency(mut self) -> Self {
        self.fail_transparency = true;
        self
    }

    pub fn failing_rotation(mut self) -> Self {
        self.fail_rotation = true;
        self
    }

    pub fn rotations(&self) -> usize {
        self.rotations.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<ItemId> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl ImageProcessor for MockImageProcessor {
    async fn resize(
        &self,
        file: &MediaFile,
        target: ImageSize,
        _smart_crop: bool,
        suffix: SuffixPolicy,
        _cancel: CancellationToken,
    ) -> CollaboratorResult<MediaFile> {
        Ok(resized_name(file, target.width, target.height, suffix)
            .with_dimensions(target.width, target.height))
    }

    async fn rotate(
        &self,
        file: &MediaFile,
        _orientation: u8,
        _cancel: CancellationToken,
    ) -> CollaboratorResult<MediaFile> {
        self.rotations.fetch_add(1, Ordering::SeqCst);
        if self.fail_rotation {
            return Err(CollaboratorError::failed("corrupt EXIF block"));
        }
        Ok(file.clone())
    }

    async fn convert_format(
        &self,
        file: &MediaFile,
        target_mime: &str,
        _quality: f32,
        _interlaced: bool,
        _cancel: CancellationToken,
    ) -> CollaboratorResult<MediaFile> {
        let extension = target_mime.strip_prefix("image/").unwrap_or("bin");
        let extension = if extension == "jpeg" { "jpg" } else { extension };
        Ok(MediaFile {
            name: format!("{}.{}", file.stem(), extension),
            mime_type: target_mime.to_string(),
            ..file.clone()
        })
    }

    async fn has_transparency(&self, _preview: &Blob) -> CollaboratorResult<bool> {
        if self.fail_transparency {
            return Err(CollaboratorError::Unsupported("no decoder".to_string()));
        }
        Ok(self.transparency)
    }

    fn cancel_operations(&self, item_id: &ItemId) {
        self.cancelled.lock().push(item_id.clone());
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory always handing out `engine`.
pub fn factory_for(engine: Arc<MockImageProcessor>) -> Arc<dyn ImageProcessorFactory> {
    Arc::new(move || engine.clone() as Arc<dyn ImageProcessor>)
}

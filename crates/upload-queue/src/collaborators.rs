//! Interfaces of the external collaborators: the media transport and the
//! image-processing engine.
//!
//! Both are injected into the queue. Every call receives the item's
//! cancellation token and should return [`CollaboratorError::Aborted`] promptly
//! once it fires.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::blob::Blob;
use crate::config::ImageSize;
use crate::error::CollaboratorError;
use crate::operation::SuffixPolicy;
use crate::types::{AdditionalData, Attachment, ItemId, MediaFile};

/// Result type of collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Upload of a new attachment.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub item_id: ItemId,
    pub file: MediaFile,
    pub additional_data: AdditionalData,
}

/// Upload of extra data (a thumbnail, a rotated original) for an existing
/// attachment.
#[derive(Debug, Clone)]
pub struct SideloadRequest {
    pub item_id: ItemId,
    pub file: MediaFile,
    pub attachment_id: u64,
    /// Payload without the `post` key, which became `attachment_id`.
    pub additional_data: AdditionalData,
}

/// Network transport for uploads and sideloads.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Create a new attachment from `request.file`.
    async fn upload(
        &self,
        request: UploadRequest,
        cancel: CancellationToken,
    ) -> CollaboratorResult<Attachment>;

    /// Attach `request.file` to an existing attachment.
    ///
    /// Returns the updated attachment when the server reports one.
    async fn sideload(
        &self,
        request: SideloadRequest,
        cancel: CancellationToken,
    ) -> CollaboratorResult<Option<Attachment>>;

    /// Transports without sideload support turn sideloads into no-op successes.
    fn supports_sideload(&self) -> bool {
        true
    }
}

/// Pixel-level image engine.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Scale `file` to fit (or, with `target.crop`, fill) `target`.
    async fn resize(
        &self,
        file: &MediaFile,
        target: ImageSize,
        smart_crop: bool,
        suffix: SuffixPolicy,
        cancel: CancellationToken,
    ) -> CollaboratorResult<MediaFile>;

    /// Apply an EXIF orientation.
    async fn rotate(
        &self,
        file: &MediaFile,
        orientation: u8,
        cancel: CancellationToken,
    ) -> CollaboratorResult<MediaFile>;

    /// Re-encode `file` as `target_mime`.
    async fn convert_format(
        &self,
        file: &MediaFile,
        target_mime: &str,
        quality: f32,
        interlaced: bool,
        cancel: CancellationToken,
    ) -> CollaboratorResult<MediaFile>;

    /// Whether the image behind `preview` has any transparent pixel.
    async fn has_transparency(&self, preview: &Blob) -> CollaboratorResult<bool>;

    /// Abort any work running for `item_id`.
    fn cancel_operations(&self, _item_id: &ItemId) {}

    /// Release the engine's memory. Called before the worker is dropped.
    fn terminate(&self) {}
}

/// Creates image engines on demand, so a torn down engine can be recreated.
pub trait ImageProcessorFactory: Send + Sync {
    fn create(&self) -> Arc<dyn ImageProcessor>;
}

impl<F> ImageProcessorFactory for F
where
    F: Fn() -> Arc<dyn ImageProcessor> + Send + Sync,
{
    fn create(&self) -> Arc<dyn ImageProcessor> {
        self()
    }
}

/// Name a resized copy of `file` the way [`SuffixPolicy`] asks for.
pub fn resized_name(file: &MediaFile, width: u32, height: u32, suffix: SuffixPolicy) -> MediaFile {
    match suffix {
        SuffixPolicy::None => file.clone(),
        SuffixPolicy::Dimensions => file.with_name_suffix(&format!("-{}x{}", width, height)),
        SuffixPolicy::Scaled => file.with_name_suffix(crate::types::SCALED_SUFFIX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resized_name() {
        let file = MediaFile::new("cat.jpg", "image/jpeg", vec![0u8; 2]);
        assert_eq!(resized_name(&file, 150, 150, SuffixPolicy::None).name, "cat.jpg");
        assert_eq!(
            resized_name(&file, 300, 200, SuffixPolicy::Dimensions).name,
            "cat-300x200.jpg"
        );
        assert_eq!(
            resized_name(&file, 2560, 2560, SuffixPolicy::Scaled).name,
            "cat-scaled.jpg"
        );
    }
}

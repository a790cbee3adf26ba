//! Client-side media upload queue.
//!
//! Files added to the queue are planned (resize, rotate, transcode), run
//! through a pipeline bounded by two admission pools (uploads and image
//! processing), uploaded through an injected transport and, for images,
//! followed by sideloaded thumbnails for the sizes the server could not
//! generate. A parent upload completes only after all of its sideloads.

pub mod blob;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod logging;
pub mod operation;
pub mod planning;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use blob::{Blob, BlobRegistry, BlobUrl};
pub use collaborators::{
    CollaboratorResult, ImageProcessor, ImageProcessorFactory, MediaTransport, SideloadRequest,
    UploadRequest,
};
pub use config::{ImageSize, InterlaceFlags, QueueSettings};
pub use error::{CollaboratorError, Error, ErrorCode, Result, UploadError};
pub use events::QueueEvent;
pub use operation::{Operation, OperationArgs, OperationKind, SuffixPolicy};
pub use queue::UploadQueue;
pub use scheduler::{Command, Effect, NewItem, NewSideloadItem, Scheduler};
pub use state::{ItemCallbacks, ItemSnapshot, ItemStatus, ItemUpdate};
pub use types::{AdditionalData, Attachment, BatchId, Dimensions, ItemId, MediaFile};

//! Operation executors.
//!
//! An executor runs one started operation against the collaborators and
//! returns the commands that record its outcome. Failures become a
//! `CancelItem` command; an aborted operation returns nothing, since the item
//! has already been removed.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collaborators::{MediaTransport, SideloadRequest, UploadRequest};
use crate::error::{CollaboratorError, ErrorCode, UploadError};
use crate::operation::{Operation, OperationArgs, OperationKind, SuffixPolicy};
use crate::planning;
use crate::scheduler::{Command, Job, NewSideloadItem};
use crate::state::ItemUpdate;
use crate::types::{AdditionalData, BatchId};
use crate::worker::ImageWorker;

type StepResult = std::result::Result<Vec<Command>, UploadError>;

pub struct Executor {
    transport: Arc<dyn MediaTransport>,
    worker: Arc<ImageWorker>,
}

impl Executor {
    pub fn new(transport: Arc<dyn MediaTransport>, worker: Arc<ImageWorker>) -> Self {
        Self { transport, worker }
    }

    /// Run `job` to completion or until its item is cancelled.
    pub async fn run(&self, job: Job) -> Vec<Command> {
        let abort = job.abort.clone();
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                debug!(item_id = %job.item_id, operation = %job.kind(), "Operation aborted");
                Vec::new()
            }
            commands = self.execute(&job) => commands,
        }
    }

    async fn execute(&self, job: &Job) -> Vec<Command> {
        let result = match job.kind() {
            OperationKind::Prepare => self.prepare(job).await,
            OperationKind::ResizeCrop => self.resize_crop(job).await,
            OperationKind::Rotate => self.rotate(job).await,
            OperationKind::TranscodeImage => self.transcode(job).await,
            OperationKind::Upload if job.is_sideload() => self.sideload(job).await,
            OperationKind::Upload => self.upload(job).await,
            OperationKind::ThumbnailGeneration => self.generate_thumbnails(job).await,
        };

        match result {
            Ok(commands) => commands,
            Err(_) if job.abort.is_cancelled() => Vec::new(),
            Err(error) => {
                warn!(
                    item_id = %job.item_id,
                    operation = %job.kind(),
                    code = %error.code,
                    "Operation failed: {}",
                    error
                );
                vec![Command::CancelItem {
                    id: job.item_id.clone(),
                    error,
                    silent: false,
                }]
            }
        }
    }

    async fn prepare(&self, job: &Job) -> StepResult {
        let has_transparency = if planning::needs_transparency_check(&job.file, &job.settings) {
            self.check_transparency(job).await
        } else {
            false
        };

        let operations = planning::plan_for(&job.file, &job.settings, has_transparency);
        debug!(
            item_id = %job.item_id,
            plan = ?operations.iter().map(|op| op.kind.as_str()).collect::<Vec<_>>(),
            "Planned operations"
        );

        Ok(vec![
            Command::ExtendPlan {
                id: job.item_id.clone(),
                operations,
            },
            finish(job, ItemUpdate::default()),
        ])
    }

    /// A failed check skips transcoding rather than risk losing the alpha
    /// channel.
    async fn check_transparency(&self, job: &Job) -> bool {
        let Some(preview) = &job.preview else {
            warn!(item_id = %job.item_id, "No preview to check for transparency");
            return true;
        };
        match self.worker.get().has_transparency(preview).await {
            Ok(has_transparency) => has_transparency,
            Err(e) => {
                warn!(item_id = %job.item_id, error = %e, "Transparency check failed, skipping transcode");
                true
            }
        }
    }

    async fn resize_crop(&self, job: &Job) -> StepResult {
        let Some(OperationArgs::ResizeCrop {
            resize,
            is_threshold_resize,
        }) = &job.operation.args
        else {
            return Err(missing_args(job));
        };

        let suffix = if *is_threshold_resize {
            SuffixPolicy::Scaled
        } else {
            SuffixPolicy::Dimensions
        };
        let file = self
            .worker
            .get()
            .resize(
                &job.file,
                *resize,
                job.settings.smart_crop,
                suffix,
                job.abort.clone(),
            )
            .await
            .map_err(|e| failure(job, ErrorCode::ImageTranscodingError, "Failed to resize image", e))?;

        debug!(item_id = %job.item_id, file = %file.name, "Resized image");
        Ok(vec![finish(job, ItemUpdate::file(file))])
    }

    async fn rotate(&self, job: &Job) -> StepResult {
        let Some(OperationArgs::Rotate { orientation }) = &job.operation.args else {
            return Err(missing_args(job));
        };

        let file = self
            .worker
            .get()
            .rotate(&job.file, *orientation, job.abort.clone())
            .await
            .map_err(|e| failure(job, ErrorCode::ImageRotationError, "Failed to rotate image", e))?;

        Ok(vec![finish(job, ItemUpdate::file(file))])
    }

    async fn transcode(&self, job: &Job) -> StepResult {
        if !job.file.is_image() {
            return Err(UploadError::new(
                ErrorCode::MediaTranscodingError,
                format!("Cannot transcode {}", job.file.mime_type),
            )
            .with_file(&job.file));
        }
        let Some(OperationArgs::TranscodeImage {
            output_format,
            quality,
            interlaced,
        }) = &job.operation.args
        else {
            return Err(missing_args(job));
        };

        let file = self
            .worker
            .get()
            .convert_format(
                &job.file,
                output_format,
                *quality,
                *interlaced,
                job.abort.clone(),
            )
            .await
            .map_err(|e| failure(job, ErrorCode::ImageTranscodingError, "Failed to convert image", e))?;

        debug!(
            item_id = %job.item_id,
            from = %job.file.mime_type,
            to = %file.mime_type,
            "Transcoded image"
        );
        Ok(vec![finish(job, ItemUpdate::file(file))])
    }

    async fn upload(&self, job: &Job) -> StepResult {
        let request = UploadRequest {
            item_id: job.item_id.clone(),
            file: job.file.clone(),
            additional_data: job.additional_data.clone(),
        };
        let attachment = self
            .transport
            .upload(request, job.abort.clone())
            .await
            .map_err(|e| failure(job, ErrorCode::UploadError, "Failed to upload file", e))?;

        info!(
            item_id = %job.item_id,
            attachment_id = ?attachment.id,
            file = %job.file.name,
            "Uploaded file"
        );
        Ok(vec![finish(
            job,
            ItemUpdate {
                attachment: Some(attachment),
                progress: Some(100),
                ..Default::default()
            },
        )])
    }

    async fn sideload(&self, job: &Job) -> StepResult {
        if !self.transport.supports_sideload() {
            debug!(item_id = %job.item_id, "Transport cannot sideload, skipping");
            return Ok(vec![finish(job, ItemUpdate::default())]);
        }

        let mut additional_data = job.additional_data.clone();
        let attachment_id = additional_data
            .remove("post")
            .and_then(|post| post.as_u64())
            .ok_or_else(|| {
                UploadError::new(ErrorCode::GeneralError, "Sideload item has no target attachment")
                    .with_file(&job.file)
            })?;

        let request = SideloadRequest {
            item_id: job.item_id.clone(),
            file: job.file.clone(),
            attachment_id,
            additional_data,
        };
        let attachment = self
            .transport
            .sideload(request, job.abort.clone())
            .await
            .map_err(|e| failure(job, ErrorCode::SideloadError, "Failed to sideload file", e))?;

        debug!(
            item_id = %job.item_id,
            attachment_id,
            image_size = job.additional_data.image_size().unwrap_or("-"),
            "Sideloaded file"
        );
        Ok(vec![finish(
            job,
            ItemUpdate {
                attachment,
                progress: Some(100),
                ..Default::default()
            },
        )])
    }

    /// Fan out sideload items for the sizes the server could not generate.
    async fn generate_thumbnails(&self, job: &Job) -> StepResult {
        let attachment = job.attachment.as_ref();
        let Some(attachment_id) = attachment.and_then(|a| a.id).filter(|_| !job.is_sideload())
        else {
            debug!(item_id = %job.item_id, "No attachment to sideload into, skipping thumbnails");
            return Ok(vec![finish(job, ItemUpdate::default())]);
        };
        let attachment = attachment.cloned().unwrap_or_default();

        let batch_id = BatchId::new();
        let mut commands = Vec::new();

        // The server stored the file unrotated; send it a rotated original.
        if attachment.needs_rotation() && !job.file.is_scaled() {
            let orientation = attachment.exif_orientation.unwrap_or(1);
            match self
                .worker
                .get()
                .rotate(&job.source_file, orientation, job.abort.clone())
                .await
            {
                Ok(rotated) => {
                    let child = NewSideloadItem::new(job.item_id.clone(), rotated)
                        .with_source_file(job.source_file.clone())
                        .with_batch(batch_id.clone())
                        .with_additional_data(
                            AdditionalData::new()
                                .with("post", attachment_id)
                                .with("image_size", "original")
                                .with("convert_format", false),
                        )
                        .with_operations(vec![Operation::new(OperationKind::Upload)]);
                    commands.push(Command::AddSideloadItem(child));
                }
                Err(e) => {
                    warn!(item_id = %job.item_id, orientation, error = %e, "Failed to rotate original, continuing");
                }
            }
        }

        for name in attachment.missing_image_sizes.iter().flatten() {
            let Some(size) = job.settings.all_image_sizes.get(name).copied() else {
                warn!(item_id = %job.item_id, image_size = %name, "Unknown image size, skipping");
                continue;
            };

            let operations =
                planning::thumbnail_plan(size, &job.source_file, &job.file, &job.settings);
            let child = NewSideloadItem::new(job.item_id.clone(), job.source_file.clone())
                .with_batch(batch_id.clone())
                .with_additional_data(
                    AdditionalData::new()
                        .with("post", attachment_id)
                        .with("image_size", name.as_str())
                        .with("convert_format", false),
                )
                .with_operations(operations);
            commands.push(Command::AddSideloadItem(child));
        }

        info!(
            item_id = %job.item_id,
            attachment_id,
            sideloads = commands.len(),
            "Generated sideload items"
        );
        commands.push(finish(job, ItemUpdate::default()));
        Ok(commands)
    }
}

fn finish(job: &Job, update: ItemUpdate) -> Command {
    Command::FinishOperation {
        id: job.item_id.clone(),
        update,
    }
}

fn failure(job: &Job, code: ErrorCode, message: &str, cause: CollaboratorError) -> UploadError {
    let error = match cause {
        CollaboratorError::Aborted => UploadError::cancelled(),
        _ => UploadError::new(code, message),
    };
    error.with_file(&job.file).with_cause(cause)
}

fn missing_args(job: &Job) -> UploadError {
    UploadError::new(
        ErrorCode::GeneralError,
        format!("Missing arguments for {}", job.kind()),
    )
    .with_file(&job.file)
}

//! Operations that make up an item's processing plan.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ImageSize;

/// Kind of work a queue item still has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Compute the rest of the plan.
    Prepare,
    /// Resize (and optionally crop) the working file.
    ResizeCrop,
    /// Apply an EXIF orientation to the working file.
    Rotate,
    /// Convert the working file to another image format.
    TranscodeImage,
    /// Upload the file, or sideload it for items with a parent.
    Upload,
    /// Fan out sideloaded thumbnails for missing image sizes.
    ThumbnailGeneration,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Prepare => "prepare",
            OperationKind::ResizeCrop => "resize_crop",
            OperationKind::Rotate => "rotate",
            OperationKind::TranscodeImage => "transcode_image",
            OperationKind::Upload => "upload",
            OperationKind::ThumbnailGeneration => "thumbnail_generation",
        }
    }

    /// Operations gated by the image-processing admission pool.
    pub fn is_image_processing(&self) -> bool {
        matches!(self, OperationKind::ResizeCrop | OperationKind::Rotate)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a resize names its output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuffixPolicy {
    /// Keep the original name.
    None,
    /// Append `-{width}x{height}`.
    Dimensions,
    /// Append `-scaled`, marking a threshold resize.
    Scaled,
}

/// Arguments of an operation that needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationArgs {
    ResizeCrop {
        resize: ImageSize,
        /// Resize caused by the big-image threshold rather than a thumbnail size.
        is_threshold_resize: bool,
    },
    Rotate {
        orientation: u8,
    },
    TranscodeImage {
        output_format: String,
        quality: f32,
        interlaced: bool,
    },
}

/// One step of an item's plan: a kind and, for some kinds, its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<OperationArgs>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self { kind, args: None }
    }

    pub fn with_args(kind: OperationKind, args: OperationArgs) -> Self {
        Self {
            kind,
            args: Some(args),
        }
    }

    pub fn resize_crop(resize: ImageSize) -> Self {
        Self::with_args(
            OperationKind::ResizeCrop,
            OperationArgs::ResizeCrop {
                resize,
                is_threshold_resize: false,
            },
        )
    }

    pub fn threshold_resize(threshold: u32) -> Self {
        Self::with_args(
            OperationKind::ResizeCrop,
            OperationArgs::ResizeCrop {
                resize: ImageSize::threshold(threshold),
                is_threshold_resize: true,
            },
        )
    }

    pub fn rotate(orientation: u8) -> Self {
        Self::with_args(OperationKind::Rotate, OperationArgs::Rotate { orientation })
    }

    pub fn transcode(output_format: impl Into<String>, quality: f32, interlaced: bool) -> Self {
        Self::with_args(
            OperationKind::TranscodeImage,
            OperationArgs::TranscodeImage {
                output_format: output_format.into(),
                quality,
                interlaced,
            },
        )
    }
}

impl From<OperationKind> for Operation {
    fn from(kind: OperationKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.args {
            Some(OperationArgs::ResizeCrop { resize, .. }) => {
                write!(f, "{}({}x{})", self.kind, resize.width, resize.height)
            }
            Some(OperationArgs::Rotate { orientation }) => {
                write!(f, "{}({})", self.kind, orientation)
            }
            Some(OperationArgs::TranscodeImage { output_format, .. }) => {
                write!(f, "{}({})", self.kind, output_format)
            }
            None => write!(f, "{}", self.kind),
        }
    }
}

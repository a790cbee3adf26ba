//! Value types shared by the queue, the executors and the collaborators.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Suffix that threshold resizes append to a file name.
pub const SCALED_SUFFIX: &str = "-scaled";

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a queue item.
    ItemId
);

define_id!(
    /// Identifier shared by all items of one batch.
    BatchId
);

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn max_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// A file travelling through the queue.
///
/// The payload is reference counted, so cloning a file never copies its bytes.
#[derive(Clone, PartialEq)]
pub struct MediaFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
    /// Known pixel dimensions, if the caller or a transform reported them.
    pub dimensions: Option<Dimensions>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
            dimensions: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some(Dimensions::new(width, height));
        self
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }

    pub fn extension(&self) -> Option<&str> {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => Some(&self.name[idx + 1..]),
            _ => None,
        }
    }

    /// Whether a threshold resize already produced this file.
    pub fn is_scaled(&self) -> bool {
        self.stem().ends_with(SCALED_SUFFIX)
    }

    /// Copy of this file with `suffix` appended to the stem.
    pub fn with_name_suffix(&self, suffix: &str) -> Self {
        let name = match self.extension() {
            Some(ext) => format!("{}{}.{}", self.stem(), suffix, ext),
            None => format!("{}{}", self.name, suffix),
        };
        Self {
            name,
            ..self.clone()
        }
    }
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Shallow merge of two JSON objects: each top-level key of `update`
/// overwrites the same key of `target`.
///
/// This is the only merge used for item updates; nested objects are replaced,
/// never merged recursively.
pub fn merge_json_maps(target: &mut Map<String, Value>, update: Map<String, Value>) {
    for (key, value) in update {
        target.insert(key, value);
    }
}

/// Free-form payload sent along with uploads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdditionalData(Map<String, Value>);

impl AdditionalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Target post or attachment id.
    pub fn post(&self) -> Option<u64> {
        self.0.get("post").and_then(Value::as_u64)
    }

    pub fn image_size(&self) -> Option<&str> {
        self.0.get("image_size").and_then(Value::as_str)
    }

    pub fn merge(&mut self, update: AdditionalData) {
        merge_json_maps(&mut self.0, update.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for AdditionalData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Server-side view of an uploaded attachment.
///
/// Updates are merged field by field: a field present in the update replaces
/// the stored one, absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Registered image sizes the server could not generate itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_image_sizes: Option<Vec<String>>,
    /// EXIF orientation of the original, when the server wants it rotated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif_orientation: Option<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Attachment {
    pub fn with_id(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, update: Attachment) {
        if update.id.is_some() {
            self.id = update.id;
        }
        if update.url.is_some() {
            self.url = update.url;
        }
        if update.mime_type.is_some() {
            self.mime_type = update.mime_type;
        }
        if update.missing_image_sizes.is_some() {
            self.missing_image_sizes = update.missing_image_sizes;
        }
        if update.exif_orientation.is_some() {
            self.exif_orientation = update.exif_orientation;
        }
        merge_json_maps(&mut self.extra, update.extra);
    }

    /// Whether the original needs an EXIF based rotation.
    pub fn needs_rotation(&self) -> bool {
        matches!(self.exif_orientation, Some(o) if o > 1)
    }
}

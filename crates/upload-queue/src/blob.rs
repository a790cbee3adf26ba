//! In-memory preview registry.
//!
//! Every preview produced for an item (on add and after each transform) is
//! registered under a `blob:` URL. Removing an item releases all of its
//! previews at once.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::types::{ItemId, MediaFile};

/// URL of a registered preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobUrl(String);

impl BlobUrl {
    fn mint() -> Self {
        Self(format!("blob:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered preview and its payload.
#[derive(Clone, PartialEq)]
pub struct Blob {
    pub url: BlobUrl,
    pub mime_type: String,
    pub data: Bytes,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("url", &self.url)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct BlobRegistry {
    by_item: HashMap<ItemId, Vec<BlobUrl>>,
    blobs: HashMap<BlobUrl, Blob>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a preview of `file` for `item_id`.
    pub fn create(&mut self, item_id: &ItemId, file: &MediaFile) -> Blob {
        let blob = Blob {
            url: BlobUrl::mint(),
            mime_type: file.mime_type.clone(),
            data: file.data.clone(),
        };
        self.by_item
            .entry(item_id.clone())
            .or_default()
            .push(blob.url.clone());
        self.blobs.insert(blob.url.clone(), blob.clone());
        blob
    }

    pub fn get(&self, url: &BlobUrl) -> Option<&Blob> {
        self.blobs.get(url)
    }

    /// Most recent preview of an item.
    pub fn latest(&self, item_id: &ItemId) -> Option<&Blob> {
        self.by_item
            .get(item_id)
            .and_then(|urls| urls.last())
            .and_then(|url| self.blobs.get(url))
    }

    pub fn urls_for(&self, item_id: &ItemId) -> &[BlobUrl] {
        self.by_item
            .get(item_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Release every preview of an item and drop its entry.
    pub fn revoke(&mut self, item_id: &ItemId) -> Vec<BlobUrl> {
        let urls = self.by_item.remove(item_id).unwrap_or_default();
        for url in &urls {
            self.blobs.remove(url);
        }
        urls
    }

    pub fn contains_item(&self, item_id: &ItemId) -> bool {
        self.by_item.contains_key(item_id)
    }

    /// Number of live previews.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

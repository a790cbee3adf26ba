//! Queue settings.
//!
//! Settings are plain serde structs with defaults for every field, so a partial
//! JSON document (or nothing at all) yields a usable configuration. Environment
//! variables prefixed with `UPLOAD_QUEUE_` override the concurrency limits and
//! the big-image threshold.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

use crate::{Error, Result};

/// Environment variable overriding [`QueueSettings::max_concurrent_uploads`].
pub const ENV_MAX_CONCURRENT_UPLOADS: &str = "UPLOAD_QUEUE_MAX_CONCURRENT_UPLOADS";
/// Environment variable overriding [`QueueSettings::max_concurrent_image_processing`].
pub const ENV_MAX_CONCURRENT_IMAGE_PROCESSING: &str =
    "UPLOAD_QUEUE_MAX_CONCURRENT_IMAGE_PROCESSING";
/// Environment variable overriding [`QueueSettings::big_image_size_threshold`].
/// `0` disables threshold resizing.
pub const ENV_BIG_IMAGE_SIZE_THRESHOLD: &str = "UPLOAD_QUEUE_BIG_IMAGE_SIZE_THRESHOLD";

/// A registered image size (thumbnail, medium, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
    /// Hard crop to exactly `width` x `height` instead of fitting inside.
    #[serde(default)]
    pub crop: bool,
}

impl ImageSize {
    pub fn new(width: u32, height: u32, crop: bool) -> Self {
        Self {
            width,
            height,
            crop,
        }
    }

    /// Square bounding box used for threshold resizes.
    pub fn threshold(size: u32) -> Self {
        Self::new(size, size, false)
    }
}

/// Per-format progressive/interlaced output flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterlaceFlags {
    pub jpeg: bool,
    pub png: bool,
    pub gif: bool,
}

impl InterlaceFlags {
    pub fn for_mime(&self, mime_type: &str) -> bool {
        match mime_type {
            "image/jpeg" => self.jpeg,
            "image/png" => self.png,
            "image/gif" => self.gif,
            _ => false,
        }
    }
}

/// Output formats the image collaborator can produce.
pub const SUPPORTED_OUTPUT_FORMATS: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/avif",
    "image/gif",
];

/// Settings surface of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum uploads in flight at once.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// Maximum resize/rotate operations in flight at once.
    #[serde(default = "default_max_concurrent_image_processing")]
    pub max_concurrent_image_processing: usize,
    /// Longest side above which images are scaled down before upload.
    #[serde(default = "default_big_image_size_threshold")]
    pub big_image_size_threshold: Option<u32>,
    /// Source MIME type to output MIME type.
    #[serde(default)]
    pub image_output_formats: HashMap<String, String>,
    #[serde(default)]
    pub interlaced: InterlaceFlags,
    /// Encoder quality in `0.0..=1.0`.
    #[serde(default = "default_image_quality")]
    pub image_quality: f32,
    /// Use saliency based cropping for hard crops.
    #[serde(default)]
    pub smart_crop: bool,
    /// Registered image sizes by name.
    #[serde(default)]
    pub all_image_sizes: HashMap<String, ImageSize>,
}

fn default_max_concurrent_uploads() -> usize {
    5
}

fn default_max_concurrent_image_processing() -> usize {
    2
}

fn default_big_image_size_threshold() -> Option<u32> {
    Some(2560)
}

fn default_image_quality() -> f32 {
    0.82
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_concurrent_image_processing: default_max_concurrent_image_processing(),
            big_image_size_threshold: default_big_image_size_threshold(),
            image_output_formats: HashMap::new(),
            interlaced: InterlaceFlags::default(),
            image_quality: default_image_quality(),
            smart_crop: false,
            all_image_sizes: HashMap::new(),
        }
    }
}

impl QueueSettings {
    /// Parse settings from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Default settings with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `UPLOAD_QUEUE_*` environment overrides. Unparsable values are
    /// ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse(ENV_MAX_CONCURRENT_UPLOADS) {
            self.max_concurrent_uploads = v;
        }
        if let Some(v) = env_parse(ENV_MAX_CONCURRENT_IMAGE_PROCESSING) {
            self.max_concurrent_image_processing = v;
        }
        if let Some(v) = env_parse::<u32>(ENV_BIG_IMAGE_SIZE_THRESHOLD) {
            self.big_image_size_threshold = if v == 0 { None } else { Some(v) };
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_uploads == 0 {
            return Err(Error::config("max_concurrent_uploads must be at least 1"));
        }
        if self.max_concurrent_image_processing == 0 {
            return Err(Error::config(
                "max_concurrent_image_processing must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.image_quality) {
            return Err(Error::config(format!(
                "image_quality must be within 0.0..=1.0, got {}",
                self.image_quality
            )));
        }
        if self.big_image_size_threshold == Some(0) {
            return Err(Error::config(
                "big_image_size_threshold must be positive (use null to disable)",
            ));
        }
        for (name, size) in &self.all_image_sizes {
            if size.width == 0 && size.height == 0 {
                return Err(Error::config(format!(
                    "image size '{}' has no dimensions",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Output format configured for `source_mime`, if it is a usable target.
    ///
    /// Unknown or unsupported targets, and targets equal to the source, yield
    /// `None` so the caller simply skips transcoding.
    pub fn output_format_for(&self, source_mime: &str) -> Option<&str> {
        let target = self.image_output_formats.get(source_mime)?;
        if target == source_mime {
            return None;
        }
        if !SUPPORTED_OUTPUT_FORMATS.contains(&target.as_str()) {
            warn!(
                source = %source_mime,
                target = %target,
                "Ignoring unsupported image output format"
            );
            return None;
        }
        Some(target.as_str())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    parse_override(key, &std::env::var(key).ok()?)
}

fn parse_override<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring invalid environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_settings_default() {
        let settings = QueueSettings::default();
        assert_eq!(settings.max_concurrent_uploads, 5);
        assert_eq!(settings.max_concurrent_image_processing, 2);
        assert_eq!(settings.big_image_size_threshold, Some(2560));
        assert!((settings.image_quality - 0.82).abs() < f32::EPSILON);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_queue_settings_from_partial_json() {
        let settings = QueueSettings::from_json(
            r#"{
                "max_concurrent_uploads": 3,
                "big_image_size_threshold": null,
                "image_output_formats": {"image/png": "image/jpeg"},
                "all_image_sizes": {"thumbnail": {"width": 150, "height": 150, "crop": true}}
            }"#,
        )
        .unwrap();

        assert_eq!(settings.max_concurrent_uploads, 3);
        assert_eq!(settings.max_concurrent_image_processing, 2);
        assert_eq!(settings.big_image_size_threshold, None);
        assert_eq!(
            settings.all_image_sizes.get("thumbnail"),
            Some(&ImageSize::new(150, 150, true))
        );
    }

    #[test]
    fn test_queue_settings_validation() {
        let settings = QueueSettings {
            max_concurrent_uploads: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));

        let settings = QueueSettings {
            image_quality: 1.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        assert!(QueueSettings::from_json(r#"{"max_concurrent_image_processing": 0}"#).is_err());
    }

    #[test]
    fn test_output_format_for() {
        let mut settings = QueueSettings::default();
        settings
            .image_output_formats
            .insert("image/png".to_string(), "image/jpeg".to_string());
        settings
            .image_output_formats
            .insert("image/heic".to_string(), "image/x-unknown".to_string());
        settings
            .image_output_formats
            .insert("image/webp".to_string(), "image/webp".to_string());

        assert_eq!(settings.output_format_for("image/png"), Some("image/jpeg"));
        assert_eq!(settings.output_format_for("image/heic"), None);
        assert_eq!(settings.output_format_for("image/webp"), None);
        assert_eq!(settings.output_format_for("image/gif"), None);
    }

    #[test]
    fn test_env_override_parsing() {
        assert_eq!(
            parse_override::<u32>(ENV_BIG_IMAGE_SIZE_THRESHOLD, " 4096 "),
            Some(4096)
        );
        // Out of range for u32, rejected instead of wrapping.
        assert_eq!(
            parse_override::<u32>(ENV_BIG_IMAGE_SIZE_THRESHOLD, "4294969856"),
            None
        );
        assert_eq!(parse_override::<usize>(ENV_MAX_CONCURRENT_UPLOADS, "many"), None);
    }

    #[test]
    fn test_interlace_flags() {
        let flags = InterlaceFlags {
            jpeg: true,
            ..Default::default()
        };
        assert!(flags.for_mime("image/jpeg"));
        assert!(!flags.for_mime("image/png"));
        assert!(!flags.for_mime("image/webp"));
    }
}

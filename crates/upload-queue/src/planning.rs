//! Operation planning for newly added files.

use crate::config::{ImageSize, QueueSettings};
use crate::operation::{Operation, OperationKind};
use crate::types::MediaFile;

/// Threshold to resize `file` to, if it is (or may be) bigger than the
/// configured big-image threshold.
///
/// Files with unknown dimensions are planned for a resize; the image engine
/// never upscales, so the resize is a no-op for small images.
pub fn threshold_resize(file: &MediaFile, settings: &QueueSettings) -> Option<u32> {
    let threshold = settings.big_image_size_threshold?;
    match file.dimensions {
        Some(dims) if dims.max_side() <= threshold => None,
        _ => Some(threshold),
    }
}

/// Transcode step for a file of `mime_type`, if an output format is configured.
pub fn transcode_operation(mime_type: &str, settings: &QueueSettings) -> Option<Operation> {
    let target = settings.output_format_for(mime_type)?;
    Some(Operation::transcode(
        target,
        settings.image_quality,
        settings.interlaced.for_mime(target),
    ))
}

/// Whether converting `source` to `target` loses transparency.
pub fn drops_alpha(source: &str, target: &str) -> bool {
    source == "image/png" && target == "image/jpeg"
}

/// Whether the plan for `file` depends on a transparency check.
pub fn needs_transparency_check(file: &MediaFile, settings: &QueueSettings) -> bool {
    file.is_image()
        && settings
            .output_format_for(&file.mime_type)
            .is_some_and(|target| drops_alpha(&file.mime_type, target))
}

/// Full plan for a file added to the queue (everything after `Prepare`).
///
/// `has_transparency` is only consulted when the transcode would drop the
/// alpha channel.
pub fn plan_for(file: &MediaFile, settings: &QueueSettings, has_transparency: bool) -> Vec<Operation> {
    if !file.is_image() {
        return vec![Operation::new(OperationKind::Upload)];
    }

    let mut operations = Vec::with_capacity(4);

    if let Some(threshold) = threshold_resize(file, settings) {
        operations.push(Operation::threshold_resize(threshold));
    }

    if let Some(target) = settings.output_format_for(&file.mime_type) {
        // JPEG cannot carry an alpha channel.
        if !(has_transparency && drops_alpha(&file.mime_type, target)) {
            operations.push(Operation::transcode(
                target,
                settings.image_quality,
                settings.interlaced.for_mime(target),
            ));
        }
    }

    operations.push(Operation::new(OperationKind::Upload));
    operations.push(Operation::new(OperationKind::ThumbnailGeneration));
    operations
}

/// Plan for a sideloaded thumbnail built from the original file.
///
/// The thumbnail is transcoded only if the main upload was, so thumbnails end
/// up in the same format as the file they belong to.
pub fn thumbnail_plan(
    size: ImageSize,
    source: &MediaFile,
    uploaded: &MediaFile,
    settings: &QueueSettings,
) -> Vec<Operation> {
    let mut operations = vec![Operation::resize_crop(size)];
    if uploaded.mime_type != source.mime_type {
        if let Some(transcode) = transcode_operation(&source.mime_type, settings) {
            operations.push(transcode);
        }
    }
    operations.push(Operation::new(OperationKind::Upload));
    operations
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn kinds(ops: &[Operation]) -> Vec<OperationKind> {
        ops.iter().map(|op| op.kind).collect()
    }

    fn png_to_jpeg_settings() -> QueueSettings {
        let mut settings = QueueSettings {
            big_image_size_threshold: Some(2560),
            ..Default::default()
        };
        settings
            .image_output_formats
            .insert("image/png".to_string(), "image/jpeg".to_string());
        settings
    }

    #[test]
    fn test_non_image_plan_is_upload_only() {
        let file = MediaFile::new("doc.pdf", "application/pdf", vec![0u8; 16]);
        let plan = plan_for(&file, &png_to_jpeg_settings(), false);
        assert_eq!(kinds(&plan), vec![OperationKind::Upload]);
    }

    #[test]
    fn test_transparent_png_skips_transcode() {
        let file = MediaFile::new("logo.png", "image/png", vec![0u8; 16]);
        let settings = png_to_jpeg_settings();
        assert!(needs_transparency_check(&file, &settings));

        let plan = plan_for(&file, &settings, true);
        assert_eq!(
            plan,
            vec![
                Operation::threshold_resize(2560),
                Operation::new(OperationKind::Upload),
                Operation::new(OperationKind::ThumbnailGeneration),
            ]
        );
    }

    #[test]
    fn test_opaque_png_is_transcoded() {
        let file = MediaFile::new("photo.png", "image/png", vec![0u8; 16]);
        let plan = plan_for(&file, &png_to_jpeg_settings(), false);
        assert_eq!(
            kinds(&plan),
            vec![
                OperationKind::ResizeCrop,
                OperationKind::TranscodeImage,
                OperationKind::Upload,
                OperationKind::ThumbnailGeneration,
            ]
        );
    }

    #[rstest]
    #[case(Some((4000, 3000)), Some(2560))]
    #[case(Some((2560, 1440)), None)]
    #[case(Some((800, 600)), None)]
    #[case(None, Some(2560))]
    fn test_threshold_resize(#[case] dims: Option<(u32, u32)>, #[case] expected: Option<u32>) {
        let mut file = MediaFile::new("a.jpg", "image/jpeg", vec![0u8; 4]);
        if let Some((w, h)) = dims {
            file = file.with_dimensions(w, h);
        }
        assert_eq!(threshold_resize(&file, &QueueSettings::default()), expected);
    }

    #[test]
    fn test_threshold_disabled() {
        let settings = QueueSettings {
            big_image_size_threshold: None,
            ..Default::default()
        };
        let file = MediaFile::new("a.jpg", "image/jpeg", vec![0u8; 4]).with_dimensions(9000, 9000);
        assert_eq!(
            kinds(&plan_for(&file, &settings, false)),
            vec![OperationKind::Upload, OperationKind::ThumbnailGeneration]
        );
    }

    #[test]
    fn test_thumbnail_plan_follows_main_upload_format() {
        let settings = png_to_jpeg_settings();
        let source = MediaFile::new("photo.png", "image/png", vec![0u8; 4]);
        let transcoded = MediaFile::new("photo.jpg", "image/jpeg", vec![0u8; 4]);
        let size = ImageSize::new(150, 150, true);

        assert_eq!(
            kinds(&thumbnail_plan(size, &source, &transcoded, &settings)),
            vec![
                OperationKind::ResizeCrop,
                OperationKind::TranscodeImage,
                OperationKind::Upload
            ]
        );
        assert_eq!(
            kinds(&thumbnail_plan(size, &source, &source, &settings)),
            vec![OperationKind::ResizeCrop, OperationKind::Upload]
        );
    }
}

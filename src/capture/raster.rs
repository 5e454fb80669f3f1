use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::error::ValidationError;
use crate::models::{DeviceSettings, RasterImage, SourceImage};

/// Picked files above this size are rejected before decoding.
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Validate a file-picker input before it enters the pipeline. Only the
/// declared MIME type and byte size are checked here; decoding problems
/// surface later as re-encode failures.
pub fn validate_picked_file(size: usize, mime: &str) -> Result<(), ValidationError> {
    if size > MAX_FILE_BYTES {
        return Err(ValidationError::TooLarge {
            actual: size,
            limit: MAX_FILE_BYTES,
        });
    }
    if !mime.starts_with("image/") {
        return Err(ValidationError::UnsupportedType(mime.to_string()));
    }
    Ok(())
}

/// Apply the session's brightness/contrast adjustments to a device frame
/// on an offscreen raster. Brightness is additive per channel, contrast
/// multiplicative around the midpoint.
pub fn apply_adjustments(frame: RasterImage, settings: &DeviceSettings) -> Result<RasterImage> {
    let settings = settings.clone().clamped();
    if settings.brightness_offset == 0 && settings.contrast_offset == 0 {
        return Ok(frame);
    }

    let width = frame.width;
    let height = frame.height;
    let rgb = RgbImage::from_raw(width, height, frame.data)
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height} RGB8"))?;

    let mut adjusted = DynamicImage::ImageRgb8(rgb);
    if settings.brightness_offset != 0 {
        adjusted = adjusted.brighten(settings.brightness_offset);
    }
    if settings.contrast_offset != 0 {
        adjusted = adjusted.adjust_contrast(settings.contrast_offset as f32);
    }

    Ok(RasterImage::new(adjusted.into_rgb8().into_raw(), width, height))
}

/// Produce the finalized JPEG blob handed to the identification
/// submitter. Picked files are re-encoded so the remote service always
/// receives a well-formed JPEG regardless of the original container.
pub fn encode_jpeg(source: &SourceImage) -> Result<Vec<u8>> {
    let image = match source {
        SourceImage::Frame(frame) => {
            let rgb = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
                .ok_or_else(|| anyhow!("raster buffer size mismatch"))?;
            DynamicImage::ImageRgb8(rgb)
        }
        SourceImage::File { bytes, .. } => {
            image::load_from_memory(bytes).context("failed to decode picked image")?
        }
    };

    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Jpeg)
        .context("failed to encode capture as JPEG")?;
    Ok(buf.into_inner())
}

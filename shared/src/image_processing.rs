use std::io::Cursor;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Limits};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::geometry::Region;

/// Allowed source formats - explicit allowlist
const ALLOWED_FORMATS: &[image::ImageFormat] = &[image::ImageFormat::Jpeg, image::ImageFormat::Png];

pub const JPEG_MIME: &str = "image/jpeg";
pub const PNG_MIME: &str = "image/png";

#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("failed to decode image: {source}")]
    Decode {
        #[from]
        source: image::ImageError,
    },

    #[error("jpeg encoding failed: width={width}, height={height}, reason={reason}")]
    JpegEncode {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("crop region is zero-sized after clamping")]
    ZeroCrop,

    #[error("input bytes empty")]
    EmptyInput,

    #[error("unsupported image format")]
    UnsupportedFormat,
}

#[derive(Clone, Copy, Debug)]
pub struct DecodeLimits {
    pub max_dimension: u32,
    pub max_alloc: u64,
}

#[derive(Debug)]
pub struct Oriented {
    pub image: DynamicImage,
    pub orientation: Orientation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub resized: bool,
}

pub fn sniff_mime(raw: &[u8]) -> &'static str {
    match image::guess_format(raw) {
        Ok(image::ImageFormat::Png) => PNG_MIME,
        _ => JPEG_MIME,
    }
}

// An unreadable orientation tag leaves the pixels as stored.
#[instrument(skip(raw), fields(input_size = raw.len()))]
pub fn decode_oriented(raw: &[u8], limits: DecodeLimits) -> Result<Oriented, ImageProcessingError> {
    if raw.is_empty() {
        return Err(ImageProcessingError::EmptyInput);
    }

    let format = image::guess_format(raw)?;
    if !ALLOWED_FORMATS.contains(&format) {
        return Err(ImageProcessingError::UnsupportedFormat);
    }

    let mut reader = ImageReader::with_format(Cursor::new(raw), format);
    let mut decode_limits = Limits::default();
    decode_limits.max_image_width = Some(limits.max_dimension);
    decode_limits.max_image_height = Some(limits.max_dimension);
    decode_limits.max_alloc = Some(limits.max_alloc);
    reader.limits(decode_limits);

    let mut decoder = reader.into_decoder()?;
    let orientation = match decoder.orientation() {
        Ok(orientation) => orientation,
        Err(e) => {
            warn!(error = %e, "exif orientation unreadable, keeping stored orientation");
            counter!("image.orientation.unreadable").increment(1);
            Orientation::NoTransforms
        }
    };

    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    debug!(
        width = image.width(),
        height = image.height(),
        ?orientation,
        "decoded source image"
    );

    Ok(Oriented { image, orientation })
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageProcessingError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| ImageProcessingError::JpegEncode {
            width: rgb.width(),
            height: rgb.height(),
            reason: e.to_string(),
        })?;
    Ok(out)
}

// Within bounds the raw file goes out untouched so the server keeps its metadata.
#[instrument(skip(raw, image), fields(input_size = raw.len()))]
pub fn prepare_transport(
    raw: &[u8],
    image: Option<&DynamicImage>,
    long_edge: u32,
    quality: u8,
) -> TransportImage {
    let start = Instant::now();
    let passthrough = || TransportImage {
        bytes: raw.to_vec(),
        mime_type: sniff_mime(raw),
        resized: false,
    };

    let Some(image) = image else {
        return passthrough();
    };

    if image.width() <= long_edge && image.height() <= long_edge {
        debug!(width = image.width(), height = image.height(), "transport resize not needed");
        return passthrough();
    }

    let resized = image.resize(long_edge, long_edge, FilterType::Triangle);
    match encode_jpeg(&resized, quality) {
        Ok(bytes) => {
            counter!("image.transport.resized").increment(1);
            histogram!("image.transport.duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
            debug!(
                from = raw.len(),
                to = bytes.len(),
                width = resized.width(),
                height = resized.height(),
                "transport resize complete"
            );
            TransportImage {
                bytes,
                mime_type: JPEG_MIME,
                resized: true,
            }
        }
        Err(e) => {
            warn!(error = %e, "transport resize failed, sending raw file");
            counter!("image.transport.degraded").increment(1);
            passthrough()
        }
    }
}

#[instrument(skip(image))]
pub fn crop_to_region(
    image: &DynamicImage,
    region: &Region,
    quality: u8,
) -> Result<Vec<u8>, ImageProcessingError> {
    let (x, y, w, h) = region
        .to_pixels(image.width(), image.height())
        .ok_or(ImageProcessingError::ZeroCrop)?;
    let cropped = image.crop_imm(x, y, w, h);
    encode_jpeg(&cropped, quality)
}

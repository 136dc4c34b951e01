use base64::{engine::general_purpose, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

const JPEG_QUALITY: u8 = 85;
const MIN_DIMENSION: u32 = 64;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image is empty")]
    Empty,

    #[error("image is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
}

/// Image ready to be embedded into a request: media type plus base64 data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub media_type: String,
    pub data: String,
}

/// Decode an uploaded payload. Accepts bare base64 or a `data:<mime>;base64,` URL.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, ImageError> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => trimmed,
    };

    if encoded.is_empty() {
        return Err(ImageError::Empty);
    }

    Ok(general_purpose::STANDARD.decode(encoded)?)
}

fn encoded_len(bytes: usize) -> usize {
    bytes.div_ceil(3) * 4
}

fn media_type_of(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => "image/jpeg", // varsayılan
    }
}

/// Keeps request bodies bounded. Oversize images are downscaled and
/// re-encoded as JPEG; encoded data is never cut.
#[derive(Debug, Clone)]
pub struct ImagePreparer {
    max_encoded_bytes: usize,
    max_dimension: u32,
}

impl ImagePreparer {
    pub fn new(max_encoded_bytes: usize, max_dimension: u32) -> Self {
        Self {
            max_encoded_bytes,
            max_dimension: max_dimension.max(MIN_DIMENSION),
        }
    }

    pub fn prepare(&self, bytes: &[u8]) -> Result<PreparedImage, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }

        if encoded_len(bytes.len()) <= self.max_encoded_bytes {
            return Ok(PreparedImage {
                media_type: media_type_of(bytes).to_string(),
                data: general_purpose::STANDARD.encode(bytes),
            });
        }

        let original = image::load_from_memory(bytes)?;
        log::warn!(
            "🗜️ Image too large ({} bytes encoded, limit {}), downscaling {}x{}",
            encoded_len(bytes.len()),
            self.max_encoded_bytes,
            original.width(),
            original.height()
        );

        let mut dimension = self.max_dimension;
        loop {
            let jpeg = encode_jpeg(&fit_within(&original, dimension))?;
            let size = encoded_len(jpeg.len());

            if size <= self.max_encoded_bytes || dimension <= MIN_DIMENSION {
                log::debug!("📉 Downscaled to {}px long side, {} bytes encoded", dimension, size);
                return Ok(PreparedImage {
                    media_type: "image/jpeg".to_string(),
                    data: general_purpose::STANDARD.encode(&jpeg),
                });
            }

            // Hâlâ büyük, yarıya indir
            dimension = (dimension / 2).max(MIN_DIMENSION);
        }
    }
}

fn fit_within(image: &DynamicImage, dimension: u32) -> DynamicImage {
    if image.width() <= dimension && image.height() <= dimension {
        image.clone()
    } else {
        image.resize(dimension, dimension, FilterType::Triangle)
    }
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ColorType::Rgb8,
    )?;
    Ok(out)
}

use super::MediaError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use tracing::debug;

/// Longest side after compression.
pub const MAX_DIMENSION: u32 = 1024;
/// Size the JPEG re-encode aims for.
pub const TARGET_BYTES: usize = 300 * 1024;

const START_QUALITY: u8 = 90;
const MIN_QUALITY: u8 = 30;
const QUALITY_STEP: u8 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Shrinks an image to fit [`MAX_DIMENSION`] and roughly [`TARGET_BYTES`].
///
/// Images already within both limits are returned untouched. Otherwise the
/// image is re-encoded as JPEG with decreasing quality; if even the lowest
/// quality is too large, that smallest encoding is used.
///
/// Formats without a decoder pass through when they are small enough.
pub fn compress(bytes: &[u8], content_type: &str) -> Result<Compressed, MediaError> {
    let image = match image::load_from_memory(bytes) {
        Ok(image) => image,
        Err(e) if bytes.len() <= TARGET_BYTES => {
            debug!(content_type, error = %e, "cannot decode image, uploading as is");
            return Ok(Compressed {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let (width, height) = image.dimensions();
    let fits = width <= MAX_DIMENSION && height <= MAX_DIMENSION;

    if fits && bytes.len() <= TARGET_BYTES {
        return Ok(Compressed {
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
        });
    }

    let image = if fits {
        image
    } else {
        image.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    };
    let rgb = image.to_rgb8();

    let mut quality = START_QUALITY;
    loop {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, quality).encode_image(&rgb)?;

        if encoded.len() <= TARGET_BYTES || quality <= MIN_QUALITY {
            debug!(
                original = bytes.len(),
                compressed = encoded.len(),
                quality,
                width = rgb.width(),
                height = rgb.height(),
                "compressed image"
            );
            return Ok(Compressed {
                bytes: encoded,
                content_type: "image/jpeg".to_string(),
            });
        }
        quality -= QUALITY_STEP;
    }
}

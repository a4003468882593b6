//! Frame compression: bounded downscale plus JPEG.

use image::codecs::jpeg::JpegEncoder;

use crate::streamer::StreamError;

/// Output bounds and quality for encoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
            quality: 85,
        }
    }
}

/// Decode a screenshot, shrink it to fit the bounds, and re-encode as JPEG.
///
/// Aspect ratio is preserved and smaller images are never upscaled.
///
/// # Errors
/// Returns error if the input cannot be decoded or the JPEG encoder fails.
pub fn compress(raw: &[u8], options: &EncodeOptions) -> Result<Vec<u8>, StreamError> {
    let image = image::load_from_memory(raw)?;
    let image = if image.width() > options.max_width || image.height() > options.max_height {
        image.thumbnail(options.max_width, options.max_height)
    } else {
        image
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, options.quality).encode_image(&image.to_rgb8())?;
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{ColorType, ImageEncoder, codecs::png::PngEncoder};

    use super::*;

    /// Solid-colour PNG of the given size.
    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let pixels = vec![0x40_u8; (width * height * 3) as usize];
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(&pixels, width, height, ColorType::Rgb8)
            .unwrap();
        out
    }

    #[test]
    fn test_large_capture_is_downscaled_to_bounds() {
        let jpeg = compress(&png(2560, 1440), &EncodeOptions::default()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 720));
    }

    #[test]
    fn test_small_capture_keeps_size() {
        let jpeg = compress(&png(320, 200), &EncodeOptions::default()).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 200));
    }

    #[test]
    fn test_garbage_input_is_an_error() {
        assert!(matches!(
            compress(b"not an image", &EncodeOptions::default()),
            Err(StreamError::Image(_))
        ));
    }
}

//! Image processing applied to uploads before they are encrypted and stored.
//!
//! - [`ContentSanitizer`] decodes images into a raw raster and re-encodes
//!   them into a fresh byte stream, dropping metadata, trailing data and any
//!   polyglot payload hidden in the original container.
//! - [`Compressor`] shrinks large images into a bounding box.
//!
//! Non-image files pass through both untouched.

use crate::models::upload::UploadedFile;
use bytes::Bytes;
use image::{
    DynamicImage, ImageFormat, ImageResult, codecs::jpeg::JpegEncoder, imageops::FilterType,
};
use std::io::Cursor;

/// Raster format matching a declared image MIME type, if we handle it.
fn image_format(file: &UploadedFile) -> Option<ImageFormat> {
    match file.essence_mime()?.as_str() {
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        _ => None,
    }
}

fn decode(data: &[u8], format: ImageFormat) -> ImageResult<DynamicImage> {
    image::load_from_memory_with_format(data, format)
}

/// Encode `image` into a brand-new buffer. JPEG uses `quality` (1-100), PNG
/// is lossless.
fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            // JPEG carries no alpha channel
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(&rgb)?;
        }
        other => image.write_to(&mut Cursor::new(&mut buffer), other)?,
    }
    Ok(buffer)
}

/// What the sanitizer did with a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeOutcome {
    /// Pixels were re-encoded into a fresh container.
    Reencoded,
    /// Not an image; returned unchanged.
    PassedThrough,
    /// Declared as an image but could not be decoded or re-encoded. The
    /// original bytes were returned unchanged.
    DecodeFailed(String),
}

#[derive(Debug, Clone)]
pub struct Sanitized {
    pub file: UploadedFile,
    pub outcome: SanitizeOutcome,
}

#[derive(Debug, Clone)]
pub struct ContentSanitizer {
    jpeg_quality: u8,
}

impl Default for ContentSanitizer {
    fn default() -> Self {
        Self::new(95)
    }
}

impl ContentSanitizer {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn sanitize(&self, file: UploadedFile) -> Sanitized {
        let Some(format) = image_format(&file) else {
            return Sanitized {
                file,
                outcome: SanitizeOutcome::PassedThrough,
            };
        };

        let reencoded =
            decode(&file.data, format).and_then(|img| encode(&img, format, self.jpeg_quality));

        match reencoded {
            Ok(data) => Sanitized {
                file: UploadedFile {
                    data: Bytes::from(data),
                    ..file
                },
                outcome: SanitizeOutcome::Reencoded,
            },
            Err(err) => Sanitized {
                file,
                outcome: SanitizeOutcome::DecodeFailed(err.to_string()),
            },
        }
    }
}

/// Size-bounding recompression for large images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionSettings {
    /// Images at or below this size are left alone.
    pub min_bytes: usize,
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            min_bytes: 500 * 1024,
            max_width: 2048,
            max_height: 2048,
            quality: 80,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Compressor {
    settings: CompressionSettings,
}

impl Compressor {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    /// Fit the image into the bounding box and re-encode it. The result is
    /// never larger than the input; any failure returns the input unchanged.
    pub fn compress(&self, file: UploadedFile) -> UploadedFile {
        if file.data.len() <= self.settings.min_bytes {
            return file;
        }
        let Some(format) = image_format(&file) else {
            return file;
        };
        let Ok(img) = decode(&file.data, format) else {
            return file;
        };

        let (max_w, max_h) = (self.settings.max_width, self.settings.max_height);
        let bounded = if img.width() > max_w || img.height() > max_h {
            img.resize(max_w, max_h, FilterType::Lanczos3)
        } else {
            img
        };

        match encode(&bounded, format, self.settings.quality) {
            Ok(data) if data.len() < file.data.len() => UploadedFile {
                data: Bytes::from(data),
                ..file
            },
            _ => file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Rgb, RgbImage};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn gradient(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
    }

    fn noise(width: u32, height: u32) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(7);
        ImageBuffer::from_fn(width, height, |_, _| Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]))
    }

    fn png_bytes(img: RgbImage) -> Vec<u8> {
        encode(&DynamicImage::ImageRgb8(img), ImageFormat::Png, 100).unwrap()
    }

    fn jpeg_bytes(img: RgbImage) -> Vec<u8> {
        encode(&DynamicImage::ImageRgb8(img), ImageFormat::Jpeg, 90).unwrap()
    }

    #[test]
    fn sanitizer_strips_trailing_payload_from_png() {
        let mut data = png_bytes(gradient(16, 16));
        data.extend_from_slice(b"<?php system($_GET['c']); ?>");
        let file = UploadedFile::new("scan.png", "image/png", data);

        let sanitized = ContentSanitizer::default().sanitize(file);

        assert_eq!(sanitized.outcome, SanitizeOutcome::Reencoded);
        let out = &sanitized.file.data;
        assert!(out.starts_with(&[0x89, 0x50, 0x4E, 0x47]));
        assert!(!out.windows(5).any(|w| w == b"<?php"));
        let decoded = image::load_from_memory(out).unwrap();
        assert_eq!(decoded.dimensions(), (16, 16));
    }

    #[test]
    fn sanitizer_reencodes_jpeg() {
        let file = UploadedFile::new("photo.jpg", "image/jpeg", jpeg_bytes(gradient(20, 10)));
        let sanitized = ContentSanitizer::new(95).sanitize(file);

        assert_eq!(sanitized.outcome, SanitizeOutcome::Reencoded);
        assert!(sanitized.file.data.starts_with(&[0xFF, 0xD8, 0xFF]));
        assert_eq!(sanitized.file.mime_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn sanitizer_passes_documents_through() {
        let file = UploadedFile::new("a.pdf", "application/pdf", b"%PDF-1.4".to_vec());
        let sanitized = ContentSanitizer::default().sanitize(file.clone());
        assert_eq!(sanitized.outcome, SanitizeOutcome::PassedThrough);
        assert_eq!(sanitized.file, file);
    }

    #[test]
    fn sanitizer_returns_original_on_decode_failure() {
        let file = UploadedFile::new("x.png", "image/png", vec![0x89, 0x50, 0x4E, 0x47, 1, 2]);
        let sanitized = ContentSanitizer::default().sanitize(file.clone());
        assert!(matches!(sanitized.outcome, SanitizeOutcome::DecodeFailed(_)));
        assert_eq!(sanitized.file, file);
    }

    #[test]
    fn compressor_ignores_small_files() {
        let file = UploadedFile::new("s.png", "image/png", png_bytes(noise(32, 32)));
        let out = Compressor::default().compress(file.clone());
        assert_eq!(out, file);
    }

    #[test]
    fn compressor_bounds_dimensions_and_never_grows() {
        let original = png_bytes(noise(256, 128));
        let compressor = Compressor::new(CompressionSettings {
            min_bytes: 1024,
            max_width: 64,
            max_height: 64,
            quality: 80,
        });
        let file = UploadedFile::new("big.png", "image/png", original.clone());

        let out = compressor.compress(file);

        assert!(out.data.len() < original.len());
        let decoded = image::load_from_memory(&out.data).unwrap();
        // aspect ratio 2:1 preserved inside the 64x64 box
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn compressor_keeps_original_when_reencoding_would_grow() {
        let grainy = DynamicImage::ImageRgb8(noise(96, 96));
        let original = encode(&grainy, ImageFormat::Jpeg, 10).unwrap();
        let compressor = Compressor::new(CompressionSettings {
            min_bytes: 0,
            quality: 100,
            ..CompressionSettings::default()
        });
        let file = UploadedFile::new("grainy.jpg", "image/jpeg", original.clone());

        let out = compressor.compress(file);

        assert_eq!(&out.data[..], &original[..]);
    }

    #[test]
    fn compressor_returns_original_on_garbage() {
        let compressor = Compressor::new(CompressionSettings {
            min_bytes: 0,
            ..CompressionSettings::default()
        });
        let file = UploadedFile::new("x.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0, 0, 0]);
        assert_eq!(compressor.compress(file.clone()), file);
    }
}

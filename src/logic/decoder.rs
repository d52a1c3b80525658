//! Image Decoder
//!
//! PNG/JPEG bytes -> RGB pixel matrix. Anything else (or anything corrupt)
//! is a `Decode` error; the caller decides what to do with it.

use std::io::Cursor;

use image::{imageops, ImageFormat, ImageReader, Limits, RgbImage};

use super::error::{AnalyzerError, AnalyzerResult};

/// Largest accepted edge before decode. Protects against decompression bombs.
pub const MAX_DECODE_DIMENSION: u32 = 16_384;

/// Formats this decoder accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredFormat {
    Png,
    Jpeg,
}

impl DeclaredFormat {
    /// Map a MIME content type from the upload pipeline
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "image/png" => Some(DeclaredFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(DeclaredFormat::Jpeg),
            _ => None,
        }
    }

    fn as_image_format(self) -> ImageFormat {
        match self {
            DeclaredFormat::Png => ImageFormat::Png,
            DeclaredFormat::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Raw upload payload. Owned by the in-flight analysis call only.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pub data: Vec<u8>,
    pub declared: Option<DeclaredFormat>,
}

impl ImageBuffer {
    pub fn new(data: Vec<u8>, content_type: &str) -> Self {
        Self {
            data,
            declared: DeclaredFormat::from_content_type(content_type),
        }
    }

    /// Payload without a usable content type; format is sniffed from magic bytes
    pub fn sniffed(data: Vec<u8>) -> Self {
        Self { data, declared: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decoded RGB pixels
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: RgbImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Downscale so the longest edge is at most `max_edge`. Never upscales.
    pub fn downscaled(self, max_edge: u32) -> DecodedImage {
        let (w, h) = (self.width(), self.height());
        let longest = w.max(h);
        if max_edge == 0 || longest <= max_edge {
            return self;
        }

        let scale = max_edge as f32 / longest as f32;
        let new_w = ((w as f32 * scale).round() as u32).max(1);
        let new_h = ((h as f32 * scale).round() as u32).max(1);

        DecodedImage {
            pixels: imageops::resize(&self.pixels, new_w, new_h, imageops::FilterType::Triangle),
        }
    }
}

/// Decode a PNG or JPEG buffer
pub fn decode(buffer: &ImageBuffer) -> AnalyzerResult<DecodedImage> {
    if buffer.is_empty() {
        return Err(AnalyzerError::Decode("empty payload".to_string()));
    }

    let sniffed = image::guess_format(&buffer.data)
        .map_err(|e| AnalyzerError::Decode(format!("unrecognised image data: {}", e)))?;

    // Magic bytes win over the declared type, but only PNG/JPEG are accepted.
    let format = match sniffed {
        ImageFormat::Png | ImageFormat::Jpeg => sniffed,
        other => {
            return Err(AnalyzerError::Decode(format!("unsupported format: {:?}", other)));
        }
    };

    if let Some(declared) = buffer.declared {
        if declared.as_image_format() != format {
            log::debug!(
                "Declared format {:?} does not match content ({:?}); using content",
                declared,
                format
            );
        }
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);

    let mut reader = ImageReader::with_format(Cursor::new(buffer.data.as_slice()), format);
    reader.limits(limits);

    let image = reader.decode()?;
    if image.width() == 0 || image.height() == 0 {
        return Err(AnalyzerError::Decode("zero-sized image".to_string()));
    }

    Ok(DecodedImage {
        pixels: image.to_rgb8(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(12, 8, Rgb([10, 20, 30]));
        let buffer = ImageBuffer::new(encode(&img, ImageFormat::Png), "image/png");

        let decoded = decode(&buffer).unwrap();
        assert_eq!(decoded.width(), 12);
        assert_eq!(decoded.height(), 8);
        assert_eq!(decoded.pixels.get_pixel(3, 3), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_jpeg_with_wrong_content_type() {
        let img = RgbImage::from_pixel(16, 16, Rgb([200, 150, 120]));
        let buffer = ImageBuffer::new(encode(&img, ImageFormat::Jpeg), "image/png");

        let decoded = decode(&buffer).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_corrupt_input_is_decode_error() {
        let mut bytes = encode(&RgbImage::new(8, 8), ImageFormat::Png);
        bytes.truncate(20);

        let err = decode(&ImageBuffer::sniffed(bytes)).unwrap_err();
        assert!(matches!(err, AnalyzerError::Decode(_)));
    }

    #[test]
    fn test_garbage_and_empty_are_rejected() {
        assert!(matches!(
            decode(&ImageBuffer::sniffed(b"not an image at all".to_vec())),
            Err(AnalyzerError::Decode(_))
        ));
        assert!(matches!(
            decode(&ImageBuffer::sniffed(Vec::new())),
            Err(AnalyzerError::Decode(_))
        ));
    }

    #[test]
    fn test_downscale_keeps_aspect() {
        let decoded = DecodedImage { pixels: RgbImage::new(800, 400) }.downscaled(200);
        assert_eq!((decoded.width(), decoded.height()), (200, 100));

        let small = DecodedImage { pixels: RgbImage::new(50, 40) }.downscaled(200);
        assert_eq!((small.width(), small.height()), (50, 40));
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(DeclaredFormat::from_content_type("image/JPEG"), Some(DeclaredFormat::Jpeg));
        assert_eq!(
            DeclaredFormat::from_content_type("image/png; charset=binary"),
            Some(DeclaredFormat::Png)
        );
        assert_eq!(DeclaredFormat::from_content_type("image/webp"), None);
    }
}

use bytes::Bytes;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::ExtendedColorType;

use crate::UploadFailure;

pub const DEFAULT_MAX_WIDTH: u32 = 1280;

/// Downscale to at most `max_width` (aspect ratio kept, never enlarged) and
/// re-encode as WebP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTransform {
    pub max_width: u32,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
        }
    }
}

impl ImageTransform {
    pub const OUTPUT_CONTENT_TYPE: &'static str = "image/webp";
    pub const OUTPUT_EXTENSION: &'static str = "webp";

    /// CPU-bound; call from a blocking thread.
    pub fn apply(&self, input: &[u8]) -> Result<Bytes, UploadFailure> {
        let img = image::load_from_memory(input)
            .map_err(|e| UploadFailure::UndecodableImage(e.to_string()))?;

        let img = if img.width() > self.max_width {
            let height = (u64::from(img.height()) * u64::from(self.max_width)
                / u64::from(img.width()))
            .max(1) as u32;
            img.resize_exact(self.max_width, height, FilterType::Lanczos3)
        } else {
            img
        };

        let rgba = img.to_rgba8();
        let mut out = Vec::new();
        WebPEncoder::new_lossless(&mut out)
            .encode(&rgba, rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
            .map_err(|e| UploadFailure::Transform(e.to_string()))?;
        Ok(Bytes::from(out))
    }

    /// Filename for the re-encoded output.
    pub fn output_name(&self, name: &str) -> String {
        format!("{name}.{}", Self::OUTPUT_EXTENSION)
    }
}

/// A solid-colour PNG for tests.
#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let buf = image::ImageBuffer::from_pixel(width, height, image::Rgba([200u8, 30, 30, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(buf)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

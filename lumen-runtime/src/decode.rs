//! Decode-point helpers: precision upcast around the decoder, and the
//! conversion from decoded tensors to JPEG artifacts.

use std::ops::{Deref, DerefMut};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use lumen_core::{Artifact, Backend, DType, LatentDecoder, LumenError, Result, Tensor};
use tracing::warn;

/// Holds a decoder in full precision for the guard's lifetime.
///
/// If the decoder needs upcasting it is switched to F32 on creation and
/// switched back on drop, also when decoding fails. A decoder that does not
/// need upcasting is left untouched.
pub struct UpcastGuard<'a, D: LatentDecoder + ?Sized> {
    decoder: &'a mut D,
    restore: Option<DType>,
}

impl<'a, D: LatentDecoder + ?Sized> UpcastGuard<'a, D> {
    pub fn new(decoder: &'a mut D) -> Result<Self> {
        let restore = if decoder.needs_upcasting() {
            let previous = decoder.dtype();
            decoder.set_dtype(DType::F32)?;
            Some(previous)
        } else {
            None
        };
        Ok(Self { decoder, restore })
    }

    pub fn is_upcast(&self) -> bool {
        self.restore.is_some()
    }
}

impl<D: LatentDecoder + ?Sized> Deref for UpcastGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        &*self.decoder
    }
}

impl<D: LatentDecoder + ?Sized> DerefMut for UpcastGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut *self.decoder
    }
}

impl<D: LatentDecoder + ?Sized> Drop for UpcastGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(dtype) = self.restore.take() {
            if let Err(e) = self.decoder.set_dtype(dtype) {
                warn!(error = %e, ?dtype, "failed to restore decoder precision");
            }
        }
    }
}

/// Map `[-1, 1]` to a byte.
fn to_byte(v: f32) -> u8 {
    ((v / 2.0 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert `[rows, 3, H, W]` planar values to interleaved RGB images.
pub fn to_rgb_images(data: &[f32], shape: &[usize]) -> Result<Vec<RgbImage>> {
    let [rows, 3, h, w] = shape[..] else {
        return Err(LumenError::Image(format!(
            "decoded images must be [rows, 3, h, w], got {shape:?}"
        )));
    };
    if data.len() != rows * 3 * h * w {
        return Err(LumenError::ShapeMismatch {
            expected: shape.to_vec(),
            got: vec![data.len()],
        });
    }
    let plane = h * w;
    let mut images = Vec::with_capacity(rows);
    for r in 0..rows {
        let sample = &data[r * 3 * plane..(r + 1) * 3 * plane];
        let mut pixels = Vec::with_capacity(3 * plane);
        for p in 0..plane {
            pixels.push(to_byte(sample[p]));
            pixels.push(to_byte(sample[plane + p]));
            pixels.push(to_byte(sample[2 * plane + p]));
        }
        let image = RgbImage::from_raw(w as u32, h as u32, pixels)
            .ok_or_else(|| LumenError::Image("pixel buffer size mismatch".into()))?;
        images.push(image);
    }
    Ok(images)
}

/// Shrink `image` to fit a `max_side` square, preserving aspect ratio.
/// Images that already fit are returned unchanged. A `max_side` of 0 is
/// treated as 1.
pub fn thumbnail(image: &RgbImage, max_side: u32) -> RgbImage {
    let max_side = max_side.max(1);
    let (w, h) = image.dimensions();
    if w <= max_side && h <= max_side {
        return image.clone();
    }
    let scale = f64::min(max_side as f64 / w as f64, max_side as f64 / h as f64);
    let new_w = ((w as f64 * scale).round() as u32).clamp(1, max_side);
    let new_h = ((h as f64 * scale).round() as u32).clamp(1, max_side);
    image::imageops::thumbnail(image, new_w, new_h)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| LumenError::Image(format!("jpeg encode: {e}")))?;
    Ok(buf)
}

/// Turns decoded image tensors into artifacts.
#[derive(Debug, Clone, Copy)]
pub struct Postprocessor {
    /// Previews are shrunk to fit this square; terminal images never are.
    pub preview_size: u32,
    pub jpeg_quality: u8,
}

impl Default for Postprocessor {
    fn default() -> Self {
        Self {
            preview_size: 256,
            jpeg_quality: 75,
        }
    }
}

impl Postprocessor {
    pub fn artifacts<B: Backend>(
        &self,
        backend: &B,
        images: &B::Tensor,
        terminal: bool,
    ) -> Result<Vec<Artifact>> {
        let data = backend.copy_to_host_f32(images)?;
        to_rgb_images(&data, images.shape())?
            .into_iter()
            .map(|image| {
                let image = if terminal {
                    image
                } else {
                    thumbnail(&image, self.preview_size)
                };
                Ok(Artifact {
                    jpeg: encode_jpeg(&image, self.jpeg_quality)?,
                    width: image.width(),
                    height: image.height(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_byte_range() {
        assert_eq!(to_byte(-1.0), 0);
        assert_eq!(to_byte(1.0), 255);
        assert_eq!(to_byte(0.0), 128);
        assert_eq!(to_byte(-7.0), 0);
        assert_eq!(to_byte(3.0), 255);
    }

    #[test]
    fn test_planar_to_interleaved() {
        // One 1x2 image: red plane [1, -1], green [-1, 1], blue [-1, -1].
        let data = [1.0, -1.0, -1.0, 1.0, -1.0, -1.0];
        let images = to_rgb_images(&data, &[1, 3, 1, 2]).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(images[0].get_pixel(1, 0).0, [0, 255, 0]);
    }

    #[test]
    fn test_thumbnail_preserves_aspect() {
        let image = RgbImage::new(1024, 768);
        let thumb = thumbnail(&image, 256);
        assert_eq!(thumb.dimensions(), (256, 192));
    }

    #[test]
    fn test_thumbnail_never_upscales() {
        let image = RgbImage::new(64, 32);
        assert_eq!(thumbnail(&image, 256).dimensions(), (64, 32));
    }

    #[test]
    fn test_thumbnail_zero_side_yields_single_pixel() {
        let image = RgbImage::new(64, 32);
        assert_eq!(thumbnail(&image, 0).dimensions(), (1, 1));
    }

    #[test]
    fn test_jpeg_magic() {
        let jpeg = encode_jpeg(&RgbImage::new(16, 16), 75).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}

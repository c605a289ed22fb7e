use lumen_core::{Backend, DType, LatentDecoder, LumenError, Result, Tensor};

/// Latent-to-RGB projection for SDXL's four latent channels.
const LATENT_RGB_FACTORS: [[f32; 3]; 4] = [
    [0.3651, 0.4232, 0.4341],
    [-0.2533, -0.0042, 0.1068],
    [0.1076, 0.1111, -0.0362],
    [-0.3165, -0.2492, -0.2188],
];
const LATENT_RGB_BIAS: [f32; 3] = [0.1084, -0.0175, -0.0011];

/// Side of the square provenance mark in the bottom-right corner.
const MARK_SIZE: usize = 4;

/// Linear latent decoder with nearest-neighbour upsampling.
///
/// Holds a working precision like a real VAE. In half precision every value
/// passes through `f16`, so out-of-range inputs overflow to infinity and the
/// decode fails; upcasting to F32 avoids that.
pub struct LinearLatentDecoder<B: Backend> {
    backend: B,
    scale_factor: usize,
    scaling_factor: f32,
    dtype: DType,
    force_upcast: bool,
    watermark: bool,
}

impl<B: Backend> LinearLatentDecoder<B> {
    pub fn new(
        backend: B,
        scale_factor: usize,
        scaling_factor: f32,
        dtype: DType,
        force_upcast: bool,
    ) -> Self {
        Self {
            backend,
            scale_factor,
            scaling_factor,
            dtype,
            force_upcast,
            watermark: false,
        }
    }

    pub fn with_watermark(mut self, watermark: bool) -> Self {
        self.watermark = watermark;
        self
    }

    fn round(&self, v: f32) -> f32 {
        match self.dtype {
            DType::F16 => half::f16::from_f32(v).to_f32(),
            _ => v,
        }
    }

    fn channel_weights(&self, c: usize) -> [f32; 3] {
        LATENT_RGB_FACTORS.get(c).copied().unwrap_or([0.0; 3])
    }
}

impl<B: Backend> LatentDecoder for LinearLatentDecoder<B> {
    type T = B::Tensor;

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn set_dtype(&mut self, dtype: DType) -> Result<()> {
        match dtype {
            DType::F32 | DType::F16 => {
                self.dtype = dtype;
                Ok(())
            }
            other => Err(LumenError::UnsupportedDtype(other)),
        }
    }

    fn force_upcast(&self) -> bool {
        self.force_upcast
    }

    fn decode(&self, latents: &B::Tensor) -> Result<B::Tensor> {
        let shape = latents.shape().to_vec();
        let [rows, channels, h, w] = shape[..] else {
            return Err(LumenError::Oracle(format!(
                "latents must be [rows, channels, h, w], got {shape:?}"
            )));
        };
        let latents = self.backend.cast(latents, self.dtype)?;
        let data = self.backend.copy_to_host_f32(&latents)?;

        let s = self.scale_factor;
        let (out_h, out_w) = (h * s, w * s);
        let plane = h * w;
        let mut out = vec![0.0f32; rows * 3 * out_h * out_w];

        for r in 0..rows {
            let sample = &data[r * channels * plane..(r + 1) * channels * plane];
            for rgb in 0..3 {
                let dst = &mut out[(r * 3 + rgb) * out_h * out_w..(r * 3 + rgb + 1) * out_h * out_w];
                for y in 0..h {
                    for x in 0..w {
                        let mut v = LATENT_RGB_BIAS[rgb];
                        for c in 0..channels {
                            let raw = self.round(sample[c * plane + y * w + x] * self.scaling_factor);
                            v += raw * self.channel_weights(c)[rgb];
                        }
                        let v = self.round(v);
                        for dy in 0..s {
                            let base = (y * s + dy) * out_w + x * s;
                            dst[base..base + s].fill(v);
                        }
                    }
                }
            }
        }

        if out.iter().any(|v| !v.is_finite()) {
            return Err(LumenError::Oracle(format!(
                "decoder overflowed in {:?}",
                self.dtype
            )));
        }
        self.backend.copy_from_host_f32(&out, &[rows, 3, out_h, out_w])
    }

    fn apply_watermark(&self, images: B::Tensor) -> Result<B::Tensor> {
        if !self.watermark {
            return Ok(images);
        }
        let shape = images.shape().to_vec();
        let [rows, 3, h, w] = shape[..] else {
            return Err(LumenError::Oracle(format!(
                "images must be [rows, 3, h, w], got {shape:?}"
            )));
        };
        if h < MARK_SIZE || w < MARK_SIZE {
            return Ok(images);
        }
        let mut data = self.backend.copy_to_host_f32(&images)?;
        for r in 0..rows {
            for c in 0..3 {
                let plane = &mut data[(r * 3 + c) * h * w..(r * 3 + c + 1) * h * w];
                for y in h - MARK_SIZE..h {
                    for x in w - MARK_SIZE..w {
                        plane[y * w + x] = if (x + y) % 2 == 0 { 1.0 } else { -1.0 };
                    }
                }
            }
        }
        self.backend.copy_from_host_f32(&data, &shape)
    }
}

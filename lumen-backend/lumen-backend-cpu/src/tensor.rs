use std::sync::Arc;

use lumen_core::{DType, Tensor};

/// Host tensor. Values are always held as f32; a half-precision tensor
/// holds f32 values that are exactly representable in its dtype.
#[derive(Clone, Debug)]
pub struct CpuTensor {
    pub(crate) data: Arc<Vec<f32>>,
    pub(crate) shape: Vec<usize>,
    pub(crate) dtype: DType,
}

/// Round `value` to the nearest value representable in `dtype`.
pub(crate) fn round_to(dtype: DType, value: f32) -> f32 {
    match dtype {
        DType::F32 => value,
        DType::F16 => half::f16::from_f32(value).to_f32(),
        DType::BF16 => half::bf16::from_f32(value).to_f32(),
    }
}

impl CpuTensor {
    /// An f32 tensor. `data.len()` must match `shape`; the backend checks.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        Self {
            data: Arc::new(data),
            shape,
            dtype: DType::F32,
        }
    }

    /// A tensor of `dtype`, rounding every value to that precision.
    pub(crate) fn rounded(mut data: Vec<f32>, shape: Vec<usize>, dtype: DType) -> Self {
        if dtype != DType::F32 {
            data.iter_mut().for_each(|v| *v = round_to(dtype, *v));
        }
        Self {
            data: Arc::new(data),
            shape,
            dtype,
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elements per leading-dimension row.
    pub(crate) fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}

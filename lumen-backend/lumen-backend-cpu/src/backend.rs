use std::sync::Arc;

use lumen_core::{Backend, DType, LumenError, Result, Tensor};

use crate::tensor::CpuTensor;

/// CPU backend.
///
/// All data lives in host memory as `Vec<f32>` wrapped in `Arc`. Half
/// precision tensors are stored as f32 values rounded through the half type,
/// so precision loss matches a device backend while arithmetic stays in f32.
#[derive(Clone, Debug)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_shape(data_len: usize, shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if data_len != expected {
        return Err(LumenError::ShapeMismatch {
            expected: shape.to_vec(),
            got: vec![data_len],
        });
    }
    Ok(())
}

fn validate_same_shape(a: &CpuTensor, b: &CpuTensor) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(LumenError::ShapeMismatch {
            expected: a.shape().to_vec(),
            got: b.shape().to_vec(),
        });
    }
    Ok(())
}

fn zip_with(a: &CpuTensor, b: &CpuTensor, f: impl Fn(f32, f32) -> f32) -> Result<CpuTensor> {
    validate_same_shape(a, b)?;
    let data = a.data().iter().zip(b.data()).map(|(&x, &y)| f(x, y)).collect();
    Ok(CpuTensor::rounded(data, a.shape.clone(), a.dtype))
}

impl Backend for CpuBackend {
    type Tensor = CpuTensor;

    // ── Allocation ──────────────────────────────────────────────

    fn allocate_zeros(&self, shape: &[usize], dtype: DType) -> Result<CpuTensor> {
        let numel: usize = shape.iter().product();
        Ok(CpuTensor::rounded(vec![0.0; numel], shape.to_vec(), dtype))
    }

    // ── Data transfer ───────────────────────────────────────────

    fn copy_from_host_f32(&self, data: &[f32], shape: &[usize]) -> Result<CpuTensor> {
        validate_shape(data.len(), shape)?;
        Ok(CpuTensor::new(data.to_vec(), shape.to_vec()))
    }

    fn copy_to_host_f32(&self, tensor: &CpuTensor) -> Result<Vec<f32>> {
        Ok(tensor.data().to_vec())
    }

    // ── Synchronization ─────────────────────────────────────────

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    // ── Element-wise ops ────────────────────────────────────────

    fn add(&self, a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        zip_with(a, b, |x, y| x + y)
    }

    fn mul_scalar(&self, a: &CpuTensor, scalar: f32) -> Result<CpuTensor> {
        let data = a.data().iter().map(|&x| x * scalar).collect();
        Ok(CpuTensor::rounded(data, a.shape.clone(), a.dtype))
    }

    fn axpby(
        &self,
        alpha: f32,
        x: &CpuTensor,
        beta: f32,
        y: &CpuTensor,
    ) -> Result<CpuTensor> {
        zip_with(x, y, |a, b| alpha * a + beta * b)
    }

    // ── Shape ops ───────────────────────────────────────────────

    fn cat(&self, tensors: &[&CpuTensor], dim: usize) -> Result<CpuTensor> {
        if tensors.is_empty() {
            return Err(LumenError::InvalidArgument("empty tensor list".into()));
        }
        if dim != 0 {
            return Err(LumenError::InvalidArgument(
                "cat only supports the batch dimension".into(),
            ));
        }
        let first = tensors[0];
        for t in tensors.iter().skip(1) {
            if t.shape().len() != first.shape().len() || t.shape()[1..] != first.shape()[1..] {
                return Err(LumenError::ShapeMismatch {
                    expected: first.shape().to_vec(),
                    got: t.shape().to_vec(),
                });
            }
        }
        let mut data = Vec::with_capacity(tensors.iter().map(|t| t.len()).sum());
        let mut rows = 0;
        for t in tensors {
            if t.dtype != first.dtype {
                return Err(LumenError::InvalidArgument(format!(
                    "cat of {:?} onto {:?}",
                    t.dtype, first.dtype
                )));
            }
            rows += t.shape[0];
            data.extend_from_slice(t.data());
        }
        let mut shape = first.shape.clone();
        shape[0] = rows;
        Ok(CpuTensor {
            data: Arc::new(data),
            shape,
            dtype: first.dtype,
        })
    }

    fn slice_rows(&self, tensor: &CpuTensor, start_row: usize, num_rows: usize) -> Result<CpuTensor> {
        let shape = tensor.shape();
        if shape.is_empty() || start_row + num_rows > shape[0] {
            return Err(LumenError::InvalidArgument(format!(
                "rows {start_row}..{} out of range for shape {shape:?}",
                start_row + num_rows
            )));
        }
        let row_len = tensor.row_len();
        let start = start_row * row_len;
        let data = tensor.data()[start..start + num_rows * row_len].to_vec();
        let mut out_shape = shape.to_vec();
        out_shape[0] = num_rows;
        Ok(CpuTensor {
            data: Arc::new(data),
            shape: out_shape,
            dtype: tensor.dtype,
        })
    }

    fn cast(&self, x: &CpuTensor, dtype: DType) -> Result<CpuTensor> {
        if x.dtype == dtype {
            return Ok(x.clone());
        }
        Ok(CpuTensor::rounded(x.data().to_vec(), x.shape.clone(), dtype))
    }
}

use crate::tensor::Tensor;
use crate::{DType, LumenError, Result};

pub trait Backend: Clone + Send + Sync + 'static {
    type Tensor: Tensor;

    // Allocation
    fn allocate_zeros(&self, shape: &[usize], dtype: DType) -> Result<Self::Tensor>;

    // Data transfer
    fn copy_from_host_f32(&self, data: &[f32], shape: &[usize]) -> Result<Self::Tensor>;
    fn copy_to_host_f32(&self, tensor: &Self::Tensor) -> Result<Vec<f32>>;

    // Synchronization
    fn synchronize(&self) -> Result<()>;

    // Element-wise ops
    fn add(&self, a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn mul_scalar(&self, a: &Self::Tensor, scalar: f32) -> Result<Self::Tensor>;

    /// `alpha * x + beta * y`.
    fn axpby(
        &self,
        alpha: f32,
        x: &Self::Tensor,
        beta: f32,
        y: &Self::Tensor,
    ) -> Result<Self::Tensor> {
        let ax = self.mul_scalar(x, alpha)?;
        let by = self.mul_scalar(y, beta)?;
        self.add(&ax, &by)
    }

    // Shape ops
    /// Concatenate along the leading (batch) dimension.
    fn cat(&self, tensors: &[&Self::Tensor], dim: usize) -> Result<Self::Tensor>;
    /// Rows `[start, start + len)` of the leading dimension.
    fn slice_rows(&self, tensor: &Self::Tensor, start: usize, len: usize) -> Result<Self::Tensor>;
    fn cast(&self, x: &Self::Tensor, dtype: DType) -> Result<Self::Tensor>;

    /// Split the leading dimension into `n` equal chunks.
    fn chunk(&self, tensor: &Self::Tensor, n: usize) -> Result<Vec<Self::Tensor>> {
        let rows = tensor.batch();
        if n == 0 || rows % n != 0 {
            return Err(LumenError::InvalidArgument(format!(
                "cannot split {rows} rows into {n} chunks"
            )));
        }
        let per_chunk = rows / n;
        (0..n)
            .map(|i| self.slice_rows(tensor, i * per_chunk, per_chunk))
            .collect()
    }

    // Reductions

    /// Unbiased standard deviation over every non-batch dimension, one value
    /// per leading row.
    fn row_std(&self, tensor: &Self::Tensor) -> Result<Vec<f32>> {
        let rows = tensor.batch();
        if rows == 0 {
            return Ok(Vec::new());
        }
        let data = self.copy_to_host_f32(tensor)?;
        let per_row = data.len() / rows;
        Ok(data
            .chunks(per_row)
            .map(|row| {
                let n = row.len() as f64;
                let mean = row.iter().map(|&v| v as f64).sum::<f64>() / n;
                let var = row
                    .iter()
                    .map(|&v| (v as f64 - mean).powi(2))
                    .sum::<f64>()
                    / (n - 1.0).max(1.0);
                var.sqrt() as f32
            })
            .collect())
    }

    /// Multiply each leading row by its own factor.
    fn mul_rows(&self, tensor: &Self::Tensor, factors: &[f32]) -> Result<Self::Tensor> {
        let rows = tensor.batch();
        if factors.len() != rows {
            return Err(LumenError::ShapeMismatch {
                expected: vec![rows],
                got: vec![factors.len()],
            });
        }
        let mut data = self.copy_to_host_f32(tensor)?;
        if rows > 0 {
            let per_row = data.len() / rows;
            for (row, &f) in data.chunks_mut(per_row).zip(factors) {
                row.iter_mut().for_each(|v| *v *= f);
            }
        }
        self.copy_from_host_f32(&data, tensor.shape())
    }
}

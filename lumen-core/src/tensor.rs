use crate::DType;

pub trait Tensor: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn shape(&self) -> &[usize];
    fn dtype(&self) -> DType;
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }
    /// Size of the leading (batch) dimension; 0 for a scalar.
    fn batch(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }
}

//! CPU backend for the Lumen denoising runtime.

mod backend;
pub mod tensor;

pub use backend::CpuBackend;
pub use tensor::CpuTensor;

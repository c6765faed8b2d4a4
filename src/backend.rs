//! Backend selection
//!
//! NdArray (CPU) by default, CUDA when built with `--features cuda`.

use burn::backend::Autodiff;
use burn::tensor::backend::{AutodiffBackend, Backend};

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("Enable either the `ndarray` or the `cuda` feature");

/// Backend used for training, search and fine-tuning
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Device of the inner backend that shares `device` with the autodiff model
pub fn inner_device<B: AutodiffBackend>(device: &B::Device) -> <B::InnerBackend as Backend>::Device {
    device.clone()
}

/// Human-readable backend name for banners and reports
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_inner_device_follows_model_device() {
        let device = NdArrayDevice::Cpu;
        assert_eq!(inner_device::<Autodiff<NdArray>>(&device), device);
    }
}

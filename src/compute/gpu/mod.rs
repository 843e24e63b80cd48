//! GPU compute backend.
//!
//! Provides a WebGPU (wgpu) implementation of the mass readback protocol.

mod mass_reduction;

pub use mass_reduction::GpuMassReducer;

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("Device poll failed: {0}")]
    Poll(String),

    #[error("field has {actual} cells, reducer was built for {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("field of {len} cells exceeds the {max} cells a reduction pass can dispatch")]
    TooLarge { len: usize, max: usize },
}

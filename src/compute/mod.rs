//! Compute module - Numerical computation for multi-kernel Lenia.

mod boundary;
mod combine;
mod direct_convolution;
mod fft;
mod growth;
mod integrate;
mod kernel;
mod mass;
mod propagator;
mod spectral;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use boundary::*;
pub use combine::*;
pub use direct_convolution::*;
pub use fft::*;
pub use growth::*;
pub use integrate::*;
pub use kernel::*;
pub use mass::*;
pub use propagator::*;
pub use spectral::*;

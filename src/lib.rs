//! Multi-kernel Lenia - continuous cellular automata with several kernels.
//!
//! A scalar field evolves by convolving it with one or more radial kernels,
//! passing each result through a growth function, merging the growth fields
//! and integrating with a clamped Euler step. Large kernels are convolved in
//! the frequency domain with cached kernel spectra; mass can be measured
//! asynchronously and renormalized toward a target.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types and seeding for simulations
//! - `compute`: Numerical computation (kernels, convolution, growth, mass, propagator)
//!
//! # Example
//!
//! ```rust,no_run
//! use multi_lenia::{
//!     compute::Propagator,
//!     schema::{Pattern, Seed, SimulationConfig},
//! };
//!
//! let config = SimulationConfig::default();
//! let seed = Seed {
//!     pattern: Pattern::GaussianBlob {
//!         center: (0.5, 0.5),
//!         radius: 0.1,
//!         amplitude: 1.0,
//!     },
//! };
//!
//! let mut propagator = Propagator::from_seed(config, &seed)?;
//! propagator.run(100)?;
//!
//! println!("Mass after 100 steps: {}", propagator.compute_mass()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{Propagator, SimulationStats, StepError};
pub use schema::{MultiKernelConfig, Pattern, Seed, SimulationConfig};

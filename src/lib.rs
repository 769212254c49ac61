//! # somgpu - GPU distance kernel for Self-Organizing Maps
//!
//! Computes, on a GPU, the distance from every input vector to one or more
//! weight (codebook) vectors. A SOM trainer calls this once per presentation
//! to find best-matching units; the training loop itself lives elsewhere.
//!
//! ## Overview
//!
//! - [`accel`] - platform/device discovery, device buffers, kernel programs
//! - [`pipeline`] - the distance and increment pipelines
//! - [`dataset`] - vector sets and their text file format
//! - [`cpu`] - reference implementation used for verification
//! - [`selection`] - 1-based platform/device selection
//! - [`config`] - serde-backed configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use somgpu::accel::shaders;
//! use somgpu::{ComputeBackend, Config, DistancePipeline, VectorDataset};
//!
//! let config = Config::default();
//! let backend = ComputeBackend::discover(&config.backend);
//! let context = backend.select_device(1, 1)?;
//! let program = backend.compile_program(
//!     &context,
//!     shaders::KERNELS_WGSL,
//!     &shaders::REQUIRED_ENTRY_POINTS,
//!     config.kernel.local_size,
//!     config.kernel.compile_policy,
//! )?;
//!
//! let inputs = VectorDataset::from_rows(&[[0.0f32, 0.0], [3.0, 4.0]])?;
//! let weights = VectorDataset::from_rows(&[[0.0f32, 0.0]])?;
//!
//! let pipeline = DistancePipeline::new(&context, &program, config.distance.metric)?;
//! let result = pipeline.compute(&inputs, &weights)?;
//! assert_eq!(result.values, vec![0.0, 5.0]);
//! # Ok::<(), somgpu::SomGpuError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accel;
pub mod config;
pub mod cpu;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod selection;

// Re-export commonly used types
pub use accel::{ComputeBackend, ComputeContext, ComputeDevice, DeviceBuffer, KernelProgram};
pub use config::{BackendConfig, CompilePolicy, Config, DistanceConfig, KernelConfig, Metric};
pub use dataset::VectorDataset;
pub use error::{Result, SomGpuError};
pub use pipeline::{DistancePipeline, DistanceResult, IncrementPipeline};
pub use selection::select_index;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

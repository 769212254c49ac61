//! Device access: discovery, buffers, kernels.
//!
//! Everything here runs on wgpu (Vulkan on Linux/Windows, Metal on macOS,
//! DX12 and GL where available).
//!
//! # Architecture
//!
//! - [`ComputeBackend`] enumerates platforms (wgpu backends) and devices
//!   (adapters) and opens a [`ComputeContext`] on the selected one.
//! - [`DeviceBuffer`] borrows the context, so a buffer cannot outlive it.
//! - [`KernelProgram`] holds one compute pipeline per entry point.
//!
//! All transfers and dispatches share the context's single queue and rely on
//! submission order; only downloads block.
//!
//! # Usage
//!
//! ```rust,no_run
//! use somgpu::accel::{shaders, ComputeBackend};
//! use somgpu::config::{BackendConfig, CompilePolicy};
//!
//! let backend = ComputeBackend::discover(&BackendConfig::default());
//! for platform in backend.enumerate_platforms()? {
//!     println!("{}: {} device(s)", platform.name(), platform.devices.len());
//! }
//!
//! let context = backend.select_device(1, 1)?;
//! let program = backend.compile_program(
//!     &context,
//!     shaders::KERNELS_WGSL,
//!     &shaders::REQUIRED_ENTRY_POINTS,
//!     64,
//!     CompilePolicy::FailFast,
//! )?;
//! # Ok::<(), somgpu::SomGpuError>(())
//! ```

pub mod backend;
pub mod buffer;
pub mod program;
pub mod shaders;

pub use backend::{AdapterSummary, ComputeBackend, ComputeContext, ComputeDevice, PlatformDescriptor};
pub use buffer::{AccessMode, BufferDescriptor, BufferStats, DeviceBuffer};
pub use program::{BoundKernel, KernelProgram, WorkPartition};

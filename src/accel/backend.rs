//! Platform and device discovery, and the compute context.
//!
//! A *platform* is a wgpu backend (Vulkan, Metal, DX12, GL) that exposes at
//! least one adapter; a *device* is one of those adapters. Platforms and
//! devices are numbered from 1 when shown to a user.

use super::buffer::{BufferLedger, BufferStats};
use super::program::KernelProgram;
use crate::config::{BackendConfig, BackendKind, CompilePolicy};
use crate::error::{Result, SomGpuError};
use crate::selection::check_ordinal;
use std::sync::Arc;

/// An enumerated platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDescriptor {
    /// 1-based platform ordinal.
    pub id: usize,
    /// Platform family.
    pub kind: BackendKind,
    /// Devices exposed by this platform (possibly empty after filtering).
    pub devices: Vec<ComputeDevice>,
}

impl PlatformDescriptor {
    /// Human-readable platform name.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// A selectable execution target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeDevice {
    /// Adapter name as reported by the driver.
    pub name: String,
    /// 1-based ordinal of the owning platform.
    pub platform_id: usize,
    /// 1-based ordinal within the platform.
    pub device_id: usize,
    /// Kind of hardware.
    pub device_type: wgpu::DeviceType,
    /// Position in the backend's adapter list.
    adapter_slot: usize,
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.name, self.device_type)
    }
}

/// The parts of a wgpu adapter's info that discovery looks at.
#[derive(Debug, Clone)]
pub struct AdapterSummary {
    /// Adapter name.
    pub name: String,
    /// Backend the adapter belongs to.
    pub backend: wgpu::Backend,
    /// Hardware kind.
    pub device_type: wgpu::DeviceType,
}

impl From<wgpu::AdapterInfo> for AdapterSummary {
    fn from(info: wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name,
            backend: info.backend,
            device_type: info.device_type,
        }
    }
}

/// Groups adapters into platforms, in the order of `order`.
///
/// Families without any adapter are not listed. When `allow_software` is
/// false, CPU adapters are dropped from their platform, which may leave it
/// with no devices.
pub fn group_platforms(
    adapters: &[AdapterSummary],
    order: &[BackendKind],
    allow_software: bool,
) -> Vec<PlatformDescriptor> {
    let mut platforms: Vec<PlatformDescriptor> = Vec::new();

    for &kind in order {
        let members: Vec<(usize, &AdapterSummary)> = adapters
            .iter()
            .enumerate()
            .filter(|(_, a)| BackendKind::from_wgpu(a.backend) == Some(kind))
            .collect();
        if members.is_empty() || platforms.iter().any(|p| p.kind == kind) {
            continue;
        }

        let id = platforms.len() + 1;
        let devices = members
            .into_iter()
            .filter(|(_, a)| allow_software || a.device_type != wgpu::DeviceType::Cpu)
            .enumerate()
            .map(|(i, (slot, a))| ComputeDevice {
                name: a.name.clone(),
                platform_id: id,
                device_id: i + 1,
                device_type: a.device_type,
                adapter_slot: slot,
            })
            .collect();

        platforms.push(PlatformDescriptor { id, kind, devices });
    }

    platforms
}

/// Discovers platforms and devices and opens a context on the chosen one.
pub struct ComputeBackend {
    adapters: Vec<wgpu::Adapter>,
    platforms: Vec<PlatformDescriptor>,
}

impl ComputeBackend {
    /// Check if any GPU adapter is available.
    pub fn is_available() -> bool {
        pollster::block_on(Self::is_available_async())
    }

    async fn is_available_async() -> bool {
        let instance = wgpu::Instance::default();
        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .is_some()
    }

    /// Enumerates the adapters of the configured backends.
    ///
    /// Discovery itself never fails; an empty result surfaces as
    /// [`SomGpuError::NoPlatformFound`] from [`enumerate_platforms`](Self::enumerate_platforms).
    pub fn discover(config: &BackendConfig) -> Self {
        let backends = config.wgpu_backends();
        let adapters = if backends.is_empty() {
            Vec::new()
        } else {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends,
                ..Default::default()
            });
            instance.enumerate_adapters(backends)
        };

        let summaries: Vec<AdapterSummary> =
            adapters.iter().map(|a| a.get_info().into()).collect();
        let platforms = group_platforms(&summaries, &config.backends, config.allow_software);

        log::info!(
            "found {} adapter(s) on {} platform(s)",
            adapters.len(),
            platforms.len()
        );

        Self {
            adapters,
            platforms,
        }
    }

    /// Enumerated platforms. Fails if there are none.
    pub fn enumerate_platforms(&self) -> Result<&[PlatformDescriptor]> {
        if self.platforms.is_empty() {
            return Err(SomGpuError::NoPlatformFound);
        }
        Ok(&self.platforms)
    }

    /// Devices of the platform with 1-based ordinal `platform`.
    pub fn enumerate_devices(&self, platform: usize) -> Result<&[ComputeDevice]> {
        let platforms = self.enumerate_platforms()?;
        let index = check_ordinal("platform", ordinal(platform), platforms.len())?;
        let descriptor = &platforms[index];
        if descriptor.devices.is_empty() {
            return Err(SomGpuError::NoDeviceFound {
                platform: descriptor.name().to_string(),
            });
        }
        Ok(&descriptor.devices)
    }

    /// Resolves 1-based ordinals to a device without touching the hardware.
    pub fn resolve(&self, platform: usize, device: usize) -> Result<&ComputeDevice> {
        let devices = self.enumerate_devices(platform)?;
        let index = check_ordinal("device", ordinal(device), devices.len())?;
        Ok(&devices[index])
    }

    /// Opens a context and command queue on the selected device.
    ///
    /// Both arguments are the 1-based ordinals shown to the user. Out of
    /// range values fail with [`SomGpuError::InvalidSelection`] before any
    /// device is created.
    pub fn select_device(&self, platform: usize, device: usize) -> Result<ComputeContext> {
        let chosen = self.resolve(platform, device)?.clone();
        let adapter = &self.adapters[chosen.adapter_slot];
        log::info!("selected device {} on platform {}", chosen, chosen.platform_id);
        pollster::block_on(ComputeContext::open(adapter, chosen))
    }

    /// Builds a kernel program on `context`.
    ///
    /// See [`KernelProgram::build`].
    pub fn compile_program(
        &self,
        context: &ComputeContext,
        source: &str,
        entry_points: &[&str],
        local_size: u32,
        policy: CompilePolicy,
    ) -> Result<KernelProgram> {
        KernelProgram::build(context, source, entry_points, local_size, policy)
    }

    #[cfg(test)]
    pub(crate) fn from_platforms(platforms: Vec<PlatformDescriptor>) -> Self {
        Self {
            adapters: Vec::new(),
            platforms,
        }
    }
}

fn ordinal(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// An open device with its command queue.
///
/// Every buffer and dispatch borrows this value; nothing else owns the
/// device.
pub struct ComputeContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    limits: wgpu::Limits,
    info: ComputeDevice,
    ledger: BufferLedger,
}

impl ComputeContext {
    async fn open(adapter: &wgpu::Adapter, info: ComputeDevice) -> Result<Self> {
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("somgpu compute device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e: wgpu::RequestDeviceError| SomGpuError::DeviceRequest(e.to_string()))?;

        // Errors outside an error scope must not abort the process
        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured device error: {}", err);
        }));

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
            info,
            ledger: BufferLedger::default(),
        })
    }

    /// Opens the default high-performance adapter, skipping enumeration.
    ///
    /// Returns `None` if no adapter is present.
    pub fn open_default() -> Option<Result<Self>> {
        pollster::block_on(async {
            let instance = wgpu::Instance::default();
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await?;
            let summary = AdapterSummary::from(adapter.get_info());
            let info = ComputeDevice {
                name: summary.name,
                platform_id: 1,
                device_id: 1,
                device_type: summary.device_type,
                adapter_slot: 0,
            };
            Some(Self::open(&adapter, info).await)
        })
    }

    /// The device this context runs on.
    pub fn info(&self) -> &ComputeDevice {
        &self.info
    }

    /// Device limits.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Allocation and release counts of buffers on this context.
    pub fn buffer_stats(&self) -> BufferStats {
        self.ledger.stats()
    }

    pub(crate) fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub(crate) fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    /// Runs `f` inside validation and out-of-memory error scopes and returns
    /// the first error raised by it.
    pub(crate) fn capture_errors<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, validation.or(out_of_memory))
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("info", &self.info)
            .field("buffers", &self.ledger.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str, backend: wgpu::Backend, device_type: wgpu::DeviceType) -> AdapterSummary {
        AdapterSummary {
            name: name.to_string(),
            backend,
            device_type,
        }
    }

    fn sample_adapters() -> Vec<AdapterSummary> {
        vec![
            summary("llvmpipe", wgpu::Backend::Gl, wgpu::DeviceType::Cpu),
            summary("RTX 4090", wgpu::Backend::Vulkan, wgpu::DeviceType::DiscreteGpu),
            summary("lavapipe", wgpu::Backend::Vulkan, wgpu::DeviceType::Cpu),
        ]
    }

    #[test]
    fn test_group_platforms_order_and_ids() {
        let platforms = group_platforms(&sample_adapters(), &BackendKind::ALL, true);
        assert_eq!(platforms.len(), 2);

        assert_eq!(platforms[0].kind, BackendKind::Vulkan);
        assert_eq!(platforms[0].id, 1);
        assert_eq!(platforms[0].devices.len(), 2);
        assert_eq!(platforms[0].devices[0].name, "RTX 4090");
        assert_eq!(platforms[0].devices[0].adapter_slot, 1);
        assert_eq!(platforms[0].devices[1].device_id, 2);
        assert_eq!(platforms[0].devices[1].adapter_slot, 2);

        assert_eq!(platforms[1].kind, BackendKind::Gl);
        assert_eq!(platforms[1].id, 2);
        assert_eq!(platforms[1].devices[0].platform_id, 2);
    }

    #[test]
    fn test_group_platforms_software_filter() {
        let platforms = group_platforms(&sample_adapters(), &BackendKind::ALL, false);
        assert_eq!(platforms.len(), 2);
        assert_eq!(platforms[0].devices.len(), 1);
        assert!(platforms[1].devices.is_empty());

        let backend = ComputeBackend::from_platforms(platforms);
        assert!(backend.enumerate_devices(1).is_ok());
        assert!(matches!(
            backend.enumerate_devices(2),
            Err(SomGpuError::NoDeviceFound { .. })
        ));
    }

    #[test]
    fn test_group_platforms_respects_configured_order() {
        let platforms = group_platforms(
            &sample_adapters(),
            &[BackendKind::Gl, BackendKind::Vulkan, BackendKind::Gl],
            true,
        );
        assert_eq!(platforms.len(), 2);
        assert_eq!(platforms[0].kind, BackendKind::Gl);
        assert_eq!(platforms[1].kind, BackendKind::Vulkan);
    }

    #[test]
    fn test_no_backends_means_no_platform() {
        let config = BackendConfig {
            backends: Vec::new(),
            ..Default::default()
        };
        let backend = ComputeBackend::discover(&config);
        assert!(matches!(
            backend.enumerate_platforms(),
            Err(SomGpuError::NoPlatformFound)
        ));
        assert!(matches!(
            backend.select_device(1, 1),
            Err(SomGpuError::NoPlatformFound)
        ));
    }

    #[test]
    fn test_select_rejects_out_of_range_ordinals() {
        let platforms = group_platforms(&sample_adapters(), &BackendKind::ALL, true);
        let backend = ComputeBackend::from_platforms(platforms);

        for (platform, device) in [(0, 1), (3, 1), (1, 0), (1, 3), (2, 2)] {
            assert!(
                matches!(
                    backend.select_device(platform, device),
                    Err(SomGpuError::InvalidSelection { .. })
                ),
                "({platform}, {device}) should be rejected"
            );
        }

        // Rejections leave the enumeration intact
        assert_eq!(backend.enumerate_platforms().unwrap().len(), 2);
        assert_eq!(backend.resolve(1, 2).unwrap().name, "lavapipe");
    }
}

//! Device-resident buffers with scoped lifetime.

use super::backend::ComputeContext;
use crate::error::{Result, SomGpuError};
use bytemuck::Pod;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How the host and kernels may use a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Uploaded by the host, read by kernels.
    ReadOnly,
    /// Written by kernels, downloaded by the host.
    WriteOnly,
    /// Both directions.
    ReadWrite,
}

impl AccessMode {
    /// Whether the host may upload into the buffer.
    pub fn host_writable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    /// Whether the host may download from the buffer.
    pub fn host_readable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }

    /// wgpu usage flags for a storage buffer with this access mode.
    pub fn usages(self) -> wgpu::BufferUsages {
        let copy = match self {
            AccessMode::ReadOnly => wgpu::BufferUsages::COPY_DST,
            AccessMode::WriteOnly => wgpu::BufferUsages::COPY_SRC,
            AccessMode::ReadWrite => wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        };
        wgpu::BufferUsages::STORAGE | copy
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AccessMode::ReadOnly => "read-only",
            AccessMode::WriteOnly => "write-only",
            AccessMode::ReadWrite => "read-write",
        })
    }
}

/// Typed description of a buffer: element count, element size and access mode.
///
/// The byte size is computed once here, so callers never multiply sizes by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Debug label.
    pub label: &'static str,
    /// Number of elements.
    pub element_count: usize,
    /// Size of one element in bytes.
    pub element_size: usize,
    /// Access mode.
    pub access: AccessMode,
}

impl BufferDescriptor {
    /// Describes a buffer of `element_count` values of type `T`.
    pub fn of<T: Pod>(label: &'static str, element_count: usize, access: AccessMode) -> Self {
        Self {
            label,
            element_count,
            element_size: std::mem::size_of::<T>(),
            access,
        }
    }

    /// Total size in bytes.
    ///
    /// Fails for empty buffers and on overflow.
    pub fn byte_size(&self) -> Result<u64> {
        let bytes = self
            .element_count
            .checked_mul(self.element_size)
            .and_then(|b| u64::try_from(b).ok())
            .ok_or_else(|| SomGpuError::Allocation {
                bytes: u64::MAX,
                reason: format!(
                    "{} elements of {} bytes overflow",
                    self.element_count, self.element_size
                ),
            })?;
        if bytes == 0 {
            return Err(SomGpuError::Allocation {
                bytes,
                reason: format!("`{}` would be empty", self.label),
            });
        }
        Ok(bytes)
    }

    /// Checks the size against the device limits.
    pub fn validate(&self, limits: &wgpu::Limits) -> Result<u64> {
        let bytes = self.byte_size()?;
        let max = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);
        if bytes > max {
            return Err(SomGpuError::Allocation {
                bytes,
                reason: format!("`{}` exceeds the device limit of {} bytes", self.label, max),
            });
        }
        if bytes % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(SomGpuError::Allocation {
                bytes,
                reason: format!(
                    "`{}` is not a multiple of {} bytes",
                    self.label,
                    wgpu::COPY_BUFFER_ALIGNMENT
                ),
            });
        }
        Ok(bytes)
    }
}

/// Counts buffer allocations and releases on a context.
#[derive(Debug, Default)]
pub struct BufferLedger {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

/// Snapshot of a [`BufferLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    /// Buffers allocated so far.
    pub allocated: usize,
    /// Buffers released so far.
    pub released: usize,
}

impl BufferStats {
    /// Buffers currently alive.
    pub fn live(&self) -> usize {
        self.allocated - self.released
    }
}

impl BufferLedger {
    fn record_allocation(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    fn record_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counts.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// A storage buffer on the selected device.
///
/// Borrows the context it was allocated on. Released exactly once, either by
/// [`DeviceBuffer::release`] or on drop.
pub struct DeviceBuffer<'ctx> {
    context: &'ctx ComputeContext,
    buffer: wgpu::Buffer,
    descriptor: BufferDescriptor,
    bytes: u64,
    released: bool,
}

impl<'ctx> DeviceBuffer<'ctx> {
    /// Allocates a buffer described by `descriptor`.
    pub fn allocate(context: &'ctx ComputeContext, descriptor: BufferDescriptor) -> Result<Self> {
        let bytes = descriptor.validate(context.limits())?;

        let (buffer, error) = context.capture_errors(|| {
            context.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(descriptor.label),
                size: bytes,
                usage: descriptor.access.usages(),
                mapped_at_creation: false,
            })
        });
        if let Some(err) = error {
            buffer.destroy();
            return Err(SomGpuError::Allocation {
                bytes,
                reason: err.to_string(),
            });
        }

        context.ledger().record_allocation();
        log::debug!(
            "allocated {} buffer `{}` ({} bytes)",
            descriptor.access,
            descriptor.label,
            bytes
        );

        Ok(Self {
            context,
            buffer,
            descriptor,
            bytes,
            released: false,
        })
    }

    /// Capacity in bytes.
    pub fn byte_size(&self) -> u64 {
        self.bytes
    }

    /// The descriptor the buffer was allocated from.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Access mode.
    pub fn access(&self) -> AccessMode {
        self.descriptor.access
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Enqueues a copy of `data` into the start of the buffer.
    ///
    /// Does not wait. Work submitted afterwards on the same queue observes the
    /// new contents.
    pub fn upload<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.check_live("upload")?;
        if !self.access().host_writable() {
            return Err(SomGpuError::BufferAccess {
                mode: self.access(),
                operation: "upload",
            });
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as u64 > self.bytes {
            return Err(SomGpuError::Transfer(format!(
                "upload of {} bytes into `{}` ({} bytes)",
                bytes.len(),
                self.descriptor.label,
                self.bytes
            )));
        }
        self.context.queue().write_buffer(&self.buffer, 0, bytes);
        Ok(())
    }

    /// Copies the start of the buffer into `out`, blocking until the data is
    /// on the host.
    pub fn download<T: Pod>(&self, out: &mut [T]) -> Result<()> {
        self.check_live("download")?;
        if !self.access().host_readable() {
            return Err(SomGpuError::BufferAccess {
                mode: self.access(),
                operation: "download",
            });
        }
        let size = std::mem::size_of_val(out) as u64;
        if size > self.bytes {
            return Err(SomGpuError::Transfer(format!(
                "download of {} bytes from `{}` ({} bytes)",
                size, self.descriptor.label, self.bytes
            )));
        }
        if size == 0 {
            return Ok(());
        }
        pollster::block_on(self.download_async(out, size))
    }

    async fn download_async<T: Pod>(&self, out: &mut [T], size: u64) -> Result<()> {
        let device = self.context.device();

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Download Encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging_buffer, 0, size);
        self.context.queue().submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });

        let _ = device.poll(wgpu::Maintain::Wait);

        let mapped = receiver
            .receive()
            .await
            .ok_or_else(|| SomGpuError::Transfer("Channel receive failed".to_string()))
            .and_then(|r| r.map_err(|e| SomGpuError::Transfer(format!("{:?}", e))));

        if let Err(err) = mapped {
            staging_buffer.destroy();
            return Err(err);
        }

        {
            let data = buffer_slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&data));
        }

        staging_buffer.unmap();
        staging_buffer.destroy();

        Ok(())
    }

    /// Frees the device memory. Calling it again does nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.buffer.destroy();
        self.released = true;
        self.context.ledger().record_release();
        log::debug!("released buffer `{}`", self.descriptor.label);
    }

    fn check_live(&self, operation: &'static str) -> Result<()> {
        if self.released {
            return Err(SomGpuError::Transfer(format!(
                "cannot {} released buffer `{}`",
                operation, self.descriptor.label
            )));
        }
        Ok(())
    }
}

impl Drop for DeviceBuffer<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DeviceBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("descriptor", &self.descriptor)
            .field("bytes", &self.bytes)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size() {
        let desc = BufferDescriptor::of::<f32>("inputs", 10, AccessMode::ReadOnly);
        assert_eq!(desc.element_size, 4);
        assert_eq!(desc.byte_size().unwrap(), 40);
    }

    #[test]
    fn test_byte_size_rejects_empty_and_overflow() {
        let empty = BufferDescriptor::of::<f32>("empty", 0, AccessMode::ReadOnly);
        assert!(matches!(empty.byte_size(), Err(SomGpuError::Allocation { bytes: 0, .. })));

        let huge = BufferDescriptor::of::<f32>("huge", usize::MAX, AccessMode::ReadOnly);
        assert!(matches!(huge.byte_size(), Err(SomGpuError::Allocation { .. })));
    }

    #[test]
    fn test_validate_against_limits() {
        let limits = wgpu::Limits::downlevel_defaults();
        let max = limits.max_storage_buffer_binding_size as usize;

        let ok = BufferDescriptor::of::<f32>("ok", 1024, AccessMode::ReadWrite);
        assert_eq!(ok.validate(&limits).unwrap(), 4096);

        let too_big = BufferDescriptor::of::<f32>("big", max / 4 + 1, AccessMode::ReadWrite);
        assert!(matches!(
            too_big.validate(&limits),
            Err(SomGpuError::Allocation { .. })
        ));

        let unaligned = BufferDescriptor::of::<u8>("bytes", 3, AccessMode::ReadOnly);
        assert!(unaligned.validate(&limits).is_err());
    }

    #[test]
    fn test_access_modes() {
        assert!(AccessMode::ReadOnly.host_writable());
        assert!(!AccessMode::ReadOnly.host_readable());
        assert!(!AccessMode::WriteOnly.host_writable());
        assert!(AccessMode::WriteOnly.host_readable());
        assert!(AccessMode::ReadWrite.host_writable() && AccessMode::ReadWrite.host_readable());

        for mode in [AccessMode::ReadOnly, AccessMode::WriteOnly, AccessMode::ReadWrite] {
            assert!(mode.usages().contains(wgpu::BufferUsages::STORAGE));
        }
        assert!(AccessMode::WriteOnly.usages().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!AccessMode::WriteOnly.usages().contains(wgpu::BufferUsages::COPY_DST));
    }

    #[test]
    fn test_ledger() {
        let ledger = BufferLedger::default();
        ledger.record_allocation();
        ledger.record_allocation();
        ledger.record_release();
        let stats = ledger.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.live(), 1);
    }
}

//! Compiled kernel programs, argument binding and dispatch.

use super::backend::ComputeContext;
use super::buffer::DeviceBuffer;
use super::shaders::{self, KernelSignature, SlotAccess};
use crate::config::CompilePolicy;
use crate::error::{Result, SomGpuError};
use std::collections::HashMap;

/// Split of a 1-D element range into work groups.
///
/// The global size is the element count rounded up to the next multiple of
/// the local size; kernels must ignore items at or past `element_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartition {
    /// Number of real elements.
    pub element_count: usize,
    /// Work-group size.
    pub local_size: u32,
    /// Padded number of work items along x.
    pub global_size: usize,
    /// Extent of the second grid axis (1 for plain 1-D dispatches).
    pub rows: u32,
}

impl WorkPartition {
    /// Partitions `element_count` items into groups of `local_size`.
    pub fn new(element_count: usize, local_size: u32) -> Result<Self> {
        if local_size == 0 {
            return Err(SomGpuError::KernelExecution(
                "local work size must be positive".to_string(),
            ));
        }
        let local = local_size as usize;
        let global_size = element_count
            .div_ceil(local)
            .checked_mul(local)
            .ok_or_else(|| {
                SomGpuError::KernelExecution(format!("{} work items overflow", element_count))
            })?;
        Ok(Self {
            element_count,
            local_size,
            global_size,
            rows: 1,
        })
    }

    /// Sets the extent of the second grid axis.
    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = rows;
        self
    }

    /// Number of work groups along x.
    pub fn workgroups(&self) -> usize {
        self.global_size / self.local_size as usize
    }

    /// Number of padding work items that must be no-ops.
    pub fn padding(&self) -> usize {
        self.global_size - self.element_count
    }

    /// Work-group counts `(x, z)` covering [`workgroups`](Self::workgroups)
    /// when at most `max_per_dimension` groups fit along one axis.
    ///
    /// Groups are laid out x-first; groups launched past `workgroups()` only
    /// run padding items. Fails when even the folded grid does not fit, or
    /// when the launched items exceed the kernels' `u32` indices.
    pub fn grid(&self, max_per_dimension: u32) -> Result<(u32, u32)> {
        let groups = self.workgroups();
        let max = max_per_dimension.max(1) as usize;
        let x = groups.min(max);
        let z = groups.div_ceil(max);

        let launched = x
            .checked_mul(z)
            .and_then(|g| g.checked_mul(self.local_size as usize))
            .and_then(|items| u32::try_from(items).ok());
        match (u32::try_from(x), u32::try_from(z), launched) {
            (Ok(x), Ok(z), Some(_)) if z <= max_per_dimension => Ok((x, z)),
            _ => Err(SomGpuError::KernelExecution(format!(
                "{} work groups of {} exceed the device grid of {} per dimension",
                groups, self.local_size, max_per_dimension
            ))),
        }
    }
}

struct Kernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    signature: Option<&'static KernelSignature>,
}

/// Arguments bound to one kernel, ready to dispatch.
pub struct BoundKernel {
    name: String,
    bind_group: wgpu::BindGroup,
}

impl BoundKernel {
    /// Entry point the arguments are bound to.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A built shader module and its resolved entry points.
pub struct KernelProgram {
    kernels: HashMap<String, Kernel>,
    local_size: u32,
    build_log: Option<String>,
}

impl KernelProgram {
    /// Builds `source` and resolves every name in `entry_points`.
    ///
    /// `source` may contain the work-group size placeholder, which is
    /// replaced by `local_size`. With [`CompilePolicy::FailFast`] a failed build
    /// returns [`SomGpuError::Compile`]; with [`CompilePolicy::LogAndContinue`]
    /// the log is emitted as a warning and entry point resolution decides.
    pub fn build(
        context: &ComputeContext,
        source: &str,
        entry_points: &[&str],
        local_size: u32,
        policy: CompilePolicy,
    ) -> Result<Self> {
        let max_local = context
            .limits()
            .max_compute_workgroup_size_x
            .min(context.limits().max_compute_invocations_per_workgroup);
        if local_size == 0 || local_size > max_local {
            return Err(SomGpuError::Config(format!(
                "local work size {} outside device range 1..={}",
                local_size, max_local
            )));
        }

        let source = shaders::instantiate(source, local_size);
        let device = context.device();

        let (module, error) = context.capture_errors(|| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("somgpu kernels"),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            })
        });
        let info = pollster::block_on(module.get_compilation_info());

        let build_log = build_log(&info, error.as_ref());
        if let Some(log) = &build_log {
            match policy {
                CompilePolicy::FailFast => {
                    log::warn!("kernel build log:\n{}", log);
                    return Err(SomGpuError::Compile { log: log.clone() });
                }
                CompilePolicy::LogAndContinue => {
                    log::warn!("kernel build failed, resolving entry points anyway:\n{}", log);
                }
            }
        }

        let mut kernels = HashMap::with_capacity(entry_points.len());
        for &name in entry_points {
            let (resolved, error) = context.capture_errors(|| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(name),
                    layout: None,
                    module: &module,
                    entry_point: Some(name),
                    compilation_options: Default::default(),
                    cache: None,
                });
                let layout = pipeline.get_bind_group_layout(0);
                (pipeline, layout)
            });
            if let Some(err) = error {
                return Err(SomGpuError::MissingEntryPoint {
                    name: name.to_string(),
                    reason: err.to_string(),
                });
            }
            let (pipeline, layout) = resolved;
            kernels.insert(
                name.to_string(),
                Kernel {
                    pipeline,
                    layout,
                    signature: shaders::signature(name),
                },
            );
        }

        log::info!(
            "built kernel program with {} entry point(s), local size {}",
            kernels.len(),
            local_size
        );

        Ok(Self {
            kernels,
            local_size,
            build_log,
        })
    }

    /// Work-group size baked into the program.
    pub fn local_size(&self) -> u32 {
        self.local_size
    }

    /// Diagnostics of a failed build that was allowed to continue.
    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }

    /// Whether `name` was resolved.
    pub fn has_kernel(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    fn kernel(&self, name: &str) -> Result<&Kernel> {
        self.kernels
            .get(name)
            .ok_or_else(|| SomGpuError::MissingEntryPoint {
                name: name.to_string(),
                reason: "not part of the built program".to_string(),
            })
    }

    /// Binds `args` positionally to kernel `name`.
    ///
    /// For known kernels each slot is checked for access mode and size before
    /// the device sees it.
    pub fn bind_arguments(
        &self,
        context: &ComputeContext,
        name: &str,
        args: &[&DeviceBuffer<'_>],
    ) -> Result<BoundKernel> {
        let kernel = self.kernel(name)?;

        let bindings: Vec<u32> = match kernel.signature {
            Some(signature) => {
                check_arguments(signature, args)?;
                signature.slots.iter().map(|s| s.binding).collect()
            }
            None => (0..args.len() as u32).collect(),
        };

        if let Some(index) = args.iter().position(|b| b.is_released()) {
            return Err(SomGpuError::ArgumentBinding {
                kernel: name.to_string(),
                index,
                reason: "buffer was already released".to_string(),
            });
        }

        let entries: Vec<wgpu::BindGroupEntry<'_>> = args
            .iter()
            .zip(&bindings)
            .map(|(buffer, &binding)| wgpu::BindGroupEntry {
                binding,
                resource: buffer.raw().as_entire_binding(),
            })
            .collect();

        let (bind_group, error) = context.capture_errors(|| {
            context.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(name),
                layout: &kernel.layout,
                entries: &entries,
            })
        });
        if let Some(err) = error {
            return Err(SomGpuError::ArgumentBinding {
                kernel: name.to_string(),
                index: args.len(),
                reason: err.to_string(),
            });
        }

        Ok(BoundKernel {
            name: name.to_string(),
            bind_group,
        })
    }

    /// Enqueues `bound` over `partition`.
    ///
    /// Does not wait for completion; a later download on the same queue does.
    pub fn dispatch(
        &self,
        context: &ComputeContext,
        bound: &BoundKernel,
        partition: &WorkPartition,
    ) -> Result<()> {
        let kernel = self.kernel(&bound.name)?;

        if partition.local_size != self.local_size {
            return Err(SomGpuError::KernelExecution(format!(
                "partition uses local size {}, program was built for {}",
                partition.local_size, self.local_size
            )));
        }

        let max_groups = context.limits().max_compute_workgroups_per_dimension;
        let (groups_x, groups_z) = partition.grid(max_groups)?;
        if partition.rows > max_groups {
            return Err(SomGpuError::KernelExecution(format!(
                "{} grid rows exceed the device limit of {}",
                partition.rows, max_groups
            )));
        }
        if groups_x == 0 || partition.rows == 0 {
            return Ok(());
        }

        log::debug!(
            "dispatching `{}`: {} items padded to {} ({} x {} groups of {}) x {} rows",
            bound.name,
            partition.element_count,
            partition.global_size,
            groups_x,
            groups_z,
            partition.local_size,
            partition.rows
        );

        let device = context.device();
        let ((), error) = context.capture_errors(|| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Kernel Encoder"),
            });

            {
                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(bound.name.as_str()),
                    timestamp_writes: None,
                });

                compute_pass.set_pipeline(&kernel.pipeline);
                compute_pass.set_bind_group(0, &bound.bind_group, &[]);
                compute_pass.dispatch_workgroups(groups_x, partition.rows, groups_z);
            }

            context.queue().submit(Some(encoder.finish()));
        });

        match error {
            Some(err) => Err(SomGpuError::KernelExecution(err.to_string())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for KernelProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.kernels.keys().collect();
        names.sort();
        f.debug_struct("KernelProgram")
            .field("kernels", &names)
            .field("local_size", &self.local_size)
            .field("build_failed", &self.build_log.is_some())
            .finish()
    }
}

/// Formats compiler messages, or returns `None` if the build succeeded.
fn build_log(info: &wgpu::CompilationInfo, error: Option<&wgpu::Error>) -> Option<String> {
    let has_errors = info
        .messages
        .iter()
        .any(|m| m.message_type == wgpu::CompilationMessageType::Error);
    if !has_errors && error.is_none() {
        return None;
    }

    let mut lines: Vec<String> = info
        .messages
        .iter()
        .map(|m| {
            let kind = match m.message_type {
                wgpu::CompilationMessageType::Error => "error",
                wgpu::CompilationMessageType::Warning => "warning",
                wgpu::CompilationMessageType::Info => "info",
            };
            match &m.location {
                Some(loc) => format!(
                    "{} at {}:{}: {}",
                    kind, loc.line_number, loc.line_position, m.message
                ),
                None => format!("{}: {}", kind, m.message),
            }
        })
        .collect();
    if lines.is_empty() {
        if let Some(err) = error {
            lines.push(err.to_string());
        }
    }
    Some(lines.join("\n"))
}

/// Checks arity, access mode and size of each argument against `signature`.
pub fn check_arguments(signature: &KernelSignature, args: &[&DeviceBuffer<'_>]) -> Result<()> {
    let shapes: Vec<(super::AccessMode, u64)> =
        args.iter().map(|b| (b.access(), b.byte_size())).collect();
    check_argument_shapes(signature, &shapes)
}

fn check_argument_shapes(
    signature: &KernelSignature,
    args: &[(super::AccessMode, u64)],
) -> Result<()> {
    let fail = |index: usize, reason: String| SomGpuError::ArgumentBinding {
        kernel: signature.name.to_string(),
        index,
        reason,
    };

    for (index, slot) in signature.slots.iter().enumerate() {
        let Some(&(access, bytes)) = args.get(index) else {
            return Err(fail(
                index,
                format!("expected {} arguments, got {}", signature.slots.len(), args.len()),
            ));
        };
        if slot.access == SlotAccess::Write && !access.host_readable() {
            return Err(fail(
                index,
                format!("kernel writes this slot but the buffer is {}", access),
            ));
        }
        if slot.access == SlotAccess::Read && !access.host_writable() {
            return Err(fail(
                index,
                format!("kernel reads this slot but the buffer is {}", access),
            ));
        }
        if bytes < slot.min_bytes || bytes % slot.element_size != 0 {
            return Err(fail(
                index,
                format!(
                    "{} bytes is not a whole number of {}-byte elements",
                    bytes, slot.element_size
                ),
            ));
        }
    }

    if args.len() > signature.slots.len() {
        return Err(fail(
            signature.slots.len(),
            format!("expected {} arguments, got {}", signature.slots.len(), args.len()),
        ));
    }

    Ok(())
}

//! WGSL compute kernels for the distance pipeline.
//!
//! Both kernels live in one module so the program is built once. Work-group
//! size is baked in at build time through the `{{WORKGROUP_SIZE}}`
//! placeholder, see [`instantiate`].

/// Placeholder replaced by the configured local work size.
pub const WORKGROUP_SIZE_PLACEHOLDER: &str = "{{WORKGROUP_SIZE}}";

/// Entry point incrementing every element by one.
pub const ADD_ONE: &str = "add_one";

/// Entry point computing per-input distances to one or more weight vectors.
pub const EUCLIDEAN_DIST: &str = "euclidean_dist";

/// Entry points the pipelines require.
pub const REQUIRED_ENTRY_POINTS: [&str; 2] = [ADD_ONE, EUCLIDEAN_DIST];

/// Kernel module source.
///
/// `euclidean_dist` runs over a grid whose `y` axis is the weight index. The
/// input index (padded up to a multiple of the work-group size) runs along
/// `x`; once `x` reaches the device's per-dimension group limit the remaining
/// groups continue along `z`, so both kernels rebuild the flat index from
/// the work-group id.
///
/// Bindings (group 0):
/// - 0: inputs (count × dim), row-major
/// - 1: weights (num_weights × dim), row-major
/// - 2: distances (count × num_weights), row-major
/// - 3: `DistanceParams`
///
/// `add_one` uses its own slots so the two entry points never collide:
/// - 4: input elements
/// - 5: output elements
/// - 6: `ElementParams`
pub const KERNELS_WGSL: &str = r#"
const WORKGROUP_SIZE: u32 = {{WORKGROUP_SIZE}}u;

struct DistanceParams {
    count: u32,
    dimension: u32,
    num_weights: u32,
    apply_sqrt: u32,
}

@group(0) @binding(0) var<storage, read> inputs: array<f32>;
@group(0) @binding(1) var<storage, read> weights: array<f32>;
@group(0) @binding(2) var<storage, read_write> distances: array<f32>;
@group(0) @binding(3) var<storage, read> dist_params: DistanceParams;

fn flat_index(group_id: vec3<u32>, group_count: vec3<u32>, lane: u32) -> u32 {
    return (group_id.z * group_count.x + group_id.x) * WORKGROUP_SIZE + lane;
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn euclidean_dist(
    @builtin(workgroup_id) group_id: vec3<u32>,
    @builtin(num_workgroups) group_count: vec3<u32>,
    @builtin(local_invocation_index) lane: u32,
) {
    let i = flat_index(group_id, group_count, lane);
    let w = group_id.y;

    // Padding work items past the end do nothing
    if (i >= dist_params.count || w >= dist_params.num_weights) {
        return;
    }

    let input_start = i * dist_params.dimension;
    let weight_start = w * dist_params.dimension;

    var sum: f32 = 0.0;
    for (var d: u32 = 0u; d < dist_params.dimension; d = d + 1u) {
        let diff = inputs[input_start + d] - weights[weight_start + d];
        sum = sum + diff * diff;
    }

    if (dist_params.apply_sqrt != 0u) {
        sum = sqrt(sum);
    }

    distances[i * dist_params.num_weights + w] = sum;
}

struct ElementParams {
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(4) var<storage, read> elements_in: array<f32>;
@group(0) @binding(5) var<storage, read_write> elements_out: array<f32>;
@group(0) @binding(6) var<storage, read> elem_params: ElementParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn add_one(
    @builtin(workgroup_id) group_id: vec3<u32>,
    @builtin(num_workgroups) group_count: vec3<u32>,
    @builtin(local_invocation_index) lane: u32,
) {
    let i = flat_index(group_id, group_count, lane);
    if (i >= elem_params.count) {
        return;
    }
    elements_out[i] = elements_in[i] + 1.0;
}
"#;

/// How a kernel slot accesses the buffer bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAccess {
    /// The kernel only reads the slot.
    Read,
    /// The kernel writes the slot.
    Write,
}

/// One positional kernel argument.
#[derive(Debug, Clone, Copy)]
pub struct KernelSlot {
    /// Binding number in group 0.
    pub binding: u32,
    /// Access performed by the kernel.
    pub access: SlotAccess,
    /// Size of one element in bytes; the bound buffer must be a multiple.
    pub element_size: u64,
    /// Smallest acceptable buffer size in bytes.
    pub min_bytes: u64,
}

/// Argument layout of a known entry point.
#[derive(Debug, Clone, Copy)]
pub struct KernelSignature {
    /// Entry point name.
    pub name: &'static str,
    /// Positional argument slots.
    pub slots: &'static [KernelSlot],
}

const F32: u64 = std::mem::size_of::<f32>() as u64;
const PARAMS: u64 = 16;

const fn slot(binding: u32, access: SlotAccess, element_size: u64) -> KernelSlot {
    KernelSlot {
        binding,
        access,
        element_size,
        min_bytes: element_size,
    }
}

/// Signatures of the kernels in [`KERNELS_WGSL`].
pub static SIGNATURES: [KernelSignature; 2] = [
    KernelSignature {
        name: EUCLIDEAN_DIST,
        slots: &[
            slot(0, SlotAccess::Read, F32),
            slot(1, SlotAccess::Read, F32),
            slot(2, SlotAccess::Write, F32),
            slot(3, SlotAccess::Read, PARAMS),
        ],
    },
    KernelSignature {
        name: ADD_ONE,
        slots: &[
            slot(4, SlotAccess::Read, F32),
            slot(5, SlotAccess::Write, F32),
            slot(6, SlotAccess::Read, PARAMS),
        ],
    },
];

/// Looks up the signature of a known entry point.
pub fn signature(name: &str) -> Option<&'static KernelSignature> {
    SIGNATURES.iter().find(|s| s.name == name)
}

/// Substitutes the work-group size into a kernel source.
pub fn instantiate(source: &str, local_size: u32) -> String {
    source.replace(WORKGROUP_SIZE_PLACEHOLDER, &local_size.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate() {
        let src = instantiate(KERNELS_WGSL, 16);
        assert!(src.contains("const WORKGROUP_SIZE: u32 = 16u;"));
        assert!(!src.contains(WORKGROUP_SIZE_PLACEHOLDER));
    }

    #[test]
    fn test_entry_points_present() {
        for name in REQUIRED_ENTRY_POINTS {
            assert!(KERNELS_WGSL.contains(&format!("fn {}(", name)), "{name}");
            assert!(signature(name).is_some());
        }
        assert!(signature("main").is_none());
    }

    #[test]
    fn test_bindings_do_not_collide() {
        let mut bindings: Vec<u32> = SIGNATURES
            .iter()
            .flat_map(|s| s.slots.iter().map(|slot| slot.binding))
            .collect();
        let total = bindings.len();
        bindings.sort_unstable();
        bindings.dedup();
        assert_eq!(bindings.len(), total);
    }
}

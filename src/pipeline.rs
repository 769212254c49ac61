//! Host-side orchestration of the distance and increment kernels.
//!
//! A pipeline invocation owns every buffer it allocates. Buffers are released
//! explicitly on success and by drop on every error path, so the context's
//! buffer ledger always balances after an invocation returns.

use crate::accel::shaders::{ADD_ONE, EUCLIDEAN_DIST};
use crate::accel::{
    AccessMode, BufferDescriptor, ComputeContext, DeviceBuffer, KernelProgram, WorkPartition,
};
use crate::config::Metric;
use crate::dataset::VectorDataset;
use crate::error::{Result, SomGpuError};

/// Distances of every input vector to every weight vector.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceResult {
    /// Number of input vectors (rows).
    pub size: usize,
    /// Number of weight vectors (columns).
    pub dimension: usize,
    /// Row-major distances; row `k` belongs to input vector `k`.
    pub values: Vec<f32>,
}

impl DistanceResult {
    /// Distance of input `input` to weight `weight`.
    pub fn get(&self, input: usize, weight: usize) -> Option<f32> {
        if input >= self.size || weight >= self.dimension {
            return None;
        }
        self.values.get(input * self.dimension + weight).copied()
    }

    /// Distances of input `input` to all weights.
    pub fn row(&self, input: usize) -> Option<&[f32]> {
        if input >= self.size {
            return None;
        }
        let start = input * self.dimension;
        self.values.get(start..start + self.dimension)
    }

    /// Converts into a dataset for writing: one row per input.
    pub fn into_dataset(self) -> Result<VectorDataset> {
        VectorDataset::new(self.size, self.dimension, self.values)
    }
}

/// Checks that inputs and weights can be compared.
pub fn validate_shapes(input: &VectorDataset, weights: &VectorDataset) -> Result<()> {
    if input.dimension() != weights.dimension() {
        return Err(SomGpuError::DimensionMismatch {
            expected: weights.dimension(),
            actual: input.dimension(),
        });
    }
    if weights.is_empty() {
        return Err(SomGpuError::EmptyDataset("weight set has no vectors"));
    }
    Ok(())
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        SomGpuError::KernelExecution(format!("{} {} does not fit the kernel's u32 indices", what, value))
    })
}

/// Scalar parameters of `euclidean_dist`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DistanceParams {
    count: u32,
    dimension: u32,
    num_weights: u32,
    apply_sqrt: u32,
}

/// Scalar parameters of `add_one`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ElementParams {
    count: u32,
    _padding: [u32; 3],
}

/// Computes input-to-weight distances on the device.
#[derive(Debug)]
pub struct DistancePipeline<'a> {
    context: &'a ComputeContext,
    program: &'a KernelProgram,
    metric: Metric,
}

impl<'a> DistancePipeline<'a> {
    /// Creates a pipeline; `program` must provide `euclidean_dist`.
    pub fn new(context: &'a ComputeContext, program: &'a KernelProgram, metric: Metric) -> Result<Self> {
        if !program.has_kernel(EUCLIDEAN_DIST) {
            return Err(SomGpuError::MissingEntryPoint {
                name: EUCLIDEAN_DIST.to_string(),
                reason: "not part of the built program".to_string(),
            });
        }
        Ok(Self {
            context,
            program,
            metric,
        })
    }

    /// The metric written to the result.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Computes the distance of every input vector to every weight vector.
    ///
    /// Fails with [`SomGpuError::DimensionMismatch`] before touching the
    /// device if the dimensions differ.
    pub fn compute(&self, input: &VectorDataset, weights: &VectorDataset) -> Result<DistanceResult> {
        validate_shapes(input, weights)?;

        let count = input.count();
        let num_weights = weights.count();

        if count == 0 || input.dimension() == 0 {
            // Nothing to upload; every distance is zero
            return Ok(DistanceResult {
                size: count,
                dimension: num_weights,
                values: vec![0.0; count * num_weights],
            });
        }

        let params = DistanceParams {
            count: to_u32(count, "input count")?,
            dimension: to_u32(input.dimension(), "dimension")?,
            num_weights: to_u32(num_weights, "weight count")?,
            apply_sqrt: self.metric.apply_sqrt() as u32,
        };
        let total = count.checked_mul(num_weights).ok_or_else(|| {
            SomGpuError::KernelExecution(format!("{} x {} distances overflow", count, num_weights))
        })?;
        to_u32(total, "distance count")?;

        let ctx = self.context;

        let mut inputs_buffer = DeviceBuffer::allocate(
            ctx,
            BufferDescriptor::of::<f32>("Inputs Buffer", input.as_slice().len(), AccessMode::ReadOnly),
        )?;
        inputs_buffer.upload(input.as_slice())?;

        let mut weights_buffer = DeviceBuffer::allocate(
            ctx,
            BufferDescriptor::of::<f32>("Weights Buffer", weights.as_slice().len(), AccessMode::ReadWrite),
        )?;
        weights_buffer.upload(weights.as_slice())?;

        let mut distances_buffer = DeviceBuffer::allocate(
            ctx,
            BufferDescriptor::of::<f32>("Distances Buffer", total, AccessMode::WriteOnly),
        )?;

        let mut params_buffer = DeviceBuffer::allocate(
            ctx,
            BufferDescriptor::of::<DistanceParams>("Distance Params", 1, AccessMode::ReadOnly),
        )?;
        params_buffer.upload(std::slice::from_ref(&params))?;

        let bound = self.program.bind_arguments(
            ctx,
            EUCLIDEAN_DIST,
            &[&inputs_buffer, &weights_buffer, &distances_buffer, &params_buffer],
        )?;

        let partition = WorkPartition::new(count, self.program.local_size())?
            .with_rows(params.num_weights);
        self.program.dispatch(ctx, &bound, &partition)?;

        let mut values = vec![0.0f32; total];
        distances_buffer.download(&mut values)?;

        params_buffer.release();
        distances_buffer.release();
        weights_buffer.release();
        inputs_buffer.release();

        Ok(DistanceResult {
            size: count,
            dimension: num_weights,
            values,
        })
    }
}

/// Adds one to every component of a dataset on the device.
#[derive(Debug)]
pub struct IncrementPipeline<'a> {
    context: &'a ComputeContext,
    program: &'a KernelProgram,
}

impl<'a> IncrementPipeline<'a> {
    /// Creates a pipeline; `program` must provide `add_one`.
    pub fn new(context: &'a ComputeContext, program: &'a KernelProgram) -> Result<Self> {
        if !program.has_kernel(ADD_ONE) {
            return Err(SomGpuError::MissingEntryPoint {
                name: ADD_ONE.to_string(),
                reason: "not part of the built program".to_string(),
            });
        }
        Ok(Self { context, program })
    }

    /// Returns a dataset of the same shape with every component incremented.
    pub fn run(&self, data: &VectorDataset) -> Result<VectorDataset> {
        let len = data.as_slice().len();
        if len == 0 {
            return Ok(data.clone());
        }

        let params = ElementParams {
            count: to_u32(len, "element count")?,
            _padding: [0; 3],
        };
        let ctx = self.context;

        let mut input_buffer = DeviceBuffer::allocate(
            ctx,
            BufferDescriptor::of::<f32>("Elements In", len, AccessMode::ReadOnly),
        )?;
        input_buffer.upload(data.as_slice())?;

        let mut output_buffer = DeviceBuffer::allocate(
            ctx,
            BufferDescriptor::of::<f32>("Elements Out", len, AccessMode::WriteOnly),
        )?;

        let mut params_buffer = DeviceBuffer::allocate(
            ctx,
            BufferDescriptor::of::<ElementParams>("Element Params", 1, AccessMode::ReadOnly),
        )?;
        params_buffer.upload(std::slice::from_ref(&params))?;

        let bound = self
            .program
            .bind_arguments(ctx, ADD_ONE, &[&input_buffer, &output_buffer, &params_buffer])?;

        let partition = WorkPartition::new(len, self.program.local_size())?;
        self.program.dispatch(ctx, &bound, &partition)?;

        let mut values = vec![0.0f32; len];
        output_buffer.download(&mut values)?;

        params_buffer.release();
        output_buffer.release();
        input_buffer.release();

        VectorDataset::new(data.count(), data.dimension(), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: &[&[f32]]) -> VectorDataset {
        VectorDataset::from_rows(rows).unwrap()
    }

    #[test]
    fn test_validate_shapes() {
        let input = dataset(&[&[0.0, 0.0], &[3.0, 4.0]]);
        let weights = dataset(&[&[0.0, 0.0]]);
        assert!(validate_shapes(&input, &weights).is_ok());

        let wrong = dataset(&[&[0.0, 0.0, 0.0]]);
        assert!(matches!(
            validate_shapes(&input, &wrong),
            Err(SomGpuError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));

        let empty = VectorDataset::new(0, 2, Vec::new()).unwrap();
        assert!(matches!(
            validate_shapes(&input, &empty),
            Err(SomGpuError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_result_accessors() {
        let result = DistanceResult {
            size: 2,
            dimension: 3,
            values: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        };
        assert_eq!(result.get(1, 2), Some(5.0));
        assert_eq!(result.get(2, 0), None);
        assert_eq!(result.get(0, 3), None);
        assert_eq!(result.row(1), Some(&[3.0, 4.0, 5.0][..]));

        let ds = result.into_dataset().unwrap();
        assert_eq!(ds.count(), 2);
        assert_eq!(ds.dimension(), 3);
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<DistanceParams>(), 16);
        assert_eq!(std::mem::size_of::<ElementParams>(), 16);
    }
}

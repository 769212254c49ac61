//! Configuration for the SOM distance kernel.

use crate::error::{Result, SomGpuError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest work-group size accepted before the device limits are known.
pub const MAX_LOCAL_SIZE: u32 = 256;

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Platform and device discovery.
    pub backend: BackendConfig,

    /// Kernel build and dispatch.
    pub kernel: KernelConfig,

    /// Distance computation.
    pub distance: DistanceConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.kernel.local_size == 0 || self.kernel.local_size > MAX_LOCAL_SIZE {
            return Err(SomGpuError::Config(format!(
                "kernel.local_size must be in 1..={}, got {}",
                MAX_LOCAL_SIZE, self.kernel.local_size
            )));
        }
        if self.backend.platform == Some(0) || self.backend.device == Some(0) {
            return Err(SomGpuError::Config(
                "backend.platform and backend.device are 1-based".to_string(),
            ));
        }
        Ok(())
    }
}

/// A platform family that can be enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Vulkan (Linux, Windows, Android).
    Vulkan,
    /// Metal (macOS, iOS).
    Metal,
    /// Direct3D 12 (Windows).
    Dx12,
    /// OpenGL / GLES.
    Gl,
}

impl BackendKind {
    /// All platform families in enumeration order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Vulkan,
        BackendKind::Metal,
        BackendKind::Dx12,
        BackendKind::Gl,
    ];

    /// Human-readable platform name.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Vulkan => "Vulkan",
            BackendKind::Metal => "Metal",
            BackendKind::Dx12 => "DirectX 12",
            BackendKind::Gl => "OpenGL",
        }
    }

    /// Map a wgpu backend onto a platform family.
    pub fn from_wgpu(backend: wgpu::Backend) -> Option<Self> {
        match backend {
            wgpu::Backend::Vulkan => Some(BackendKind::Vulkan),
            wgpu::Backend::Metal => Some(BackendKind::Metal),
            wgpu::Backend::Dx12 => Some(BackendKind::Dx12),
            wgpu::Backend::Gl => Some(BackendKind::Gl),
            _ => None,
        }
    }

    /// The wgpu backend bit for this family.
    pub fn to_wgpu(self) -> wgpu::Backends {
        match self {
            BackendKind::Vulkan => wgpu::Backends::VULKAN,
            BackendKind::Metal => wgpu::Backends::METAL,
            BackendKind::Dx12 => wgpu::Backends::DX12,
            BackendKind::Gl => wgpu::Backends::GL,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Platform and device discovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Platform families to enumerate, in display order.
    /// Default: all of them.
    pub backends: Vec<BackendKind>,

    /// Pre-selected platform (1-based). Prompted for when unset.
    pub platform: Option<usize>,

    /// Pre-selected device (1-based). Prompted for when unset.
    pub device: Option<usize>,

    /// List CPU/software adapters (llvmpipe, WARP, ...).
    /// Default: true.
    pub allow_software: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backends: BackendKind::ALL.to_vec(),
            platform: None,
            device: None,
            allow_software: true,
        }
    }
}

impl BackendConfig {
    /// Combined wgpu backend mask.
    pub fn wgpu_backends(&self) -> wgpu::Backends {
        self.backends
            .iter()
            .fold(wgpu::Backends::empty(), |acc, b| acc | b.to_wgpu())
    }
}

/// What to do when the kernel program fails to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompilePolicy {
    /// Return the build log as an error right away.
    #[default]
    FailFast,
    /// Log the build log and still try to resolve the entry points.
    LogAndContinue,
}

/// Kernel build and dispatch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Work-group size along the element axis.
    /// Default: 64.
    pub local_size: u32,

    /// Behaviour on build failure.
    /// Default: fail fast.
    pub compile_policy: CompilePolicy,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            local_size: 64,
            compile_policy: CompilePolicy::default(),
        }
    }
}

/// Distance metric computed by the `euclidean_dist` kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// Square root of the sum of squared differences.
    #[default]
    Euclidean,
    /// Sum of squared differences.
    SquaredEuclidean,
}

impl Metric {
    /// Whether the kernel takes the square root of the accumulated sum.
    pub fn apply_sqrt(self) -> bool {
        matches!(self, Metric::Euclidean)
    }
}

/// Distance computation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    /// Metric written to the output.
    /// Default: Euclidean.
    pub metric: Metric,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kernel.local_size, 64);
        assert_eq!(config.kernel.compile_policy, CompilePolicy::FailFast);
        assert_eq!(config.distance.metric, Metric::Euclidean);
        assert_eq!(config.backend.backends.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wgpu_backends_mask() {
        let mut config = BackendConfig::default();
        assert!(config.wgpu_backends().contains(wgpu::Backends::VULKAN | wgpu::Backends::GL));

        config.backends = vec![BackendKind::Metal];
        assert_eq!(config.wgpu_backends(), wgpu::Backends::METAL);

        config.backends.clear();
        assert!(config.wgpu_backends().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.kernel.local_size = 0;
        assert!(matches!(config.validate(), Err(SomGpuError::Config(_))));

        config.kernel.local_size = MAX_LOCAL_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.device = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("somgpu.json");
        std::fs::write(
            &path,
            r#"{
                "backend": { "backends": ["vulkan", "gl"], "platform": 1 },
                "kernel": { "local_size": 16, "compile_policy": "log-and-continue" },
                "distance": { "metric": "squared-euclidean" }
            }"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.backend.backends, vec![BackendKind::Vulkan, BackendKind::Gl]);
        assert_eq!(config.backend.platform, Some(1));
        assert_eq!(config.backend.device, None);
        assert!(config.backend.allow_software);
        assert_eq!(config.kernel.local_size, 16);
        assert_eq!(config.kernel.compile_policy, CompilePolicy::LogAndContinue);
        assert!(!config.distance.metric.apply_sqrt());
    }

    #[test]
    fn test_from_file_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "kernel": { "local_size": 0 } }"#).unwrap();
        assert!(matches!(Config::from_file(&path), Err(SomGpuError::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Config::from_file(&path), Err(SomGpuError::Json(_))));
    }
}

//! Error types for the SOM distance kernel.

use crate::accel::AccessMode;
use thiserror::Error;

/// The main error type for somgpu operations.
///
/// Every failure reason is its own variant; none of them is retried by the
/// library.
#[derive(Error, Debug)]
pub enum SomGpuError {
    /// I/O error while reading or writing a vector file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A vector file is malformed.
    #[error("Malformed vector file (token {token}): {message}")]
    Format {
        /// 1-based position of the offending whitespace-separated token.
        token: usize,
        /// What went wrong.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No compute platform exposes an adapter.
    #[error("No compute platform found")]
    NoPlatformFound,

    /// The selected platform exposes no usable device.
    #[error("No compute devices found on platform {platform}")]
    NoDeviceFound {
        /// Name of the platform that was searched.
        platform: String,
    },

    /// A platform or device selection was out of range or unparsable.
    #[error("The {kind} selected does not exist: {input:?} (expected 1..={count})")]
    InvalidSelection {
        /// What was being selected ("platform" or "device").
        kind: &'static str,
        /// Raw user input.
        input: String,
        /// Number of candidates that were offered.
        count: usize,
    },

    /// The device context or its queue could not be created.
    #[error("Device creation failed: {0}")]
    DeviceRequest(String),

    /// The device rejected a buffer allocation.
    #[error("Buffer allocation of {bytes} bytes failed: {reason}")]
    Allocation {
        /// Requested size in bytes.
        bytes: u64,
        /// Reason reported by the device or the limit check.
        reason: String,
    },

    /// The kernel program failed to build.
    #[error("Kernel build failed: {}", summarize_log(.log))]
    Compile {
        /// Diagnostic log produced by the shader compiler.
        log: String,
    },

    /// A required kernel entry point could not be resolved.
    #[error("Kernel entry point `{name}` could not be resolved: {reason}")]
    MissingEntryPoint {
        /// Entry point name.
        name: String,
        /// Reason reported by the device.
        reason: String,
    },

    /// A kernel argument slot is incompatible with the buffer bound to it.
    #[error("Cannot bind argument {index} of kernel `{kernel}`: {reason}")]
    ArgumentBinding {
        /// Kernel name.
        kernel: String,
        /// Index of the offending argument slot.
        index: usize,
        /// Why the binding was rejected.
        reason: String,
    },

    /// A kernel dispatch failed.
    #[error("Kernel execution failed: {0}")]
    KernelExecution(String),

    /// Vector dimensions do not line up.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension size.
        expected: usize,
        /// Actual dimension size.
        actual: usize,
    },

    /// A dataset that must hold at least one vector is empty.
    #[error("Empty dataset: {0}")]
    EmptyDataset(&'static str),

    /// A transfer was requested that the buffer's access mode forbids.
    #[error("Cannot {operation} a {mode} buffer")]
    BufferAccess {
        /// Access mode of the buffer.
        mode: AccessMode,
        /// Attempted operation ("upload" or "download").
        operation: &'static str,
    },

    /// Host/device transfer failed.
    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// First diagnostic line of a build log, with a count of the lines left out.
fn summarize_log(log: &str) -> String {
    let mut lines = log.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next().unwrap_or("no diagnostics");
    match lines.count() {
        0 => first.to_string(),
        rest => format!("{} (+{} more line(s), see log)", first, rest),
    }
}

/// Result type alias for somgpu operations.
pub type Result<T> = std::result::Result<T, SomGpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_single_line() {
        let errors = [
            SomGpuError::NoPlatformFound,
            SomGpuError::InvalidSelection {
                kind: "platform",
                input: "0".to_string(),
                count: 2,
            },
            SomGpuError::DimensionMismatch {
                expected: 3,
                actual: 4,
            },
            SomGpuError::BufferAccess {
                mode: AccessMode::WriteOnly,
                operation: "upload",
            },
            SomGpuError::Compile {
                log: "error at 1:42: expected expression\nwarning: unused variable\n".to_string(),
            },
        ];

        for err in errors {
            let msg = err.to_string();
            assert!(!msg.contains('\n'), "{msg}");
        }
    }

    #[test]
    fn test_compile_message_summarizes_log() {
        let err = SomGpuError::Compile {
            log: "\nerror at 1:42: expected expression\n\ninfo: note\nwarning: w\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Kernel build failed: error at 1:42: expected expression (+2 more line(s), see log)"
        );

        let single = SomGpuError::Compile {
            log: "error: bad".to_string(),
        };
        assert_eq!(single.to_string(), "Kernel build failed: error: bad");

        let empty = SomGpuError::Compile { log: String::new() };
        assert_eq!(empty.to_string(), "Kernel build failed: no diagnostics");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SomGpuError = io.into();
        assert!(matches!(err, SomGpuError::Io(_)));
    }
}

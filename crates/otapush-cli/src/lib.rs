//! otapush - CLI for updating embedded devices over HTTP(S)
//!
//! This crate provides a command-line interface for:
//! - Probing whether a device wants to be reached over HTTPS
//! - Querying a device's update features
//! - Streaming root, boot and MBR images with digest verification
//! - Switching partitions and rebooting

pub mod cli;
pub mod config;

pub use cli::Cli;
pub use config::{CliOverrides, Config};

use otapush_core::UpdateError;

/// Exit codes for CLI operations
///
/// - 0: Success - operation completed successfully
/// - 1: General error - unspecified error occurred
/// - 2: Integrity failure - the device did not confirm the bytes sent
/// - 3: Connection failed - the device could not be reached
/// - 4: Invalid input - bad arguments, config or certificate files
/// - 5: Not implemented - the device has no update handler
/// - 6: Unsupported - a required feature is missing on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Digest mismatch or undecodable digest (exit code 2)
    IntegrityFailure = 2,
    /// Probe or transport failure (exit code 3)
    ConnectionFailed = 3,
    /// Invalid input provided (exit code 4)
    InvalidInput = 4,
    /// Device has no update handler (exit code 5)
    NotImplemented = 5,
    /// Required feature missing (exit code 6)
    Unsupported = 6,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Exit code reported for a failed protocol operation.
    pub fn for_error(err: &UpdateError) -> Self {
        match err {
            UpdateError::DigestMismatch { .. } | UpdateError::DigestDecode(_) => {
                ExitCode::IntegrityFailure
            }
            UpdateError::Probe(_) | UpdateError::Transport(_) => ExitCode::ConnectionFailed,
            UpdateError::CertificateRead { .. } | UpdateError::InvalidUrl(_) => {
                ExitCode::InvalidInput
            }
            UpdateError::UpdateHandlerNotImplemented => ExitCode::NotImplemented,
            UpdateError::UnexpectedStatus { .. } => ExitCode::GeneralError,
        }
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::IntegrityFailure => "INTEGRITY_FAILURE",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::NotImplemented => "NOT_IMPLEMENTED",
            ExitCode::Unsupported => "UNSUPPORTED",
        }
    }
}

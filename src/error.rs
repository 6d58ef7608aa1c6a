//! Error types for vgpu-bridge

use thiserror::Error;

/// Result type alias using vgpu-bridge Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or driving a vgpu device.
///
/// Only construction can fail. Guest register accesses never surface an
/// error; they degrade to a sentinel or a no-op and are logged.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid device configuration or host-provided identity
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared memory arena or window errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// Device emulation errors
    #[error("Device error: {0}")]
    Device(String),

    /// Hosting accelerator subsystem errors
    #[error("Host error: {0}")]
    Host(String),

    /// The hosting subsystem could not provide the shared memory arena
    #[error("Shared memory arena base unavailable")]
    ArenaUnavailable,

    /// Register layout errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] vgpu_protocol::ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Config("vm_id must be positive".into()).to_string(),
            "Configuration error: vm_id must be positive"
        );
        assert_eq!(
            Error::ArenaUnavailable.to_string(),
            "Shared memory arena base unavailable"
        );
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: Error = vgpu_protocol::ProtocolError::UnknownBar(7).into();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(err.to_string(), "Protocol error: Unknown BAR index: 7");
    }
}

//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// Stream closed in the middle of (or before) a message
    #[error("Unexpected end of input")]
    UnexpectedEof,

    /// Handshake request with a protocol version other than 1.1.1
    #[error("Unsupported protocol version: 0x{0:04x}")]
    BadVersion(u16),

    /// Handshake request with an opcode we don't implement
    #[error("Unknown handshake opcode: 0x{0:04x}")]
    UnknownOpcode(u16),

    /// I/O phase request with an unknown command code
    #[error("Unknown command: 0x{0:08x}")]
    UnknownCommand(u32),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEof,
            _ => ProtocolError::Io(err),
        }
    }
}

impl ProtocolError {
    /// Peer closed the connection
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::UnexpectedEof)
    }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// USB-level request completion errors
///
/// These are reported to the host in the `status` field of a submit or
/// unlink response, as negated Linux errno values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Endpoint stalled or request not supported
    #[error("Broken pipe (endpoint stall)")]
    Pipe,

    /// Request was cancelled or the device went away
    #[error("Connection reset")]
    ConnectionReset,
}

/// Linux EPIPE
pub const EPIPE: i32 = 32;

/// Linux ECONNRESET
pub const ECONNRESET: i32 = 104;

impl UsbError {
    /// Positive errno value
    pub fn errno(self) -> i32 {
        match self {
            UsbError::Pipe => EPIPE,
            UsbError::ConnectionReset => ECONNRESET,
        }
    }

    /// Value of the USB/IP `status` field for this error
    pub fn status(self) -> i32 {
        -self.errno()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::BadVersion(0x0106);
        let msg = format!("{}", err);
        assert!(msg.contains("Unsupported protocol version"));
        assert!(msg.contains("0x0106"));
    }

    #[test]
    fn test_usb_error_status() {
        assert_eq!(UsbError::Pipe.status(), -32);
        assert_eq!(UsbError::ConnectionReset.status(), -104);
    }

    #[test]
    fn test_eof_detection() {
        let err = ProtocolError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(err.is_eof());
        assert!(!ProtocolError::UnknownCommand(9).is_eof());
    }
}

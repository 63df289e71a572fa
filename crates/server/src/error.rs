//! Server error types

use thiserror::Error;

/// Device construction errors
///
/// Returned by [`crate::usb::Device::new`] when the descriptor tree is
/// empty somewhere or exceeds a USB cardinality limit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Device has no configurations")]
    NoConfigurations,

    #[error("Device has too many ({0}) configurations")]
    TooManyConfigurations(usize),

    #[error("Configuration {0} has no interfaces")]
    NoInterfaces(usize),

    #[error("Configuration {conf} has too many ({count}) interfaces")]
    TooManyInterfaces { conf: usize, count: usize },

    #[error("Configuration {conf}, interface {iff} has no alternate settings")]
    NoAltSettings { conf: usize, iff: usize },

    #[error("Configuration {conf} has too many ({count}) endpoints")]
    TooManyEndpoints { conf: usize, count: usize },
}

/// Errors of the blocking endpoint data interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Read from an IN-only endpoint or write to an OUT-only one
    #[error("Operation not allowed by endpoint direction")]
    BadDirection,

    /// The operation was cancelled
    #[error("Endpoint closed")]
    Closed,
}

impl From<EndpointError> for std::io::Error {
    fn from(err: EndpointError) -> Self {
        let kind = match err {
            EndpointError::BadDirection => std::io::ErrorKind::BrokenPipe,
            EndpointError::Closed => std::io::ErrorKind::NotConnected,
        };
        std::io::Error::new(kind, err)
    }
}

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Can't add new device: all slots are busy")]
    NoFreeSlot,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_names_configuration() {
        let err = DeviceError::TooManyEndpoints { conf: 2, count: 17 };
        assert_eq!(err.to_string(), "Configuration 2 has too many (17) endpoints");
    }

    #[test]
    fn test_endpoint_error_to_io() {
        let err: std::io::Error = EndpointError::Closed.into();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    }
}

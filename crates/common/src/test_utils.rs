//! Test utilities for virtual-usbip
//!
//! Provides sample descriptor trees and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::sample_printer_descriptor;
//!
//! let desc = sample_printer_descriptor();
//! assert_eq!(desc.configurations.len(), 1);
//! assert_eq!(desc.count_class(7, 1, 4), 1);
//! ```

use protocol::types::{conf_attr, ep_attr};
use protocol::{
    ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, EndpointType, Interface,
    InterfaceDescriptor, SetupPacket,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// IEEE 1284 device ID used by the sample printer
pub const SAMPLE_DEVICE_ID: &str = "MFG:Test;MDL:Virtual Printer;CMD:PJL,PDF;CLS:PRINTER;";

/// Create a bulk endpoint descriptor
pub fn bulk_endpoint(kind: EndpointType, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor {
        kind,
        attributes: ep_attr::XFER_BULK,
        max_packet_size,
    }
}

/// Create a single-alt-setting interface with one bidirectional bulk endpoint
pub fn printer_interface(protocol: u8, device_id: &str) -> Interface {
    Interface {
        alt_settings: vec![InterfaceDescriptor {
            class: 7,
            subclass: 1,
            protocol,
            description: String::new(),
            ieee1284_device_id: device_id.to_string(),
            endpoints: vec![bulk_endpoint(EndpointType::InOut, 512)],
        }],
    }
}

/// Create the descriptor of a printer with one configuration holding
/// one IPP-over-USB (7/1/4) interface and one legacy bidirectional
/// (7/1/2) interface
pub fn sample_printer_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: 0x1234,
        product_id: 0x5678,
        manufacturer: "Test Manufacturer".to_string(),
        product: "Virtual Printer".to_string(),
        serial_number: "SN000001".to_string(),
        configurations: vec![ConfigurationDescriptor {
            description: "Default".to_string(),
            attributes: conf_attr::RESERVED | conf_attr::SELF_POWERED,
            max_power: 1,
            interfaces: vec![
                printer_interface(4, ""),
                printer_interface(2, SAMPLE_DEVICE_ID),
            ],
        }],
        ..Default::default()
    }
}

/// Create a device descriptor with `count` identical configurations of
/// the given interfaces
pub fn descriptor_with_configurations(
    count: usize,
    interfaces: Vec<Interface>,
) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: 0x1234,
        product_id: 0x5678,
        configurations: (0..count)
            .map(|i| ConfigurationDescriptor {
                description: format!("Configuration {}", i + 1),
                attributes: conf_attr::RESERVED,
                max_power: 50,
                interfaces: interfaces.clone(),
            })
            .collect(),
        ..Default::default()
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Create a control transfer setup packet
pub fn setup_packet(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> SetupPacket {
    SetupPacket {
        request_type,
        request,
        value,
        index,
        length,
    }
}

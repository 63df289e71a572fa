//! USB type definitions
//!
//! This module defines the USB descriptor tree used to build virtual devices,
//! together with the USB constants (limits, descriptor types, request codes,
//! attribute bits) and the control setup packet.
//!
//! The descriptor structures are close to the ones found in the USB
//! documentation, but not identical. Fields like `bLength` and
//! `bDescriptorType` are computed when the descriptor is encoded; strings are
//! stored as Rust strings and get their string descriptor indices assigned
//! automatically; interface numbers, alternate setting numbers and endpoint
//! addresses are derived from the position in the tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{Decoder, Encoder};

/// Maximum number of devices on a bus
pub const MAX_DEVICES: usize = 127;

/// Maximum number of configurations per device
pub const MAX_CONFIGURATIONS: usize = 255;

/// Maximum number of interfaces per configuration
pub const MAX_INTERFACES: usize = 16;

/// Maximum number of endpoints per configuration, including endpoint 0
pub const MAX_ENDPOINTS: usize = 16;

/// Maximum length of a string descriptor, in UTF-16 code units
///
/// bLength is one byte and counts the 2-byte header, so the even length
/// limit leaves room for 126 units.
pub const MAX_STRING_LENGTH: usize = 252 / 2;

/// Maximum number of entries in the string table, including index 0
pub const MAX_STRINGS: usize = u8::MAX as usize;

/// Language ID advertised in string descriptor zero (English, US)
pub const LANGID_EN_US: u16 = 0x0409;

/// Configuration descriptor `bmAttributes` bits
pub mod conf_attr {
    /// Must always be set
    pub const RESERVED: u8 = 1 << 7;
    pub const SELF_POWERED: u8 = 1 << 6;
    pub const REMOTE_WAKEUP: u8 = 1 << 5;
}

/// Endpoint descriptor `bmAttributes` bits
pub mod ep_attr {
    // Transfer type
    pub const XFER_CONTROL: u8 = 0x00;
    pub const XFER_ISOCHRONOUS: u8 = 0x01;
    pub const XFER_BULK: u8 = 0x02;
    pub const XFER_INTERRUPT: u8 = 0x03;
    pub const XFER_MASK: u8 = 0x03;

    // Isochronous synchronization type
    pub const ISO_SYNC_NONE: u8 = 0x00;
    pub const ISO_SYNC_ASYNCHRONOUS: u8 = 0x04;
    pub const ISO_SYNC_ADAPTIVE: u8 = 0x08;
    pub const ISO_SYNC_SYNCHRONOUS: u8 = 0x0c;
    pub const ISO_SYNC_MASK: u8 = 0x0c;

    // Isochronous usage type
    pub const ISO_USAGE_DATA: u8 = 0x00;
    pub const ISO_USAGE_FEEDBACK: u8 = 0x10;
    pub const ISO_USAGE_IMPLICIT: u8 = 0x20;
    pub const ISO_USAGE_MASK: u8 = 0x30;
}

/// Control request codes (`bRequest`)
pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_DESCRIPTOR: u8 = 0x07;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
    pub const GET_INTERFACE: u8 = 0x0a;
    pub const SET_INTERFACE: u8 = 0x0b;

    /// Printer class: read the IEEE 1284 device ID string
    pub const PRINTER_GET_DEVICE_ID: u8 = 0x00;
}

/// USB device class codes used by this crate
pub mod class {
    pub const PRINTER: u8 = 0x07;
}

/// BCD-encoded USB specification version
pub mod version {
    pub const USB10: u16 = 0x0100;
    pub const USB11: u16 = 0x0101;
    pub const USB20: u16 = 0x0200;
}

/// USB device speed, as reported in USB/IP device records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Unknown,
    /// Low speed - 1.5 Mbps (USB 1.1)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    #[default]
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
}

impl Speed {
    /// Speed code used on the wire (Linux `enum usb_device_speed`)
    pub fn code(self) -> u32 {
        match self {
            Speed::Unknown => 0,
            Speed::Low => 1,
            Speed::Full => 2,
            Speed::High => 3,
            Speed::Super => 5,
        }
    }
}

/// Descriptor types (high byte of `wValue` in GET_DESCRIPTOR)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    Device,
    Configuration,
    String,
    Interface,
    Endpoint,
    Other(u8),
}

impl DescriptorType {
    pub fn code(self) -> u8 {
        match self {
            DescriptorType::Device => 1,
            DescriptorType::Configuration => 2,
            DescriptorType::String => 3,
            DescriptorType::Interface => 4,
            DescriptorType::Endpoint => 5,
            DescriptorType::Other(code) => code,
        }
    }
}

impl From<u8> for DescriptorType {
    fn from(code: u8) -> Self {
        match code {
            1 => DescriptorType::Device,
            2 => DescriptorType::Configuration,
            3 => DescriptorType::String,
            4 => DescriptorType::Interface,
            5 => DescriptorType::Endpoint,
            other => DescriptorType::Other(other),
        }
    }
}

impl fmt::Display for DescriptorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorType::Device => write!(f, "Device"),
            DescriptorType::Configuration => write!(f, "Configuration"),
            DescriptorType::String => write!(f, "String"),
            DescriptorType::Interface => write!(f, "Interface"),
            DescriptorType::Endpoint => write!(f, "Endpoint"),
            DescriptorType::Other(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// Endpoint direction
///
/// Hardware USB has no bidirectional endpoints, but for software it is much
/// more convenient to model a logically bidirectional data channel as one
/// endpoint. On the USB side such an endpoint is exposed as a pair of
/// unidirectional endpoints with consecutive numbers (IN first, then OUT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    /// Device to host
    In,
    /// Host to device
    Out,
    /// Both directions
    #[default]
    InOut,
}

impl EndpointType {
    /// Count of USB endpoint numbers this endpoint occupies
    pub fn slots(self) -> usize {
        match self {
            EndpointType::In | EndpointType::Out => 1,
            EndpointType::InOut => 2,
        }
    }

    pub fn has_in(self) -> bool {
        matches!(self, EndpointType::In | EndpointType::InOut)
    }

    pub fn has_out(self) -> bool {
        matches!(self, EndpointType::Out | EndpointType::InOut)
    }
}

/// USB device descriptor, the root of the descriptor tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDescriptor {
    /// USB specification version (BCD)
    pub bcd_usb: u16,
    pub speed: Speed,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Max packet size for endpoint 0 (8, 16, 32 or 64)
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Device release number (BCD)
    pub bcd_device: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    pub configurations: Vec<ConfigurationDescriptor>,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            bcd_usb: version::USB20,
            speed: Speed::High,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            max_packet_size0: 64,
            vendor_id: 0,
            product_id: 0,
            bcd_device: 0x0100,
            manufacturer: String::new(),
            product: String::new(),
            serial_number: String::new(),
            configurations: Vec::new(),
        }
    }
}

impl DeviceDescriptor {
    /// Count alternate settings across all configurations matching the
    /// given class/subclass/protocol triple
    pub fn count_class(&self, class: u8, subclass: u8, protocol: u8) -> usize {
        self.configurations
            .iter()
            .flat_map(|conf| conf.interfaces.iter())
            .flat_map(|iff| iff.alt_settings.iter())
            .filter(|alt| alt.matches(class, subclass, protocol))
            .count()
    }
}

/// USB configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationDescriptor {
    pub description: String,
    /// `bmAttributes` bits, see [`conf_attr`]
    pub attributes: u8,
    /// Max power, in 2 mA units
    pub max_power: u8,
    pub interfaces: Vec<Interface>,
}

/// All alternate settings of one interface, ordered by `bAlternateSetting`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    pub alt_settings: Vec<InterfaceDescriptor>,
}

impl Interface {
    /// Count of endpoint numbers used by the interface: the maximum
    /// over its alternate settings
    pub fn count_endpoints(&self) -> usize {
        self.alt_settings
            .iter()
            .map(InterfaceDescriptor::count_endpoints)
            .max()
            .unwrap_or(0)
    }
}

/// USB interface descriptor (one alternate setting)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceDescriptor {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub description: String,
    /// IEEE 1284 device ID, returned by the printer class GET_DEVICE_ID
    /// request. Empty for non-printer interfaces.
    pub ieee1284_device_id: String,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    /// Count of endpoint numbers used by this alternate setting.
    /// Bidirectional endpoints are counted twice.
    pub fn count_endpoints(&self) -> usize {
        self.endpoints.iter().map(|ep| ep.kind.slots()).sum()
    }

    pub fn matches(&self, class: u8, subclass: u8, protocol: u8) -> bool {
        self.class == class && self.subclass == subclass && self.protocol == protocol
    }
}

/// USB endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointDescriptor {
    pub kind: EndpointType,
    /// `bmAttributes` bits, see [`ep_attr`]
    pub attributes: u8,
    pub max_packet_size: u16,
}

/// Request type bits of `bmRequestType`
pub mod request_type {
    /// Data stage direction, device to host if set
    pub const DIR_IN: u8 = 0x80;

    pub const TYPE_STANDARD: u8 = 0x00;
    pub const TYPE_CLASS: u8 = 0x20;
    pub const TYPE_VENDOR: u8 = 0x40;
    pub const TYPE_MASK: u8 = 0x60;

    pub const RECIPIENT_DEVICE: u8 = 0x00;
    pub const RECIPIENT_INTERFACE: u8 = 0x01;
    pub const RECIPIENT_ENDPOINT: u8 = 0x02;
    pub const RECIPIENT_OTHER: u8 = 0x03;
    pub const RECIPIENT_MASK: u8 = 0x03;
}

/// USB control setup packet (8 bytes, little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn decode(data: &[u8; 8]) -> Self {
        let mut dec = Decoder::new(data);
        Self {
            request_type: dec.get_u8(),
            request: dec.get_u8(),
            value: dec.get_le16(),
            index: dec.get_le16(),
            length: dec.get_le16(),
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut enc = Encoder::with_capacity(8);
        enc.put_u8(self.request_type);
        enc.put_u8(self.request);
        enc.put_le16(self.value);
        enc.put_le16(self.index);
        enc.put_le16(self.length);

        let mut out = [0u8; 8];
        out.copy_from_slice(enc.as_slice());
        out
    }

    pub fn is_in(&self) -> bool {
        self.request_type & request_type::DIR_IN != 0
    }

    /// Request type: standard, class or vendor
    pub fn kind(&self) -> u8 {
        self.request_type & request_type::TYPE_MASK
    }

    pub fn recipient(&self) -> u8 {
        self.request_type & request_type::RECIPIENT_MASK
    }

    fn request_name(&self) -> String {
        if self.kind() != request_type::TYPE_STANDARD {
            return format!("0x{:02x}", self.request);
        }

        let name = match self.request {
            request::GET_STATUS => "GET_STATUS",
            request::CLEAR_FEATURE => "CLEAR_FEATURE",
            request::SET_FEATURE => "SET_FEATURE",
            request::SET_ADDRESS => "SET_ADDRESS",
            request::GET_DESCRIPTOR => "GET_DESCRIPTOR",
            request::SET_DESCRIPTOR => "SET_DESCRIPTOR",
            request::GET_CONFIGURATION => "GET_CONFIGURATION",
            request::SET_CONFIGURATION => "SET_CONFIGURATION",
            request::GET_INTERFACE => "GET_INTERFACE",
            request::SET_INTERFACE => "SET_INTERFACE",
            other => return format!("Unknown(0x{:02x})", other),
        };
        name.to_string()
    }
}

impl fmt::Display for SetupPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind() {
            request_type::TYPE_STANDARD => "standard",
            request_type::TYPE_CLASS => "class",
            request_type::TYPE_VENDOR => "vendor",
            _ => "unknown",
        };
        let dir = if self.is_in() { "<-" } else { "->" };
        let recipient = match self.recipient() {
            request_type::RECIPIENT_DEVICE => "device",
            request_type::RECIPIENT_INTERFACE => "interface",
            request_type::RECIPIENT_ENDPOINT => "endpoint",
            _ => "other",
        };

        write!(f, "{} ({}{}{})", self.request_name(), kind, dir, recipient)?;

        if self.kind() == request_type::TYPE_STANDARD {
            match self.request {
                request::GET_DESCRIPTOR => {
                    let ty = DescriptorType::from((self.value >> 8) as u8);
                    write!(f, ": {}[{}]", ty, self.value & 0xff)?;
                }
                request::SET_CONFIGURATION | request::SET_INTERFACE => {
                    write!(f, ": {}", self.value)?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alt(endpoints: &[EndpointType]) -> InterfaceDescriptor {
        InterfaceDescriptor {
            endpoints: endpoints
                .iter()
                .map(|&kind| EndpointDescriptor {
                    kind,
                    attributes: ep_attr::XFER_BULK,
                    max_packet_size: 512,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_count_endpoints_counts_bidirectional_twice() {
        let alt = alt(&[EndpointType::In, EndpointType::InOut, EndpointType::Out]);
        assert_eq!(alt.count_endpoints(), 4);
    }

    #[test]
    fn test_interface_count_is_max_over_alt_settings() {
        let iff = Interface {
            alt_settings: vec![
                alt(&[EndpointType::In]),
                alt(&[EndpointType::InOut, EndpointType::InOut]),
                alt(&[]),
            ],
        };
        assert_eq!(iff.count_endpoints(), 4);
    }

    #[test]
    fn test_setup_packet_layout() {
        let setup = SetupPacket {
            request_type: 0x80,
            request: request::GET_DESCRIPTOR,
            value: 0x0200,
            index: 0,
            length: 0x00ff,
        };

        let raw = setup.encode();
        assert_eq!(raw, [0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0xff, 0x00]);
        assert_eq!(SetupPacket::decode(&raw), setup);
        assert!(setup.is_in());
        assert_eq!(setup.recipient(), request_type::RECIPIENT_DEVICE);
    }

    #[test]
    fn test_setup_packet_display() {
        let setup = SetupPacket {
            request_type: 0x80,
            request: request::GET_DESCRIPTOR,
            value: 0x0200,
            index: 0,
            length: 9,
        };
        assert_eq!(
            setup.to_string(),
            "GET_DESCRIPTOR (standard<-device): Configuration[0]"
        );

        let setup = SetupPacket {
            request_type: 0x00,
            request: request::SET_CONFIGURATION,
            value: 1,
            ..Default::default()
        };
        assert_eq!(setup.to_string(), "SET_CONFIGURATION (standard->device): 1");
    }

    #[test]
    fn test_count_class() {
        let mut printer = alt(&[EndpointType::InOut]);
        printer.class = 7;
        printer.subclass = 1;
        printer.protocol = 4;

        let desc = DeviceDescriptor {
            configurations: vec![ConfigurationDescriptor {
                interfaces: vec![
                    Interface {
                        alt_settings: vec![printer.clone()],
                    },
                    Interface {
                        alt_settings: vec![printer, alt(&[])],
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        assert_eq!(desc.count_class(7, 1, 4), 2);
        assert_eq!(desc.count_class(7, 1, 2), 0);
    }

    #[test]
    fn test_speed_codes() {
        assert_eq!(Speed::Low.code(), 1);
        assert_eq!(Speed::Full.code(), 2);
        assert_eq!(Speed::High.code(), 3);
        assert_eq!(Speed::Super.code(), 5);
    }
}

//! Virtual USB device
//!
//! A [`Device`] is assembled from a [`DeviceDescriptor`] tree. It owns one
//! [`Endpoint`] per endpoint descriptor of every alternate setting, the
//! string descriptor table, and the runtime state changed by the host
//! through standard control requests: the selected configuration and the
//! selected alternate setting of each interface.
//!
//! # Endpoint numbering
//!
//! Endpoint numbers are assigned per interface. Interface `i` of a
//! configuration starts at `1 + sum of endpoint counts of interfaces 0..i`,
//! where the endpoint count of an interface is the maximum over its
//! alternate settings. All alternate settings of an interface share the
//! same numbers. A bidirectional endpoint takes two consecutive numbers,
//! IN first, then OUT.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use protocol::types::{
    MAX_CONFIGURATIONS, MAX_ENDPOINTS, MAX_INTERFACES, MAX_STRING_LENGTH, MAX_STRINGS,
    LANGID_EN_US, class, conf_attr,
};
use protocol::{
    DescriptorType, DeviceDescriptor, DeviceSummary, Encoder, EndpointType, InterfaceClass,
    InterfaceDescriptor, Location, SubmitRequest, UsbError,
};
use tokio::sync::watch;
use tracing::{debug, info};

use super::endpoint::{Completion, Endpoint};
use crate::error::DeviceError;

/// Endpoint slot of the active configuration
#[derive(Clone)]
struct ActiveEndpoint {
    ep: Arc<Endpoint>,
    /// Direction of the USB endpoint number: IN if true
    input: bool,
}

/// Mutable device state
struct State {
    /// Current bConfigurationValue (1-based)
    configuration: u8,
    /// Current alternate setting, by interface number
    alt_settings: Vec<u8>,
    /// Endpoints by USB endpoint number. Index 0 is the control endpoint
    /// and is never routed to an [`Endpoint`].
    endpoints: Vec<Option<ActiveEndpoint>>,
}

/// Deduplicated string descriptor table
#[derive(Debug, Default)]
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u8>,
}

impl StringTable {
    fn new() -> Self {
        let mut table = Self::default();
        // Index 0 is the language list, never a real string
        table.add("");
        table
    }

    fn truncate(s: &str) -> &str {
        let mut units = 0;
        for (idx, ch) in s.char_indices() {
            units += ch.len_utf16();
            if units > MAX_STRING_LENGTH {
                return &s[..idx];
            }
        }
        s
    }

    fn add(&mut self, s: &str) {
        if self.strings.len() >= MAX_STRINGS {
            return;
        }

        let s = Self::truncate(s);
        if !self.index.contains_key(s) {
            self.index.insert(s.to_string(), self.strings.len() as u8);
            self.strings.push(s.to_string());
        }
    }

    /// Index of the string, 0 (no string) if not in the table
    fn get(&self, s: &str) -> u8 {
        self.index.get(Self::truncate(s)).copied().unwrap_or(0)
    }
}

/// One USB endpoint number used by an alternate setting
struct EndpointNumber {
    number: u8,
    input: bool,
    /// Index into the alternate setting's endpoint list
    index: usize,
}

/// Assign USB endpoint numbers to the endpoints of an alternate setting
fn endpoint_numbers(alt: &InterfaceDescriptor, base: usize) -> Vec<EndpointNumber> {
    let mut numbers = Vec::with_capacity(alt.count_endpoints());
    let mut next = base;

    for (index, ep) in alt.endpoints.iter().enumerate() {
        if ep.kind.has_in() {
            numbers.push(EndpointNumber {
                number: next as u8,
                input: true,
                index,
            });
            next += 1;
        }
        if ep.kind.has_out() {
            numbers.push(EndpointNumber {
                number: next as u8,
                input: false,
                index,
            });
            next += 1;
        }
    }

    numbers
}

/// Virtual USB device
pub struct Device {
    desc: DeviceDescriptor,
    strings: StringTable,
    /// All endpoints, by configuration, interface, alternate setting
    tree: Vec<Vec<Vec<Vec<Arc<Endpoint>>>>>,
    state: Mutex<State>,
    config_tx: watch::Sender<u8>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("vendor_id", &self.desc.vendor_id)
            .field("product_id", &self.desc.product_id)
            .field("configuration", &self.get_configuration())
            .finish()
    }
}

impl Device {
    /// Create a device from its descriptor tree
    ///
    /// Fails if the device has no configurations, a configuration has no
    /// interfaces, an interface has no alternate settings, or any USB
    /// cardinality limit is exceeded. Configuration 1 is selected.
    pub fn new(desc: DeviceDescriptor) -> Result<Self, DeviceError> {
        Self::validate(&desc)?;

        let tree = desc
            .configurations
            .iter()
            .map(|conf| {
                conf.interfaces
                    .iter()
                    .map(|iff| {
                        iff.alt_settings
                            .iter()
                            .map(|alt| {
                                alt.endpoints
                                    .iter()
                                    .map(|ep| Arc::new(Endpoint::new(*ep)))
                                    .collect()
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();

        let mut strings = StringTable::new();
        strings.add(&desc.manufacturer);
        strings.add(&desc.product);
        strings.add(&desc.serial_number);
        for conf in &desc.configurations {
            strings.add(&conf.description);
            for alt in conf.interfaces.iter().flat_map(|iff| iff.alt_settings.iter()) {
                strings.add(&alt.description);
            }
        }

        let (config_tx, _) = watch::channel(1);

        let dev = Self {
            desc,
            strings,
            tree,
            state: Mutex::new(State {
                configuration: 0,
                alt_settings: Vec::new(),
                endpoints: Vec::new(),
            }),
            config_tx,
        };

        dev.select_configuration(1);

        info!(
            "Created device {:04x}:{:04x} with {} configuration(s)",
            dev.desc.vendor_id,
            dev.desc.product_id,
            dev.desc.configurations.len()
        );

        Ok(dev)
    }

    fn validate(desc: &DeviceDescriptor) -> Result<(), DeviceError> {
        let confs = desc.configurations.len();
        if confs == 0 {
            return Err(DeviceError::NoConfigurations);
        }
        if confs > MAX_CONFIGURATIONS {
            return Err(DeviceError::TooManyConfigurations(confs));
        }

        for (confno, conf) in desc.configurations.iter().enumerate() {
            let iffs = conf.interfaces.len();
            if iffs == 0 {
                return Err(DeviceError::NoInterfaces(confno));
            }
            if iffs > MAX_INTERFACES {
                return Err(DeviceError::TooManyInterfaces {
                    conf: confno,
                    count: iffs,
                });
            }

            // Endpoint 0 is reserved for control
            let mut count = 1;
            for (iffno, iff) in conf.interfaces.iter().enumerate() {
                if iff.alt_settings.is_empty() {
                    return Err(DeviceError::NoAltSettings {
                        conf: confno,
                        iff: iffno,
                    });
                }
                count += iff.count_endpoints();
            }

            if count > MAX_ENDPOINTS {
                return Err(DeviceError::TooManyEndpoints { conf: confno, count });
            }
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.desc
    }

    /// Endpoints of every alternate setting, in any configuration,
    /// matching the class/subclass/protocol triple
    pub fn endpoints_by_class(&self, class: u8, subclass: u8, protocol: u8) -> Vec<Arc<Endpoint>> {
        let mut found = Vec::new();

        for (confno, conf) in self.desc.configurations.iter().enumerate() {
            for (iffno, iff) in conf.interfaces.iter().enumerate() {
                for (altno, alt) in iff.alt_settings.iter().enumerate() {
                    if alt.matches(class, subclass, protocol) {
                        found.extend(self.tree[confno][iffno][altno].iter().cloned());
                    }
                }
            }
        }

        found
    }

    /// Watch the selected configuration value
    pub fn configuration_changes(&self) -> watch::Receiver<u8> {
        self.config_tx.subscribe()
    }

    /// String descriptor index of `s`, 0 if the string is not registered
    pub fn string_index(&self, s: &str) -> u8 {
        self.strings.get(s)
    }

    /// Descriptor summary for handshake replies
    pub fn summary(&self, location: Location) -> DeviceSummary {
        let state = self.lock();
        let conf = &self.desc.configurations[state.configuration as usize - 1];

        DeviceSummary {
            path: location.path(),
            location,
            speed: self.desc.speed,
            vendor_id: self.desc.vendor_id,
            product_id: self.desc.product_id,
            bcd_device: self.desc.bcd_device,
            class: self.desc.device_class,
            subclass: self.desc.device_subclass,
            protocol: self.desc.device_protocol,
            configuration_value: state.configuration,
            num_configurations: self.desc.configurations.len() as u8,
            interfaces: conf
                .interfaces
                .iter()
                .map(|iff| {
                    let alt = &iff.alt_settings[0];
                    InterfaceClass {
                        class: alt.class,
                        subclass: alt.subclass,
                        protocol: alt.protocol,
                    }
                })
                .collect(),
        }
    }

    /// Standard GET_STATUS, device recipient
    pub fn get_status(&self) -> [u8; 2] {
        let state = self.lock();
        let conf = &self.desc.configurations[state.configuration as usize - 1];

        let mut status = [0u8; 2];
        if conf.attributes & conf_attr::SELF_POWERED != 0 {
            status[0] |= 0x01;
        }
        if conf.attributes & conf_attr::REMOTE_WAKEUP != 0 {
            status[0] |= 0x02;
        }
        status
    }

    /// Standard GET_DESCRIPTOR, in USB wire representation
    pub fn get_descriptor(&self, ty: DescriptorType, index: u8) -> Result<Vec<u8>, UsbError> {
        match ty {
            DescriptorType::Device if index == 0 => Ok(self.device_descriptor()),
            DescriptorType::Configuration
                if (index as usize) < self.desc.configurations.len() =>
            {
                Ok(self.configuration_descriptor(index as usize))
            }
            DescriptorType::String => self.string_descriptor(index),
            _ => Err(UsbError::Pipe),
        }
    }

    fn device_descriptor(&self) -> Vec<u8> {
        let desc = &self.desc;
        let mut enc = Encoder::with_capacity(18);

        enc.put_u8(18); // bLength
        enc.put_u8(DescriptorType::Device.code());
        enc.put_le16(desc.bcd_usb);
        enc.put_u8(desc.device_class);
        enc.put_u8(desc.device_subclass);
        enc.put_u8(desc.device_protocol);
        enc.put_u8(desc.max_packet_size0);
        enc.put_le16(desc.vendor_id);
        enc.put_le16(desc.product_id);
        enc.put_le16(desc.bcd_device);
        enc.put_u8(self.strings.get(&desc.manufacturer));
        enc.put_u8(self.strings.get(&desc.product));
        enc.put_u8(self.strings.get(&desc.serial_number));
        enc.put_u8(desc.configurations.len() as u8);

        enc.into_vec()
    }

    fn configuration_descriptor(&self, confno: usize) -> Vec<u8> {
        let conf = &self.desc.configurations[confno];
        let mut enc = Encoder::with_capacity(256);

        enc.put_u8(9); // bLength
        enc.put_u8(DescriptorType::Configuration.code());
        enc.put_le16(0); // wTotalLength, patched below
        enc.put_u8(conf.interfaces.len() as u8);
        enc.put_u8(confno as u8 + 1); // bConfigurationValue
        enc.put_u8(self.strings.get(&conf.description));
        enc.put_u8(conf.attributes | conf_attr::RESERVED);
        enc.put_u8(conf.max_power);

        let mut base = 1;
        for (iffno, iff) in conf.interfaces.iter().enumerate() {
            for (altno, alt) in iff.alt_settings.iter().enumerate() {
                enc.put_u8(9); // bLength
                enc.put_u8(DescriptorType::Interface.code());
                enc.put_u8(iffno as u8);
                enc.put_u8(altno as u8);
                enc.put_u8(alt.count_endpoints() as u8);
                enc.put_u8(alt.class);
                enc.put_u8(alt.subclass);
                enc.put_u8(alt.protocol);
                enc.put_u8(self.strings.get(&alt.description));

                for num in endpoint_numbers(alt, base) {
                    let ep = &alt.endpoints[num.index];
                    let addr = if num.input { num.number | 0x80 } else { num.number };

                    enc.put_u8(7); // bLength
                    enc.put_u8(DescriptorType::Endpoint.code());
                    enc.put_u8(addr);
                    enc.put_u8(ep.attributes);
                    enc.put_le16(ep.max_packet_size);
                    enc.put_u8(0); // bInterval
                }
            }
            base += iff.count_endpoints();
        }

        let len = enc.len() as u16;
        enc.patch_le16(2, len);
        enc.into_vec()
    }

    fn string_descriptor(&self, index: u8) -> Result<Vec<u8>, UsbError> {
        let mut enc = Encoder::with_capacity(4);

        // String descriptor zero lists supported languages
        if index == 0 {
            enc.put_u8(4);
            enc.put_u8(DescriptorType::String.code());
            enc.put_le16(LANGID_EN_US);
            return Ok(enc.into_vec());
        }

        let s = self
            .strings
            .strings
            .get(index as usize)
            .ok_or(UsbError::Pipe)?;
        let units: Vec<u16> = s.encode_utf16().collect();

        enc.put_u8((units.len() * 2 + 2) as u8);
        enc.put_u8(DescriptorType::String.code());
        for unit in units {
            enc.put_le16(unit);
        }
        Ok(enc.into_vec())
    }

    /// Standard GET_CONFIGURATION
    pub fn get_configuration(&self) -> u8 {
        self.lock().configuration
    }

    /// Standard SET_CONFIGURATION
    ///
    /// Selecting configuration 0 (unconfigured) is accepted and ignored.
    pub fn set_configuration(&self, value: u16) -> Result<(), UsbError> {
        if value as usize > self.desc.configurations.len() {
            return Err(UsbError::Pipe);
        }

        if value != 0 {
            self.select_configuration(value as u8);
        }

        Ok(())
    }

    fn select_configuration(&self, value: u8) {
        let confno = value as usize - 1;
        let conf = &self.desc.configurations[confno];

        let mut state = self.lock();
        state.configuration = value;
        state.alt_settings = vec![0; conf.interfaces.len()];
        self.rebuild_endpoints(&mut state);
        drop(state);

        debug!("Configuration {} selected", value);
        self.config_tx.send_replace(value);
    }

    /// Rebuild the endpoint number table from the current configuration
    /// and alternate settings
    fn rebuild_endpoints(&self, state: &mut State) {
        let confno = state.configuration as usize - 1;
        let conf = &self.desc.configurations[confno];

        let mut endpoints: Vec<Option<ActiveEndpoint>> = vec![None];
        for (iffno, iff) in conf.interfaces.iter().enumerate() {
            let base = endpoints.len();
            endpoints.resize(base + iff.count_endpoints(), None);

            let altno = state.alt_settings[iffno] as usize;
            let alt = &iff.alt_settings[altno];

            for num in endpoint_numbers(alt, base) {
                endpoints[num.number as usize] = Some(ActiveEndpoint {
                    ep: self.tree[confno][iffno][altno][num.index].clone(),
                    input: num.input,
                });
            }
        }

        state.endpoints = endpoints;
    }

    /// Standard GET_STATUS, interface recipient
    pub fn get_interface_status(&self, iff: u16) -> Result<[u8; 2], UsbError> {
        if iff as usize >= self.lock().alt_settings.len() {
            return Err(UsbError::Pipe);
        }
        Ok([0, 0])
    }

    /// Standard GET_INTERFACE
    pub fn get_interface(&self, iff: u16) -> Result<u8, UsbError> {
        self.lock()
            .alt_settings
            .get(iff as usize)
            .copied()
            .ok_or(UsbError::Pipe)
    }

    /// Standard SET_INTERFACE
    pub fn set_interface(&self, iff: u16, alt: u16) -> Result<(), UsbError> {
        let mut state = self.lock();
        let conf = &self.desc.configurations[state.configuration as usize - 1];

        let interface = conf.interfaces.get(iff as usize).ok_or(UsbError::Pipe)?;
        if alt as usize >= interface.alt_settings.len() {
            return Err(UsbError::Pipe);
        }

        state.alt_settings[iff as usize] = alt as u8;
        self.rebuild_endpoints(&mut state);

        debug!("Interface {} alternate setting {} selected", iff, alt);
        Ok(())
    }

    /// Printer class GET_DEVICE_ID: the IEEE 1284 device ID of an
    /// alternate setting of the current configuration, prefixed with
    /// its 2-byte big-endian length (the prefix included)
    pub fn ieee1284_device_id(&self, iff: u8, alt: u8) -> Result<Vec<u8>, UsbError> {
        let state = self.lock();
        let conf = &self.desc.configurations[state.configuration as usize - 1];

        let alt = conf
            .interfaces
            .get(iff as usize)
            .and_then(|interface| interface.alt_settings.get(alt as usize))
            .ok_or(UsbError::Pipe)?;

        if alt.class != class::PRINTER || alt.ieee1284_device_id.is_empty() {
            return Err(UsbError::Pipe);
        }

        let id = alt.ieee1284_device_id.as_bytes();
        let len = (id.len() + 2).min(u16::MAX as usize);

        let mut enc = Encoder::with_capacity(len);
        enc.put_be16(len as u16);
        enc.put_bytes(&id[..len - 2]);
        Ok(enc.into_vec())
    }

    fn lookup(&self, number: u32) -> Option<ActiveEndpoint> {
        self.lock()
            .endpoints
            .get(number as usize)
            .and_then(|slot| slot.clone())
    }

    /// Endpoint serving a USB endpoint number and direction in the
    /// current configuration
    pub fn route(&self, number: u32, input: bool) -> Option<Arc<Endpoint>> {
        self.lookup(number)
            .filter(|active| active.input == input)
            .map(|active| active.ep)
    }

    /// Route a submit request to its endpoint.
    ///
    /// Fails, handing the request back, if the endpoint number is not in
    /// use by the current configuration or its direction does not match.
    pub fn submit(&self, rq: SubmitRequest, done: Completion) -> Result<(), SubmitRequest> {
        match self.route(rq.endpoint(), rq.is_in()) {
            Some(ep) => {
                ep.submit(rq, done);
                Ok(())
            }
            None => Err(rq),
        }
    }

    /// Cancel a pending submit request. Returns true if it was found.
    pub fn unlink(&self, endpoint: u32, input: bool, seqnum: u32) -> bool {
        match self.lookup(endpoint) {
            Some(active) => active.ep.unlink(seqnum, input),
            None => false,
        }
    }

    /// Cancel all pending requests on all endpoints
    pub fn shutdown(&self) {
        for ep in self.tree.iter().flatten().flatten().flatten() {
            ep.shutdown();
        }
    }

    /// Endpoint kind at a USB endpoint number of the current configuration
    pub fn endpoint_kind(&self, number: u32) -> Option<EndpointType> {
        self.lookup(number).map(|active| active.ep.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        SAMPLE_DEVICE_ID, bulk_endpoint, descriptor_with_configurations, printer_interface,
        sample_printer_descriptor,
    };
    use proptest::prelude::*;
    use protocol::{
        ConfigurationDescriptor, Decoder, Direction, IoHeader, Interface, SubmitResponse,
    };
    use tokio::sync::mpsc;

    fn submit(dev: &Device, seqnum: u32, endpoint: u32, direction: Direction, length: u32) -> bool {
        let rq = SubmitRequest::new(
            IoHeader {
                seqnum,
                direction,
                endpoint,
                ..Default::default()
            },
            length,
        );
        dev.submit(rq, Box::new(|_| {})).is_ok()
    }

    fn alt(kinds: &[EndpointType]) -> InterfaceDescriptor {
        InterfaceDescriptor {
            class: 0xff,
            endpoints: kinds.iter().map(|&k| bulk_endpoint(k, 64)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_errors() {
        let mut desc = sample_printer_descriptor();
        desc.configurations.clear();
        assert_eq!(Device::new(desc).unwrap_err(), DeviceError::NoConfigurations);

        let desc = descriptor_with_configurations(1, Vec::new());
        assert_eq!(Device::new(desc).unwrap_err(), DeviceError::NoInterfaces(0));

        let desc = descriptor_with_configurations(1, vec![Interface::default()]);
        assert_eq!(
            Device::new(desc).unwrap_err(),
            DeviceError::NoAltSettings { conf: 0, iff: 0 }
        );

        let desc = descriptor_with_configurations(1, vec![printer_interface(4, ""); 17]);
        assert_eq!(
            Device::new(desc).unwrap_err(),
            DeviceError::TooManyInterfaces { conf: 0, count: 17 }
        );

        // 8 bidirectional endpoints plus endpoint 0
        let desc = descriptor_with_configurations(1, vec![printer_interface(4, ""); 8]);
        assert_eq!(
            Device::new(desc).unwrap_err(),
            DeviceError::TooManyEndpoints { conf: 0, count: 17 }
        );

        let desc = descriptor_with_configurations(256, vec![printer_interface(4, "")]);
        assert_eq!(
            Device::new(desc).unwrap_err(),
            DeviceError::TooManyConfigurations(256)
        );
    }

    #[test]
    fn test_string_table() {
        let mut desc = sample_printer_descriptor();
        desc.product = desc.manufacturer.clone();
        let dev = Device::new(desc).unwrap();

        let idx = dev.string_index("Test Manufacturer");
        assert_ne!(idx, 0);
        assert_eq!(dev.string_index("Test Manufacturer"), idx);
        assert_eq!(dev.string_index(""), 0);
        assert_eq!(dev.string_index("not registered"), 0);

        let desc = dev.get_descriptor(DescriptorType::Device, 0).unwrap();
        // iManufacturer and iProduct share one entry
        assert_eq!(desc[14], idx);
        assert_eq!(desc[15], idx);
    }

    #[test]
    fn test_string_truncated_to_max_length() {
        let mut desc = sample_printer_descriptor();
        desc.serial_number = "x".repeat(300);
        let dev = Device::new(desc).unwrap();

        let idx = dev.string_index(&"x".repeat(300));
        assert_ne!(idx, 0);
        assert_eq!(dev.string_index(&"x".repeat(MAX_STRING_LENGTH)), idx);

        let s = dev.get_descriptor(DescriptorType::String, idx).unwrap();
        assert_eq!(s[0], 254);
        assert_eq!(s[0] as usize, s.len());
        assert_eq!(s[1], 3);
    }

    #[test]
    fn test_string_descriptors() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();

        assert_eq!(
            dev.get_descriptor(DescriptorType::String, 0).unwrap(),
            vec![4, 3, 0x09, 0x04]
        );

        let idx = dev.string_index("SN000001");
        let s = dev.get_descriptor(DescriptorType::String, idx).unwrap();
        assert_eq!(s[0], 18);
        assert_eq!(s[1], 3);
        assert_eq!(&s[2..6], &[b'S', 0, b'N', 0]);

        assert_eq!(
            dev.get_descriptor(DescriptorType::String, 200),
            Err(UsbError::Pipe)
        );
    }

    #[test]
    fn test_device_descriptor_layout() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();
        let desc = dev.get_descriptor(DescriptorType::Device, 0).unwrap();

        assert_eq!(desc.len(), 18);
        assert_eq!(&desc[..4], &[18, 1, 0x00, 0x02]);
        assert_eq!(desc[7], 64);
        assert_eq!(&desc[8..12], &[0x34, 0x12, 0x78, 0x56]);
        assert_eq!(desc[17], 1);

        assert_eq!(
            dev.get_descriptor(DescriptorType::Device, 1),
            Err(UsbError::Pipe)
        );
        assert_eq!(
            dev.get_descriptor(DescriptorType::Other(0x21), 0),
            Err(UsbError::Pipe)
        );
    }

    #[test]
    fn test_configuration_descriptor_endpoints() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();
        let data = dev.get_descriptor(DescriptorType::Configuration, 0).unwrap();

        // 9 + 2 * (9 + 2 * 7)
        assert_eq!(data.len(), 55);
        assert_eq!(&data[2..4], &[55, 0]);
        assert_eq!(data[4], 2);
        assert_eq!(data[5], 1);
        assert_eq!(data[7], 0xc0);

        // First interface: endpoints 0x81 and 0x01
        assert_eq!(&data[9..18], &[9, 4, 0, 0, 2, 7, 1, 4, 0]);
        assert_eq!(&data[18..25], &[7, 5, 0x81, 2, 0x00, 0x02, 0]);
        assert_eq!(&data[25..32], &[7, 5, 0x01, 2, 0x00, 0x02, 0]);

        // Second interface: endpoints 0x82 and 0x02
        assert_eq!(&data[32..37], &[9, 4, 1, 0, 2]);
        assert_eq!(data[43], 0x82);
        assert_eq!(data[50], 0x02);

        assert_eq!(
            dev.get_descriptor(DescriptorType::Configuration, 1),
            Err(UsbError::Pipe)
        );
    }

    #[test]
    fn test_get_status_bits() {
        let mut desc = sample_printer_descriptor();
        desc.configurations[0].attributes = conf_attr::REMOTE_WAKEUP;
        let dev = Device::new(desc).unwrap();
        assert_eq!(dev.get_status(), [0x02, 0]);

        let dev = Device::new(sample_printer_descriptor()).unwrap();
        assert_eq!(dev.get_status(), [0x01, 0]);
    }

    #[test]
    fn test_set_configuration() {
        let desc = descriptor_with_configurations(2, vec![printer_interface(4, "")]);
        let dev = Device::new(desc).unwrap();
        let mut changes = dev.configuration_changes();
        assert_eq!(dev.get_configuration(), 1);

        assert_eq!(dev.set_configuration(3), Err(UsbError::Pipe));
        assert_eq!(dev.set_configuration(0), Ok(()));
        assert_eq!(dev.get_configuration(), 1);
        assert!(!changes.has_changed().unwrap());

        assert_eq!(dev.set_configuration(2), Ok(()));
        assert_eq!(dev.get_configuration(), 2);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), 2);
    }

    #[test]
    fn test_submit_routing_and_direction() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();

        assert!(submit(&dev, 1, 1, Direction::In, 8));
        assert!(submit(&dev, 2, 2, Direction::Out, 0));
        assert!(submit(&dev, 3, 3, Direction::In, 8));
        assert!(submit(&dev, 4, 4, Direction::Out, 0));

        // Direction mismatch, out of range, control endpoint
        assert!(!submit(&dev, 5, 1, Direction::Out, 0));
        assert!(!submit(&dev, 6, 5, Direction::In, 8));
        assert!(!submit(&dev, 7, 0, Direction::In, 8));

        assert!(dev.unlink(1, true, 1));
        assert!(!dev.unlink(1, true, 1));
        assert!(!dev.unlink(9, true, 3));
    }

    #[test]
    fn test_route_follows_configuration() {
        let dev = Device::new(descriptor_with_configurations(
            2,
            vec![printer_interface(4, "")],
        ))
        .unwrap();
        let eps = dev.endpoints_by_class(7, 1, 4);

        assert!(Arc::ptr_eq(&dev.route(1, true).unwrap(), &eps[0]));
        assert!(Arc::ptr_eq(&dev.route(2, false).unwrap(), &eps[0]));
        assert!(dev.route(1, false).is_none());
        assert!(dev.route(0, true).is_none());

        dev.set_configuration(2).unwrap();
        assert!(Arc::ptr_eq(&dev.route(1, true).unwrap(), &eps[1]));
    }

    #[test]
    fn test_set_interface_switches_endpoints() {
        let desc = descriptor_with_configurations(
            1,
            vec![Interface {
                alt_settings: vec![
                    alt(&[EndpointType::In]),
                    alt(&[EndpointType::Out, EndpointType::Out]),
                ],
            }],
        );
        let dev = Device::new(desc).unwrap();

        assert_eq!(dev.endpoint_kind(1), Some(EndpointType::In));
        assert_eq!(dev.endpoint_kind(2), None);

        assert_eq!(dev.set_interface(0, 2), Err(UsbError::Pipe));
        assert_eq!(dev.set_interface(1, 0), Err(UsbError::Pipe));
        assert_eq!(dev.set_interface(0, 1), Ok(()));
        assert_eq!(dev.get_interface(0), Ok(1));
        assert_eq!(dev.endpoint_kind(2), Some(EndpointType::Out));
        assert!(!submit(&dev, 1, 1, Direction::In, 8));
        assert!(submit(&dev, 2, 1, Direction::Out, 0));

        assert_eq!(dev.get_interface(1), Err(UsbError::Pipe));
        assert_eq!(dev.get_interface_status(0), Ok([0, 0]));
        assert_eq!(dev.get_interface_status(1), Err(UsbError::Pipe));
    }

    #[test]
    fn test_ieee1284_device_id() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();

        let reply = dev.ieee1284_device_id(1, 0).unwrap();
        let len = (SAMPLE_DEVICE_ID.len() + 2) as u16;
        assert_eq!(&reply[..2], &len.to_be_bytes());
        assert_eq!(&reply[2..], SAMPLE_DEVICE_ID.as_bytes());

        // Empty identification string
        assert_eq!(dev.ieee1284_device_id(0, 0), Err(UsbError::Pipe));
        // No such interface / alt setting
        assert_eq!(dev.ieee1284_device_id(2, 0), Err(UsbError::Pipe));
        assert_eq!(dev.ieee1284_device_id(1, 1), Err(UsbError::Pipe));
    }

    #[test]
    fn test_summary() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();
        let summary = dev.summary(Location::new(1, 4));

        assert_eq!(summary.location.bus_id(), "1-4");
        assert_eq!(summary.configuration_value, 1);
        assert_eq!(summary.num_configurations, 1);
        assert_eq!(summary.interfaces.len(), 2);
        assert_eq!(summary.interfaces[1].protocol, 2);
    }

    #[test]
    fn test_endpoints_by_class() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();
        assert_eq!(dev.endpoints_by_class(7, 1, 4).len(), 1);
        assert_eq!(dev.endpoints_by_class(7, 1, 2).len(), 1);
        assert!(dev.endpoints_by_class(7, 1, 1).is_empty());
    }

    #[tokio::test]
    async fn test_printer_interface_write_scenario() {
        let desc = descriptor_with_configurations(1, vec![printer_interface(4, "")]);
        let dev = Device::new(desc).unwrap();
        dev.set_configuration(1).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<SubmitResponse>();
        let rq = SubmitRequest::new(
            IoHeader {
                seqnum: 1,
                direction: Direction::In,
                endpoint: 1,
                ..Default::default()
            },
            10,
        );
        dev.submit(
            rq,
            Box::new(move |rsp| {
                let _ = tx.send(rsp);
            }),
        )
        .unwrap();

        let ep = dev.endpoints_by_class(7, 1, 4).remove(0);
        assert_eq!(ep.write(&[0xaa; 10]).await.unwrap(), 10);

        let rsp = rx.recv().await.unwrap();
        assert_eq!(rsp.actual_length, 10);
        assert_eq!(rsp.status, 0);
    }

    #[tokio::test]
    async fn test_shutdown_resets_all_endpoints() {
        let dev = Device::new(sample_printer_descriptor()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<SubmitResponse>();

        for (seqnum, endpoint) in [(1, 1), (2, 3)] {
            let tx = tx.clone();
            let rq = SubmitRequest::new(
                IoHeader {
                    seqnum,
                    direction: Direction::In,
                    endpoint,
                    ..Default::default()
                },
                8,
            );
            dev.submit(
                rq,
                Box::new(move |rsp| {
                    let _ = tx.send(rsp);
                }),
            )
            .unwrap();
        }

        dev.shutdown();
        assert_eq!(rx.recv().await.unwrap().status, -104);
        assert_eq!(rx.recv().await.unwrap().status, -104);
    }

    fn arb_endpoint_kind() -> impl Strategy<Value = EndpointType> {
        prop_oneof![
            Just(EndpointType::In),
            Just(EndpointType::Out),
            Just(EndpointType::InOut),
        ]
    }

    fn arb_interface() -> impl Strategy<Value = Interface> {
        proptest::collection::vec(proptest::collection::vec(arb_endpoint_kind(), 0..3), 1..3)
            .prop_map(|alts| Interface {
                alt_settings: alts.iter().map(|kinds| alt(kinds)).collect(),
            })
    }

    fn arb_configuration() -> impl Strategy<Value = ConfigurationDescriptor> {
        proptest::collection::vec(arb_interface(), 1..4).prop_map(|interfaces| {
            ConfigurationDescriptor {
                description: "conf".to_string(),
                attributes: conf_attr::RESERVED,
                max_power: 50,
                interfaces,
            }
        })
    }

    proptest! {
        #[test]
        fn prop_configuration_descriptor_length(
            confs in proptest::collection::vec(arb_configuration(), 1..4),
        ) {
            let desc = DeviceDescriptor {
                configurations: confs,
                ..Default::default()
            };
            let expected = desc.clone();
            let dev = match Device::new(desc) {
                Ok(dev) => dev,
                // Endpoint budget exceeded
                Err(DeviceError::TooManyEndpoints { .. }) => return Ok(()),
                Err(err) => return Err(TestCaseError::fail(err.to_string())),
            };

            for (i, conf) in expected.configurations.iter().enumerate() {
                let data = dev.get_descriptor(DescriptorType::Configuration, i as u8).unwrap();
                let mut dec = Decoder::new(&data);
                dec.skip(2);
                prop_assert_eq!(dec.get_le16() as usize, data.len());
                prop_assert_eq!(dec.get_u8() as usize, conf.interfaces.len());
                prop_assert_eq!(dec.get_u8() as usize, i + 1);

                let alts: usize = conf.interfaces.iter().map(|iff| iff.alt_settings.len()).sum();
                let eps: usize = conf
                    .interfaces
                    .iter()
                    .flat_map(|iff| iff.alt_settings.iter())
                    .map(|alt| alt.count_endpoints())
                    .sum();
                prop_assert_eq!(data.len(), 9 + 9 * alts + 7 * eps);
            }
        }

        #[test]
        fn prop_string_index_idempotent(strings in proptest::collection::vec("[a-z]{1,8}", 1..10)) {
            let mut desc = sample_printer_descriptor();
            desc.configurations[0].interfaces[0].alt_settings[0].description = strings.join(" ");
            for (i, s) in strings.iter().enumerate() {
                let iff = &mut desc.configurations[0].interfaces[i % 2];
                iff.alt_settings.push(InterfaceDescriptor {
                    description: s.clone(),
                    ..Default::default()
                });
            }
            let dev = Device::new(desc).unwrap();

            for s in &strings {
                let idx = dev.string_index(s);
                prop_assert_ne!(idx, 0);
                prop_assert_eq!(dev.string_index(s), idx);
            }
        }
    }
}

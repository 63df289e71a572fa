//! Server configuration management

use anyhow::{Context, Result, anyhow};
use protocol::types::{MAX_INTERFACES, class, conf_attr};
use protocol::{
    ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, EndpointType, Interface,
    InterfaceDescriptor, Speed,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::network::USBIP_PORT;
use crate::printer::{PROTOCOL_BIDIRECTIONAL, PROTOCOL_IPP_USB, SUBCLASS_PRINTER};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// USB/IP listen address
    #[serde(default = "ServerSettings::default_bind_addr")]
    pub bind_addr: String,
    pub log_level: String,
}

impl ServerSettings {
    fn default_bind_addr() -> String {
        format!("0.0.0.0:{}", USBIP_PORT)
    }
}

/// The emulated printer
///
/// # Example Configuration
/// ```toml
/// [device]
/// vendor_id = 0x04b8
/// product_id = 0x0202
/// manufacturer = "Acme"
/// product = "LaserJet 9000"
/// ipp_usb_interfaces = 2
/// legacy_printer = true
/// ieee1284_device_id = "MFG:Acme;MDL:LaserJet 9000;CMD:PJL,PDF;CLS:PRINTER;"
/// spool_path = "~/spool/printer.prn"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    /// Count of IPP over USB (7/1/4) interfaces
    pub ipp_usb_interfaces: usize,
    /// Add a bidirectional legacy (7/1/2) interface
    pub legacy_printer: bool,
    /// IEEE 1284 device ID of the legacy interface
    pub ieee1284_device_id: String,
    /// Where print data received on the legacy interface is written.
    /// Data is discarded if not set.
    pub spool_path: Option<String>,
    /// Complete descriptor tree, replacing the printer layout built from
    /// the settings above
    pub descriptor: Option<DeviceDescriptor>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: 0xdead,
            product_id: 0xbeaf,
            manufacturer: "Virtual USB/IP".to_string(),
            product: "Virtual Printer".to_string(),
            serial: "VP-000001".to_string(),
            ipp_usb_interfaces: 2,
            legacy_printer: true,
            ieee1284_device_id: "MFG:Virtual USB/IP;MDL:Virtual Printer;CMD:PJL,PDF;CLS:PRINTER;"
                .to_string(),
            spool_path: None,
            descriptor: None,
        }
    }
}

impl DeviceSettings {
    fn printer_interface(protocol: u8, device_id: &str) -> Interface {
        Interface {
            alt_settings: vec![InterfaceDescriptor {
                class: class::PRINTER,
                subclass: SUBCLASS_PRINTER,
                protocol,
                description: String::new(),
                ieee1284_device_id: device_id.to_string(),
                endpoints: vec![EndpointDescriptor {
                    kind: EndpointType::InOut,
                    attributes: protocol::types::ep_attr::XFER_BULK,
                    max_packet_size: 512,
                }],
            }],
        }
    }

    /// Descriptor tree of the emulated device
    pub fn build_descriptor(&self) -> DeviceDescriptor {
        if let Some(desc) = &self.descriptor {
            return desc.clone();
        }

        let mut interfaces: Vec<Interface> = (0..self.ipp_usb_interfaces)
            .map(|_| Self::printer_interface(PROTOCOL_IPP_USB, ""))
            .collect();
        if self.legacy_printer {
            interfaces.push(Self::printer_interface(
                PROTOCOL_BIDIRECTIONAL,
                &self.ieee1284_device_id,
            ));
        }

        DeviceDescriptor {
            speed: Speed::High,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            manufacturer: self.manufacturer.clone(),
            product: self.product.clone(),
            serial_number: self.serial.clone(),
            configurations: vec![ConfigurationDescriptor {
                description: String::new(),
                attributes: conf_attr::SELF_POWERED,
                max_power: 1,
                interfaces,
            }],
            ..Default::default()
        }
    }

    /// Spool file path, with `~` expanded
    pub fn spool_path(&self) -> Option<PathBuf> {
        self.spool_path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_addr: ServerSettings::default_bind_addr(),
                log_level: "info".to_string(),
            },
            device: DeviceSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/virtual-usbip/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("virtual-usbip").join("server.toml")
        } else {
            PathBuf::from(".config/virtual-usbip/server.toml")
        }
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind_addr))
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.bind_addr()?;

        if self.device.descriptor.is_none() {
            let count = self.device.ipp_usb_interfaces + usize::from(self.device.legacy_printer);
            if count == 0 || count > MAX_INTERFACES {
                return Err(anyhow!(
                    "Invalid printer layout: {} interfaces, must be 1-{}",
                    count,
                    MAX_INTERFACES
                ));
            }
        }

        Ok(())
    }
}

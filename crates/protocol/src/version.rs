//! Protocol version management

use std::fmt;

/// USB/IP protocol version, encoded on the wire as a BCD `u16`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Current protocol version (1.1.1, encoded as 0x0111)
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion {
    major: 1,
    minor: 1,
    patch: 1,
};

impl ProtocolVersion {
    /// Encode as the 16-bit wire value (one nibble per minor/patch)
    pub fn to_wire(self) -> u16 {
        (u16::from(self.major) << 8) | (u16::from(self.minor & 0xf) << 4) | u16::from(self.patch & 0xf)
    }

    pub fn from_wire(v: u16) -> Self {
        Self {
            major: (v >> 8) as u8,
            minor: ((v >> 4) & 0xf) as u8,
            patch: (v & 0xf) as u8,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version_wire_value() {
        assert_eq!(CURRENT_VERSION.to_wire(), 0x0111);
        assert_eq!(ProtocolVersion::from_wire(0x0111), CURRENT_VERSION);
        assert_eq!(CURRENT_VERSION.to_string(), "1.1.1");
    }

    #[test]
    fn test_other_versions_differ() {
        let old = ProtocolVersion::from_wire(0x0106);
        assert_eq!(old.minor, 0);
        assert_eq!(old.patch, 6);
        assert_ne!(old, CURRENT_VERSION);
    }
}

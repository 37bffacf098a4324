//! Page protection values

use crate::core::types::MemoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Page protection of a virtual memory range.
///
/// Wraps the raw `PAGE_*` value so a protection returned by the OS can be
/// restored exactly, including modifier bits this crate never sets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Protection {
    value: u32,
}

impl Protection {
    pub const PAGE_NOACCESS: u32 = 0x01;
    pub const PAGE_READONLY: u32 = 0x02;
    pub const PAGE_READWRITE: u32 = 0x04;
    pub const PAGE_WRITECOPY: u32 = 0x08;
    pub const PAGE_EXECUTE: u32 = 0x10;
    pub const PAGE_EXECUTE_READ: u32 = 0x20;
    pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
    pub const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;

    const NAMED: [(&'static str, u32); 5] = [
        ("no_access", Self::PAGE_NOACCESS),
        ("read_only", Self::PAGE_READONLY),
        ("read_write", Self::PAGE_READWRITE),
        ("execute_read", Self::PAGE_EXECUTE_READ),
        ("execute_read_write", Self::PAGE_EXECUTE_READWRITE),
    ];

    /// Wraps a raw protection value
    pub const fn from_raw(value: u32) -> Self {
        Protection { value }
    }

    pub const fn no_access() -> Self {
        Self::from_raw(Self::PAGE_NOACCESS)
    }

    pub const fn read_only() -> Self {
        Self::from_raw(Self::PAGE_READONLY)
    }

    pub const fn read_write() -> Self {
        Self::from_raw(Self::PAGE_READWRITE)
    }

    pub const fn execute_read() -> Self {
        Self::from_raw(Self::PAGE_EXECUTE_READ)
    }

    pub const fn execute_read_write() -> Self {
        Self::from_raw(Self::PAGE_EXECUTE_READWRITE)
    }

    /// Check if protection allows writing
    pub fn is_writable(&self) -> bool {
        (self.value
            & (Self::PAGE_READWRITE
                | Self::PAGE_WRITECOPY
                | Self::PAGE_EXECUTE_READWRITE
                | Self::PAGE_EXECUTE_WRITECOPY))
            != 0
    }

    /// Check if protection allows execution
    pub fn is_executable(&self) -> bool {
        (self.value
            & (Self::PAGE_EXECUTE
                | Self::PAGE_EXECUTE_READ
                | Self::PAGE_EXECUTE_READWRITE
                | Self::PAGE_EXECUTE_WRITECOPY))
            != 0
    }

    /// Get the raw protection value
    pub const fn raw(&self) -> u32 {
        self.value
    }
}

impl Default for Protection {
    fn default() -> Self {
        Protection::read_write()
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::NAMED.iter().find(|(_, value)| *value == self.value) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "0x{:X}", self.value),
        }
    }
}

impl FromStr for Protection {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if let Some(hex) = wanted.strip_prefix("0x") {
            return u32::from_str_radix(hex, 16)
                .map(Protection::from_raw)
                .map_err(|_| MemoryError::UnsupportedType(format!("protection {}", s)));
        }
        Self::NAMED
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, value)| Protection::from_raw(*value))
            .ok_or_else(|| MemoryError::UnsupportedType(format!("protection {}", s)))
    }
}

impl TryFrom<String> for Protection {
    type Error = MemoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Protection> for String {
    fn from(protection: Protection) -> Self {
        protection.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_flags() {
        assert!(Protection::execute_read_write().is_writable());
        assert!(Protection::execute_read_write().is_executable());
        assert!(!Protection::read_only().is_writable());
        assert!(!Protection::read_write().is_executable());
        assert!(Protection::from_raw(Protection::PAGE_EXECUTE_WRITECOPY).is_writable());
    }

    #[test]
    fn test_protection_names() {
        assert_eq!(Protection::execute_read().to_string(), "execute_read");
        assert_eq!(Protection::from_raw(0x104).to_string(), "0x104");
        assert_eq!(
            "READ_WRITE".parse::<Protection>().unwrap(),
            Protection::read_write()
        );
        assert_eq!("0x40".parse::<Protection>().unwrap().raw(), 0x40);
        assert!("writable".parse::<Protection>().is_err());
    }
}

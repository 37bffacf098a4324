//! String encodings understood by the accessors

use super::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Character encoding of a string in target memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringEncoding {
    Ascii,
    Utf16,
    Utf8,
    /// Recognised but never supported
    Utf7,
    /// Recognised but never supported
    Utf32,
}

impl StringEncoding {
    /// Width of the NUL terminator and of one scan stride
    pub fn terminator_width(self) -> MemoryResult<usize> {
        match self {
            StringEncoding::Ascii | StringEncoding::Utf8 => Ok(1),
            StringEncoding::Utf16 => Ok(2),
            StringEncoding::Utf7 | StringEncoding::Utf32 => Err(self.unsupported()),
        }
    }

    /// Encodes `value`, optionally followed by a NUL terminator
    pub fn encode(self, value: &str, append_terminator: bool) -> MemoryResult<Vec<u8>> {
        let mut bytes = match self {
            StringEncoding::Ascii => value
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            StringEncoding::Utf8 => value.as_bytes().to_vec(),
            StringEncoding::Utf16 => value
                .encode_utf16()
                .flat_map(|unit| unit.to_ne_bytes())
                .collect(),
            StringEncoding::Utf7 | StringEncoding::Utf32 => return Err(self.unsupported()),
        };

        if append_terminator {
            let width = self.terminator_width()?;
            bytes.extend(std::iter::repeat(0u8).take(width));
        }
        Ok(bytes)
    }

    /// Decodes `bytes`, which must not include the terminator
    pub fn decode(self, bytes: &[u8]) -> MemoryResult<String> {
        match self {
            StringEncoding::Ascii => Ok(bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect()),
            StringEncoding::Utf8 => Ok(String::from_utf8_lossy(bytes).into_owned()),
            StringEncoding::Utf16 => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(String::from_utf16_lossy(&units))
            }
            StringEncoding::Utf7 | StringEncoding::Utf32 => Err(self.unsupported()),
        }
    }

    /// Returns the bytes before the first terminator in `buffer`.
    ///
    /// The buffer is walked in terminator-width strides. A trailing partial
    /// stride is dropped; with no terminator the whole stride-aligned buffer
    /// is returned.
    pub fn scan_terminated(self, buffer: &[u8]) -> MemoryResult<&[u8]> {
        let width = self.terminator_width()?;
        let end = buffer
            .chunks_exact(width)
            .position(|stride| stride.iter().all(|&b| b == 0))
            .map(|index| index * width)
            .unwrap_or(buffer.len() - buffer.len() % width);
        Ok(&buffer[..end])
    }

    fn unsupported(self) -> MemoryError {
        MemoryError::UnsupportedEncoding(self.to_string())
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StringEncoding::Ascii => "ascii",
            StringEncoding::Utf16 => "utf-16",
            StringEncoding::Utf8 => "utf-8",
            StringEncoding::Utf7 => "utf-7",
            StringEncoding::Utf32 => "utf-32",
        };
        f.write_str(name)
    }
}

impl FromStr for StringEncoding {
    type Err = MemoryError;

    fn from_str(s: &str) -> MemoryResult<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "ascii" => Ok(StringEncoding::Ascii),
            "utf16" | "unicode" => Ok(StringEncoding::Utf16),
            "utf8" => Ok(StringEncoding::Utf8),
            "utf7" => Ok(StringEncoding::Utf7),
            "utf32" => Ok(StringEncoding::Utf32),
            _ => Err(MemoryError::UnsupportedEncoding(s.to_string())),
        }
    }
}

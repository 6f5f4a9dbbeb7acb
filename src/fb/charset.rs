//! Character set provider.
//!
//! Maps Firebird character set ids and names onto encoders. Only the sets a
//! client realistically negotiates are covered; unknown ids decode as UTF-8.

use super::error::{FbError, FbResult};

/// Character sets understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    None,
    Octets,
    Ascii,
    UnicodeFss,
    #[default]
    Utf8,
    Iso8859_1,
}

impl Charset {
    /// Look up a charset by its Firebird name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.trim().to_ascii_uppercase().as_str() {
            "NONE" => Charset::None,
            "OCTETS" | "BINARY" => Charset::Octets,
            "ASCII" => Charset::Ascii,
            "UNICODE_FSS" => Charset::UnicodeFss,
            "UTF8" | "UTF-8" => Charset::Utf8,
            "ISO8859_1" | "LATIN1" => Charset::Iso8859_1,
            _ => return None,
        })
    }

    /// Look up a charset by id (the low byte of a text field's subtype).
    pub fn from_id(id: i32) -> Option<Self> {
        Some(match id {
            0 => Charset::None,
            1 => Charset::Octets,
            2 => Charset::Ascii,
            3 => Charset::UnicodeFss,
            4 => Charset::Utf8,
            21 => Charset::Iso8859_1,
            _ => return None,
        })
    }

    pub fn id(self) -> i32 {
        match self {
            Charset::None => 0,
            Charset::Octets => 1,
            Charset::Ascii => 2,
            Charset::UnicodeFss => 3,
            Charset::Utf8 => 4,
            Charset::Iso8859_1 => 21,
        }
    }

    /// Name as sent in `isc_dpb_lc_ctype`.
    pub fn name(self) -> &'static str {
        match self {
            Charset::None => "NONE",
            Charset::Octets => "OCTETS",
            Charset::Ascii => "ASCII",
            Charset::UnicodeFss => "UNICODE_FSS",
            Charset::Utf8 => "UTF8",
            Charset::Iso8859_1 => "ISO8859_1",
        }
    }

    /// Maximum bytes per character, used to derive CHAR(n) widths.
    pub fn bytes_per_character(self) -> usize {
        match self {
            Charset::UnicodeFss => 3,
            Charset::Utf8 => 4,
            _ => 1,
        }
    }

    pub fn is_octets(self) -> bool {
        self == Charset::Octets
    }

    pub fn is_none(self) -> bool {
        self == Charset::None
    }

    /// Encode a string for the wire.
    pub fn encode(self, s: &str) -> FbResult<Vec<u8>> {
        match self {
            Charset::Ascii => {
                if !s.is_ascii() {
                    return Err(FbError::Type(format!(
                        "string contains characters outside ASCII: {:?}",
                        s
                    )));
                }
                Ok(s.as_bytes().to_vec())
            }
            Charset::Iso8859_1 => s
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        FbError::Type(format!("character {:?} is not representable in ISO8859_1", c))
                    })
                })
                .collect(),
            _ => Ok(s.as_bytes().to_vec()),
        }
    }

    /// Decode wire bytes. Invalid sequences are replaced, never rejected.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Iso8859_1 => bytes.iter().map(|&b| char::from(b)).collect(),
            _ => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

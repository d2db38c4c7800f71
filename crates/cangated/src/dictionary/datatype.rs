//! Standard object data types.

use std::fmt;

/// Data types the gateway can convert to and from JSON values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// `BOOLEAN`
    Boolean,
    /// `INTEGER8`
    Integer8,
    /// `INTEGER16`
    Integer16,
    /// `INTEGER32`
    Integer32,
    /// `INTEGER64`
    Integer64,
    /// `UNSIGNED8`
    Unsigned8,
    /// `UNSIGNED16`
    Unsigned16,
    /// `UNSIGNED32`
    Unsigned32,
    /// `UNSIGNED64`
    Unsigned64,
    /// `REAL32`
    Real32,
    /// `REAL64`
    Real64,
    /// `VISIBLE_STRING`
    VisibleString,
    /// `OCTET_STRING`
    OctetString,
    /// `UNICODE_STRING`
    UnicodeString,
    /// `DOMAIN`
    Domain,
}

impl DataType {
    /// Looks up a type by its dictionary code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0001 => Self::Boolean,
            0x0002 => Self::Integer8,
            0x0003 => Self::Integer16,
            0x0004 => Self::Integer32,
            0x0005 => Self::Unsigned8,
            0x0006 => Self::Unsigned16,
            0x0007 => Self::Unsigned32,
            0x0008 => Self::Real32,
            0x0009 => Self::VisibleString,
            0x000A => Self::OctetString,
            0x000B => Self::UnicodeString,
            0x000F => Self::Domain,
            0x0011 => Self::Real64,
            0x0015 => Self::Integer64,
            0x001B => Self::Unsigned64,
            _ => return None,
        })
    }

    /// Dictionary code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Boolean => 0x0001,
            Self::Integer8 => 0x0002,
            Self::Integer16 => 0x0003,
            Self::Integer32 => 0x0004,
            Self::Unsigned8 => 0x0005,
            Self::Unsigned16 => 0x0006,
            Self::Unsigned32 => 0x0007,
            Self::Real32 => 0x0008,
            Self::VisibleString => 0x0009,
            Self::OctetString => 0x000A,
            Self::UnicodeString => 0x000B,
            Self::Domain => 0x000F,
            Self::Real64 => 0x0011,
            Self::Integer64 => 0x0015,
            Self::Unsigned64 => 0x001B,
        }
    }

    /// Encoded width in bytes; `None` for variable length types.
    #[must_use]
    pub const fn size(self) -> Option<usize> {
        match self {
            Self::Boolean | Self::Integer8 | Self::Unsigned8 => Some(1),
            Self::Integer16 | Self::Unsigned16 => Some(2),
            Self::Integer32 | Self::Unsigned32 | Self::Real32 => Some(4),
            Self::Integer64 | Self::Unsigned64 | Self::Real64 => Some(8),
            Self::VisibleString | Self::OctetString | Self::UnicodeString | Self::Domain => None,
        }
    }

    /// Whether the type holds a signed or unsigned integer.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Integer8
                | Self::Integer16
                | Self::Integer32
                | Self::Integer64
                | Self::Unsigned8
                | Self::Unsigned16
                | Self::Unsigned32
                | Self::Unsigned64
        )
    }

    /// Standard type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer8 => "INTEGER8",
            Self::Integer16 => "INTEGER16",
            Self::Integer32 => "INTEGER32",
            Self::Integer64 => "INTEGER64",
            Self::Unsigned8 => "UNSIGNED8",
            Self::Unsigned16 => "UNSIGNED16",
            Self::Unsigned32 => "UNSIGNED32",
            Self::Unsigned64 => "UNSIGNED64",
            Self::Real32 => "REAL32",
            Self::Real64 => "REAL64",
            Self::VisibleString => "VISIBLE_STRING",
            Self::OctetString => "OCTET_STRING",
            Self::UnicodeString => "UNICODE_STRING",
            Self::Domain => "DOMAIN",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

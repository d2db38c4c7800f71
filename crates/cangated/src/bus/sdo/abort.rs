//! Transfer abort codes and their descriptions.

/// Abort codes the gateway and the simulated server emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum AbortCode {
    ToggleBit = 0x0503_0000,
    Timeout = 0x0504_0000,
    InvalidCommand = 0x0504_0001,
    InvalidBlockSize = 0x0504_0002,
    InvalidSequence = 0x0504_0003,
    CrcError = 0x0504_0004,
    WriteOnly = 0x0601_0001,
    ReadOnly = 0x0601_0002,
    NoSuchObject = 0x0602_0000,
    LengthMismatch = 0x0607_0010,
    NoSuchSubindex = 0x0609_0011,
    General = 0x0800_0000,
    StoreFailed = 0x0800_0020,
}

impl AbortCode {
    pub(crate) const fn code(self) -> u32 {
        self as u32
    }
}

const DESCRIPTIONS: &[(u32, &str)] = &[
    (0x0503_0000, "toggle bit not alternated"),
    (0x0504_0000, "SDO protocol timed out"),
    (0x0504_0001, "client/server command specifier not valid or unknown"),
    (0x0504_0002, "invalid block size"),
    (0x0504_0003, "invalid sequence number"),
    (0x0504_0004, "CRC error"),
    (0x0504_0005, "out of memory"),
    (0x0601_0000, "unsupported access to an object"),
    (0x0601_0001, "attempt to read a write only object"),
    (0x0601_0002, "attempt to write a read only object"),
    (0x0602_0000, "object does not exist in the object dictionary"),
    (0x0604_0041, "object cannot be mapped to the PDO"),
    (0x0604_0042, "the number and length of the objects to be mapped would exceed PDO length"),
    (0x0604_0043, "general parameter incompatibility reason"),
    (0x0604_0047, "general internal incompatibility in the device"),
    (0x0606_0000, "access failed due to a hardware error"),
    (0x0607_0010, "data type does not match, length of service parameter does not match"),
    (0x0607_0012, "data type does not match, length of service parameter too high"),
    (0x0607_0013, "data type does not match, length of service parameter too low"),
    (0x0609_0011, "sub-index does not exist"),
    (0x0609_0030, "value range of parameter exceeded"),
    (0x0609_0031, "value of parameter written too high"),
    (0x0609_0032, "value of parameter written too low"),
    (0x0609_0036, "maximum value is less than minimum value"),
    (0x060A_0023, "resource not available"),
    (0x0800_0000, "general error"),
    (0x0800_0020, "data cannot be transferred or stored to the application"),
    (
        0x0800_0021,
        "data cannot be transferred or stored to the application because of local control",
    ),
    (
        0x0800_0022,
        "data cannot be transferred or stored to the application because of the present device state",
    ),
    (0x0800_0023, "object dictionary dynamic generation fails or no object dictionary is present"),
    (0x0800_0024, "no data available"),
];

/// Human-readable description of an abort code.
pub(crate) fn describe_abort(code: u32) -> &'static str {
    DESCRIPTIONS
        .iter()
        .find(|(known, _)| *known == code)
        .map_or("unknown abort code", |(_, text)| text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_known_codes() {
        assert_eq!(
            describe_abort(AbortCode::NoSuchObject.code()),
            "object does not exist in the object dictionary"
        );
    }

    #[test]
    fn unknown_codes_have_fallback() {
        assert_eq!(describe_abort(0x1234_5678), "unknown abort code");
    }
}

//! Status word definitions for APDU responses

use std::fmt;

/// SW1 signalling that more response data is waiting (`61 xx`)
pub const SW1_MORE_DATA: u8 = 0x61;

/// SW1 signalling a wrong Le field, with the correct length in SW2 (`6C xx`)
pub const SW1_WRONG_LE: u8 = 0x6C;

/// SW1 used by some cards for proprietary "more data" chaining (`9F xx`)
pub const SW1_PROPRIETARY_MORE_DATA: u8 = 0x9F;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// `90 00`
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// `61 xx`: xx more bytes can be fetched with GET RESPONSE
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == SW1_MORE_DATA
    }

    /// `6C xx`: the command must be reissued with Le = xx
    pub const fn is_wrong_le(&self) -> bool {
        self.sw1 == SW1_WRONG_LE
    }

    /// Number of bytes announced by SW2 for a chaining status, where 00 means 256
    pub const fn announced_length(&self) -> u32 {
        if self.sw2 == 0 { 256 } else { self.sw2 as u32 }
    }

    /// Short human readable meaning, used in logs
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (SW1_MORE_DATA, _) => "More data available",
            (SW1_WRONG_LE, _) => "Wrong Le field",
            (SW1_PROPRIETARY_MORE_DATA, _) => "More data available (proprietary)",
            (0x62 | 0x63, _) => "Warning",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x82) => "Security status not satisfied",
            (0x6A, 0x82) => "File not found",
            (0x6D, 0x00) => "Instruction not supported",
            (0x6E, 0x00) => "Class not supported",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from((sw1, sw2): (u8, u8)) -> Self {
        Self::new(sw1, sw2)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);
}

//! APDU command frames
//!
//! This module encodes and decodes command APDUs according to ISO/IEC 7816-4,
//! covering the short cases (1, 2S, 3S, 4S) and the extended cases
//! (2E, 3E, 4E).

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Expected response length (Ne), between 1 and 65536
///
/// In short form Ne = 256 is encoded as `00`; in extended form Ne = 65536 is
/// encoded as `00 00`.
pub type ExpectedLength = u32;

/// Largest Ne representable in a short Le field
pub const MAX_SHORT_LE: ExpectedLength = 256;

/// Largest Ne representable in an extended Le field
pub const MAX_EXTENDED_LE: ExpectedLength = 65536;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Some(data.into()),
            le: None,
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Remove the expected length field
    pub const fn without_le(mut self) -> Self {
        self.le = None;
        self
    }

    /// Command payload data, empty if absent
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Whether this command needs the extended length encoding
    pub fn is_extended(&self) -> bool {
        self.data().len() > 255 || self.le.is_some_and(|le| le > MAX_SHORT_LE)
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        // Header (CLA, INS, P1, P2) is always 4 bytes
        let mut length = 4;
        let extended = self.is_extended();
        let data_len = self.data().len();

        if data_len > 0 {
            length += if extended { 3 } else { 1 } + data_len;
        }

        if self.le.is_some() {
            length += match (extended, data_len > 0) {
                (false, _) => 1,
                (true, true) => 2,
                (true, false) => 3,
            };
        }

        length
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());
        let extended = self.is_extended();
        let data = self.data();

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        // Add Lc and data if present
        if !data.is_empty() {
            if extended {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
            } else {
                buffer.put_u8(data.len() as u8);
            }
            buffer.put_slice(data);
        }

        // Add Le if present
        if let Some(le) = self.le {
            if extended {
                if data.is_empty() {
                    buffer.put_u8(0x00);
                }
                // 65536 wraps to 00 00
                buffer.put_u16(le as u16);
            } else {
                // 256 wraps to 00
                buffer.put_u8(le as u8);
            }
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        let body = &data[4..];

        match body.len() {
            // Case 1
            0 => {}
            // Case 2S
            1 => command.le = Some(short_le(body[0])),
            // Extended cases start with a zero byte followed by at least two bytes
            n if body[0] == 0x00 && n >= 3 => {
                let value = u16::from_be_bytes([body[1], body[2]]) as usize;
                if n == 3 {
                    // Case 2E
                    command.le = Some(extended_le(body[1], body[2]));
                } else {
                    let rest = &body[3..];
                    if value == 0 {
                        return Err(Error::InvalidCommandData("extended Lc of zero"));
                    }
                    if rest.len() == value {
                        // Case 3E
                        command.data = Some(Bytes::copy_from_slice(rest));
                    } else if rest.len() == value + 2 {
                        // Case 4E
                        command.data = Some(Bytes::copy_from_slice(&rest[..value]));
                        command.le = Some(extended_le(rest[value], rest[value + 1]));
                    } else {
                        return Err(Error::InvalidCommandLength(data.len()));
                    }
                }
            }
            n => {
                let lc = body[0] as usize;
                if lc == 0 {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
                if n == 1 + lc {
                    // Case 3S
                    command.data = Some(Bytes::copy_from_slice(&body[1..]));
                } else if n == 2 + lc {
                    // Case 4S
                    command.data = Some(Bytes::copy_from_slice(&body[1..1 + lc]));
                    command.le = Some(short_le(body[1 + lc]));
                } else {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
            }
        }

        Ok(command)
    }
}

const fn short_le(byte: u8) -> ExpectedLength {
    if byte == 0 {
        MAX_SHORT_LE
    } else {
        byte as ExpectedLength
    }
}

const fn extended_le(hi: u8, lo: u8) -> ExpectedLength {
    match u16::from_be_bytes([hi, lo]) {
        0 => MAX_EXTENDED_LE,
        n => n as ExpectedLength,
    }
}

impl From<Command> for Bytes {
    fn from(command: Command) -> Self {
        command.to_bytes()
    }
}

//! APDU response frames
//!
//! A response frame is at least two bytes long: the last two bytes are the
//! status word (SW1, SW2) and everything before them is response data.

pub mod error;
pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use error::ResponseError;
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data, without the status word
    data: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with data and status
    pub fn new(data: Bytes, status: impl Into<StatusWord>) -> Self {
        Self {
            data,
            status: status.into(),
        }
    }

    /// Create a success response
    pub const fn success(data: Bytes) -> Self {
        Self {
            data,
            status: status::common::SUCCESS,
        }
    }

    /// Create a response that carries only a status word
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ResponseError> {
        let (status, data) = split(raw)?;

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            data_len = data.len(),
            "Parsed APDU response"
        );

        Ok(Self {
            data: Bytes::copy_from_slice(data),
            status,
        })
    }

    /// Response data, without the status word
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the response and return its data
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// First status byte
    pub const fn sw1(&self) -> u8 {
        self.status.sw1
    }

    /// Second status byte
    pub const fn sw2(&self) -> u8 {
        self.status.sw2
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Serialize back to `data || SW1 || SW2`
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }
}

/// Split raw response bytes into the status word and the data before it
///
/// # Errors
/// Returns [`ResponseError::Incomplete`] if the frame is shorter than two bytes.
pub fn split(raw: &[u8]) -> Result<(StatusWord, &[u8]), ResponseError> {
    match raw {
        [data @ .., sw1, sw2] => Ok((StatusWord::new(*sw1, *sw2), data)),
        _ => Err(ResponseError::Incomplete(raw.len())),
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = ResponseError;

    fn try_from(raw: &[u8]) -> Result<Self, ResponseError> {
        Self::from_bytes(raw)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_from_bytes() {
        let resp = Response::from_bytes(&[0x01, 0x02, 0x03, 0x90, 0x00]).unwrap();
        assert_eq!(resp.data(), &[0x01, 0x02, 0x03]);
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
        assert!(resp.is_success());

        let resp = Response::from_bytes(&[0x6A, 0x82]).unwrap();
        assert!(resp.data().is_empty());
        assert!(!resp.is_success());

        assert_eq!(
            Response::from_bytes(&[0x01]),
            Err(ResponseError::Incomplete(1))
        );
        assert!(Response::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_response_to_bytes() {
        let resp = Response::new(Bytes::from_static(&[0xCA, 0xFE]), (0x62, 0x83));
        assert_eq!(resp.to_bytes().as_ref(), &[0xCA, 0xFE, 0x62, 0x83]);
        assert_eq!(Response::status_only((0x90, 0x00)).to_bytes().as_ref(), &[0x90, 0x00]);
    }

    #[test]
    fn test_split() {
        let (sw, data) = split(&[0xAA, 0x61, 0x10]).unwrap();
        assert_eq!(sw, StatusWord::new(0x61, 0x10));
        assert_eq!(data, &[0xAA]);
    }
}

//! ISO/IEC 7816-4 command and response APDUs.

use alloc::{format, string::String, vec, vec::Vec};
use tracing::error;

use crate::{bytes2hex, EmrtdError};

/// Class byte of an inter-industry command.
pub const CLA_ISO7816: u8 = 0x00;
/// Command chaining bit of the class byte.
pub const CLA_COMMAND_CHAINING: u8 = 0x10;
/// Secure messaging bits of the class byte (SM with authenticated header).
pub const CLA_SECURE_MESSAGING: u8 = 0x0C;

pub const INS_SELECT: u8 = 0xA4;
pub const INS_READ_BINARY: u8 = 0xB0;
pub const INS_READ_BINARY2: u8 = 0xB1;
pub const INS_GET_CHALLENGE: u8 = 0x84;
pub const INS_EXTERNAL_AUTHENTICATE: u8 = 0x82;
pub const INS_INTERNAL_AUTHENTICATE: u8 = 0x88;
pub const INS_MSE: u8 = 0x22;
pub const INS_PSO: u8 = 0x2A;
pub const INS_GENERAL_AUTHENTICATE: u8 = 0x86;

/// Normal processing.
pub const SW_NO_ERROR: [u8; 2] = [0x90, 0x00];
/// End of file reached before reading Le bytes.
pub const SW_END_OF_FILE: [u8; 2] = [0x62, 0x82];
/// Security status not satisfied.
pub const SW_SECURITY_STATUS_NOT_SATISFIED: [u8; 2] = [0x69, 0x82];
/// Expected secure messaging data objects missing.
pub const SW_SM_DATA_OBJECTS_MISSING: [u8; 2] = [0x69, 0x87];
/// Secure messaging data objects incorrect.
pub const SW_SM_DATA_OBJECTS_INCORRECT: [u8; 2] = [0x69, 0x88];
/// File or application not found.
pub const SW_FILE_NOT_FOUND: [u8; 2] = [0x6A, 0x82];
/// Wrong parameters P1-P2 (offset outside of the EF).
pub const SW_WRONG_PARAMETERS: [u8; 2] = [0x6B, 0x00];

/// Largest Ne that fits a short Le field.
pub const MAX_SHORT_NE: usize = 256;
/// Largest Ne that fits an extended Le field.
pub const MAX_EXTENDED_NE: usize = 65536;

/// An Application Protocol Data Unit (APDU) used in smart card communication.
///
/// `ne` is the maximum number of response bytes expected, where 256 and
/// 65536 are encoded as `00` and `0000` respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// Class byte of the APDU
    pub cla: u8,
    /// Instruction byte of the APDU
    pub ins: u8,
    /// Parameter 1 byte of the APDU
    pub p1: u8,
    /// Parameter 2 byte of the APDU
    pub p2: u8,
    /// Command data field of the APDU
    pub data: Option<Vec<u8>>,
    /// Expected length of the response data field (Ne) in the APDU
    pub ne: Option<usize>,
}

impl Apdu {
    /// Constructs a new APDU.
    ///
    /// # Example
    ///
    /// ```
    /// use emrtd_access::Apdu;
    /// let apdu = Apdu::new(0x00, 0x84, 0x00, 0x00, None, Some(8));
    /// assert_eq!(apdu.to_bytes().unwrap(), vec![0x00, 0x84, 0x00, 0x00, 0x08]);
    /// ```
    #[must_use]
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Option<Vec<u8>>, ne: Option<usize>) -> Self {
        // An empty data field is the same as an absent one.
        let data = data.filter(|d| !d.is_empty());
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            ne,
        }
    }

    /// Retrieves the command header of the APDU.
    ///
    /// # Examples
    ///
    /// ```
    /// use emrtd_access::Apdu;
    /// use hex_literal::hex;
    ///
    /// let apdu = Apdu::new(0x00, 0x84, 0x00, 0x00, None, Some(8));
    /// assert_eq!(apdu.get_command_header(), hex!("00840000"));
    /// ```
    #[must_use]
    pub fn get_command_header(&self) -> Vec<u8> {
        vec![self.cla, self.ins, self.p1, self.p2]
    }

    /// Length of the command data field (Nc).
    #[must_use]
    pub fn nc(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Whether this command needs the extended length encoding.
    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.nc() > 255 || self.ne.is_some_and(|ne| ne > MAX_SHORT_NE)
    }

    /// Serializes the APDU, choosing the short or extended encoding as required.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if Nc or Ne exceed the extended length limits.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EmrtdError> {
        let nc = self.nc();
        if nc > 65535 {
            error!("APDU data field too long: {nc}");
            return Err(EmrtdError::InvalidArgument("APDU data field too long"));
        }
        if let Some(ne) = self.ne {
            if ne == 0 || ne > MAX_EXTENDED_NE {
                error!("APDU Ne out of range: {ne}");
                return Err(EmrtdError::InvalidArgument("APDU Ne out of range"));
            }
        }

        let mut out = self.get_command_header();
        let extended = self.is_extended();
        if let Some(data) = &self.data {
            if extended {
                out.push(0x00);
                out.extend_from_slice(
                    &u16::try_from(nc)
                        .map_err(EmrtdError::IntCastError)?
                        .to_be_bytes(),
                );
            } else {
                out.push(u8::try_from(nc).map_err(EmrtdError::IntCastError)?);
            }
            out.extend_from_slice(data);
        }
        if let Some(ne) = self.ne {
            out.extend_from_slice(&encode_le(ne, extended, self.data.is_some()));
        }
        Ok(out)
    }

    /// Parses a serialized command APDU in any of the four cases, short or extended.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::ParseDataError` if the length fields do not match the data.
    pub fn from_bytes(command: &[u8]) -> Result<Self, EmrtdError> {
        let [cla, ins, p1, p2, body @ ..] = command else {
            error!("Command APDU shorter than its header: {}", bytes2hex(command));
            return Err(EmrtdError::ParseDataError(format!(
                "command APDU of {} bytes",
                command.len()
            )));
        };
        let (cla, ins, p1, p2) = (*cla, *ins, *p1, *p2);
        let invalid = || {
            error!("Inconsistent command APDU lengths: {}", bytes2hex(command));
            EmrtdError::ParseDataError(String::from("inconsistent command APDU lengths"))
        };

        let (data, le) = match body {
            [] => (None, None),
            // Case 2 short
            [_] => (None, Some(body)),
            // Case 2 extended
            [0x00, _, _] => (None, Some(&body[1..])),
            [0x00, lc_hi, lc_lo, rest @ ..] => {
                let nc = usize::from(u16::from_be_bytes([*lc_hi, *lc_lo]));
                match rest.len().checked_sub(nc) {
                    Some(0) => (Some(rest), None),
                    Some(2) => (Some(&rest[..nc]), Some(&rest[nc..])),
                    _ => return Err(invalid()),
                }
            }
            [lc, rest @ ..] => {
                let nc = usize::from(*lc);
                match rest.len().checked_sub(nc) {
                    Some(0) => (Some(rest), None),
                    Some(1) => (Some(&rest[..nc]), Some(&rest[nc..])),
                    _ => return Err(invalid()),
                }
            }
        };
        Ok(Self::new(
            cla,
            ins,
            p1,
            p2,
            data.map(<[u8]>::to_vec),
            le.map(decode_le),
        ))
    }
}

/// Decodes an Le field of one or two bytes, where zero stands for the maximum.
pub(crate) fn decode_le(le: &[u8]) -> usize {
    match le {
        [0x00] => MAX_SHORT_NE,
        [b] => usize::from(*b),
        [0x00, 0x00] => MAX_EXTENDED_NE,
        [hi, lo] => usize::from(u16::from_be_bytes([*hi, *lo])),
        _ => MAX_EXTENDED_NE,
    }
}

/// Encodes Ne as an Le field.
///
/// For an extended case 2 command the Le field carries an extra leading zero byte.
pub(crate) fn encode_le(ne: usize, extended: bool, has_data: bool) -> Vec<u8> {
    if extended {
        // 65536 wraps to 0000
        let bytes = u16::try_from(ne % MAX_EXTENDED_NE)
            .unwrap_or_default()
            .to_be_bytes();
        if has_data {
            bytes.to_vec()
        } else {
            [&[0x00][..], &bytes].concat()
        }
    } else {
        vec![u8::try_from(ne % MAX_SHORT_NE).unwrap_or_default()]
    }
}

/// A response APDU: data followed by the status bytes SW1 SW2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data field.
    pub data: Vec<u8>,
    /// Status bytes.
    pub status: [u8; 2],
}

impl Response {
    /// Splits raw response bytes into data and status.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidResponseError` if fewer than two bytes are given.
    pub fn from_bytes(response: &[u8]) -> Result<Self, EmrtdError> {
        if response.len() < 2 {
            error!(
                "Card response length should be greater than or equal to 2, found {}",
                response.len()
            );
            return Err(EmrtdError::InvalidResponseError());
        }
        let status_bytes: [u8; 2] = [response[response.len() - 2], response[response.len() - 1]];
        Ok(Self {
            data: response[..response.len() - 2].to_vec(),
            status: status_bytes,
        })
    }

    /// Serializes the response back to `data ‖ SW1 SW2`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        [&self.data[..], &self.status[..]].concat()
    }

    /// The status word as a 16 bit integer.
    #[must_use]
    pub fn sw(&self) -> u16 {
        u16::from_be_bytes(self.status)
    }

    /// Whether the status word is 9000.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == SW_NO_ERROR
    }
}

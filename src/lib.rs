//! Access control and secure messaging for eMRTDs.
//!
//! A library that talks to the chip of an eMRTD (Electronic Machine Readable
//! Travel Document) and runs the access control protocols of ICAO Doc 9303-11
//! and BSI TR-03110: Basic Access Control (BAC), PACE, Chip Authentication
//! (CA), Terminal Authentication (TA) and Active Authentication (AA).
//!
//! Each protocol returns a new secure messaging session,
//! [`SecureMessagingWrapper`], that protects every later command.
//! [`PassportService`] keeps the current session and reads files through it.
//!
//! **NOTE:**
//! Please note that this crate is provided 'as is' and is not considered production-ready. Use at your own risk.
//!
//! Parsing the data groups and Passive Authentication are not part of this
//! crate.
//!
//! # Quick Start
//!
//! ```no_run
//! use emrtd_access::{
//!     bytes2hex, BacKey, EmrtdError, LdsFile, PaceDomain, PaceKey, PassportService, PcscTransceiver,
//!     ID_PACE_ECDH_GM_AES_CBC_CMAC_128,
//! };
//! use tracing::{error, info};
//!
//! fn main() -> Result<(), EmrtdError> {
//!     tracing_subscriber::fmt()
//!         .with_max_level(tracing::Level::TRACE)
//!         .init();
//!
//!     // Establish a PC/SC context.
//!     let ctx = match pcsc::Context::establish(pcsc::Scope::User) {
//!         Ok(ctx) => ctx,
//!         Err(err) => {
//!             error!("Failed to establish context: {err}");
//!             return Ok(());
//!         }
//!     };
//!
//!     // Use the first reader.
//!     let mut readers_buf = [0; 2048];
//!     let reader = match ctx.list_readers(&mut readers_buf).map(|mut readers| readers.next()) {
//!         Ok(Some(reader)) => reader.to_owned(),
//!         Ok(None) => {
//!             error!("No readers are connected.");
//!             return Ok(());
//!         }
//!         Err(err) => {
//!             error!("Failed to list readers: {err}");
//!             return Ok(());
//!         }
//!     };
//!     info!("Using reader: {reader:?}");
//!
//!     let service: PassportService<_> = PassportService::new(PcscTransceiver::new(ctx, reader));
//!     service.open()?;
//!     info!("ATR: {}", bytes2hex(&service.get_atr()?));
//!
//!     // EF.CardAccess lists the PACE protocols of the chip
//!     let card_access = service.read_file(LdsFile::CardAccess.fid());
//!     let bac_key = BacKey::new("L898902C", "690806", "940623")?;
//!     if card_access.is_ok() {
//!         let pace_key = PaceKey::from_mrz(&bac_key)?;
//!         service.do_pace(
//!             &pace_key,
//!             ID_PACE_ECDH_GM_AES_CBC_CMAC_128,
//!             &PaceDomain::Standardized(13),
//!         )?;
//!         service.send_select_applet()?;
//!     } else {
//!         service.send_select_applet()?;
//!         service.do_bac(&bac_key)?;
//!     }
//!
//!     let ef_com = service.read_file(LdsFile::Com.fid())?;
//!     info!("Data from the EF.COM: {}", bytes2hex(&ef_com));
//!     let ef_dg1 = service.read_file(LdsFile::DataGroup(1).fid())?;
//!     info!("Data from the EF.DG1: {}", bytes2hex(&ef_dg1));
//!
//!     service.close();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

extern crate alloc;
use alloc::string::String;
use core::fmt::{self, Write};
use std::num::TryFromIntError;

pub mod active_auth;
pub mod apdu;
pub mod asn1;
pub mod bac;
pub mod card;
pub mod chip_auth;
pub mod crypto;
pub mod dh;
pub mod ec;
pub mod file_system;
pub mod iso9796;
pub mod key_agreement;
pub mod lds;
pub mod mrz;
pub mod numeric;
pub mod oid;
pub mod pace;
pub mod secure_messaging;
pub mod sender;
pub mod service;
pub mod terminal_auth;

#[cfg(test)]
mod testing;

pub use active_auth::{ActiveAuthPublicKey, ActiveAuthResult};
pub use apdu::{Apdu, Response};
pub use asn1::{encode_tlv, int2asn1len};
pub use bac::BacResult;
pub use card::{CardTransceiver, PcscTransceiver};
pub use chip_auth::ChipAuthResult;
pub use crypto::{DigestAlgorithm, EncryptionAlgorithm, KeyType, MacAlgorithm};
pub use file_system::{FileInfo, MrtdFileSystem};
pub use key_agreement::{DomainParameters, KeyPair, PublicKey};
pub use lds::LdsFile;
pub use mrz::{calculate_check_digit, other_mrz, AccessKey, BacKey, PaceKey, PaceKeyReference};
pub use numeric::{i2os, os2i};
pub use oid::{ID_CA_ECDH_AES_CBC_CMAC_128, ID_PACE_ECDH_GM_AES_CBC_CMAC_128};
pub use pace::{PaceDomain, PaceResult};
pub use secure_messaging::SecureMessagingWrapper;
pub use service::{PassportService, ServiceConfig};
pub use terminal_auth::{CvCertificate, TerminalAuthResult, TerminalSigner};

#[derive(Debug)]
#[non_exhaustive]
pub enum EmrtdError {
    RecvApduError(u8, u8),
    ParseMrzCharError(char),
    ParseMrzFieldError(&'static str, String),
    ParseAsn1DataError(usize, usize),
    ParseAsn1TagError(String, String),
    InvalidMacKeyError(usize, usize),
    ParseDataError(String),
    /// Structurally invalid data from the chip or the caller.
    MalformedInput(String),
    InvalidArgument(&'static str),
    UnsupportedParameters(String),
    /// The MAC of a secure messaging response does not verify.
    MacMismatch,
    /// ISO/IEC 9797-1 padding method 2 marker is missing.
    BadPadding,
    InvalidResponseError(),
    OverflowSscError(),
    InvalidOidError(),
    CalculateHashError(&'static str),
    /// The chip rejected BAC. `status` is `None` when the chip's answer
    /// does not verify.
    BacDenied {
        document_number: String,
        status: Option<[u8; 2]>,
    },
    /// PACE failed at the step named by `reason`.
    PaceDenied {
        reason: String,
        status: Option<[u8; 2]>,
    },
    ChipAuthDenied {
        reason: String,
        status: Option<[u8; 2]>,
    },
    TerminalAuthDenied {
        reason: String,
        status: Option<[u8; 2]>,
    },
    /// The transceiver is closed or the chip left the field.
    CardNotOpen,
    TransceiverError(String),
    LockPoisoned,
    PcscError(pcsc::Error),
    RsaError(rsa::Error),
    UnpadError(cipher::block_padding::UnpadError),
    IntCastError(TryFromIntError),
}

fn status_suffix(status: Option<[u8; 2]>) -> String {
    match status {
        Some([sw1, sw2]) => alloc::format!(" (status code: {sw1:02X} {sw2:02X})"),
        None => String::new(),
    }
}

impl fmt::Display for EmrtdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::RecvApduError(ref sw1, ref sw2) => write!(
                f,
                "APDU command failed with status code: {sw1:02X} {sw2:02X}"
            ),
            Self::ParseMrzCharError(ref c) => {
                write!(f, "MRZ can not contain the character: {c}")
            }
            Self::ParseMrzFieldError(mrz_field, ref value) => {
                write!(f, "MRZ field {mrz_field} is invalid: {value}")
            }
            Self::ParseAsn1DataError(ref e_len, ref f_len) => write!(
                f,
                "ASN.1 data is incomplete, expected len: {e_len}, found len: {f_len}"
            ),
            Self::ParseAsn1TagError(ref expected, ref found) => {
                write!(f, "Invalid ASN.1 tag, expected: {expected}, found: {found}")
            }
            Self::InvalidMacKeyError(ref e_len, ref f_len) => write!(
                f,
                "Invalid MAC key, expected len: {e_len}, found len: {f_len}"
            ),
            Self::ParseDataError(ref error) => write!(f, "Invalid data length: {error}"),
            Self::MalformedInput(ref reason) => write!(f, "Malformed input: {reason}"),
            Self::InvalidArgument(error_msg) => write!(f, "Invalid argument: {error_msg}"),
            Self::UnsupportedParameters(ref error_msg) => {
                write!(f, "Unsupported parameters: {error_msg}")
            }
            Self::MacMismatch => write!(f, "Encrypted message MAC is not correct"),
            Self::BadPadding => write!(f, "Padding marker not found"),
            Self::InvalidResponseError() => {
                write!(f, "Card response is invalid")
            }
            Self::OverflowSscError() => write!(f, "SSC overflew error"),
            Self::InvalidOidError() => write!(f, "Invalid OID given"),
            Self::CalculateHashError(error_msg) => {
                write!(f, "Failure during calculation of hashes: {error_msg}")
            }
            Self::BacDenied {
                ref document_number,
                status,
            } => write!(
                f,
                "BAC denied for document {document_number}{}",
                status_suffix(status)
            ),
            Self::PaceDenied { ref reason, status } => {
                write!(f, "PACE failed at {reason}{}", status_suffix(status))
            }
            Self::ChipAuthDenied { ref reason, status } => write!(
                f,
                "Chip Authentication failed at {reason}{}",
                status_suffix(status)
            ),
            Self::TerminalAuthDenied { ref reason, status } => write!(
                f,
                "Terminal Authentication failed at {reason}{}",
                status_suffix(status)
            ),
            Self::CardNotOpen => write!(f, "Card is not connected"),
            Self::TransceiverError(ref error_msg) => write!(f, "Transceiver failure: {error_msg}"),
            Self::LockPoisoned => write!(f, "Passport service lock is poisoned"),
            Self::PcscError(ref e) => fmt::Display::fmt(&e, f),
            Self::RsaError(ref e) => fmt::Display::fmt(&e, f),
            Self::UnpadError(ref e) => fmt::Display::fmt(&e, f),
            Self::IntCastError(ref e) => fmt::Display::fmt(&e, f),
        }
    }
}
// TODO, change to core::error soon, hopefully?
impl std::error::Error for EmrtdError {}

/// Converts a byte slice to an uppercase hexadecimal string.
///
/// # Examples
///
/// ```
/// use emrtd_access::bytes2hex;
/// let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
/// let hex_string = bytes2hex(&bytes);
/// assert_eq!(hex_string, "DEADBEEF");
/// ```
#[must_use]
pub fn bytes2hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, &byte| {
        write!(&mut acc, "{byte:02X}").expect("Failed to write to string");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_bytes2hex() {
        assert_eq!(bytes2hex(&[]), "");
        assert_eq!(bytes2hex(&[0x00, 0x0A, 0xFF]), "000AFF");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            EmrtdError::RecvApduError(0x6A, 0x82).to_string(),
            "APDU command failed with status code: 6A 82"
        );
        let err = EmrtdError::BacDenied {
            document_number: String::from("L898902C"),
            status: Some([0x63, 0x00]),
        };
        assert_eq!(err.to_string(), "BAC denied for document L898902C (status code: 63 00)");
        let err = EmrtdError::PaceDenied {
            reason: String::from("Mutual Authentication"),
            status: None,
        };
        assert_eq!(err.to_string(), "PACE failed at Mutual Authentication");
    }
}

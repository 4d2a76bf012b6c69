//! ISO/IEC 9796-2 digital signature scheme 1 message recovery, as used by
//! RSA Active Authentication (ICAO Doc 9303-11 Section 6.1).

use alloc::{string::String, vec::Vec};
use tracing::error;

use crate::{bytes2hex, crypto::DigestAlgorithm, EmrtdError};

/// Implicit trailer, SHA-1.
pub const TRAILER_IMPLICIT: u8 = 0xBC;
/// Second byte of an explicit two byte trailer `hash_id ‖ CC`.
pub const TRAILER_EXPLICIT: u8 = 0xCC;

/// The parts of a recovered message representative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredMessage {
    /// The recoverable part `M1` of the signed message.
    pub m1: Vec<u8>,
    /// The digest `H(M1 ‖ M2)` embedded in the representative.
    pub digest: Vec<u8>,
    /// The hash function named by the trailer.
    pub digest_algorithm: DigestAlgorithm,
}

fn malformed(reason: &str, data: &[u8]) -> EmrtdError {
    error!("{reason}: {}", bytes2hex(data));
    EmrtdError::MalformedInput(String::from(reason))
}

/// Hash identifiers of ISO/IEC 10118.
fn digest_from_hash_id(hash_id: u8) -> Option<DigestAlgorithm> {
    match hash_id {
        0x33 => Some(DigestAlgorithm::SHA1),
        0x38 => Some(DigestAlgorithm::SHA224),
        0x34 => Some(DigestAlgorithm::SHA256),
        0x36 => Some(DigestAlgorithm::SHA384),
        0x35 => Some(DigestAlgorithm::SHA512),
        _ => None,
    }
}

/// Splits a message representative (the RSA public operation applied to
/// the signature) into `M1`, the digest and its hash function.
///
/// The decoder is strict: a wrong header, padding bytes other than `BB`, a
/// missing padding delimiter, an unknown trailer or an empty `M1` is rejected.
///
/// # Errors
///
/// * `EmrtdError::MalformedInput` if the representative is not a valid
///   partial recovery encoding.
pub fn recover_message(representative: &[u8]) -> Result<RecoveredMessage, EmrtdError> {
    let Some((&first, _)) = representative.split_first() else {
        return Err(malformed("Empty ISO 9796-2 message representative", representative));
    };
    if first & 0xC0 != 0x40 {
        return Err(malformed("Invalid ISO 9796-2 header", representative));
    }
    if first & 0x20 == 0 {
        return Err(malformed(
            "ISO 9796-2 representative is not a partial recovery encoding",
            representative,
        ));
    }

    let (trailer_len, digest_algorithm) = match representative {
        [.., TRAILER_IMPLICIT] => (1, DigestAlgorithm::SHA1),
        [.., hash_id, TRAILER_EXPLICIT] => (
            2,
            digest_from_hash_id(*hash_id)
                .ok_or_else(|| malformed("Unknown ISO 9796-2 hash identifier", representative))?,
        ),
        _ => return Err(malformed("Invalid ISO 9796-2 trailer", representative)),
    };

    let delimiter = representative
        .iter()
        .position(|b| b & 0x0F == 0x0A)
        .ok_or_else(|| malformed("ISO 9796-2 padding delimiter not found", representative))?;
    // Padding is `xB BB .. BB BA` when the header nibble is not the delimiter
    if delimiter > 0
        && (first & 0x0F != 0x0B
            || representative[delimiter] != 0xBA
            || representative[1..delimiter].iter().any(|&b| b != 0xBB))
    {
        return Err(malformed("Invalid ISO 9796-2 padding", representative));
    }

    let digest_len = digest_algorithm.output_size();
    let digest_start = representative
        .len()
        .checked_sub(trailer_len + digest_len)
        .filter(|&start| start > delimiter + 1)
        .ok_or_else(|| {
            malformed(
                "ISO 9796-2 representative too short for the recoverable message",
                representative,
            )
        })?;

    let m1 = representative[delimiter + 1..digest_start].to_vec();
    let digest = representative[digest_start..representative.len() - trailer_len].to_vec();
    Ok(RecoveredMessage {
        m1,
        digest,
        digest_algorithm,
    })
}

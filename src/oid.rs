//! Object identifiers of the access control protocols and their decoding
//! into algorithm choices.

use alloc::string::String;
use tracing::error;

use crate::{
    crypto::{CipherAlgorithm, DigestAlgorithm, EncryptionAlgorithm},
    key_agreement::KeyAgreementAlgorithm,
    EmrtdError,
};

pub const ID_ACTIVE_AUTHENTICATION: &str = "2.23.136.1.1.5";

// bsi-de 0.4.0.127.0.7
pub const ID_PK_DH: &str = "0.4.0.127.0.7.2.2.1.1";
pub const ID_PK_ECDH: &str = "0.4.0.127.0.7.2.2.1.2";

pub const ID_TA: &str = "0.4.0.127.0.7.2.2.2";
pub const ID_TA_ECDSA_SHA_1: &str = "0.4.0.127.0.7.2.2.2.2.1";
pub const ID_TA_ECDSA_SHA_224: &str = "0.4.0.127.0.7.2.2.2.2.2";
pub const ID_TA_ECDSA_SHA_256: &str = "0.4.0.127.0.7.2.2.2.2.3";
pub const ID_TA_ECDSA_SHA_384: &str = "0.4.0.127.0.7.2.2.2.2.4";
pub const ID_TA_ECDSA_SHA_512: &str = "0.4.0.127.0.7.2.2.2.2.5";

pub const ID_CA_DH: &str = "0.4.0.127.0.7.2.2.3.1";
pub const ID_CA_DH_3DES_CBC_CBC: &str = "0.4.0.127.0.7.2.2.3.1.1";
pub const ID_CA_DH_AES_CBC_CMAC_128: &str = "0.4.0.127.0.7.2.2.3.1.2";
pub const ID_CA_DH_AES_CBC_CMAC_192: &str = "0.4.0.127.0.7.2.2.3.1.3";
pub const ID_CA_DH_AES_CBC_CMAC_256: &str = "0.4.0.127.0.7.2.2.3.1.4";
pub const ID_CA_ECDH: &str = "0.4.0.127.0.7.2.2.3.2";
pub const ID_CA_ECDH_3DES_CBC_CBC: &str = "0.4.0.127.0.7.2.2.3.2.1";
pub const ID_CA_ECDH_AES_CBC_CMAC_128: &str = "0.4.0.127.0.7.2.2.3.2.2";
pub const ID_CA_ECDH_AES_CBC_CMAC_192: &str = "0.4.0.127.0.7.2.2.3.2.3";
pub const ID_CA_ECDH_AES_CBC_CMAC_256: &str = "0.4.0.127.0.7.2.2.3.2.4";

pub const ID_PACE: &str = "0.4.0.127.0.7.2.2.4";
pub const ID_PACE_DH_GM_3DES_CBC_CBC: &str = "0.4.0.127.0.7.2.2.4.1.1";
pub const ID_PACE_DH_GM_AES_CBC_CMAC_128: &str = "0.4.0.127.0.7.2.2.4.1.2";
pub const ID_PACE_DH_GM_AES_CBC_CMAC_192: &str = "0.4.0.127.0.7.2.2.4.1.3";
pub const ID_PACE_DH_GM_AES_CBC_CMAC_256: &str = "0.4.0.127.0.7.2.2.4.1.4";
pub const ID_PACE_ECDH_GM_3DES_CBC_CBC: &str = "0.4.0.127.0.7.2.2.4.2.1";
pub const ID_PACE_ECDH_GM_AES_CBC_CMAC_128: &str = "0.4.0.127.0.7.2.2.4.2.2";
pub const ID_PACE_ECDH_GM_AES_CBC_CMAC_192: &str = "0.4.0.127.0.7.2.2.4.2.3";
pub const ID_PACE_ECDH_GM_AES_CBC_CMAC_256: &str = "0.4.0.127.0.7.2.2.4.2.4";
pub const ID_PACE_DH_IM_3DES_CBC_CBC: &str = "0.4.0.127.0.7.2.2.4.3.1";
pub const ID_PACE_DH_IM_AES_CBC_CMAC_128: &str = "0.4.0.127.0.7.2.2.4.3.2";
pub const ID_PACE_DH_IM_AES_CBC_CMAC_192: &str = "0.4.0.127.0.7.2.2.4.3.3";
pub const ID_PACE_DH_IM_AES_CBC_CMAC_256: &str = "0.4.0.127.0.7.2.2.4.3.4";
pub const ID_PACE_ECDH_IM_3DES_CBC_CBC: &str = "0.4.0.127.0.7.2.2.4.4.1";
pub const ID_PACE_ECDH_IM_AES_CBC_CMAC_128: &str = "0.4.0.127.0.7.2.2.4.4.2";
pub const ID_PACE_ECDH_IM_AES_CBC_CMAC_192: &str = "0.4.0.127.0.7.2.2.4.4.3";
pub const ID_PACE_ECDH_IM_AES_CBC_CMAC_256: &str = "0.4.0.127.0.7.2.2.4.4.4";
pub const ID_PACE_ECDH_CAM_AES_CBC_CMAC_128: &str = "0.4.0.127.0.7.2.2.4.6.2";
pub const ID_PACE_ECDH_CAM_AES_CBC_CMAC_192: &str = "0.4.0.127.0.7.2.2.4.6.3";
pub const ID_PACE_ECDH_CAM_AES_CBC_CMAC_256: &str = "0.4.0.127.0.7.2.2.4.6.4";

// BSI TR-03111 ecdsa-plain-signatures
pub const ECDSA_PLAIN_SHA1: &str = "0.4.0.127.0.7.1.1.4.1.1";
pub const ECDSA_PLAIN_SHA224: &str = "0.4.0.127.0.7.1.1.4.1.2";
pub const ECDSA_PLAIN_SHA256: &str = "0.4.0.127.0.7.1.1.4.1.3";
pub const ECDSA_PLAIN_SHA384: &str = "0.4.0.127.0.7.1.1.4.1.4";
pub const ECDSA_PLAIN_SHA512: &str = "0.4.0.127.0.7.1.1.4.1.5";

// ANSI X9.62
pub const ECDSA_WITH_SHA1: &str = "1.2.840.10045.4.1";
pub const ECDSA_WITH_SHA224: &str = "1.2.840.10045.4.3.1";
pub const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
pub const ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
pub const ECDSA_WITH_SHA512: &str = "1.2.840.10045.4.3.4";

/// Human readable name of a known OID, used in log messages.
#[must_use]
pub fn oid_name(oid: &str) -> &'static str {
    match oid {
        ID_ACTIVE_AUTHENTICATION => "id-AA",
        ID_PK_DH => "id-PK-DH",
        ID_PK_ECDH => "id-PK-ECDH",
        ID_TA => "id-TA",
        ID_TA_ECDSA_SHA_1 => "id-TA-ECDSA-SHA-1",
        ID_TA_ECDSA_SHA_224 => "id-TA-ECDSA-SHA-224",
        ID_TA_ECDSA_SHA_256 => "id-TA-ECDSA-SHA-256",
        ID_TA_ECDSA_SHA_384 => "id-TA-ECDSA-SHA-384",
        ID_TA_ECDSA_SHA_512 => "id-TA-ECDSA-SHA-512",
        ID_CA_DH => "id-CA-DH",
        ID_CA_DH_3DES_CBC_CBC => "id-CA-DH-3DES-CBC-CBC",
        ID_CA_DH_AES_CBC_CMAC_128 => "id-CA-DH-AES-CBC-CMAC-128",
        ID_CA_DH_AES_CBC_CMAC_192 => "id-CA-DH-AES-CBC-CMAC-192",
        ID_CA_DH_AES_CBC_CMAC_256 => "id-CA-DH-AES-CBC-CMAC-256",
        ID_CA_ECDH => "id-CA-ECDH",
        ID_CA_ECDH_3DES_CBC_CBC => "id-CA-ECDH-3DES-CBC-CBC",
        ID_CA_ECDH_AES_CBC_CMAC_128 => "id-CA-ECDH-AES-CBC-CMAC-128",
        ID_CA_ECDH_AES_CBC_CMAC_192 => "id-CA-ECDH-AES-CBC-CMAC-192",
        ID_CA_ECDH_AES_CBC_CMAC_256 => "id-CA-ECDH-AES-CBC-CMAC-256",
        ID_PACE_DH_GM_3DES_CBC_CBC => "id-PACE-DH-GM-3DES-CBC-CBC",
        ID_PACE_DH_GM_AES_CBC_CMAC_128 => "id-PACE-DH-GM-AES-CBC-CMAC-128",
        ID_PACE_DH_GM_AES_CBC_CMAC_192 => "id-PACE-DH-GM-AES-CBC-CMAC-192",
        ID_PACE_DH_GM_AES_CBC_CMAC_256 => "id-PACE-DH-GM-AES-CBC-CMAC-256",
        ID_PACE_ECDH_GM_3DES_CBC_CBC => "id-PACE-ECDH-GM-3DES-CBC-CBC",
        ID_PACE_ECDH_GM_AES_CBC_CMAC_128 => "id-PACE-ECDH-GM-AES-CBC-CMAC-128",
        ID_PACE_ECDH_GM_AES_CBC_CMAC_192 => "id-PACE-ECDH-GM-AES-CBC-CMAC-192",
        ID_PACE_ECDH_GM_AES_CBC_CMAC_256 => "id-PACE-ECDH-GM-AES-CBC-CMAC-256",
        ID_PACE_DH_IM_3DES_CBC_CBC => "id-PACE-DH-IM-3DES-CBC-CBC",
        ID_PACE_DH_IM_AES_CBC_CMAC_128 => "id-PACE-DH-IM-AES-CBC-CMAC-128",
        ID_PACE_DH_IM_AES_CBC_CMAC_192 => "id-PACE-DH-IM-AES-CBC-CMAC-192",
        ID_PACE_DH_IM_AES_CBC_CMAC_256 => "id-PACE-DH-IM-AES-CBC-CMAC-256",
        ID_PACE_ECDH_IM_3DES_CBC_CBC => "id-PACE-ECDH-IM-3DES-CBC-CBC",
        ID_PACE_ECDH_IM_AES_CBC_CMAC_128 => "id-PACE-ECDH-IM-AES-CBC-CMAC-128",
        ID_PACE_ECDH_IM_AES_CBC_CMAC_192 => "id-PACE-ECDH-IM-AES-CBC-CMAC-192",
        ID_PACE_ECDH_IM_AES_CBC_CMAC_256 => "id-PACE-ECDH-IM-AES-CBC-CMAC-256",
        ID_PACE_ECDH_CAM_AES_CBC_CMAC_128 => "id-PACE-ECDH-CAM-AES-CBC-CMAC-128",
        ID_PACE_ECDH_CAM_AES_CBC_CMAC_192 => "id-PACE-ECDH-CAM-AES-CBC-CMAC-192",
        ID_PACE_ECDH_CAM_AES_CBC_CMAC_256 => "id-PACE-ECDH-CAM-AES-CBC-CMAC-256",
        ECDSA_PLAIN_SHA1 => "ecdsa-plain-SHA1",
        ECDSA_PLAIN_SHA224 => "ecdsa-plain-SHA224",
        ECDSA_PLAIN_SHA256 => "ecdsa-plain-SHA256",
        ECDSA_PLAIN_SHA384 => "ecdsa-plain-SHA384",
        ECDSA_PLAIN_SHA512 => "ecdsa-plain-SHA512",
        ECDSA_WITH_SHA1 => "ecdsa-with-SHA1",
        ECDSA_WITH_SHA224 => "ecdsa-with-SHA224",
        ECDSA_WITH_SHA256 => "ecdsa-with-SHA256",
        ECDSA_WITH_SHA384 => "ecdsa-with-SHA384",
        ECDSA_WITH_SHA512 => "ecdsa-with-SHA512",
        _ => "Unknown",
    }
}

/// PACE generator mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingType {
    /// Generic Mapping.
    GM,
    /// Integrated Mapping.
    IM,
    /// Chip Authentication Mapping.
    CAM,
}

/// Splits `prefix.a.b` into `(a, b)`.
fn last_two_arcs<'a>(oid: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = oid.strip_prefix(prefix)?.strip_prefix('.')?;
    let (a, b) = rest.split_once('.')?;
    (!b.contains('.')).then_some((a, b))
}

fn cipher_from_arc(arc: &str) -> Option<EncryptionAlgorithm> {
    match arc {
        "1" => Some(EncryptionAlgorithm::DES3),
        "2" => Some(EncryptionAlgorithm::AES128),
        "3" => Some(EncryptionAlgorithm::AES192),
        "4" => Some(EncryptionAlgorithm::AES256),
        _ => None,
    }
}

fn cipher_to_arc(cipher: EncryptionAlgorithm) -> char {
    match cipher {
        EncryptionAlgorithm::DES3 => '1',
        EncryptionAlgorithm::AES128 => '2',
        EncryptionAlgorithm::AES192 => '3',
        EncryptionAlgorithm::AES256 => '4',
    }
}

/// The algorithms selected by a PACE protocol OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceAlgorithm {
    pub key_agreement: KeyAgreementAlgorithm,
    pub mapping: MappingType,
    pub cipher: EncryptionAlgorithm,
}

impl PaceAlgorithm {
    /// Infers key agreement, mapping and cipher from a PACE OID.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidOidError` if `oid` is not a PACE protocol OID.
    pub fn from_oid(oid: &str) -> Result<Self, EmrtdError> {
        let (mapping_arc, cipher_arc) = last_two_arcs(oid, ID_PACE).ok_or_else(|| {
            error!("Not a PACE protocol OID: {oid}");
            EmrtdError::InvalidOidError()
        })?;
        let (key_agreement, mapping) = match mapping_arc {
            "1" => (KeyAgreementAlgorithm::DH, MappingType::GM),
            "2" => (KeyAgreementAlgorithm::ECDH, MappingType::GM),
            "3" => (KeyAgreementAlgorithm::DH, MappingType::IM),
            "4" => (KeyAgreementAlgorithm::ECDH, MappingType::IM),
            "6" => (KeyAgreementAlgorithm::ECDH, MappingType::CAM),
            _ => {
                error!("Unknown PACE mapping in OID {oid}");
                return Err(EmrtdError::InvalidOidError());
            }
        };
        let cipher = cipher_from_arc(cipher_arc).ok_or_else(|| {
            error!("Unknown PACE cipher in OID {oid}");
            EmrtdError::InvalidOidError()
        })?;
        if mapping == MappingType::CAM && cipher == EncryptionAlgorithm::DES3 {
            error!("Chip Authentication Mapping is not defined for 3DES: {oid}");
            return Err(EmrtdError::InvalidOidError());
        }
        Ok(Self {
            key_agreement,
            mapping,
            cipher,
        })
    }

    /// The dotted OID for this algorithm combination.
    #[must_use]
    pub fn oid(&self) -> String {
        let mapping = match (self.key_agreement, self.mapping) {
            (KeyAgreementAlgorithm::DH, MappingType::GM) => '1',
            (KeyAgreementAlgorithm::ECDH, MappingType::GM) => '2',
            (KeyAgreementAlgorithm::DH, MappingType::IM) => '3',
            (KeyAgreementAlgorithm::ECDH, MappingType::IM) => '4',
            (_, MappingType::CAM) => '6',
        };
        let mut oid = String::from(ID_PACE);
        oid.push('.');
        oid.push(mapping);
        oid.push('.');
        oid.push(cipher_to_arc(self.cipher));
        oid
    }
}

/// The algorithms selected by a Chip Authentication protocol OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipAuthAlgorithm {
    pub key_agreement: KeyAgreementAlgorithm,
    pub cipher: EncryptionAlgorithm,
}

impl ChipAuthAlgorithm {
    /// Infers key agreement and cipher from a CA OID.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidOidError` if `oid` is not a CA protocol OID.
    pub fn from_oid(oid: &str) -> Result<Self, EmrtdError> {
        let prefix = "0.4.0.127.0.7.2.2.3";
        let parsed = last_two_arcs(oid, prefix).and_then(|(ka, cipher)| {
            let key_agreement = match ka {
                "1" => KeyAgreementAlgorithm::DH,
                "2" => KeyAgreementAlgorithm::ECDH,
                _ => return None,
            };
            Some(Self {
                key_agreement,
                cipher: cipher_from_arc(cipher)?,
            })
        });
        parsed.ok_or_else(|| {
            error!("Not a Chip Authentication protocol OID: {oid}");
            EmrtdError::InvalidOidError()
        })
    }

    /// The dotted OID for this algorithm combination.
    #[must_use]
    pub fn oid(&self) -> String {
        let mut oid = String::from(match self.key_agreement {
            KeyAgreementAlgorithm::DH => ID_CA_DH,
            KeyAgreementAlgorithm::ECDH => ID_CA_ECDH,
        });
        oid.push('.');
        oid.push(cipher_to_arc(self.cipher));
        oid
    }

    /// Whether the legacy MSE:Set KAT command is used instead of General Authenticate.
    #[must_use]
    pub fn uses_set_kat(&self) -> bool {
        self.cipher.cipher() == CipherAlgorithm::DESede
    }
}

/// Digest of an ECDSA signature algorithm OID (plain, X9.62 or TA).
///
/// # Errors
///
/// * `EmrtdError::InvalidOidError` for unknown OIDs.
pub fn ecdsa_digest_algorithm(oid: &str) -> Result<DigestAlgorithm, EmrtdError> {
    match oid {
        ECDSA_PLAIN_SHA1 | ECDSA_WITH_SHA1 | ID_TA_ECDSA_SHA_1 => Ok(DigestAlgorithm::SHA1),
        ECDSA_PLAIN_SHA224 | ECDSA_WITH_SHA224 | ID_TA_ECDSA_SHA_224 => {
            Ok(DigestAlgorithm::SHA224)
        }
        ECDSA_PLAIN_SHA256 | ECDSA_WITH_SHA256 | ID_TA_ECDSA_SHA_256 => {
            Ok(DigestAlgorithm::SHA256)
        }
        ECDSA_PLAIN_SHA384 | ECDSA_WITH_SHA384 | ID_TA_ECDSA_SHA_384 => {
            Ok(DigestAlgorithm::SHA384)
        }
        ECDSA_PLAIN_SHA512 | ECDSA_WITH_SHA512 | ID_TA_ECDSA_SHA_512 => {
            Ok(DigestAlgorithm::SHA512)
        }
        _ => {
            error!("Unknown ECDSA signature algorithm OID: {oid}");
            Err(EmrtdError::InvalidOidError())
        }
    }
}

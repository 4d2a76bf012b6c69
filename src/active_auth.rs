//! Active Authentication, ICAO Doc 9303-11 Section 6.1.
//!
//! The chip signs a challenge of the terminal with the private key whose
//! public key is stored in DG15. Active Authentication does not change the
//! session.

use alloc::vec::Vec;
use constant_time_eq::constant_time_eq;
use num_bigint_dig::BigUint;
use rand::{CryptoRng, RngCore};
use rsa::{traits::PublicKeyParts, RsaPublicKey};
use tracing::{error, info, trace, warn};

use crate::{
    bytes2hex,
    card::CardTransceiver,
    crypto::DigestAlgorithm,
    ec::{ecdsa_verify, EcCurve, EcPoint},
    iso9796::recover_message,
    numeric::{i2os, os2i},
    oid::ecdsa_digest_algorithm,
    secure_messaging::SecureMessagingWrapper,
    sender::send_internal_authenticate,
    EmrtdError,
};

/// Length of the challenge sent with INTERNAL AUTHENTICATE.
pub const CHALLENGE_LENGTH: usize = 8;

/// The Active Authentication public key of DG15.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveAuthPublicKey {
    /// RSA with ISO/IEC 9796-2 digital signature scheme 1.
    Rsa(RsaPublicKey),
    /// ECDSA with plain `r ‖ s` signatures. The digest is named by the
    /// `ActiveAuthenticationInfo` of DG14.
    Ec { curve: EcCurve, point: EcPoint },
}

impl ActiveAuthPublicKey {
    /// An RSA key from the big-endian modulus and public exponent.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::RsaError` if the key is rejected.
    pub fn rsa(modulus: &[u8], public_exponent: &[u8]) -> Result<Self, EmrtdError> {
        let key = RsaPublicKey::new(
            BigUint::from_bytes_be(modulus),
            BigUint::from_bytes_be(public_exponent),
        )
        .map_err(|err| {
            error!("Invalid Active Authentication RSA key: {err}");
            EmrtdError::RsaError(err)
        })?;
        Ok(Self::Rsa(key))
    }
}

/// Outcome of an Active Authentication run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAuthResult {
    /// Whether the signature of the chip is valid.
    pub verified: bool,
    pub challenge: Vec<u8>,
    /// The signature as returned by the chip.
    pub response: Vec<u8>,
}

/// Verifies an ISO/IEC 9796-2 signature with message recovery over
/// `M1 ‖ challenge`.
fn verify_rsa(key: &RsaPublicKey, challenge: &[u8], signature: &[u8]) -> Result<bool, EmrtdError> {
    let s = os2i(signature);
    if s >= *key.n() {
        warn!("Active Authentication signature is not smaller than the modulus");
        return Ok(false);
    }
    let representative = i2os(&s.modpow(key.e(), key.n()), key.size())?;
    trace!("Message representative: {}", bytes2hex(&representative));
    let recovered = match recover_message(&representative) {
        Ok(recovered) => recovered,
        Err(_) => {
            warn!("Active Authentication signature does not recover a message");
            return Ok(false);
        }
    };
    let digest = recovered
        .digest_algorithm
        .hash(&[&recovered.m1[..], challenge].concat())?;
    Ok(constant_time_eq(&digest, &recovered.digest))
}

/// Sends a random challenge with INTERNAL AUTHENTICATE and verifies the
/// chip's signature with `public_key`.
///
/// `digest_oid` is the signature algorithm OID of `ActiveAuthenticationInfo`
/// and is required for ECDSA keys; RSA signatures name their digest in the
/// trailer. A signature that does not verify is reported with
/// `verified: false`.
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if an ECDSA key comes without a digest OID.
/// * `EmrtdError::InvalidOidError` for an unknown digest OID.
/// * `EmrtdError` on transport or secure messaging failures or an error status.
pub fn do_aa<C: CardTransceiver + ?Sized, R: RngCore + CryptoRng>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    public_key: &ActiveAuthPublicKey,
    digest_oid: Option<&str>,
    rng: &mut R,
) -> Result<ActiveAuthResult, EmrtdError> {
    let ec_digest: Option<DigestAlgorithm> = match (public_key, digest_oid) {
        (ActiveAuthPublicKey::Ec { .. }, None) => {
            error!("ECDSA Active Authentication needs the digest of ActiveAuthenticationInfo");
            return Err(EmrtdError::InvalidArgument(
                "ECDSA Active Authentication needs a digest algorithm OID",
            ));
        }
        (ActiveAuthPublicKey::Ec { .. }, Some(oid)) => Some(ecdsa_digest_algorithm(oid)?),
        (ActiveAuthPublicKey::Rsa(_), _) => None,
    };

    let mut challenge = [0_u8; CHALLENGE_LENGTH];
    rng.fill_bytes(&mut challenge);
    trace!("Active Authentication challenge: {}", bytes2hex(&challenge));
    let response = send_internal_authenticate(card, wrapper, &challenge)?;

    let verified = match (public_key, ec_digest) {
        (ActiveAuthPublicKey::Rsa(key), _) => verify_rsa(key, &challenge, &response)?,
        (ActiveAuthPublicKey::Ec { curve, point }, Some(digest)) => {
            if response.len() == 2 * curve.order_size() {
                ecdsa_verify(curve, point, &digest.hash(&challenge)?, &response)?
            } else {
                warn!(
                    "Active Authentication signature of {} bytes does not fit the curve",
                    response.len()
                );
                false
            }
        }
        (ActiveAuthPublicKey::Ec { .. }, None) => false,
    };
    if verified {
        info!("Active Authentication succeeded");
    } else {
        warn!("Active Authentication failed");
    }
    Ok(ActiveAuthResult {
        verified,
        challenge: challenge.to_vec(),
        response,
    })
}

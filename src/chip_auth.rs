//! Chip Authentication, ICAO Doc 9303-11 Section 6.2 and BSI TR-03110-1 Section 3.4.
//!
//! Chip Authentication replaces the session of BAC or PACE with one keyed
//! by a static key of the chip (from DG14) and an ephemeral key of the terminal.

use alloc::{string::String, vec::Vec};
use rand::{CryptoRng, RngCore};
use tracing::{error, info, trace};

use crate::{
    asn1::encode_tlv,
    bytes2hex,
    card::CardTransceiver,
    crypto::KeyType,
    key_agreement::{DomainParameters, KeyPair, PublicKey},
    oid::{oid_name, ChipAuthAlgorithm},
    secure_messaging::SecureMessagingWrapper,
    sender::{send_general_authenticate, send_mse_set_at_ca, send_mse_set_kat},
    EmrtdError,
};

/// Outcome of a successful Chip Authentication run.
#[derive(Debug, Clone)]
pub struct ChipAuthResult {
    pub algorithm: ChipAuthAlgorithm,
    pub oid: String,
    pub key_id: Option<Vec<u8>>,
    pub parameters: DomainParameters,
    /// Static public key of the chip the session was agreed with.
    pub chip_public_key: PublicKey,
    /// Ephemeral key pair of the terminal.
    pub terminal_key_pair: KeyPair,
    /// `Comp(PK_PCD)`, the compressed ephemeral key of the terminal that
    /// Terminal Authentication signs.
    pub key_hash: Vec<u8>,
    /// The new secure messaging session, SSC 0.
    pub wrapper: SecureMessagingWrapper,
}

fn rejected(step: &'static str) -> impl Fn(EmrtdError) -> EmrtdError {
    move |err| match err {
        EmrtdError::RecvApduError(sw1, sw2) => EmrtdError::ChipAuthDenied {
            reason: String::from(step),
            status: Some([sw1, sw2]),
        },
        err => err,
    }
}

/// Runs Chip Authentication with a freshly generated terminal key pair.
///
/// See [`do_ca_with_key_pair`].
///
/// # Errors
///
/// * `EmrtdError` as for [`do_ca_with_key_pair`].
pub fn do_ca<C: CardTransceiver + ?Sized, R: RngCore + CryptoRng>(
    card: &mut C,
    wrapper: &mut SecureMessagingWrapper,
    oid: &str,
    key_id: Option<&[u8]>,
    parameters: &DomainParameters,
    chip_public_key: &PublicKey,
    rng: &mut R,
) -> Result<ChipAuthResult, EmrtdError> {
    let terminal_key_pair = parameters.generate_key_pair(rng)?;
    do_ca_with_key_pair(
        card,
        wrapper,
        oid,
        key_id,
        parameters,
        chip_public_key,
        terminal_key_pair,
    )
}

/// Runs Chip Authentication inside the current session `wrapper` with a
/// terminal key pair chosen earlier, e.g. the one whose compressed public
/// key Terminal Authentication already committed to after PACE.
///
/// 3DES OIDs use MSE:Set KAT; AES OIDs use MSE:Set AT followed by General
/// Authenticate. The chip answers under the old session, so `wrapper`
/// consumes the SSC values of these commands and must not be used after a
/// successful run.
///
/// # Errors
///
/// * `EmrtdError::InvalidOidError` if `oid` is not a CA OID.
/// * `EmrtdError::InvalidArgument` if the parameters or keys do not match
///   the OID's key agreement.
/// * `EmrtdError::ChipAuthDenied` if the chip rejects a command.
/// * `EmrtdError` on transport or secure messaging failures.
pub fn do_ca_with_key_pair<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: &mut SecureMessagingWrapper,
    oid: &str,
    key_id: Option<&[u8]>,
    parameters: &DomainParameters,
    chip_public_key: &PublicKey,
    terminal_key_pair: KeyPair,
) -> Result<ChipAuthResult, EmrtdError> {
    let algorithm = ChipAuthAlgorithm::from_oid(oid)?;
    if parameters.key_agreement() != algorithm.key_agreement {
        error!(
            "{} needs {:?} domain parameters, found {:?}",
            oid_name(oid),
            algorithm.key_agreement,
            parameters.key_agreement()
        );
        return Err(EmrtdError::InvalidArgument(
            "Domain parameters do not match the Chip Authentication key agreement",
        ));
    }
    // Computing the secret first also validates the chip key before anything is sent
    let shared_secret = parameters.shared_secret(&terminal_key_pair.private_key, chip_public_key)?;
    let terminal_public_key = parameters.encode_public_key(&terminal_key_pair.public_key)?;
    info!("Starting Chip Authentication with {} ({oid})", oid_name(oid));

    if algorithm.uses_set_kat() {
        send_mse_set_kat(card, Some(&mut *wrapper), &terminal_public_key, key_id)
            .map_err(rejected("MSE:Set KAT"))?;
    } else {
        send_mse_set_at_ca(card, Some(&mut *wrapper), oid, key_id)
            .map_err(rejected("MSE:Set AT"))?;
        let content = send_general_authenticate(
            card,
            Some(&mut *wrapper),
            &encode_tlv(&[0x80], &terminal_public_key),
            true,
        )
        .map_err(rejected("General Authenticate"))?;
        if !content.is_empty() {
            trace!("Ignoring General Authenticate data: {}", bytes2hex(&content));
        }
    }

    let cipher = algorithm.cipher;
    let ks_enc = cipher.derive_key(&shared_secret, None, KeyType::Encryption)?;
    let ks_mac = cipher.derive_key(&shared_secret, None, KeyType::Mac)?;
    let key_hash = parameters.compressed(&terminal_key_pair.public_key)?;

    let mut new_wrapper = SecureMessagingWrapper::with_zero_ssc(ks_enc, ks_mac, cipher)?;
    new_wrapper.set_should_check_mac(wrapper.should_check_mac());
    new_wrapper.set_max_transceive_length(wrapper.max_transceive_length());

    info!("Chip Authentication established");
    Ok(ChipAuthResult {
        algorithm,
        oid: String::from(oid),
        key_id: key_id.map(<[u8]>::to_vec),
        parameters: parameters.clone(),
        chip_public_key: chip_public_key.clone(),
        terminal_key_pair,
        key_hash,
        wrapper: new_wrapper,
    })
}

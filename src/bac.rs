//! Basic Access Control.
//!
//! For more details and examples, see ICAO Doc 9303-11 Section 4.3 and Appendix D.3
//! <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>

use alloc::{string::String, vec::Vec};
use constant_time_eq::constant_time_eq;
use rand::{CryptoRng, RngCore};
use tracing::{error, info, trace};

use crate::{
    bytes2hex,
    card::CardTransceiver,
    crypto::{
        cbc_decrypt, cbc_encrypt, compute_mac, padding_method_2, xor_slices, EncryptionAlgorithm,
        KeyType, MacAlgorithm,
    },
    mrz::BacKey,
    secure_messaging::SecureMessagingWrapper,
    sender::{describe_status, send_get_challenge, send_mutual_authenticate},
    EmrtdError,
};

/// Outcome of a successful BAC run.
#[derive(Debug, Clone)]
pub struct BacResult {
    /// The key the chip accepted.
    pub bac_key: BacKey,
    /// The new secure messaging session, 3DES with the SSC taken from the nonces.
    pub wrapper: SecureMessagingWrapper,
}

fn denied(bac_key: &BacKey, status: Option<[u8; 2]>) -> EmrtdError {
    EmrtdError::BacDenied {
        document_number: String::from(bac_key.document_number()),
        status,
    }
}

/// Runs BAC with the MRZ derived key and returns the new session.
///
/// The commands are sent in plain; any session that was active before is
/// dropped by the chip when it receives GET CHALLENGE.
///
/// # Errors
///
/// * `EmrtdError::BacDenied` if the chip rejects the key or its answer does
///   not authenticate.
/// * `EmrtdError` on transport failures.
pub fn do_bac<C: CardTransceiver + ?Sized, R: RngCore + CryptoRng>(
    card: &mut C,
    bac_key: &BacKey,
    rng: &mut R,
) -> Result<BacResult, EmrtdError> {
    let alg = EncryptionAlgorithm::DES3;
    let ba_key_seed = bac_key.key_seed()?;

    // Calculate the basic access keys (ba_key_enc and ba_key_mac)
    trace!("Computing basic access keys...");
    let ba_key_enc = alg.derive_key(&ba_key_seed, None, KeyType::Encryption)?;
    let ba_key_mac = alg.derive_key(&ba_key_seed, None, KeyType::Mac)?;

    // AUTHENTICATION AND ESTABLISHMENT OF SESSION KEYS
    trace!("Establishing session keys...");
    let rnd_ic = send_get_challenge(card, None).map_err(|err| match err {
        EmrtdError::RecvApduError(sw1, sw2) => denied(bac_key, Some([sw1, sw2])),
        err => err,
    })?;

    let mut rnd_ifd: [u8; 8] = [0; 8];
    rng.fill_bytes(&mut rnd_ifd);
    let mut k_ifd: [u8; 16] = [0; 16];
    rng.fill_bytes(&mut k_ifd);

    let e_ifd = cbc_encrypt(
        alg,
        &ba_key_enc,
        &[0; 8],
        &[&rnd_ifd[..], &rnd_ic, &k_ifd[..]].concat(),
    )?;
    let m_ifd = compute_mac(&ba_key_mac, &padding_method_2(&e_ifd, 8)?, MacAlgorithm::DES)?;
    let cmd_data = [&e_ifd[..], &m_ifd[..]].concat();

    let response = send_mutual_authenticate(card, &cmd_data)?;
    if !response.is_success() {
        error!(
            "Received invalid SW during EXTERNAL AUTHENTICATE: {}",
            describe_status(response.status)
        );
        return Err(denied(bac_key, Some(response.status)));
    }
    let resp_data_enc: Vec<u8> = response.data;
    if resp_data_enc.len() != 40 {
        error!(
            "Card response length should be equal to 40, found {}",
            resp_data_enc.len()
        );
        return Err(denied(bac_key, None));
    }

    let (e_ic, m_ic) = resp_data_enc.split_at(32);
    let expected_m_ic = compute_mac(&ba_key_mac, &padding_method_2(e_ic, 8)?, MacAlgorithm::DES)?;
    if !constant_time_eq(&expected_m_ic, m_ic) {
        error!("MAC verification failed");
        return Err(denied(bac_key, None));
    }

    let resp_data = cbc_decrypt(alg, &ba_key_enc, &[0; 8], e_ic)?;
    if !constant_time_eq(&resp_data[..8], &rnd_ic) {
        error!("Chip did not return the challenge it issued");
        return Err(denied(bac_key, None));
    }
    if !constant_time_eq(&resp_data[8..16], &rnd_ifd) {
        error!("Chip did not return the terminal nonce");
        return Err(denied(bac_key, None));
    }
    let k_ic: &[u8] = &resp_data[16..32];

    let ses_key_seed = xor_slices(&k_ifd, k_ic)?;
    let ks_enc = alg.derive_key(&ses_key_seed, None, KeyType::Encryption)?;
    let ks_mac = alg.derive_key(&ses_key_seed, None, KeyType::Mac)?;
    let ssc = [&rnd_ic[4..], &rnd_ifd[4..]].concat();
    trace!("BAC SSC: {}", bytes2hex(&ssc));

    info!("BAC established");
    Ok(BacResult {
        bac_key: bac_key.clone(),
        wrapper: SecureMessagingWrapper::new(ks_enc, ks_mac, alg, ssc)?,
    })
}

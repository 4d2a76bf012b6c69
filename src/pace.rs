//! Password Authenticated Connection Establishment.
//!
//! For more details and examples, see ICAO Doc 9303-11 Section 4.4 and Appendices G and H
//! <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>

use alloc::{format, string::String, vec, vec::Vec};
use constant_time_eq::constant_time_eq;
use rand::{CryptoRng, RngCore};
use tracing::{error, info, trace};

use crate::{
    asn1::{encode_tlv, find_tlv, oid_to_bytes},
    bytes2hex,
    card::CardTransceiver,
    crypto::{
        cbc_decrypt, compute_mac, padding_method_2, EncryptionAlgorithm, KeyType, MacAlgorithm,
    },
    key_agreement::{
        integrated_mapping_nonce_size, DomainParameters, KeyAgreementAlgorithm, KeyPair, PublicKey,
    },
    mrz::{PaceKey, PaceKeyReference},
    oid::{oid_name, MappingType, PaceAlgorithm},
    secure_messaging::SecureMessagingWrapper,
    sender::{send_general_authenticate, send_mse_set_at_pace},
    EmrtdError,
};

/// Length of the chip nonce `s`.
pub const NONCE_LENGTH: usize = 16;

/// Where the PACE domain parameters come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaceDomain {
    /// A standardized domain parameter id, sent to the chip in MSE:Set AT.
    Standardized(u8),
    /// Explicit parameters, with the chip's private parameter id if it has one.
    Explicit {
        id: Option<u8>,
        parameters: DomainParameters,
    },
}

impl PaceDomain {
    fn resolve(&self) -> Result<(Option<u8>, DomainParameters), EmrtdError> {
        match self {
            Self::Standardized(id) => Ok((Some(*id), DomainParameters::from_standardized_id(*id)?)),
            Self::Explicit { id, parameters } => Ok((*id, parameters.clone())),
        }
    }
}

/// Outcome of a successful PACE run.
#[derive(Debug, Clone)]
pub struct PaceResult {
    pub algorithm: PaceAlgorithm,
    pub oid: String,
    pub key_reference: PaceKeyReference,
    /// Static domain parameters.
    pub parameters: DomainParameters,
    /// Domain parameters with the mapped generator.
    pub mapped_parameters: DomainParameters,
    /// Ephemeral key pair of the terminal over the mapped parameters.
    pub terminal_key_pair: KeyPair,
    /// Ephemeral public key of the chip over the mapped parameters.
    pub chip_public_key: PublicKey,
    /// Most recent certification authority reference, if sent by the chip.
    pub car1: Option<Vec<u8>>,
    /// Previous certification authority reference, if sent by the chip.
    pub car2: Option<Vec<u8>>,
    /// The new secure messaging session, SSC 0.
    pub wrapper: SecureMessagingWrapper,
}

impl PaceResult {
    /// `Comp(PK_PICC)`, the chip identifier used by Terminal Authentication
    /// after PACE.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the key can not be compressed.
    pub fn id_picc(&self) -> Result<Vec<u8>, EmrtdError> {
        self.mapped_parameters.compressed(&self.chip_public_key)
    }
}

fn denied(reason: &str, status: Option<[u8; 2]>) -> EmrtdError {
    EmrtdError::PaceDenied {
        reason: String::from(reason),
        status,
    }
}

/// Maps a rejection by the chip to `PaceDenied`, other errors pass.
fn rejected(step: &'static str) -> impl Fn(EmrtdError) -> EmrtdError {
    move |err| match err {
        EmrtdError::RecvApduError(sw1, sw2) => denied(step, Some([sw1, sw2])),
        err => err,
    }
}

/// Authentication token `T = MAC(KS_mac, 7F49 { 06 OID, 86|84 PK })`, ICAO
/// Doc 9303-11 Section 4.4.3.4 and Appendix D.3.4.
///
/// # Errors
///
/// * `EmrtdError` if the key does not belong to `parameters`.
pub fn authentication_token(
    parameters: &DomainParameters,
    cipher: EncryptionAlgorithm,
    ks_mac: &[u8],
    oid: &str,
    public_key: &PublicKey,
) -> Result<Vec<u8>, EmrtdError> {
    let key_tag = match parameters.key_agreement() {
        KeyAgreementAlgorithm::ECDH => 0x86,
        KeyAgreementAlgorithm::DH => 0x84,
    };
    let body = [
        encode_tlv(&[0x06], &oid_to_bytes(oid)?),
        encode_tlv(&[key_tag], &parameters.encode_public_key(public_key)?),
    ]
    .concat();
    let input = encode_tlv(&[0x7F, 0x49], &body);
    let mac_alg = cipher.mac_algorithm();
    let data = match mac_alg {
        MacAlgorithm::DES => padding_method_2(&input, 8)?,
        MacAlgorithm::AESCMAC => input,
    };
    compute_mac(ks_mac, &data, mac_alg)
}

fn expect_object<'a>(content: &'a [u8], tag: u32, step: &str) -> Result<&'a [u8], EmrtdError> {
    find_tlv(content, tag)?.ok_or_else(|| {
        error!("General Authenticate ({step}) response carries no data object {tag:02X}");
        EmrtdError::MalformedInput(format!("missing data object {tag:02X} in {step} response"))
    })
}

/// Runs PACE with `oid` and the given password and returns the new session.
///
/// Generic Mapping is supported for DH and ECDH, Integrated Mapping for DH
/// and ECDH. The algorithm and the domain parameters are checked before
/// the first command is sent.
///
/// # Errors
///
/// * `EmrtdError::InvalidOidError` if `oid` is not a PACE OID.
/// * `EmrtdError::InvalidArgument` for Chip Authentication Mapping or
///   parameters that do not match the OID's key agreement.
/// * `EmrtdError::UnsupportedParameters` for an unknown parameter id.
/// * `EmrtdError::PaceDenied` if the chip rejects a step or its token is wrong.
/// * `EmrtdError` on transport failures or malformed chip data.
pub fn do_pace<C: CardTransceiver + ?Sized, R: RngCore + CryptoRng>(
    card: &mut C,
    pace_key: &PaceKey,
    oid: &str,
    domain: &PaceDomain,
    rng: &mut R,
) -> Result<PaceResult, EmrtdError> {
    let algorithm = PaceAlgorithm::from_oid(oid)?;
    if algorithm.mapping == MappingType::CAM {
        error!("PACE with Chip Authentication Mapping is not supported: {oid}");
        return Err(EmrtdError::InvalidArgument(
            "PACE with Chip Authentication Mapping is not supported",
        ));
    }
    let (parameter_id, parameters) = domain.resolve()?;
    if parameters.key_agreement() != algorithm.key_agreement {
        error!(
            "{} needs {:?} domain parameters, found {:?}",
            oid_name(oid),
            algorithm.key_agreement,
            parameters.key_agreement()
        );
        return Err(EmrtdError::InvalidArgument(
            "Domain parameters do not match the PACE key agreement",
        ));
    }
    let cipher = algorithm.cipher;
    let key_reference = pace_key.key_reference();
    info!("Starting PACE with {} ({oid})", oid_name(oid));

    send_mse_set_at_pace(card, None, oid, key_reference.as_byte(), parameter_id)
        .map_err(rejected("MSE:Set AT"))?;

    // Encrypted nonce
    let content =
        send_general_authenticate(card, None, &[], false).map_err(rejected("encrypted nonce"))?;
    let z = expect_object(&content, 0x80, "encrypted nonce")?;
    if z.is_empty() || z.len() % cipher.block_size() != 0 {
        error!("Encrypted nonce of {} bytes is not block aligned", z.len());
        return Err(EmrtdError::MalformedInput(String::from(
            "encrypted nonce is not block aligned",
        )));
    }
    let k_pi = cipher.derive_key(&pace_key.key_seed()?, None, KeyType::Pace)?;
    let s = cbc_decrypt(cipher, &k_pi, &vec![0; cipher.block_size()], z)?;
    trace!("PACE nonce: {}", bytes2hex(&s));

    // Mapping
    let mapped_parameters = match algorithm.mapping {
        MappingType::GM => {
            let mapping_key_pair = parameters.generate_key_pair(rng)?;
            let terminal_mapping_key = parameters.encode_public_key(&mapping_key_pair.public_key)?;
            let content = send_general_authenticate(
                card,
                None,
                &encode_tlv(&[0x81], &terminal_mapping_key),
                false,
            )
            .map_err(rejected("map nonce"))?;
            let chip_mapping_key =
                parameters.decode_public_key(expect_object(&content, 0x82, "map nonce")?)?;
            parameters.map_generic(&s, &mapping_key_pair.private_key, &chip_mapping_key)?
        }
        MappingType::IM => {
            let mut t = vec![0; integrated_mapping_nonce_size(cipher)];
            rng.fill_bytes(&mut t);
            send_general_authenticate(card, None, &encode_tlv(&[0x81], &t), false)
                .map_err(rejected("map nonce"))?;
            parameters.map_integrated(&s, &t, cipher)?
        }
        MappingType::CAM => {
            return Err(EmrtdError::InvalidArgument(
                "PACE with Chip Authentication Mapping is not supported",
            ))
        }
    };

    // Key agreement
    let terminal_key_pair = mapped_parameters.generate_key_pair(rng)?;
    let content = send_general_authenticate(
        card,
        None,
        &encode_tlv(
            &[0x83],
            &mapped_parameters.encode_public_key(&terminal_key_pair.public_key)?,
        ),
        false,
    )
    .map_err(rejected("key agreement"))?;
    let chip_public_key =
        mapped_parameters.decode_public_key(expect_object(&content, 0x84, "key agreement")?)?;
    if chip_public_key == terminal_key_pair.public_key {
        error!("Chip returned the terminal's ephemeral public key");
        return Err(denied("chip ephemeral key equals the terminal's", None));
    }
    let shared_secret =
        mapped_parameters.shared_secret(&terminal_key_pair.private_key, &chip_public_key)?;
    let ks_enc = cipher.derive_key(&shared_secret, None, KeyType::Encryption)?;
    let ks_mac = cipher.derive_key(&shared_secret, None, KeyType::Mac)?;

    // Mutual authentication
    let terminal_token =
        authentication_token(&mapped_parameters, cipher, &ks_mac, oid, &chip_public_key)?;
    let content = send_general_authenticate(card, None, &encode_tlv(&[0x85], &terminal_token), true)
        .map_err(rejected("mutual authentication"))?;
    let chip_token = expect_object(&content, 0x86, "mutual authentication")?;
    let expected_token = authentication_token(
        &mapped_parameters,
        cipher,
        &ks_mac,
        oid,
        &terminal_key_pair.public_key,
    )?;
    if !constant_time_eq(chip_token, &expected_token) {
        error!("PACE authentication token of the chip is not correct");
        return Err(denied("authentication token mismatch", None));
    }
    let car1 = find_tlv(&content, 0x87)?.map(<[u8]>::to_vec);
    let car2 = find_tlv(&content, 0x88)?.map(<[u8]>::to_vec);

    info!("PACE established");
    Ok(PaceResult {
        algorithm,
        oid: String::from(oid),
        key_reference,
        parameters,
        mapped_parameters,
        terminal_key_pair,
        chip_public_key,
        car1,
        car2,
        wrapper: SecureMessagingWrapper::with_zero_ssc(ks_enc, ks_mac, cipher)?,
    })
}

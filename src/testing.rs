//! Test doubles shared by the unit tests: a scripted card, a deterministic
//! RNG and a simulated chip that implements the chip side of the protocols
//! with the primitives of this crate.

use alloc::{
    collections::{BTreeMap, VecDeque},
    format,
    string::String,
    vec,
    vec::Vec,
};
use hex_literal::hex;
use num_bigint_dig::BigUint;
use rand::{CryptoRng, RngCore};
use rsa::{traits::PublicKeyParts, RsaPublicKey};

use crate::{
    apdu::{
        Apdu, Response, CLA_SECURE_MESSAGING, INS_EXTERNAL_AUTHENTICATE, INS_GENERAL_AUTHENTICATE,
        INS_GET_CHALLENGE, INS_INTERNAL_AUTHENTICATE, INS_MSE, INS_PSO, INS_READ_BINARY,
        INS_READ_BINARY2, INS_SELECT, SW_END_OF_FILE, SW_FILE_NOT_FOUND, SW_NO_ERROR,
        SW_SECURITY_STATUS_NOT_SATISFIED, SW_SM_DATA_OBJECTS_INCORRECT, SW_SM_DATA_OBJECTS_MISSING,
        SW_WRONG_PARAMETERS,
    },
    asn1::{bytes_to_oid, encode_tlv, expect_tlv, find_tlv},
    bytes2hex,
    card::CardTransceiver,
    crypto::{
        cbc_decrypt, cbc_encrypt, compute_mac, padding_method_2, xor_slices, DigestAlgorithm,
        EncryptionAlgorithm, KeyType, MacAlgorithm,
    },
    ec::{ecdsa_sign, ecdsa_verify, EcCurve, EcPoint},
    key_agreement::{DomainParameters, KeyPair, PublicKey},
    lds::{LdsFile, EMRTD_AID},
    mrz::{BacKey, PaceKey},
    numeric::{i2os, os2i},
    oid::{ChipAuthAlgorithm, MappingType, PaceAlgorithm},
    pace::{authentication_token, NONCE_LENGTH},
    secure_messaging::SecureMessagingWrapper,
    terminal_auth::id_picc_from_bac,
    EmrtdError,
};

const SW_WRONG_LENGTH: [u8; 2] = [0x67, 0x00];
const SW_AUTHENTICATION_FAILED: [u8; 2] = [0x63, 0x00];
const SW_CONDITIONS_NOT_SATISFIED: [u8; 2] = [0x69, 0x85];
const SW_NO_CURRENT_EF: [u8; 2] = [0x69, 0x86];
const SW_WRONG_DATA: [u8; 2] = [0x6A, 0x80];
const SW_REFERENCE_NOT_FOUND: [u8; 2] = [0x6A, 0x88];
const SW_INS_NOT_SUPPORTED: [u8; 2] = [0x6D, 0x00];
const SW_UNKNOWN: [u8; 2] = [0x6F, 0x00];

/// Prints traces of the test that calls it first. Later calls are no-ops.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// A card that answers a fixed script of command/response pairs in order.
pub(crate) struct MockCard {
    exchanges: VecDeque<(Vec<u8>, Vec<u8>)>,
    open: bool,
}

impl MockCard {
    pub(crate) fn new(exchanges: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            exchanges: exchanges.into(),
            open: false,
        }
    }

    /// Whether every scripted command was sent.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.exchanges.is_empty()
    }
}

impl CardTransceiver for MockCard {
    fn open(&mut self) -> Result<(), EmrtdError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, EmrtdError> {
        match self.exchanges.pop_front() {
            Some((expected, response)) if expected == command => Ok(response),
            Some((expected, _)) => Err(EmrtdError::TransceiverError(format!(
                "expected command {}, got {}",
                bytes2hex(&expected),
                bytes2hex(command)
            ))),
            None => Err(EmrtdError::TransceiverError(format!(
                "unexpected command {}",
                bytes2hex(command)
            ))),
        }
    }

    fn get_atr(&mut self) -> Result<Vec<u8>, EmrtdError> {
        Ok(b"\x00\x01\x02\x03\x04\x05\x06\x07".to_vec())
    }
}

/// Returns its data in a cycle.
#[derive(Clone, Debug)]
pub(crate) struct MockRng {
    data: Vec<u8>,
    index: usize,
}

impl MockRng {
    pub(crate) fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            index: 0,
        }
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(&hex!(
            "781723860C06C226
             0B795240CB7049B01C19B33E32804F0B"
        ))
    }
}

impl CryptoRng for MockRng {}

impl RngCore for MockRng {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0; 4];
        self.fill_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0; 8];
        self.fill_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            *byte = self.data[self.index];
            self.index = (self.index + 1) % self.data.len();
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// RSA key with `p = 2^127 - 1`, `q = 2^89 - 1` and `e = 65537`: a 27 byte
/// modulus, just large enough for an ISO/IEC 9796-2 signature with SHA-1.
pub(crate) fn test_rsa_key() -> Result<(RsaPublicKey, BigUint), EmrtdError> {
    let n = BigUint::from_bytes_be(&hex!(
        "FFFFFFFFFFFFFFFFFFFFFF7FFFFFFFFE0000000000000000000001"
    ));
    let d = BigUint::from_bytes_be(&hex!(
        "802A7FD5802A7FD5802A7F5555AAAA535500AAFF5500AAFF5500AD"
    ));
    let public_key = RsaPublicKey::new(n, BigUint::from(65537_u32)).map_err(EmrtdError::RsaError)?;
    Ok((public_key, d))
}

/// The Terminal Authentication trust anchor of a [`SimulatedChip`] and the
/// key of the terminal certificate.
pub(crate) struct TerminalKey {
    pub(crate) curve: EcCurve,
    pub(crate) public_key: EcPoint,
    pub(crate) digest: DigestAlgorithm,
}

/// The Active Authentication private key of a [`SimulatedChip`].
pub(crate) enum ActiveAuthKey {
    Rsa {
        public_key: RsaPublicKey,
        private_exponent: BigUint,
    },
    Ec {
        curve: EcCurve,
        private_key: BigUint,
        digest: DigestAlgorithm,
    },
}

struct BacSecrets {
    k_enc: Vec<u8>,
    k_mac: Vec<u8>,
    id_picc: Vec<u8>,
}

enum PaceStep {
    Nonce,
    Mapping {
        nonce: Vec<u8>,
    },
    KeyAgreement {
        mapped: DomainParameters,
    },
    Token {
        mapped: DomainParameters,
        key_pair: KeyPair,
        terminal_key: PublicKey,
        ks_enc: Vec<u8>,
        ks_mac: Vec<u8>,
    },
}

struct PaceRun {
    oid: String,
    algorithm: PaceAlgorithm,
    parameters: DomainParameters,
    step: PaceStep,
}

struct TerminalAuthState {
    key: TerminalKey,
    /// References of keys the chip can verify certificates with.
    known_references: Vec<Vec<u8>>,
    trust_point: Vec<u8>,
    dst: Option<Vec<u8>>,
    last_chr: Option<Vec<u8>>,
    /// Ephemeral key and auxiliary data of MSE:Set AT.
    selected: Option<(Vec<u8>, Vec<u8>)>,
    authenticated: bool,
}

impl TerminalAuthState {
    fn reset(&mut self) {
        self.known_references = vec![self.trust_point.clone()];
        self.dst = None;
        self.last_chr = None;
        self.selected = None;
        self.authenticated = false;
    }
}

fn status(sw: [u8; 2]) -> Response {
    Response {
        data: Vec::new(),
        status: sw,
    }
}

fn success(data: Vec<u8>) -> Response {
    Response {
        data,
        status: SW_NO_ERROR,
    }
}

/// A contactless eMRTD chip in memory.
///
/// Plain commands end a secure messaging session; a protected command with
/// a wrong MAC ends it too and is answered in plain with 6988.
pub(crate) struct SimulatedChip {
    open: bool,
    rng: MockRng,
    files: BTreeMap<u16, Vec<u8>>,
    selected_file: Option<u16>,
    session: Option<SecureMessagingWrapper>,
    next_session: Option<SecureMessagingWrapper>,
    challenge: Option<Vec<u8>>,
    id_picc: Option<Vec<u8>>,
    bac: Option<BacSecrets>,
    pace_password: Option<PaceKey>,
    pace_parameters: Option<DomainParameters>,
    pace: Option<PaceRun>,
    chip_authentication: Option<(DomainParameters, BigUint)>,
    ca_oid: Option<String>,
    terminal_authentication: Option<TerminalAuthState>,
    active_authentication: Option<ActiveAuthKey>,
    commands: Vec<Apdu>,
}

impl SimulatedChip {
    /// A chip without files or keys. Its random numbers start with `rnd.ICC`
    /// and `K.ICC` of ICAO Doc 9303-11 Appendix D.3.
    pub(crate) fn new() -> Self {
        Self {
            open: false,
            rng: MockRng::new(&hex!(
                "4608F91988702212
                 0B4F80323EB3191CB04970CB4052790B"
            )),
            files: BTreeMap::new(),
            selected_file: None,
            session: None,
            next_session: None,
            challenge: None,
            id_picc: None,
            bac: None,
            pace_password: None,
            pace_parameters: None,
            pace: None,
            chip_authentication: None,
            ca_oid: None,
            terminal_authentication: None,
            active_authentication: None,
            commands: Vec::new(),
        }
    }

    pub(crate) fn with_bac(mut self, bac_key: &BacKey) -> Result<Self, EmrtdError> {
        let seed = bac_key.key_seed()?;
        self.bac = Some(BacSecrets {
            k_enc: EncryptionAlgorithm::DES3.derive_key(&seed, None, KeyType::Encryption)?,
            k_mac: EncryptionAlgorithm::DES3.derive_key(&seed, None, KeyType::Mac)?,
            id_picc: id_picc_from_bac(bac_key)?,
        });
        Ok(self)
    }

    pub(crate) fn with_pace(mut self, password: &PaceKey) -> Self {
        self.pace_password = Some(password.clone());
        self
    }

    /// Parameters used when MSE:Set AT names no standardized id.
    pub(crate) fn with_pace_parameters(mut self, parameters: DomainParameters) -> Self {
        self.pace_parameters = Some(parameters);
        self
    }

    pub(crate) fn with_file(mut self, fid: u16, content: Vec<u8>) -> Self {
        self.files.insert(fid, content);
        self
    }

    pub(crate) fn with_chip_authentication(
        mut self,
        parameters: DomainParameters,
        private_key: BigUint,
    ) -> Self {
        self.chip_authentication = Some((parameters, private_key));
        self
    }

    pub(crate) fn with_terminal_authentication(
        mut self,
        trust_point: &[u8],
        key: TerminalKey,
    ) -> Self {
        let mut state = TerminalAuthState {
            key,
            known_references: Vec::new(),
            trust_point: trust_point.to_vec(),
            dst: None,
            last_chr: None,
            selected: None,
            authenticated: false,
        };
        state.reset();
        self.terminal_authentication = Some(state);
        self
    }

    pub(crate) fn with_active_authentication(mut self, key: ActiveAuthKey) -> Self {
        self.active_authentication = Some(key);
        self
    }

    /// The chip's end of the current secure messaging session.
    pub(crate) fn session(&self) -> Option<&SecureMessagingWrapper> {
        self.session.as_ref()
    }

    /// Plain (unwrapped) commands received so far.
    pub(crate) fn commands(&self) -> &[Apdu] {
        &self.commands
    }

    pub(crate) fn is_terminal_authenticated(&self) -> bool {
        self.terminal_authentication
            .as_ref()
            .is_some_and(|ta| ta.authenticated)
    }

    fn start_session(&mut self, session: SecureMessagingWrapper, id_picc: Vec<u8>) {
        self.next_session = Some(session);
        self.id_picc = Some(id_picc);
        if let Some(ta) = self.terminal_authentication.as_mut() {
            ta.reset();
        }
    }

    fn is_access_granted(&self, protected: bool) -> bool {
        protected || (self.bac.is_none() && self.pace_password.is_none())
    }

    fn process(&mut self, apdu: &Apdu, protected: bool) -> Response {
        self.dispatch(apdu, protected)
            .unwrap_or_else(|_| status(SW_UNKNOWN))
    }

    fn dispatch(&mut self, apdu: &Apdu, protected: bool) -> Result<Response, EmrtdError> {
        let data = apdu.data.as_deref().unwrap_or_default();
        match apdu.ins {
            INS_SELECT => Ok(self.select(apdu.p1, data)),
            INS_READ_BINARY => {
                let offset = if apdu.p1 & 0x80 == 0x80 {
                    let sfi = apdu.p1 & 0x1F;
                    let fid = match sfi {
                        0x1C => LdsFile::CardAccess.fid(),
                        sfi => match LdsFile::from_sfi(sfi) {
                            Some(file) => file.fid(),
                            None => return Ok(status(SW_FILE_NOT_FOUND)),
                        },
                    };
                    if !self.files.contains_key(&fid) {
                        return Ok(status(SW_FILE_NOT_FOUND));
                    }
                    self.selected_file = Some(fid);
                    usize::from(apdu.p2)
                } else {
                    usize::from(u16::from_be_bytes([apdu.p1 & 0x7F, apdu.p2]))
                };
                Ok(self.read(offset, apdu.ne.unwrap_or(256), protected))
            }
            INS_READ_BINARY2 => {
                let Some(offset) = find_tlv(data, 0x54)? else {
                    return Ok(status(SW_WRONG_DATA));
                };
                let offset = offset.iter().fold(0_usize, |acc, &b| (acc << 8) | usize::from(b));
                // Leave room for the DO'53' header
                let ne = apdu.ne.unwrap_or(256).saturating_sub(4);
                let response = self.read(offset, ne, protected);
                if response.data.is_empty() {
                    return Ok(response);
                }
                Ok(Response {
                    data: encode_tlv(&[0x53], &response.data),
                    status: response.status,
                })
            }
            INS_GET_CHALLENGE => {
                let mut challenge = vec![0; apdu.ne.unwrap_or(8).min(8)];
                self.rng.fill_bytes(&mut challenge);
                self.challenge = Some(challenge.clone());
                Ok(success(challenge))
            }
            INS_EXTERNAL_AUTHENTICATE if protected => self.terminal_authenticate(data),
            INS_EXTERNAL_AUTHENTICATE => self.bac_mutual_authenticate(data),
            INS_MSE => self.manage_security_environment(apdu.p1, apdu.p2, data),
            INS_PSO if apdu.p2 == 0xBE => Ok(self.verify_certificate(data)),
            INS_GENERAL_AUTHENTICATE => {
                let Ok((content, _)) = expect_tlv(data, &[0x7C]) else {
                    return Ok(status(SW_WRONG_DATA));
                };
                if protected {
                    self.chip_authenticate(content)
                } else {
                    self.pace_step(content)
                }
            }
            INS_INTERNAL_AUTHENTICATE if self.is_access_granted(protected) => {
                self.internal_authenticate(data)
            }
            INS_INTERNAL_AUTHENTICATE => Ok(status(SW_SECURITY_STATUS_NOT_SATISFIED)),
            _ => Ok(status(SW_INS_NOT_SUPPORTED)),
        }
    }

    fn select(&mut self, p1: u8, data: &[u8]) -> Response {
        match (p1, data) {
            (0x04, aid) if aid == EMRTD_AID => {
                self.selected_file = None;
                status(SW_NO_ERROR)
            }
            (0x00 | 0x02, &[hi, lo]) if self.files.contains_key(&u16::from_be_bytes([hi, lo])) => {
                self.selected_file = Some(u16::from_be_bytes([hi, lo]));
                status(SW_NO_ERROR)
            }
            _ => status(SW_FILE_NOT_FOUND),
        }
    }

    fn read(&self, offset: usize, ne: usize, protected: bool) -> Response {
        let Some(fid) = self.selected_file else {
            return status(SW_NO_CURRENT_EF);
        };
        if fid != LdsFile::CardAccess.fid() && !self.is_access_granted(protected) {
            return status(SW_SECURITY_STATUS_NOT_SATISFIED);
        }
        let Some(content) = self.files.get(&fid) else {
            return status(SW_FILE_NOT_FOUND);
        };
        if offset >= content.len() {
            return status(SW_WRONG_PARAMETERS);
        }
        let end = content.len().min(offset + ne);
        Response {
            data: content[offset..end].to_vec(),
            status: if end - offset == ne {
                SW_NO_ERROR
            } else {
                SW_END_OF_FILE
            },
        }
    }

    fn bac_mutual_authenticate(&mut self, data: &[u8]) -> Result<Response, EmrtdError> {
        let (Some(bac), Some(rnd_icc)) = (&self.bac, self.challenge.take()) else {
            return Ok(status(SW_CONDITIONS_NOT_SATISFIED));
        };
        if data.len() != 40 {
            return Ok(status(SW_WRONG_LENGTH));
        }
        let alg = EncryptionAlgorithm::DES3;
        let (e_ifd, m_ifd) = data.split_at(32);
        if compute_mac(&bac.k_mac, &padding_method_2(e_ifd, 8)?, MacAlgorithm::DES)? != m_ifd {
            return Ok(status(SW_AUTHENTICATION_FAILED));
        }
        let s = cbc_decrypt(alg, &bac.k_enc, &[0; 8], e_ifd)?;
        if s[8..16] != rnd_icc[..] {
            return Ok(status(SW_AUTHENTICATION_FAILED));
        }
        let (rnd_ifd, k_ifd) = (&s[..8], &s[16..32]);
        let mut k_icc = [0; 16];
        self.rng.fill_bytes(&mut k_icc);

        let plaintext = [&rnd_icc[..], rnd_ifd, &k_icc].concat();
        let e_icc = cbc_encrypt(alg, &bac.k_enc, &[0; 8], &plaintext)?;
        let m_icc = compute_mac(&bac.k_mac, &padding_method_2(&e_icc, 8)?, MacAlgorithm::DES)?;

        let seed = xor_slices(k_ifd, &k_icc)?;
        let session = SecureMessagingWrapper::new(
            alg.derive_key(&seed, None, KeyType::Encryption)?,
            alg.derive_key(&seed, None, KeyType::Mac)?,
            alg,
            [&rnd_icc[4..], &rnd_ifd[4..]].concat(),
        )?;
        let id_picc = bac.id_picc.clone();
        self.start_session(session, id_picc);
        Ok(success([e_icc, m_icc].concat()))
    }

    fn manage_security_environment(
        &mut self,
        p1: u8,
        p2: u8,
        data: &[u8],
    ) -> Result<Response, EmrtdError> {
        match (p1, p2) {
            (0xC1, 0xA4) => self.set_at_pace(data),
            (0x41, 0xA4) => {
                let Some(oid) = find_tlv(data, 0x80)? else {
                    return Ok(status(SW_WRONG_DATA));
                };
                let oid = bytes_to_oid(oid)?;
                if self.chip_authentication.is_none()
                    || ChipAuthAlgorithm::from_oid(&oid).is_err()
                {
                    return Ok(status(SW_WRONG_DATA));
                }
                self.ca_oid = Some(oid);
                Ok(status(SW_NO_ERROR))
            }
            (0x41, 0xA6) => {
                let Some(key) = find_tlv(data, 0x91)? else {
                    return Ok(status(SW_WRONG_DATA));
                };
                self.agree_chip_authentication_key(key, EncryptionAlgorithm::DES3)?;
                Ok(status(SW_NO_ERROR))
            }
            (0x81, 0xB6) => {
                let car = find_tlv(data, 0x83)?.unwrap_or_default();
                let Some(ta) = self.terminal_authentication.as_mut() else {
                    return Ok(status(SW_REFERENCE_NOT_FOUND));
                };
                if !ta.known_references.iter().any(|known| known == car) {
                    return Ok(status(SW_REFERENCE_NOT_FOUND));
                }
                ta.dst = Some(car.to_vec());
                Ok(status(SW_NO_ERROR))
            }
            (0x81, 0xA4) => {
                let chr = find_tlv(data, 0x83)?;
                let auxiliary_data = find_tlv(data, 0x67)?.unwrap_or_default().to_vec();
                let ephemeral_key = find_tlv(data, 0x91)?.unwrap_or_default().to_vec();
                let Some(ta) = self.terminal_authentication.as_mut() else {
                    return Ok(status(SW_REFERENCE_NOT_FOUND));
                };
                if chr.is_none() || chr != ta.last_chr.as_deref() {
                    return Ok(status(SW_REFERENCE_NOT_FOUND));
                }
                ta.selected = Some((ephemeral_key, auxiliary_data));
                Ok(status(SW_NO_ERROR))
            }
            _ => Ok(status(SW_WRONG_PARAMETERS)),
        }
    }

    fn verify_certificate(&mut self, data: &[u8]) -> Response {
        let Some(ta) = self.terminal_authentication.as_mut() else {
            return status(SW_CONDITIONS_NOT_SATISFIED);
        };
        let Some(dst) = ta.dst.take() else {
            return status(SW_CONDITIONS_NOT_SATISFIED);
        };
        let Ok((body, rest)) = expect_tlv(data, &[0x7F, 0x4E]) else {
            return status(SW_WRONG_DATA);
        };
        let (Ok(Some(car)), Ok(Some(chr)), Ok(Some(_))) = (
            find_tlv(body, 0x42),
            find_tlv(body, 0x5F20),
            find_tlv(rest, 0x5F37),
        ) else {
            return status(SW_WRONG_DATA);
        };
        if car != dst {
            return status(SW_AUTHENTICATION_FAILED);
        }
        ta.known_references.push(chr.to_vec());
        ta.last_chr = Some(chr.to_vec());
        status(SW_NO_ERROR)
    }

    fn terminal_authenticate(&mut self, signature: &[u8]) -> Result<Response, EmrtdError> {
        let challenge = self.challenge.take();
        let Some(ta) = self.terminal_authentication.as_mut() else {
            return Ok(status(SW_CONDITIONS_NOT_SATISFIED));
        };
        let (Some((ephemeral_key, auxiliary_data)), Some(challenge), Some(id_picc)) =
            (ta.selected.take(), challenge, self.id_picc.as_ref())
        else {
            return Ok(status(SW_CONDITIONS_NOT_SATISFIED));
        };
        let signed = [&id_picc[..], &challenge, &ephemeral_key, &auxiliary_data].concat();
        let digest = ta.key.digest.hash(&signed)?;
        if ecdsa_verify(&ta.key.curve, &ta.key.public_key, &digest, signature).unwrap_or(false) {
            ta.authenticated = true;
            Ok(status(SW_NO_ERROR))
        } else {
            Ok(status(SW_AUTHENTICATION_FAILED))
        }
    }

    fn agree_chip_authentication_key(
        &mut self,
        terminal_key: &[u8],
        cipher: EncryptionAlgorithm,
    ) -> Result<(), EmrtdError> {
        let Some((parameters, private_key)) = &self.chip_authentication else {
            return Err(EmrtdError::InvalidArgument("no Chip Authentication key"));
        };
        let terminal_key = parameters.decode_public_key(terminal_key)?;
        let secret = parameters.shared_secret(private_key, &terminal_key)?;
        self.next_session = Some(SecureMessagingWrapper::with_zero_ssc(
            cipher.derive_key(&secret, None, KeyType::Encryption)?,
            cipher.derive_key(&secret, None, KeyType::Mac)?,
            cipher,
        )?);
        Ok(())
    }

    fn chip_authenticate(&mut self, content: &[u8]) -> Result<Response, EmrtdError> {
        let Some(oid) = self.ca_oid.take() else {
            return Ok(status(SW_CONDITIONS_NOT_SATISFIED));
        };
        let Some(key) = find_tlv(content, 0x80)? else {
            return Ok(status(SW_WRONG_DATA));
        };
        let cipher = ChipAuthAlgorithm::from_oid(&oid)?.cipher;
        self.agree_chip_authentication_key(key, cipher)?;
        Ok(success(encode_tlv(&[0x7C], &[])))
    }

    fn set_at_pace(&mut self, data: &[u8]) -> Result<Response, EmrtdError> {
        self.pace = None;
        let Some(password) = &self.pace_password else {
            return Ok(status(SW_REFERENCE_NOT_FOUND));
        };
        let (Some(oid), Some(&[key_reference])) = (find_tlv(data, 0x80)?, find_tlv(data, 0x83)?)
        else {
            return Ok(status(SW_WRONG_DATA));
        };
        let oid = bytes_to_oid(oid)?;
        let Ok(algorithm) = PaceAlgorithm::from_oid(&oid) else {
            return Ok(status(SW_WRONG_DATA));
        };
        if key_reference != password.key_reference().as_byte() {
            return Ok(status(SW_REFERENCE_NOT_FOUND));
        }
        let parameters = match (find_tlv(data, 0x84)?, &self.pace_parameters) {
            (Some(&[id]), _) => match DomainParameters::from_standardized_id(id) {
                Ok(parameters) => parameters,
                Err(_) => return Ok(status(SW_WRONG_DATA)),
            },
            (None, Some(parameters)) => parameters.clone(),
            _ => return Ok(status(SW_WRONG_DATA)),
        };
        self.pace = Some(PaceRun {
            oid,
            algorithm,
            parameters,
            step: PaceStep::Nonce,
        });
        Ok(status(SW_NO_ERROR))
    }

    fn pace_step(&mut self, content: &[u8]) -> Result<Response, EmrtdError> {
        let (Some(run), Some(password)) = (self.pace.take(), self.pace_password.as_ref()) else {
            return Ok(status(SW_CONDITIONS_NOT_SATISFIED));
        };
        let cipher = run.algorithm.cipher;
        let (step, data) = match run.step {
            PaceStep::Nonce => {
                let mut nonce = vec![0; NONCE_LENGTH];
                self.rng.fill_bytes(&mut nonce);
                let k_pi = cipher.derive_key(&password.key_seed()?, None, KeyType::Pace)?;
                let z = cbc_encrypt(cipher, &k_pi, &vec![0; cipher.block_size()], &nonce)?;
                (PaceStep::Mapping { nonce }, encode_tlv(&[0x80], &z))
            }
            PaceStep::Mapping { nonce } => {
                let Some(terminal_data) = find_tlv(content, 0x81)? else {
                    return Ok(status(SW_WRONG_DATA));
                };
                match run.algorithm.mapping {
                    MappingType::GM => {
                        let terminal_key = run.parameters.decode_public_key(terminal_data)?;
                        let key_pair = run.parameters.generate_key_pair(&mut self.rng)?;
                        let mapped =
                            run.parameters
                                .map_generic(&nonce, &key_pair.private_key, &terminal_key)?;
                        let chip_key = run.parameters.encode_public_key(&key_pair.public_key)?;
                        (PaceStep::KeyAgreement { mapped }, encode_tlv(&[0x82], &chip_key))
                    }
                    MappingType::IM => {
                        let mapped = run.parameters.map_integrated(&nonce, terminal_data, cipher)?;
                        (PaceStep::KeyAgreement { mapped }, Vec::new())
                    }
                    MappingType::CAM => return Ok(status(SW_WRONG_DATA)),
                }
            }
            PaceStep::KeyAgreement { mapped } => {
                let Some(terminal_data) = find_tlv(content, 0x83)? else {
                    return Ok(status(SW_WRONG_DATA));
                };
                let terminal_key = mapped.decode_public_key(terminal_data)?;
                let key_pair = mapped.generate_key_pair(&mut self.rng)?;
                let secret = mapped.shared_secret(&key_pair.private_key, &terminal_key)?;
                let chip_key = mapped.encode_public_key(&key_pair.public_key)?;
                (
                    PaceStep::Token {
                        ks_enc: cipher.derive_key(&secret, None, KeyType::Encryption)?,
                        ks_mac: cipher.derive_key(&secret, None, KeyType::Mac)?,
                        mapped,
                        key_pair,
                        terminal_key,
                    },
                    encode_tlv(&[0x84], &chip_key),
                )
            }
            PaceStep::Token {
                mapped,
                key_pair,
                terminal_key,
                ks_enc,
                ks_mac,
            } => {
                let expected =
                    authentication_token(&mapped, cipher, &ks_mac, &run.oid, &key_pair.public_key)?;
                if find_tlv(content, 0x85)? != Some(&expected[..]) {
                    return Ok(status(SW_AUTHENTICATION_FAILED));
                }
                let token =
                    authentication_token(&mapped, cipher, &ks_mac, &run.oid, &terminal_key)?;
                let id_picc = mapped.compressed(&key_pair.public_key)?;
                self.start_session(
                    SecureMessagingWrapper::with_zero_ssc(ks_enc, ks_mac, cipher)?,
                    id_picc,
                );
                return Ok(success(encode_tlv(&[0x7C], &encode_tlv(&[0x86], &token))));
            }
        };
        self.pace = Some(PaceRun { step, ..run });
        Ok(success(encode_tlv(&[0x7C], &data)))
    }

    fn internal_authenticate(&mut self, challenge: &[u8]) -> Result<Response, EmrtdError> {
        match &self.active_authentication {
            None => Ok(status(SW_INS_NOT_SUPPORTED)),
            Some(ActiveAuthKey::Rsa {
                public_key,
                private_exponent,
            }) => {
                let k = public_key.size();
                let mut m1 = vec![0; k - 2 - DigestAlgorithm::SHA1.output_size()];
                self.rng.fill_bytes(&mut m1);
                let digest = DigestAlgorithm::SHA1.hash(&[&m1[..], challenge].concat())?;
                let representative = [&[0x6A][..], &m1, &digest, &[0xBC]].concat();
                let signature = os2i(&representative).modpow(private_exponent, public_key.n());
                Ok(success(i2os(&signature, k)?))
            }
            Some(ActiveAuthKey::Ec {
                curve,
                private_key,
                digest,
            }) => {
                let digest = digest.hash(challenge)?;
                Ok(success(ecdsa_sign(curve, private_key, &digest, &mut self.rng)?))
            }
        }
    }
}

impl CardTransceiver for SimulatedChip {
    fn open(&mut self) -> Result<(), EmrtdError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.session = None;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, EmrtdError> {
        let Ok(apdu) = Apdu::from_bytes(command) else {
            return Ok(SW_WRONG_LENGTH.to_vec());
        };
        if apdu.cla & CLA_SECURE_MESSAGING != CLA_SECURE_MESSAGING {
            self.session = None;
            self.commands.push(apdu.clone());
            let response = self.process(&apdu, false);
            if let Some(session) = self.next_session.take() {
                self.session = Some(session);
            }
            return Ok(response.to_bytes());
        }

        let Some(mut session) = self.session.take() else {
            return Ok(SW_SM_DATA_OBJECTS_MISSING.to_vec());
        };
        let Ok(plain) = session.unwrap_command(&apdu) else {
            return Ok(SW_SM_DATA_OBJECTS_INCORRECT.to_vec());
        };
        self.commands.push(plain.clone());
        let response = self.process(&plain, true);
        let protected = session.wrap_response(&response)?;
        // A new session of Chip Authentication starts after this response
        self.session = Some(self.next_session.take().unwrap_or(session));
        Ok(protected.to_bytes())
    }

    fn get_atr(&mut self) -> Result<Vec<u8>, EmrtdError> {
        Ok(b"\x00\x01\x02\x03\x04\x05\x06\x07".to_vec())
    }
}

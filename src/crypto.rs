//! Block ciphers, MACs, digests, padding and the ICAO key derivation function.

use alloc::{format, vec::Vec};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use cmac::{Cmac, Mac};
use core::iter;
use sha1_checked::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tracing::error;

use crate::EmrtdError;

/// Purpose of a derived key, used as the counter of the KDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Counter 1, session encryption key.
    Encryption,
    /// Counter 2, session MAC key.
    Mac,
    /// Counter 3, PACE password key `K_π`.
    Pace,
}

impl KeyType {
    fn counter(self) -> [u8; 4] {
        match self {
            Self::Encryption => [0, 0, 0, 1],
            Self::Mac => [0, 0, 0, 2],
            Self::Pace => [0, 0, 0, 3],
        }
    }
}

/// Block cipher family, as named in protocol OIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    DESede,
    AES,
}

/// Concrete cipher with key length, fixing the MAC and the KDF digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    DES3,
    AES128,
    AES192,
    AES256,
}

/// MAC algorithm of a secure messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// ISO/IEC 9797-1 MAC algorithm 3 (retail MAC) with DES.
    DES,
    /// AES-CMAC truncated to 8 bytes.
    AESCMAC,
}

impl EncryptionAlgorithm {
    /// Resolves a cipher family and key length in bits.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` for combinations other than 3DES-112/128
    ///   and AES-128/192/256.
    pub fn from_key_length(cipher: CipherAlgorithm, key_length: usize) -> Result<Self, EmrtdError> {
        match (cipher, key_length) {
            (CipherAlgorithm::DESede, 112 | 128) => Ok(Self::DES3),
            (CipherAlgorithm::AES, 128) => Ok(Self::AES128),
            (CipherAlgorithm::AES, 192) => Ok(Self::AES192),
            (CipherAlgorithm::AES, 256) => Ok(Self::AES256),
            (cipher, key_length) => {
                error!("Unsupported cipher and key length combination: {cipher:?} {key_length}");
                Err(EmrtdError::InvalidArgument(
                    "Unsupported cipher and key length combination",
                ))
            }
        }
    }

    #[must_use]
    pub fn cipher(&self) -> CipherAlgorithm {
        match self {
            Self::DES3 => CipherAlgorithm::DESede,
            Self::AES128 | Self::AES192 | Self::AES256 => CipherAlgorithm::AES,
        }
    }

    /// Nominal key length in bits.
    #[must_use]
    pub fn key_length(&self) -> usize {
        match self {
            Self::DES3 | Self::AES128 => 128,
            Self::AES192 => 192,
            Self::AES256 => 256,
        }
    }

    /// Length in bytes of keys produced by [`derive_key`].
    #[must_use]
    pub fn key_size(&self) -> usize {
        match self {
            Self::DES3 | Self::AES192 => 24,
            Self::AES128 => 16,
            Self::AES256 => 32,
        }
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        match self {
            Self::DES3 => 8,
            Self::AES128 | Self::AES192 | Self::AES256 => 16,
        }
    }

    #[must_use]
    pub fn mac_algorithm(&self) -> MacAlgorithm {
        match self {
            Self::DES3 => MacAlgorithm::DES,
            Self::AES128 | Self::AES192 | Self::AES256 => MacAlgorithm::AESCMAC,
        }
    }

    /// Digest used by the KDF: SHA-1 up to 128 bit keys, SHA-256 above.
    #[must_use]
    pub fn kdf_digest(&self) -> DigestAlgorithm {
        match self {
            Self::DES3 | Self::AES128 => DigestAlgorithm::SHA1,
            Self::AES192 | Self::AES256 => DigestAlgorithm::SHA256,
        }
    }

    /// Derives a key of this algorithm, see [`derive_key`].
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if hashing fails.
    pub fn derive_key(
        &self,
        key_seed: &[u8],
        nonce: Option<&[u8]>,
        key_type: KeyType,
    ) -> Result<Vec<u8>, EmrtdError> {
        derive_key(key_seed, self.cipher(), self.key_length(), nonce, key_type)
    }
}

/// Hash functions used by the protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    SHA1,
    SHA224,
    SHA256,
    SHA384,
    SHA512,
}

impl DigestAlgorithm {
    /// Output length in bytes.
    #[must_use]
    pub fn output_size(&self) -> usize {
        match self {
            Self::SHA1 => 20,
            Self::SHA224 => 28,
            Self::SHA256 => 32,
            Self::SHA384 => 48,
            Self::SHA512 => 64,
        }
    }

    /// Hashes `data`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::CalculateHashError` if SHA-1 collision detection triggers.
    pub fn hash(&self, data: &[u8]) -> Result<Vec<u8>, EmrtdError> {
        match self {
            Self::SHA1 => {
                let hash_result = Sha1::try_digest(data);
                if hash_result.has_collision() {
                    error!("SHA1 hash calculation had collision");
                    return Err(EmrtdError::CalculateHashError(
                        "SHA1 hash calculation had collision",
                    ));
                }
                Ok(hash_result.hash().as_slice().to_vec())
            }
            Self::SHA224 => Ok(Sha224::digest(data).to_vec()),
            Self::SHA256 => Ok(Sha256::digest(data).to_vec()),
            Self::SHA384 => Ok(Sha384::digest(data).to_vec()),
            Self::SHA512 => Ok(Sha512::digest(data).to_vec()),
        }
    }
}

/// Derives a key from a key seed (ICAO Doc 9303-11 Section 9.7.1, BSI TR-03110-3 A.2.3).
///
/// `keydata = H(key_seed ‖ nonce ‖ counter)` with SHA-1 for 3DES and AES-128
/// and SHA-256 for AES-192/256. 3DES keys are `K1 ‖ K2 ‖ K1` with adjusted
/// parity, AES keys are the truncated digest.
///
/// For calculation examples see ICAO Doc 9303-11 Appendix D.1:
/// <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` for an unsupported cipher/key length combination.
pub fn derive_key(
    key_seed: &[u8],
    cipher: CipherAlgorithm,
    key_length: usize,
    nonce: Option<&[u8]>,
    key_type: KeyType,
) -> Result<Vec<u8>, EmrtdError> {
    let alg = EncryptionAlgorithm::from_key_length(cipher, key_length)?;

    let mut d = key_seed.to_vec();
    if let Some(nonce) = nonce {
        d.extend_from_slice(nonce);
    }
    d.extend_from_slice(&key_type.counter());

    let hash_bytes = alg.kdf_digest().hash(&d)?;
    match alg {
        EncryptionAlgorithm::DES3 => {
            let key_1_2 = des3_adjust_parity_bits(hash_bytes[..16].to_vec());
            Ok([&key_1_2[..], &key_1_2[..8]].concat())
        }
        EncryptionAlgorithm::AES128 => Ok(hash_bytes[..16].to_vec()),
        EncryptionAlgorithm::AES192 => Ok(hash_bytes[..24].to_vec()),
        EncryptionAlgorithm::AES256 => Ok(hash_bytes[..32].to_vec()),
    }
}

/// Encrypts data using the specified block cipher and mode.
///
/// # Errors
///
/// `EmrtdError` if key, IV or data sizes are wrong.
fn encrypt<CM>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, EmrtdError>
where
    CM: BlockEncryptMut + KeyIvInit,
{
    if key.len() != CM::key_size() {
        error!(
            "Wrong key size for cipher encryption, expected {}, found {}",
            CM::key_size(),
            key.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong key size for cipher encryption",
        ));
    }
    if iv.len() != CM::iv_size() {
        error!(
            "Wrong IV size for cipher encryption, expected {}, found {}",
            CM::iv_size(),
            iv.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong IV size for cipher encryption",
        ));
    }
    if data.len() % CM::block_size() != 0 {
        error!(
            "Wrong data size for cipher encryption, expected {}, found {}",
            CM::block_size(),
            data.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong data size for cipher encryption",
        ));
    }

    Ok(CM::new(key.into(), iv.into())
        .encrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data))
}

/// Encrypts data using the specified block cipher in Electronic Codebook (ECB) mode.
///
/// # Errors
///
/// `EmrtdError` if key or data sizes are wrong.
fn encrypt_ecb<CM>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, EmrtdError>
where
    CM: BlockEncryptMut + KeyInit,
{
    if key.len() != CM::key_size() {
        error!(
            "Wrong key size for cipher encryption, expected {}, found {}",
            CM::key_size(),
            key.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong key size for cipher encryption",
        ));
    }
    if data.len() % CM::block_size() != 0 {
        error!(
            "Wrong data size for cipher encryption, expected {}, found {}",
            CM::block_size(),
            data.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong data size for cipher encryption",
        ));
    }

    Ok(CM::new(key.into()).encrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data))
}

/// Decrypts data using the specified block cipher and mode.
///
/// # Errors
///
/// `EmrtdError` if key, IV or data sizes are wrong.
fn decrypt<CM>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, EmrtdError>
where
    CM: BlockDecryptMut + KeyIvInit,
{
    if key.len() != CM::key_size() {
        error!(
            "Wrong key size for cipher decryption, expected {}, found {}",
            CM::key_size(),
            key.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong key size for cipher decryption",
        ));
    }
    if iv.len() != CM::iv_size() {
        error!(
            "Wrong IV size for cipher decryption, expected {}, found {}",
            CM::iv_size(),
            iv.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong IV size for cipher decryption",
        ));
    }
    if data.len() % CM::block_size() != 0 {
        error!(
            "Wrong data size for cipher decryption, expected {}, found {}",
            CM::block_size(),
            data.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong data size for cipher decryption",
        ));
    }

    CM::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data)
        .map_err(EmrtdError::UnpadError)
}

/// Decrypts data using the specified block cipher in Electronic Codebook (ECB) mode.
///
/// # Errors
///
/// `EmrtdError` if key or data sizes are wrong.
fn decrypt_ecb<CM>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, EmrtdError>
where
    CM: BlockDecryptMut + KeyInit,
{
    if key.len() != CM::key_size() {
        error!(
            "Wrong key size for cipher decryption, expected {}, found {}",
            CM::key_size(),
            key.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong key size for cipher decryption",
        ));
    }
    if data.len() % CM::block_size() != 0 {
        error!(
            "Wrong data size for cipher decryption, expected {}, found {}",
            CM::block_size(),
            data.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Wrong data size for cipher decryption",
        ));
    }

    CM::new(key.into())
        .decrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data)
        .map_err(EmrtdError::UnpadError)
}

/// Encrypts block aligned data in CBC mode.
///
/// # Errors
///
/// `EmrtdError` if key, IV or data sizes do not fit `alg`.
pub fn cbc_encrypt(
    alg: EncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, EmrtdError> {
    match alg {
        EncryptionAlgorithm::DES3 => encrypt::<cbc::Encryptor<des::TdesEde3>>(key, iv, data),
        EncryptionAlgorithm::AES128 => encrypt::<cbc::Encryptor<aes::Aes128>>(key, iv, data),
        EncryptionAlgorithm::AES192 => encrypt::<cbc::Encryptor<aes::Aes192>>(key, iv, data),
        EncryptionAlgorithm::AES256 => encrypt::<cbc::Encryptor<aes::Aes256>>(key, iv, data),
    }
}

/// Decrypts block aligned data in CBC mode. Padding is not removed.
///
/// # Errors
///
/// `EmrtdError` if key, IV or data sizes do not fit `alg`.
pub fn cbc_decrypt(
    alg: EncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, EmrtdError> {
    match alg {
        EncryptionAlgorithm::DES3 => decrypt::<cbc::Decryptor<des::TdesEde3>>(key, iv, data),
        EncryptionAlgorithm::AES128 => decrypt::<cbc::Decryptor<aes::Aes128>>(key, iv, data),
        EncryptionAlgorithm::AES192 => decrypt::<cbc::Decryptor<aes::Aes192>>(key, iv, data),
        EncryptionAlgorithm::AES256 => decrypt::<cbc::Decryptor<aes::Aes256>>(key, iv, data),
    }
}

/// Encrypts block aligned data in ECB mode.
///
/// # Errors
///
/// `EmrtdError` if key or data sizes do not fit `alg`.
pub fn ecb_encrypt(
    alg: EncryptionAlgorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, EmrtdError> {
    match alg {
        EncryptionAlgorithm::DES3 => encrypt_ecb::<ecb::Encryptor<des::TdesEde3>>(key, data),
        EncryptionAlgorithm::AES128 => encrypt_ecb::<ecb::Encryptor<aes::Aes128>>(key, data),
        EncryptionAlgorithm::AES192 => encrypt_ecb::<ecb::Encryptor<aes::Aes192>>(key, data),
        EncryptionAlgorithm::AES256 => encrypt_ecb::<ecb::Encryptor<aes::Aes256>>(key, data),
    }
}

fn aes_cmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, EmrtdError> {
    let invalid_key = |_| {
        error!("Can not compute CMAC, invalid key length {}", key.len());
        EmrtdError::InvalidMacKeyError(16, key.len())
    };
    let tag = match key.len() {
        16 => {
            let mut mac = <Cmac<aes::Aes128> as Mac>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        24 => {
            let mut mac = <Cmac<aes::Aes192> as Mac>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        32 => {
            let mut mac = <Cmac<aes::Aes256> as Mac>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        len => {
            error!("Can not compute CMAC, invalid key length {len}");
            return Err(EmrtdError::InvalidMacKeyError(16, len));
        }
    };
    Ok(tag[..8].to_vec())
}

/// Computes a MAC of data using the given key and MAC algorithm.
///
/// For `DES` the data must already be padded to a multiple of 8 bytes and
/// only the first 16 key bytes (K1, K2) are used. For `AESCMAC` the 8 byte
/// truncated CMAC is returned.
///
/// # Errors
///
/// * `EmrtdError` if `key` or `data` length is wrong or cipher operation fails.
pub fn compute_mac(key: &[u8], data: &[u8], alg: MacAlgorithm) -> Result<Vec<u8>, EmrtdError> {
    match alg {
        MacAlgorithm::DES => {
            if key.len() != 16 && key.len() != 24 {
                error!("Can not compute MAC, MAC key is invalid.");
                return Err(EmrtdError::InvalidMacKeyError(16, key.len()));
            }

            if data.is_empty() || data.len() % 8 != 0 {
                error!("Can not compute MAC, data length is invalid.");
                return Err(EmrtdError::ParseDataError(format!(
                    "MAC calculation should be a multiple of 8, but found {}",
                    data.len()
                )));
            }

            let key1 = &key[..8];
            let key2 = &key[8..16];

            let mut h = encrypt_ecb::<ecb::Encryptor<des::Des>>(key1, &data[..8])?;

            for i in 1..(data.len() / 8) {
                h = encrypt_ecb::<ecb::Encryptor<des::Des>>(
                    key1,
                    &xor_slices(&h, &data[8 * i..8 * (i + 1)])?,
                )?;
            }

            let mac_x = encrypt_ecb::<ecb::Encryptor<des::Des>>(
                key1,
                &decrypt_ecb::<ecb::Decryptor<des::Des>>(key2, &h)?,
            )?;

            Ok(mac_x)
        }
        MacAlgorithm::AESCMAC => aes_cmac(key, data),
    }
}

/// XORs two byte slices and returns the result.
///
/// # Errors
///
/// * `EmrtdError` if input `a` and `b` have different lengths.
pub fn xor_slices(a: &[u8], b: &[u8]) -> Result<Vec<u8>, EmrtdError> {
    if a.len() == b.len() {
        let result: Vec<u8> = a.iter().zip(b.iter()).map(|(&x, &y)| x ^ y).collect();
        return Ok(result);
    }
    error!(
        "XORed slices must have the same length, found {}, {}",
        a.len(),
        b.len()
    );
    Err(EmrtdError::ParseDataError(format!(
        "XORed slices must have the same length, found {}, {}",
        a.len(),
        b.len()
    )))
}

/// Pads the input data using padding method 2.
///
/// <https://en.wikipedia.org/wiki/ISO/IEC_9797-1#Padding_method_2>
///
/// # Errors
///
/// * `EmrtdError` if `pad_to` is 0.
pub fn padding_method_2(data: &[u8], pad_to: usize) -> Result<Vec<u8>, EmrtdError> {
    if pad_to == 0 {
        error!("pad_to must be greater than 0, found {}", pad_to);
        return Err(EmrtdError::InvalidArgument("pad_to must be greater than 0"));
    }

    let mut data = data.to_vec();
    data.push(0x80);
    if data.len() % pad_to != 0 {
        let padding_len = pad_to - (data.len() % pad_to);
        data.extend(iter::repeat(0).take(padding_len));
    }
    Ok(data)
}

/// Removes the padding added by padding method 2.
///
/// Scans backwards over zero bytes; the first non-zero byte must be 0x80.
///
/// # Errors
///
/// * `EmrtdError::BadPadding` if no 0x80 marker terminates the data.
pub fn remove_padding(data: &[u8]) -> Result<&[u8], EmrtdError> {
    for (i, &b) in data.iter().enumerate().rev() {
        match b {
            0x00 => continue,
            0x80 => return Ok(&data[..i]),
            _ => break,
        }
    }
    error!("Padding method 2 marker not found");
    Err(EmrtdError::BadPadding)
}

/// Adjusts the parity bits of a 3DES key.
fn des3_adjust_parity_bits(mut key: Vec<u8>) -> Vec<u8> {
    for byte in &mut key {
        let mut bitmask = 1;
        let mut b = *byte;
        for _ in 0..8 {
            bitmask ^= b & 0x1;
            b >>= 1;
        }
        *byte ^= bitmask;
    }
    key
}

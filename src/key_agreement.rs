//! Domain parameters and the Diffie-Hellman style key agreements used by
//! PACE and Chip Authentication, including the PACE generator mappings.

use alloc::{format, string::String, vec, vec::Vec};
use core::fmt;
use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use tracing::{error, trace};

use crate::{
    bytes2hex,
    crypto::{cbc_encrypt, DigestAlgorithm, EncryptionAlgorithm},
    dh::DhGroup,
    ec::{EcCurve, EcPoint, NamedCurve},
    numeric::{i2os, mod_add, mod_inv_prime, mod_mul, mod_sub, os2i},
    EmrtdError,
};

/// Key agreement families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAgreementAlgorithm {
    DH,
    ECDH,
}

/// EC or DH domain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainParameters {
    Ec(EcCurve),
    Dh(DhGroup),
}

/// A public key over some [`DomainParameters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ec(EcPoint),
    Dh(BigUint),
}

/// An ephemeral key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: BigUint,
    pub public_key: PublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Constants of the pseudo-random function of the integrated mapping,
/// BSI TR-03110-3 Section A.3.5.2 / ICAO Doc 9303-11 Section 4.4.3.4.
const IM_C0_128: [u8; 16] = [
    0xa6, 0x68, 0x89, 0x2a, 0x7c, 0x41, 0xe3, 0xca, 0x73, 0x9f, 0x40, 0xb0, 0x57, 0xd8, 0x59, 0x04,
];
const IM_C1_128: [u8; 16] = [
    0xa4, 0xe1, 0x36, 0xac, 0x72, 0x5f, 0x73, 0x8b, 0x01, 0xc1, 0xf6, 0x02, 0x17, 0xc1, 0x88, 0xad,
];
const IM_C0_256: [u8; 32] = [
    0xd4, 0x63, 0xd6, 0x52, 0x34, 0x12, 0x4e, 0xf7, 0x89, 0x70, 0x54, 0x98, 0x6d, 0xca, 0x0a, 0x17,
    0x4e, 0x28, 0xdf, 0x75, 0x8c, 0xba, 0xa0, 0x3f, 0x24, 0x06, 0x16, 0x41, 0x4d, 0x5a, 0x16, 0x76,
];
const IM_C1_256: [u8; 32] = [
    0x54, 0xbd, 0x72, 0x55, 0xf0, 0xaa, 0xf8, 0x31, 0xbe, 0xc3, 0x42, 0x3f, 0xcf, 0x39, 0xd6, 0x9b,
    0x6c, 0xbf, 0x06, 0x66, 0x77, 0xd0, 0xfa, 0xae, 0x5a, 0xad, 0xd9, 0x9d, 0xf8, 0xe5, 0x35, 0x17,
];

impl DomainParameters {
    /// Resolves a standardized domain parameter id
    /// (ICAO Doc 9303-11 Section 9.5.1, BSI TR-03110-3 Table 4).
    ///
    /// # Errors
    ///
    /// * `EmrtdError::UnsupportedParameters` for reserved or unknown ids.
    pub fn from_standardized_id(id: u8) -> Result<Self, EmrtdError> {
        let params = match id {
            0 => Self::Dh(DhGroup::modp_1024_160()),
            1 => Self::Dh(DhGroup::modp_2048_224()),
            2 => Self::Dh(DhGroup::modp_2048_256()),
            8 => Self::Ec(NamedCurve::Secp192r1.curve()),
            9 => Self::Ec(NamedCurve::BrainpoolP192r1.curve()),
            10 => Self::Ec(NamedCurve::Secp224r1.curve()),
            11 => Self::Ec(NamedCurve::BrainpoolP224r1.curve()),
            12 => Self::Ec(NamedCurve::Secp256r1.curve()),
            13 => Self::Ec(NamedCurve::BrainpoolP256r1.curve()),
            14 => Self::Ec(NamedCurve::BrainpoolP320r1.curve()),
            15 => Self::Ec(NamedCurve::Secp384r1.curve()),
            16 => Self::Ec(NamedCurve::BrainpoolP384r1.curve()),
            17 => Self::Ec(NamedCurve::BrainpoolP512r1.curve()),
            18 => Self::Ec(NamedCurve::Secp521r1.curve()),
            _ => {
                error!("Unsupported standardized domain parameter id {id}");
                return Err(EmrtdError::UnsupportedParameters(format!(
                    "standardized domain parameter id {id}"
                )));
            }
        };
        Ok(params)
    }

    #[must_use]
    pub fn key_agreement(&self) -> KeyAgreementAlgorithm {
        match self {
            Self::Ec(_) => KeyAgreementAlgorithm::ECDH,
            Self::Dh(_) => KeyAgreementAlgorithm::DH,
        }
    }

    /// Length in bytes of a field element (and of the shared secret).
    #[must_use]
    pub fn field_size(&self) -> usize {
        match self {
            Self::Ec(curve) => curve.field_size(),
            Self::Dh(group) => group.field_size(),
        }
    }

    /// Generates an ephemeral key pair over these parameters.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the parameters are degenerate.
    pub fn generate_key_pair<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<KeyPair, EmrtdError> {
        match self {
            Self::Ec(curve) => {
                let private_key = crate::numeric::random_scalar(rng, &curve.n)?;
                let public_key = PublicKey::Ec(curve.multiply_generator(&private_key)?);
                Ok(KeyPair {
                    private_key,
                    public_key,
                })
            }
            Self::Dh(group) => {
                let (private_key, y) = group.generate_key_pair(rng)?;
                Ok(KeyPair {
                    private_key,
                    public_key: PublicKey::Dh(y),
                })
            }
        }
    }

    /// Derives the public key of a known private key.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the arithmetic fails.
    pub fn public_key_of(&self, private_key: &BigUint) -> Result<PublicKey, EmrtdError> {
        match self {
            Self::Ec(curve) => Ok(PublicKey::Ec(curve.multiply_generator(private_key)?)),
            Self::Dh(group) => Ok(PublicKey::Dh(group.exp(&group.g, private_key))),
        }
    }

    /// Public key encoding as used on the wire: `04 ‖ X ‖ Y` for ECDH, the
    /// fixed width value `y` for DH.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if the key does not belong to these parameters.
    pub fn encode_public_key(&self, key: &PublicKey) -> Result<Vec<u8>, EmrtdError> {
        match (self, key) {
            (Self::Ec(curve), PublicKey::Ec(point)) => curve.encode_point(point),
            (Self::Dh(group), PublicKey::Dh(y)) => group.encode_public_value(y),
            _ => {
                error!("Public key type does not match the domain parameters");
                Err(EmrtdError::InvalidArgument(
                    "Public key type does not match the domain parameters",
                ))
            }
        }
    }

    /// Decodes and validates a received public key.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedInput` if the key is invalid for these parameters.
    pub fn decode_public_key(&self, data: &[u8]) -> Result<PublicKey, EmrtdError> {
        match self {
            Self::Ec(curve) => {
                let point = curve.decode_point(data)?;
                curve.validate_public_point(&point)?;
                Ok(PublicKey::Ec(point))
            }
            Self::Dh(group) => Ok(PublicKey::Dh(group.decode_public_value(data)?)),
        }
    }

    /// Computes the shared secret: the x-coordinate of `k·P` for ECDH and
    /// `y^k mod p` for DH, both as fixed width octet strings.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the peer key is invalid or the result is degenerate.
    pub fn shared_secret(
        &self,
        private_key: &BigUint,
        peer: &PublicKey,
    ) -> Result<Vec<u8>, EmrtdError> {
        match (self, peer) {
            (Self::Ec(curve), PublicKey::Ec(point)) => {
                let shared = self.shared_point(curve, private_key, point)?;
                let x = shared.x().ok_or_else(degenerate_shared_secret)?;
                i2os(x, curve.field_size())
            }
            (Self::Dh(group), PublicKey::Dh(y)) => group.shared_secret(private_key, y),
            _ => {
                error!("Peer public key type does not match the domain parameters");
                Err(EmrtdError::InvalidArgument(
                    "Peer public key type does not match the domain parameters",
                ))
            }
        }
    }

    fn shared_point(
        &self,
        curve: &EcCurve,
        private_key: &BigUint,
        point: &EcPoint,
    ) -> Result<EcPoint, EmrtdError> {
        curve.validate_public_point(point)?;
        let shared = curve.multiply(point, private_key)?;
        if shared.is_infinity() {
            return Err(degenerate_shared_secret());
        }
        Ok(shared)
    }

    /// Compressed representation `Comp(PK)` of BSI TR-03110-3 Section A.2.2.3:
    /// the x-coordinate for ECDH and the SHA-1 digest of the encoded value for DH.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the key does not belong to these parameters.
    pub fn compressed(&self, key: &PublicKey) -> Result<Vec<u8>, EmrtdError> {
        match (self, key) {
            (Self::Ec(curve), PublicKey::Ec(point)) => {
                let x = point.x().ok_or(EmrtdError::InvalidArgument(
                    "Can not compress the point at infinity",
                ))?;
                i2os(x, curve.field_size())
            }
            (Self::Dh(_), PublicKey::Dh(_)) => {
                DigestAlgorithm::SHA1.hash(&self.encode_public_key(key)?)
            }
            _ => Err(EmrtdError::InvalidArgument(
                "Public key type does not match the domain parameters",
            )),
        }
    }

    /// PACE Generic Mapping, ICAO Doc 9303-11 Section 4.4.3.3.1.
    ///
    /// ECDH: `G' = s·G + H` with `H = SK_map·PK_map,peer`.
    /// DH: `g' = g^s · h mod p` with `h = PK_map,peer^SK_map mod p`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedInput` if the peer mapping key is invalid or the
    ///   mapped generator is degenerate.
    pub fn map_generic(
        &self,
        nonce: &[u8],
        mapping_private_key: &BigUint,
        peer_mapping_key: &PublicKey,
    ) -> Result<Self, EmrtdError> {
        let s = os2i(nonce);
        match (self, peer_mapping_key) {
            (Self::Ec(curve), PublicKey::Ec(point)) => {
                let h = self.shared_point(curve, mapping_private_key, point)?;
                let mapped = curve.add(&curve.multiply_generator(&s)?, &h)?;
                self.with_generator(PublicKey::Ec(mapped))
            }
            (Self::Dh(group), PublicKey::Dh(y)) => {
                group.validate_public_value(y)?;
                let h = group.exp(y, mapping_private_key);
                let mapped = group.mul(&group.exp(&group.g, &s), &h);
                self.with_generator(PublicKey::Dh(mapped))
            }
            _ => Err(EmrtdError::InvalidArgument(
                "Mapping key type does not match the domain parameters",
            )),
        }
    }

    /// PACE Integrated Mapping, ICAO Doc 9303-11 Section 4.4.3.4.
    ///
    /// `chip_nonce` is `s`, `terminal_nonce` is `t`, and `cipher` is the
    /// block cipher of the PACE protocol, which keys the pseudo-random
    /// function `R(s, t)`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if the nonce sizes do not fit the cipher.
    /// * `EmrtdError::UnsupportedParameters` for curves with `p ≢ 3 (mod 4)`.
    pub fn map_integrated(
        &self,
        chip_nonce: &[u8],
        terminal_nonce: &[u8],
        cipher: EncryptionAlgorithm,
    ) -> Result<Self, EmrtdError> {
        match self {
            Self::Ec(curve) => {
                let r = integrated_mapping_prf(chip_nonce, terminal_nonce, &curve.p, cipher)?;
                let point = point_encoding(curve, &r)?;
                self.with_generator(PublicKey::Ec(curve.multiply(&point, &curve.h)?))
            }
            Self::Dh(group) => {
                let q = group.q.as_ref().ok_or(EmrtdError::UnsupportedParameters(
                    String::from("integrated mapping needs the subgroup order"),
                ))?;
                let r = integrated_mapping_prf(chip_nonce, terminal_nonce, &group.p, cipher)?;
                let exponent = (&group.p - BigUint::one()) / q;
                self.with_generator(PublicKey::Dh(group.exp(&r, &exponent)))
            }
        }
    }

    /// Replaces the generator, rejecting degenerate results.
    fn with_generator(&self, generator: PublicKey) -> Result<Self, EmrtdError> {
        match (self, generator) {
            (Self::Ec(curve), PublicKey::Ec(g)) => {
                if g.is_infinity() || !curve.is_on_curve(&g) {
                    error!("Mapped generator is not a valid point");
                    return Err(EmrtdError::MalformedInput(String::from(
                        "mapped generator is the point at infinity",
                    )));
                }
                trace!("Mapped generator: {}", bytes2hex(&curve.encode_point(&g)?));
                Ok(Self::Ec(EcCurve { g, ..curve.clone() }))
            }
            (Self::Dh(group), PublicKey::Dh(g)) => {
                if g <= BigUint::one() || g >= &group.p - BigUint::one() {
                    error!("Mapped generator is degenerate");
                    return Err(EmrtdError::MalformedInput(String::from(
                        "mapped generator is degenerate",
                    )));
                }
                Ok(Self::Dh(DhGroup { g, ..group.clone() }))
            }
            _ => Err(EmrtdError::InvalidArgument(
                "Generator type does not match the domain parameters",
            )),
        }
    }
}

fn degenerate_shared_secret() -> EmrtdError {
    error!("Key agreement produced the point at infinity");
    EmrtdError::MalformedInput(String::from("shared secret is the point at infinity"))
}

/// Length of the terminal nonce `t` of the integrated mapping, which keys
/// the block cipher (two key 3DES for `DES3`).
#[must_use]
pub fn integrated_mapping_nonce_size(cipher: EncryptionAlgorithm) -> usize {
    match cipher {
        EncryptionAlgorithm::DES3 => 16,
        other => other.key_size(),
    }
}

/// Pseudo-random function `R_p(s, t)` of the integrated mapping.
pub(crate) fn integrated_mapping_prf(
    chip_nonce: &[u8],
    terminal_nonce: &[u8],
    p: &BigUint,
    cipher: EncryptionAlgorithm,
) -> Result<BigUint, EmrtdError> {
    let key_size = integrated_mapping_nonce_size(cipher);
    if terminal_nonce.len() != key_size || chip_nonce.len() % cipher.block_size() != 0 {
        error!(
            "Invalid nonce sizes for integrated mapping: s {} bytes, t {} bytes",
            chip_nonce.len(),
            terminal_nonce.len()
        );
        return Err(EmrtdError::InvalidArgument(
            "Invalid nonce sizes for integrated mapping",
        ));
    }
    let (c0, c1) = if key_size == 16 {
        (&IM_C0_128[..], &IM_C1_128[..])
    } else {
        (&IM_C0_256[..], &IM_C1_256[..])
    };
    let zero_iv = vec![0_u8; cipher.block_size()];
    let encrypt = |key: &[u8], data: &[u8]| -> Result<Vec<u8>, EmrtdError> {
        if cipher == EncryptionAlgorithm::DES3 {
            // two key 3DES
            let key = [key, &key[..8]].concat();
            cbc_encrypt(cipher, &key, &zero_iv, data)
        } else {
            cbc_encrypt(cipher, key, &zero_iv, data)
        }
    };

    let mut key = encrypt(terminal_nonce, chip_nonce)?;
    let mut output = Vec::new();
    let mut n = 0;
    while n * 8 * chip_nonce.len() < p.bits() + 64 {
        let round_key = key.get(..key_size).ok_or(EmrtdError::InvalidArgument(
            "Integrated mapping key shorter than the cipher key",
        ))?;
        let next_key = encrypt(round_key, c0)?;
        output.extend_from_slice(&encrypt(round_key, c1)?);
        key = next_key;
        n += 1;
    }
    Ok(os2i(&output) % p)
}

/// Point encoding `f_G` for curves with `p ≡ 3 (mod 4)` (simplified SWU),
/// ICAO Doc 9303-11 Section 4.4.3.4.3.
fn point_encoding(curve: &EcCurve, t: &BigUint) -> Result<EcPoint, EmrtdError> {
    let p = &curve.p;
    let one = BigUint::one();
    let four = BigUint::from(4_u32);
    if p % &four != BigUint::from(3_u32) {
        error!("Integrated mapping requires p = 3 mod 4");
        return Err(EmrtdError::UnsupportedParameters(String::from(
            "integrated mapping point encoding requires p = 3 mod 4",
        )));
    }
    if t.is_zero() {
        return Err(EmrtdError::MalformedInput(String::from(
            "integrated mapping produced a zero field element",
        )));
    }

    let a = &curve.a;
    let b = &curve.b;
    let alpha = mod_sub(&BigUint::zero(), &mod_mul(t, t, p), p);
    let alpha_sq = mod_mul(&alpha, &alpha, p);
    let alpha_sum = mod_add(&alpha, &alpha_sq, p);

    let denominator = mod_mul(a, &alpha_sum, p);
    let numerator = mod_mul(b, &mod_add(&one, &alpha_sum, p), p);
    let x2 = mod_sub(
        &BigUint::zero(),
        &mod_mul(&numerator, &mod_inv_prime(&denominator, p)?, p),
        p,
    );
    let x3 = mod_mul(&alpha, &x2, p);
    let h2 = mod_add(
        &mod_add(&mod_mul(&mod_mul(&x2, &x2, p), &x2, p), &mod_mul(a, &x2, p), p),
        b,
        p,
    );
    let u = mod_mul(&mod_mul(&mod_mul(t, t, p), t, p), &h2, p);
    let exponent = p - &one - (p + &one) / &four;
    let big_a = h2.modpow(&exponent, p);

    let point = if mod_mul(&mod_mul(&big_a, &big_a, p), &h2, p).is_one() {
        EcPoint::new(x2, mod_mul(&big_a, &h2, p))
    } else {
        EcPoint::new(x3, mod_mul(&big_a, &u, p))
    };
    if !curve.is_on_curve(&point) {
        error!("Integrated mapping point encoding left the curve");
        return Err(EmrtdError::MalformedInput(String::from(
            "integrated mapping point is not on the curve",
        )));
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRng;
    use hex_literal::hex;

    #[test]
    fn test_standardized_parameters() -> Result<(), EmrtdError> {
        assert_eq!(
            DomainParameters::from_standardized_id(13)?,
            DomainParameters::Ec(NamedCurve::BrainpoolP256r1.curve())
        );
        assert_eq!(
            DomainParameters::from_standardized_id(0)?.key_agreement(),
            KeyAgreementAlgorithm::DH
        );
        assert_eq!(DomainParameters::from_standardized_id(18)?.field_size(), 66);
        for id in [3, 7, 19, 31] {
            assert!(DomainParameters::from_standardized_id(id)
                .is_err_and(|e| matches!(e, EmrtdError::UnsupportedParameters(_))));
        }
        Ok(())
    }

    #[test]
    fn test_generic_mapping_ecdh() -> Result<(), EmrtdError> {
        // Example taken from https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf Appendix G.1
        let params = DomainParameters::from_standardized_id(13)?;
        let nonce = hex!("3F00C4D3 9D153F2B 2A214A07 8D899B22");
        let terminal_private = os2i(&hex!(
            "7F4EF07B 9EA82FD7 8AD689B3 8D0BC78C F21F249D 953BC46F 4C6E1925 9C010F99"
        ));
        let chip_private = os2i(&hex!(
            "498FF497 56F2DC15 87840041 839A8598 2BE7761D 14715FB0 91EFA7BC E9058560"
        ));
        let terminal_public = params.public_key_of(&terminal_private)?;
        let chip_public = params.public_key_of(&chip_private)?;
        assert_eq!(
            params.encode_public_key(&terminal_public)?,
            hex!(
                "04
                 7ACF3EFC 982EC455 65A4B155 129EFBC7 4650DCBF A6362D89 6FC70262 E0C2CC5E
                 544552DC B6725218 799115B5 5C9BAA6D 9F6BC3A9 618E70C2 5AF71777 A9C4922D"
            )
        );

        let mapped = params.map_generic(&nonce, &terminal_private, &chip_public)?;
        let DomainParameters::Ec(curve) = &mapped else {
            panic!("expected EC parameters");
        };
        assert_eq!(
            curve.encode_point(&curve.g)?,
            hex!(
                "04
                 8CED63C9 1426D4F0 EB1435E7 CB1D74A4 6723A0AF 21C89634 F65A9AE8 7A9265E2
                 8C879506 743F8611 AC33645C 5B985C80 B5F09A0B 83407C1B 6A4D857A E76FE522"
            )
        );
        // Both sides arrive at the same generator
        assert_eq!(
            params.map_generic(&nonce, &chip_private, &terminal_public)?,
            mapped
        );

        let terminal_ephemeral = os2i(&hex!(
            "A73FB703 AC1436A1 8E0CFA5A BB3F7BEC 7A070E7A 6788486B EE230C4A 22762595"
        ));
        let chip_ephemeral = os2i(&hex!(
            "107CF586 96EF6155 053340FD 633392BA 81909DF7 B9706F22 6F32086C 7AFF974A"
        ));
        let chip_ephemeral_public = mapped.public_key_of(&chip_ephemeral)?;
        assert_eq!(
            mapped.shared_secret(&terminal_ephemeral, &chip_ephemeral_public)?,
            hex!("28768D20 701247DA E81804C9 E780EDE5 82A9996D B4A31502 0B273319 7DB84925")
        );
        Ok(())
    }

    #[test]
    fn test_integrated_mapping_prf() -> Result<(), EmrtdError> {
        // Example taken from https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf Appendix H.1
        let curve = NamedCurve::BrainpoolP256r1.curve();
        let r = integrated_mapping_prf(
            &hex!("2923BE84 E16CD6AE 529049F1 F1BBE9EB"),
            &hex!("5DD4CBFC 96F5453B 130D890A 1CDBAE32"),
            &curve.p,
            EncryptionAlgorithm::AES128,
        )?;
        assert_eq!(
            r,
            os2i(&hex!(
                "A2F8FF2D F50E52C6 599F386A DCB595D2 29F6A167 ADE2BE5F 2C3296AD D5B7430E"
            ))
        );
        Ok(())
    }

    #[test]
    fn test_integrated_mapping_ecdh() -> Result<(), EmrtdError> {
        // Example taken from https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf Appendix H.1
        let params = DomainParameters::from_standardized_id(13)?;
        let mapped = params.map_integrated(
            &hex!("2923BE84 E16CD6AE 529049F1 F1BBE9EB"),
            &hex!("5DD4CBFC 96F5453B 130D890A 1CDBAE32"),
            EncryptionAlgorithm::AES128,
        )?;
        let DomainParameters::Ec(curve) = mapped else {
            panic!("expected EC parameters");
        };
        assert_eq!(
            curve.encode_point(&curve.g)?,
            hex!(
                "04
                 8E82D315 59ED0FDE 92A4D049 8ADD3C23 BABA94FB 77691E31 E90AEA77 FB17D427
                 4C1AE14B D0C3DBAC 0C871B7F 36081693 64437CA3 0AC243A0 89D3F266 C1E60FAD"
            )
        );
        Ok(())
    }

    #[test]
    fn test_integrated_mapping_rejects_bad_nonces() -> Result<(), EmrtdError> {
        let params = DomainParameters::from_standardized_id(13)?;
        assert!(params
            .map_integrated(&hex!("2923BE84"), &hex!("5DD4CBFC"), EncryptionAlgorithm::AES128)
            .is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_dh_agreement_and_generic_mapping() -> Result<(), EmrtdError> {
        let params = DomainParameters::from_standardized_id(0)?;
        let mut rng = MockRng::new(&hex!("00112233445566778899AABBCCDDEEFF0102030405"));
        let terminal = params.generate_key_pair(&mut rng)?;
        let chip = params.generate_key_pair(&mut rng)?;
        let nonce = hex!("3F00C4D3 9D153F2B 2A214A07 8D899B22");

        let terminal_mapped = params.map_generic(&nonce, &terminal.private_key, &chip.public_key)?;
        let chip_mapped = params.map_generic(&nonce, &chip.private_key, &terminal.public_key)?;
        assert_eq!(terminal_mapped, chip_mapped);

        let a = terminal_mapped.generate_key_pair(&mut rng)?;
        let b = terminal_mapped.generate_key_pair(&mut rng)?;
        assert_eq!(
            terminal_mapped.shared_secret(&a.private_key, &b.public_key)?,
            terminal_mapped.shared_secret(&b.private_key, &a.public_key)?
        );
        assert_eq!(terminal_mapped.compressed(&a.public_key)?.len(), 20);
        Ok(())
    }

    #[test]
    fn test_public_key_codec() -> Result<(), EmrtdError> {
        let params = DomainParameters::from_standardized_id(12)?;
        let mut rng = MockRng::default();
        let pair = params.generate_key_pair(&mut rng)?;
        let encoded = params.encode_public_key(&pair.public_key)?;
        assert_eq!(params.decode_public_key(&encoded)?, pair.public_key);
        assert_eq!(params.compressed(&pair.public_key)?, encoded[1..33]);
        assert!(params
            .encode_public_key(&PublicKey::Dh(BigUint::from(2_u32)))
            .is_err());
        assert!(params.decode_public_key(&hex!("04 0102")).is_err());
        Ok(())
    }
}

//! Finite field Diffie-Hellman over the MODP groups used by PACE and Chip Authentication.

use alloc::{string::String, vec::Vec};
use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use tracing::error;

use crate::{
    bytes2hex,
    ec::hex_constant,
    numeric::{byte_len, i2os, mod_mul, os2i, random_scalar},
    EmrtdError,
};

// RFC 5114 Section 2.1 to 2.3
const MODP_1024_160_P: &str = concat!(
    "B10B8F96A080E01DDE92DE5EAE5D54EC52C99FBCFB06A3C69A6A9DCA52D23B61",
    "6073E28675A23D189838EF1E2EE652C013ECB4AEA906112324975C3CD49B83BF",
    "ACCBDD7D90C4BD7098488E9C219A73724EFFD6FAE5644738FAA31A4FF55BCCC0",
    "A151AF5F0DC8B4BD45BF37DF365C1A65E68CFDA76D4DA708DF1FB2BC2E4A4371",
);
const MODP_1024_160_G: &str = concat!(
    "A4D1CBD5C3FD34126765A442EFB99905F8104DD258AC507FD6406CFF14266D31",
    "266FEA1E5C41564B777E690F5504F213160217B4B01B886A5E91547F9E2749F4",
    "D7FBD7D3B9A92EE1909D0D2263F80A76A6A24C087A091F531DBF0A0169B6A28A",
    "D662A4D18E73AFA32D779D5918D08BC8858F4DCEF97C2A24855E6EEB22B3B2E5",
);
const MODP_1024_160_Q: &str = "F518AA8781A8DF278ABA4E7D64B7CB9D49462353";
const MODP_2048_224_P: &str = concat!(
    "AD107E1E9123A9D0D660FAA79559C51FA20D64E5683B9FD1B54B1597B61D0A75",
    "E6FA141DF95A56DBAF9A3C407BA1DF15EB3D688A309C180E1DE6B85A1274A0A6",
    "6D3F8152AD6AC2129037C9EDEFDA4DF8D91E8FEF55B7394B7AD5B7D0B6C12207",
    "C9F98D11ED34DBF6C6BA0B2C8BBC27BE6A00E0A0B9C49708B3BF8A3170918836",
    "81286130BC8985DB1602E714415D9330278273C7DE31EFDC7310F7121FD5A074",
    "15987D9ADC0A486DCDF93ACC44328387315D75E198C641A480CD86A1B9E587E8",
    "BE60E69CC928B2B9C52172E413042E9B23F10B0E16E79763C9B53DCF4BA80A29",
    "E3FB73C16B8E75B97EF363E2FFA31F71CF9DE5384E71B81C0AC4DFFE0C10E64F",
);
const MODP_2048_224_G: &str = concat!(
    "AC4032EF4F2D9AE39DF30B5C8FFDAC506CDEBE7B89998CAF74866A08CFE4FFE3",
    "A6824A4E10B9A6F0DD921F01A70C4AFAAB739D7700C29F52C57DB17C620A8652",
    "BE5E9001A8D66AD7C17669101999024AF4D027275AC1348BB8A762D0521BC98A",
    "E247150422EA1ED409939D54DA7460CDB5F6C6B250717CBEF180EB34118E98D1",
    "19529A45D6F834566E3025E316A330EFBB77A86F0C1AB15B051AE3D428C8F8AC",
    "B70A8137150B8EEB10E183EDD19963DDD9E263E4770589EF6AA21E7F5F2FF381",
    "B539CCE3409D13CD566AFBB48D6C019181E1BCFE94B30269EDFE72FE9B6AA4BD",
    "7B5A0F1C71CFFF4C19C418E1F6EC017981BC087F2A7065B384B890D3191F2BFA",
);
const MODP_2048_224_Q: &str = "801C0D34C58D93FE997177101F80535A4738CEBCBF389A99B36371EB";
const MODP_2048_256_P: &str = concat!(
    "87A8E61DB4B6663CFFBBD19C651959998CEEF608660DD0F25D2CEED4435E3B00",
    "E00DF8F1D61957D4FAF7DF4561B2AA3016C3D91134096FAA3BF4296D830E9A7C",
    "209E0C6497517ABD5A8A9D306BCF67ED91F9E6725B4758C022E0B1EF4275BF7B",
    "6C5BFC11D45F9088B941F54EB1E59BB8BC39A0BF12307F5C4FDB70C581B23F76",
    "B63ACAE1CAA6B7902D52526735488A0EF13C6D9A51BFA4AB3AD8347796524D8E",
    "F6A167B5A41825D967E144E5140564251CCACB83E6B486F6B3CA3F7971506026",
    "C0B857F689962856DED4010ABD0BE621C3A3960A54E710C375F26375D7014103",
    "A4B54330C198AF126116D2276E11715F693877FAD7EF09CADB094AE91E1A1597",
);
const MODP_2048_256_G: &str = concat!(
    "3FB32C9B73134D0B2E77506660EDBD484CA7B18F21EF205407F4793A1A0BA125",
    "10DBC15077BE463FFF4FED4AAC0BB555BE3A6C1B0C6B47B1BC3773BF7E8C6F62",
    "901228F8C28CBB18A55AE31341000A650196F931C77A57F2DDF463E5E9EC144B",
    "777DE62AAAB8A8628AC376D282D6ED3864E67982428EBC831D14348F6F2F9193",
    "B5045AF2767164E1DFC967C1FB3F2E55A4BD1BFFE83B9C80D052B985D182EA0A",
    "DB2A3B7313D3FE14C8484B1E052588B9B7D2BBD2DF016199ECD06E1557CD0915",
    "B3353BBB64E0EC377FD028370DF92B52C7891428CDC67EB6184B523D1DB246C3",
    "2F63078490F00EF8D647D148D47954515E2327CFEF98C582664B4C0F6CC41659",
);
const MODP_2048_256_Q: &str = "8CF83642A709A097B447997640129DA299B1A47D1EB3750BA308B0FE64F5FBD3";

/// A prime field Diffie-Hellman group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    /// Prime modulus.
    pub p: BigUint,
    /// Generator.
    pub g: BigUint,
    /// Order of the subgroup generated by `g`, if known.
    pub q: Option<BigUint>,
}

impl DhGroup {
    /// Creates a group from explicit parameters.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if `g` is not in `[2, p - 2]`.
    pub fn new(p: BigUint, g: BigUint, q: Option<BigUint>) -> Result<Self, EmrtdError> {
        let two = BigUint::from(2_u32);
        if p <= BigUint::from(3_u32) || g < two || g > &p - &two {
            error!("Invalid Diffie-Hellman group parameters");
            return Err(EmrtdError::InvalidArgument(
                "Invalid Diffie-Hellman group parameters",
            ));
        }
        Ok(Self { p, g, q })
    }

    fn from_constants(p: &str, g: &str, q: &str) -> Self {
        Self {
            p: hex_constant(p),
            g: hex_constant(g),
            q: Some(hex_constant(q)),
        }
    }

    /// 1024-bit MODP group with 160-bit prime order subgroup.
    #[must_use]
    pub fn modp_1024_160() -> Self {
        Self::from_constants(MODP_1024_160_P, MODP_1024_160_G, MODP_1024_160_Q)
    }

    /// 2048-bit MODP group with 224-bit prime order subgroup.
    #[must_use]
    pub fn modp_2048_224() -> Self {
        Self::from_constants(MODP_2048_224_P, MODP_2048_224_G, MODP_2048_224_Q)
    }

    /// 2048-bit MODP group with 256-bit prime order subgroup.
    #[must_use]
    pub fn modp_2048_256() -> Self {
        Self::from_constants(MODP_2048_256_P, MODP_2048_256_G, MODP_2048_256_Q)
    }

    /// Length in bytes of a group element.
    #[must_use]
    pub fn field_size(&self) -> usize {
        byte_len(&self.p)
    }

    /// Exclusive upper bound for private exponents: `q`, or `p - 1` when the
    /// subgroup order is unknown.
    #[must_use]
    pub fn exponent_bound(&self) -> BigUint {
        self.q.clone().unwrap_or_else(|| &self.p - BigUint::one())
    }

    /// `base^exponent mod p`.
    #[must_use]
    pub fn exp(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        base.modpow(exponent, &self.p)
    }

    /// `a·b mod p`.
    #[must_use]
    pub fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        mod_mul(a, b, &self.p)
    }

    /// Draws a private exponent and returns it with its public value `g^x`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the group is degenerate.
    pub fn generate_key_pair<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<(BigUint, BigUint), EmrtdError> {
        let private = random_scalar(rng, &self.exponent_bound())?;
        let public = self.exp(&self.g, &private);
        Ok((private, public))
    }

    /// Checks that a received public value is in `[2, p - 2]` and, when `q`
    /// is known, in the subgroup of order `q`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedInput` if the value is invalid.
    pub fn validate_public_value(&self, y: &BigUint) -> Result<(), EmrtdError> {
        let one = BigUint::one();
        if *y <= one || *y >= &self.p - &one {
            error!("Diffie-Hellman public value out of range");
            return Err(EmrtdError::MalformedInput(String::from(
                "Diffie-Hellman public value out of range",
            )));
        }
        if let Some(q) = &self.q {
            if !self.exp(y, q).is_one() {
                error!("Diffie-Hellman public value is not in the prime order subgroup");
                return Err(EmrtdError::MalformedInput(String::from(
                    "Diffie-Hellman public value is not in the prime order subgroup",
                )));
            }
        }
        Ok(())
    }

    /// Fixed width big-endian encoding of a group element.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if `y` is not reduced modulo `p`.
    pub fn encode_public_value(&self, y: &BigUint) -> Result<Vec<u8>, EmrtdError> {
        i2os(y, self.field_size())
    }

    /// Decodes and validates a received public value.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedInput` if the value is empty or invalid.
    pub fn decode_public_value(&self, data: &[u8]) -> Result<BigUint, EmrtdError> {
        if data.is_empty() || data.len() > self.field_size() {
            error!("Invalid Diffie-Hellman public value: {}", bytes2hex(data));
            return Err(EmrtdError::MalformedInput(String::from(
                "Diffie-Hellman public value has an invalid length",
            )));
        }
        let y = os2i(data);
        self.validate_public_value(&y)?;
        Ok(y)
    }

    /// Computes `peer^private mod p` as a fixed width octet string.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the peer value is invalid or the result is degenerate.
    pub fn shared_secret(&self, private: &BigUint, peer: &BigUint) -> Result<Vec<u8>, EmrtdError> {
        self.validate_public_value(peer)?;
        let shared = self.exp(peer, private);
        if shared.is_zero() || shared.is_one() {
            error!("Diffie-Hellman shared secret is degenerate");
            return Err(EmrtdError::MalformedInput(String::from(
                "Diffie-Hellman shared secret is degenerate",
            )));
        }
        self.encode_public_value(&shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRng;
    use hex_literal::hex;

    #[test]
    fn test_standard_groups_generate_subgroup() {
        let group = DhGroup::modp_1024_160();
        let q = group.q.clone().expect("group has a subgroup order");
        assert!(group.exp(&group.g, &q).is_one());
        assert_eq!(group.field_size(), 128);
        assert_eq!(DhGroup::modp_2048_224().field_size(), 256);
        assert_eq!(DhGroup::modp_2048_256().field_size(), 256);
    }

    #[test]
    fn test_key_agreement_is_symmetric() -> Result<(), EmrtdError> {
        let group = DhGroup::modp_1024_160();
        let mut rng = MockRng::new(&hex!("0102030405060708090A0B0C0D0E0F1011121314151617"));
        let (x1, y1) = group.generate_key_pair(&mut rng)?;
        let (x2, y2) = group.generate_key_pair(&mut rng)?;
        assert_ne!(y1, y2);
        let s1 = group.shared_secret(&x1, &y2)?;
        let s2 = group.shared_secret(&x2, &y1)?;
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 128);
        Ok(())
    }

    #[test]
    fn test_public_value_validation() -> Result<(), EmrtdError> {
        let group = DhGroup::modp_1024_160();
        assert!(group.validate_public_value(&BigUint::one()).is_err());
        assert!(group.validate_public_value(&(&group.p - BigUint::one())).is_err());
        // 2 does not generate the subgroup of order q
        assert!(group.validate_public_value(&BigUint::from(2_u32)).is_err());
        assert!(group.decode_public_value(&[]).is_err());
        let encoded = group.encode_public_value(&group.g)?;
        assert_eq!(group.decode_public_value(&encoded)?, group.g);
        assert!(DhGroup::new(BigUint::from(23_u32), BigUint::one(), None).is_err());
        Ok(())
    }
}

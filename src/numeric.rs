//! Integer ⇄ octet string conversion and modular arithmetic helpers.

use alloc::{vec, vec::Vec};
use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use tracing::error;

use crate::EmrtdError;

/// Converts a non-negative integer to a big-endian octet string of exactly
/// `len` bytes (I2OS of BSI TR-03111).
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if `value` does not fit in `len` bytes.
///
/// # Examples
///
/// ```
/// use emrtd_access::{i2os, os2i};
/// use num_bigint_dig::BigUint;
///
/// let v = BigUint::from(0x0102_u32);
/// assert_eq!(i2os(&v, 4).unwrap(), vec![0, 0, 1, 2]);
/// assert_eq!(os2i(&[0, 0, 1, 2]), v);
/// ```
pub fn i2os(value: &BigUint, len: usize) -> Result<Vec<u8>, EmrtdError> {
    let bytes = strip_leading_zeroes(&value.to_bytes_be()).to_vec();
    if bytes.len() > len {
        error!(
            "Integer does not fit in {len} bytes, needs {}",
            bytes.len()
        );
        return Err(EmrtdError::InvalidArgument("Integer too large for octet string"));
    }
    let mut out = vec![0_u8; len - bytes.len()];
    out.extend_from_slice(&bytes);
    Ok(out)
}

/// Converts a big-endian octet string to a non-negative integer (OS2I).
#[must_use]
pub fn os2i(data: &[u8]) -> BigUint {
    BigUint::from_bytes_be(data)
}

/// Minimal-length encoding of a non-negative integer (zero encodes as one zero byte).
#[must_use]
pub fn i2os_minimal(value: &BigUint) -> Vec<u8> {
    let bytes = strip_leading_zeroes(&value.to_bytes_be()).to_vec();
    if bytes.is_empty() {
        vec![0]
    } else {
        bytes
    }
}

/// Removes leading zero bytes.
#[must_use]
pub fn strip_leading_zeroes(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|&b| b != 0).unwrap_or(data.len());
    &data[start..]
}

/// Number of bytes needed to hold any value smaller than `modulus`.
#[must_use]
pub(crate) fn byte_len(modulus: &BigUint) -> usize {
    modulus.bits().div_ceil(8)
}

pub(crate) fn mod_add(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a + b) % m
}

pub(crate) fn mod_sub(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    let a = a % m;
    let b = b % m;
    if a >= b {
        a - b
    } else {
        m - (b - a)
    }
}

pub(crate) fn mod_mul(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a * b) % m
}

/// Inverse modulo a prime, via Fermat's little theorem.
pub(crate) fn mod_inv_prime(a: &BigUint, p: &BigUint) -> Result<BigUint, EmrtdError> {
    let a = a % p;
    if a.is_zero() {
        error!("Zero has no modular inverse");
        return Err(EmrtdError::InvalidArgument("Zero has no modular inverse"));
    }
    let two = BigUint::from(2_u32);
    Ok(a.modpow(&(p - &two), p))
}

/// Draws a uniformly distributed integer in `[1, upper - 1]`.
///
/// Draws 64 extra bits before reduction to keep the bias negligible.
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if `upper` is smaller than 2.
pub(crate) fn random_scalar<R: RngCore + CryptoRng>(
    rng: &mut R,
    upper: &BigUint,
) -> Result<BigUint, EmrtdError> {
    let one = BigUint::one();
    if *upper <= one {
        error!("Upper bound for random scalar must be at least 2");
        return Err(EmrtdError::InvalidArgument("Upper bound for random scalar too small"));
    }
    let mut buf = vec![0_u8; byte_len(upper) + 8];
    rng.fill_bytes(&mut buf);
    let range = upper - &one;
    Ok(BigUint::from_bytes_be(&buf) % range + one)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRng;
    use hex_literal::hex;

    #[test]
    fn test_i2os_os2i_round_trip() -> Result<(), EmrtdError> {
        for (value, len) in [
            (&hex!("00")[..], 1),
            (&hex!("01")[..], 1),
            (&hex!("FF")[..], 4),
            (&hex!("0100")[..], 2),
            (&hex!("7E2D2A41C74EA0B38CD36F863939BFA8E9032AAD")[..], 32),
        ] {
            let v = os2i(value);
            assert_eq!(os2i(&i2os(&v, len)?), v);
            assert_eq!(i2os(&v, len)?.len(), len);
        }
        Ok(())
    }

    #[test]
    fn test_i2os_too_short() {
        let v = os2i(&hex!("010000"));
        assert!(i2os(&v, 2).is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
    }

    #[test]
    fn test_minimal_encoding() {
        assert_eq!(i2os_minimal(&os2i(&hex!("0000ABCD"))), hex!("ABCD"));
        assert_eq!(i2os_minimal(&BigUint::zero()), hex!("00"));
        assert_eq!(strip_leading_zeroes(&hex!("000080")), hex!("80"));
        assert_eq!(strip_leading_zeroes(&hex!("0000")), hex!(""));
    }

    #[test]
    fn test_modular_helpers() -> Result<(), EmrtdError> {
        let p = BigUint::from(23_u32);
        let a = BigUint::from(5_u32);
        let b = BigUint::from(9_u32);
        assert_eq!(mod_sub(&a, &b, &p), BigUint::from(19_u32));
        assert_eq!(mod_add(&b, &BigUint::from(20_u32), &p), BigUint::from(6_u32));
        let inv = mod_inv_prime(&a, &p)?;
        assert_eq!(mod_mul(&a, &inv, &p), BigUint::one());
        assert!(mod_inv_prime(&p, &p).is_err());
        Ok(())
    }

    #[test]
    fn test_random_scalar_range() -> Result<(), EmrtdError> {
        let mut rng = MockRng::default();
        let upper = BigUint::from(7_u32);
        for _ in 0..32 {
            let k = random_scalar(&mut rng, &upper)?;
            assert!(k >= BigUint::one() && k < upper);
        }
        assert!(random_scalar(&mut rng, &BigUint::one()).is_err());
        Ok(())
    }
}

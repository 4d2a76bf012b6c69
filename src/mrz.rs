//! Access keys and key seeds derived from the MRZ, CAN, PIN or PUK.

use alloc::{borrow::ToOwned, collections::BTreeMap, format, string::String, vec::Vec};
use core::fmt;
use tracing::error;

use crate::{crypto::DigestAlgorithm, EmrtdError};

const MRZ_ALPHABET: &str = "0123456789<ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Calculates a check digit for the given data using the MRZ weights 7, 3, 1.
///
/// For more details see ICAO Doc 9303-3 Section 4.9
/// <https://www.icao.int/publications/Documents/9303_p3_cons_en.pdf>
///
/// # Errors
///
/// * `EmrtdError` if an invalid character is given.
pub fn calculate_check_digit(data: &str) -> Result<char, EmrtdError> {
    #[rustfmt::skip]
    let values: BTreeMap<char, u32> = [
        ('0', 0), ('1', 1), ('2', 2), ('3', 3), ('4', 4), ('5', 5), ('6', 6), ('7', 7),
        ('8', 8), ('9', 9), ('<', 0), ('A', 10), ('B', 11), ('C', 12), ('D', 13), ('E', 14),
        ('F', 15), ('G', 16), ('H', 17), ('I', 18), ('J', 19), ('K', 20), ('L', 21), ('M', 22),
        ('N', 23), ('O', 24), ('P', 25), ('Q', 26), ('R', 27), ('S', 28), ('T', 29), ('U', 30),
        ('V', 31), ('W', 32), ('X', 33), ('Y', 34), ('Z', 35),
    ]
    .iter()
    .copied()
    .collect();

    let weights = [7, 3, 1];
    let mut total = 0;

    for (counter, value) in data.chars().enumerate() {
        if let Some(weighted_value) = values.get(&value).copied() {
            total += weights[counter % 3] * weighted_value;
        } else {
            error!("Can not calculate check digit for invalid character: `{value}`");
            return Err(EmrtdError::ParseMrzCharError(value));
        }
    }

    let check_digit =
        char::from_digit(total % 10, 10).expect("usize % 10 can not be greater than 10");
    Ok(check_digit)
}

fn validate_field(
    field_name: &'static str,
    value: &str,
    valid_len: impl Fn(usize) -> bool,
) -> Result<(), EmrtdError> {
    if !valid_len(value.len()) || value.chars().any(|c| !MRZ_ALPHABET.contains(c)) {
        error!(
            "MRZ field {field_name} has an invalid length or contains illegal characters, received {value}"
        );
        return Err(EmrtdError::ParseMrzFieldError(field_name, value.to_owned()));
    }
    Ok(())
}

/// Builds the MRZ information used for BAC and PACE with an MRZ password:
/// document number (filled to 9 characters with `<`), date of birth and
/// date of expiry, each followed by its check digit.
///
/// # Errors
///
/// * `EmrtdError` if a field has an invalid length or contains invalid characters.
///
/// # Example
///
/// ```
/// # use emrtd_access::EmrtdError;
/// #
/// # fn main() -> Result<(), EmrtdError> {
/// use emrtd_access::other_mrz;
/// let result = other_mrz("L898902C3", "740812", "120415")?;
/// assert_eq!(result, String::from("L898902C3674081221204159"));
/// #
/// #     Ok(())
/// # }
/// ```
pub fn other_mrz(doc_no: &str, birthdate: &str, expirydate: &str) -> Result<String, EmrtdError> {
    // Document numbers are up to 9 characters on TD3, 14 on TD2 and 22 on TD1 documents
    validate_field("Document number", doc_no, |len| (1..=22).contains(&len))?;
    validate_field("Birth date", birthdate, |len| len == 6)?;
    validate_field("Expiry date", expirydate, |len| len == 6)?;

    let formatted_mrz = format!(
        "{:<<9}{}{}{}{}{}",
        doc_no,
        calculate_check_digit(doc_no)?,
        birthdate,
        calculate_check_digit(birthdate)?,
        expirydate,
        calculate_check_digit(expirydate)?
    );

    Ok(formatted_mrz)
}

/// Computes the key seed from the MRZ information.
///
/// `H(MRZ information)`, truncated to 16 bytes when `truncate` is set (BAC).
///
/// # Errors
///
/// * `EmrtdError` if the MRZ fields are invalid or hashing fails.
pub fn compute_key_seed_from_mrz(
    document_number: &str,
    date_of_birth: &str,
    date_of_expiry: &str,
    digest: DigestAlgorithm,
    truncate: bool,
) -> Result<Vec<u8>, EmrtdError> {
    let mrz_information = other_mrz(document_number, date_of_birth, date_of_expiry)?;
    let mut seed = digest.hash(mrz_information.as_bytes())?;
    if truncate {
        seed.truncate(16);
    }
    Ok(seed)
}

/// Computes a key seed from a card access number.
///
/// # Errors
///
/// * `EmrtdError` if hashing fails.
pub fn compute_key_seed_from_can(
    can: &str,
    digest: DigestAlgorithm,
    truncate: bool,
) -> Result<Vec<u8>, EmrtdError> {
    let mut seed = digest.hash(can.as_bytes())?;
    if truncate {
        seed.truncate(16);
    }
    Ok(seed)
}

/// Password type selected with MSE:Set AT for PACE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceKeyReference {
    Mrz,
    Can,
    Pin,
    Puk,
}

impl PaceKeyReference {
    pub const NO_KEY: u8 = 0x00;

    /// Key reference byte sent in data object `83`.
    #[must_use]
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Mrz => 0x01,
            Self::Can => 0x02,
            Self::Pin => 0x03,
            Self::Puk => 0x04,
        }
    }
}

impl TryFrom<u8> for PaceKeyReference {
    type Error = EmrtdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Mrz),
            0x02 => Ok(Self::Can),
            0x03 => Ok(Self::Pin),
            0x04 => Ok(Self::Puk),
            _ => {
                error!("Unknown PACE key reference {value:02X}");
                Err(EmrtdError::InvalidArgument("Unknown PACE key reference"))
            }
        }
    }
}

/// MRZ based access key for BAC, also usable as a PACE password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacKey {
    document_number: String,
    date_of_birth: String,
    date_of_expiry: String,
}

impl BacKey {
    /// Creates a BAC key, dates are `YYMMDD`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::ParseMrzFieldError` if a field is malformed.
    pub fn new(
        document_number: &str,
        date_of_birth: &str,
        date_of_expiry: &str,
    ) -> Result<Self, EmrtdError> {
        // Validate now so that key derivation can not fail on the fields later
        other_mrz(document_number, date_of_birth, date_of_expiry)?;
        Ok(Self {
            document_number: document_number.to_owned(),
            date_of_birth: date_of_birth.to_owned(),
            date_of_expiry: date_of_expiry.to_owned(),
        })
    }

    /// The document number as given.
    #[must_use]
    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    /// The document number filled to 9 characters with `<`.
    #[must_use]
    pub fn padded_document_number(&self) -> String {
        format!("{:<<9}", self.document_number)
    }

    #[must_use]
    pub fn date_of_birth(&self) -> &str {
        &self.date_of_birth
    }

    #[must_use]
    pub fn date_of_expiry(&self) -> &str {
        &self.date_of_expiry
    }

    /// The MRZ information (fields with check digits).
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the fields are invalid.
    pub fn mrz_information(&self) -> Result<String, EmrtdError> {
        other_mrz(
            &self.document_number,
            &self.date_of_birth,
            &self.date_of_expiry,
        )
    }

    /// The 16 byte BAC key seed, `SHA-1(MRZ information)[..16]`.
    ///
    /// For calculation examples see ICAO Doc 9303-11 Appendix D.2
    /// <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if hashing fails.
    pub fn key_seed(&self) -> Result<Vec<u8>, EmrtdError> {
        compute_key_seed_from_mrz(
            &self.document_number,
            &self.date_of_birth,
            &self.date_of_expiry,
            DigestAlgorithm::SHA1,
            true,
        )
    }
}

/// PACE password together with its type.
#[derive(Clone, PartialEq, Eq)]
pub struct PaceKey {
    secret: Vec<u8>,
    key_reference: PaceKeyReference,
}

impl fmt::Debug for PaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaceKey")
            .field("key_reference", &self.key_reference)
            .finish_non_exhaustive()
    }
}

impl PaceKey {
    /// PACE with the MRZ information as password.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the MRZ fields are invalid.
    pub fn from_mrz(bac_key: &BacKey) -> Result<Self, EmrtdError> {
        Ok(Self {
            secret: bac_key.mrz_information()?.into_bytes(),
            key_reference: PaceKeyReference::Mrz,
        })
    }

    /// PACE with the card access number printed on the document.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::ParseMrzFieldError` if the CAN is not numeric.
    pub fn from_can(can: &str) -> Result<Self, EmrtdError> {
        Self::numeric_secret("CAN", can, PaceKeyReference::Can)
    }

    /// PACE with a PIN.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::ParseMrzFieldError` if the PIN is not numeric.
    pub fn from_pin(pin: &str) -> Result<Self, EmrtdError> {
        Self::numeric_secret("PIN", pin, PaceKeyReference::Pin)
    }

    /// PACE with a PUK.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::ParseMrzFieldError` if the PUK is not numeric.
    pub fn from_puk(puk: &str) -> Result<Self, EmrtdError> {
        Self::numeric_secret("PUK", puk, PaceKeyReference::Puk)
    }

    fn numeric_secret(
        field_name: &'static str,
        value: &str,
        key_reference: PaceKeyReference,
    ) -> Result<Self, EmrtdError> {
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            error!("PACE {field_name} must be a non-empty string of digits");
            return Err(EmrtdError::ParseMrzFieldError(field_name, String::from("<redacted>")));
        }
        Ok(Self {
            secret: value.as_bytes().to_vec(),
            key_reference,
        })
    }

    #[must_use]
    pub fn key_reference(&self) -> PaceKeyReference {
        self.key_reference
    }

    /// The PACE key seed: `SHA-1(MRZ information)` for MRZ passwords, the
    /// password bytes otherwise.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if hashing fails.
    pub fn key_seed(&self) -> Result<Vec<u8>, EmrtdError> {
        match self.key_reference {
            PaceKeyReference::Mrz => DigestAlgorithm::SHA1.hash(&self.secret),
            PaceKeyReference::Can | PaceKeyReference::Pin | PaceKeyReference::Puk => {
                Ok(self.secret.clone())
            }
        }
    }
}

/// Any key that can open an access control protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessKey {
    Bac(BacKey),
    Pace(PaceKey),
}

impl AccessKey {
    /// The PACE view of this key, a BAC key becomes an MRZ password.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the MRZ fields are invalid.
    pub fn to_pace_key(&self) -> Result<PaceKey, EmrtdError> {
        match self {
            Self::Bac(bac_key) => PaceKey::from_mrz(bac_key),
            Self::Pace(pace_key) => Ok(pace_key.clone()),
        }
    }
}

impl From<BacKey> for AccessKey {
    fn from(value: BacKey) -> Self {
        Self::Bac(value)
    }
}

impl From<PaceKey> for AccessKey {
    fn from(value: PaceKey) -> Self {
        Self::Pace(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_calculate_check_digit_valid_data() -> Result<(), EmrtdError> {
        // Examples taken from https://www.icao.int/publications/Documents/9303_p3_cons_en.pdf Appendix A
        assert_eq!(calculate_check_digit("520727")?, '3');
        assert_eq!(calculate_check_digit("AB2134<<<")?, '5');
        assert_eq!(calculate_check_digit("HA672242<658022549601086<<<<<<<<<<<<<<0")?, '8');
        assert_eq!(calculate_check_digit("D23145890734")?, '9');
        assert_eq!(calculate_check_digit("")?, '0');
        Ok(())
    }

    #[test]
    fn test_calculate_check_digit_invalid_character() {
        let result = calculate_check_digit("a");
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::ParseMrzCharError('a'))));
    }

    #[test]
    fn test_other_mrz_valid_input() -> Result<(), EmrtdError> {
        assert_eq!(
            other_mrz("L898902C", "690806", "940623")?,
            "L898902C<369080619406236"
        );
        assert_eq!(
            other_mrz("123456", "710121", "310309")?,
            "123456<<<571012163103094"
        );
        // Long TD1 document numbers are not cut
        assert_eq!(
            &other_mrz("D23145890734", "340712", "950712")?[..13],
            "D231458907349"
        );
        Ok(())
    }

    #[test]
    fn test_other_mrz_invalid_input() {
        let result = other_mrz("L898902C<", "6908061", "940623");
        assert!(
            result.is_err_and(|e| matches!(e, EmrtdError::ParseMrzFieldError("Birth date", _)))
        );
        let result = other_mrz("l898902c", "690806", "940623");
        assert!(result
            .is_err_and(|e| matches!(e, EmrtdError::ParseMrzFieldError("Document number", _))));
        let result = other_mrz("L898902C", "690806", "94062");
        assert!(
            result.is_err_and(|e| matches!(e, EmrtdError::ParseMrzFieldError("Expiry date", _)))
        );
    }

    #[test]
    fn test_bac_key_seed() -> Result<(), EmrtdError> {
        // Example taken from https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf Appendix D.2
        let bac_key = BacKey::new("L898902C", "690806", "940623")?;
        assert_eq!(bac_key.key_seed()?, hex!("239AB9CB282DAF66231DC5A4DF6BFBAE"));
        assert_eq!(bac_key.document_number(), "L898902C");
        assert_eq!(bac_key.padded_document_number(), "L898902C<");

        let bac_key = BacKey::new("123456", "710121", "310309")?;
        assert_eq!(bac_key.padded_document_number(), "123456<<<");
        assert_eq!(bac_key.document_number(), "123456");
        assert_eq!(bac_key.key_seed()?, hex!("025A8715F681A8E3E45FF5E58C4C6D18"));
        assert_eq!(bac_key.key_seed()?, bac_key.key_seed()?);
        Ok(())
    }

    #[test]
    fn test_pace_key_seeds() -> Result<(), EmrtdError> {
        let bac_key = BacKey::new("T22000129", "640812", "101031")?;
        let pace_key = AccessKey::from(bac_key).to_pace_key()?;
        assert_eq!(pace_key.key_reference(), PaceKeyReference::Mrz);
        assert_eq!(
            pace_key.key_seed()?,
            DigestAlgorithm::SHA1.hash(b"T22000129364081251010318")?
        );

        let can_key = PaceKey::from_can("123456")?;
        assert_eq!(can_key.key_reference().as_byte(), 0x02);
        assert_eq!(can_key.key_seed()?, b"123456");
        assert_eq!(
            compute_key_seed_from_can("123456", DigestAlgorithm::SHA1, true)?.len(),
            16
        );
        assert!(PaceKey::from_pin("12a4").is_err());
        assert!(format!("{can_key:?}").find("123456").is_none());
        Ok(())
    }

    #[test]
    fn test_key_reference_bytes() -> Result<(), EmrtdError> {
        for byte in 1..=4 {
            assert_eq!(PaceKeyReference::try_from(byte)?.as_byte(), byte);
        }
        assert!(PaceKeyReference::try_from(PaceKeyReference::NO_KEY).is_err());
        Ok(())
    }
}

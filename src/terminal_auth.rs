//! Terminal Authentication, BSI TR-03110-1 Section 3.5 and ICAO Doc 9303-11 Section 7.1.
//!
//! The terminal proves its authorization by a chain of card verifiable
//! certificates and a challenge-response signature. Certificates are handled
//! as opaque values: parsing them is left to the caller.

use alloc::{string::String, vec::Vec};
use num_bigint_dig::BigUint;
use rand::{CryptoRng, RngCore};
use tracing::{error, info, trace};

use crate::{
    bytes2hex,
    card::CardTransceiver,
    crypto::DigestAlgorithm,
    ec::{ecdsa_sign, EcCurve},
    mrz::BacKey,
    secure_messaging::SecureMessagingWrapper,
    sender::{
        send_external_authenticate, send_get_challenge, send_mse_set_at_ta, send_mse_set_dst,
        send_pso_verify_certificate,
    },
    EmrtdError,
};

/// A card verifiable certificate, split into the parts the chip needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvCertificate {
    /// Certification authority reference, the key that verifies this certificate.
    pub car: Vec<u8>,
    /// Certificate holder reference.
    pub chr: Vec<u8>,
    /// The certificate body `7F4E`, tag and length included.
    pub body: Vec<u8>,
    /// The signature value, the content of `5F37`.
    pub signature: Vec<u8>,
}

/// Produces the Terminal Authentication signature with the private key of
/// the innermost certificate.
pub trait TerminalSigner {
    /// Signs `data` with the signature algorithm of the terminal certificate.
    ///
    /// # Errors
    ///
    /// Signer specific failure.
    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, EmrtdError>;
}

/// An in-memory ECDSA terminal key, signing with plain `r ‖ s` signatures.
pub struct EcdsaTerminalSigner<R> {
    curve: EcCurve,
    private_key: BigUint,
    digest: DigestAlgorithm,
    rng: R,
}

impl<R: RngCore + CryptoRng> EcdsaTerminalSigner<R> {
    pub fn new(curve: EcCurve, private_key: BigUint, digest: DigestAlgorithm, rng: R) -> Self {
        Self {
            curve,
            private_key,
            digest,
            rng,
        }
    }
}

impl<R: RngCore + CryptoRng> TerminalSigner for EcdsaTerminalSigner<R> {
    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, EmrtdError> {
        let digest = self.digest.hash(data)?;
        ecdsa_sign(&self.curve, &self.private_key, &digest, &mut self.rng)
    }
}

/// Outcome of a successful Terminal Authentication run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalAuthResult {
    /// Holder reference of the terminal certificate.
    pub chr: Vec<u8>,
    /// `r_PICC`, the chip challenge that was signed.
    pub challenge: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Chip identifier `ID_PICC` after BAC: the document number with its check
/// digit, as printed in the MRZ.
///
/// # Errors
///
/// * `EmrtdError` if the MRZ fields of `bac_key` are invalid.
pub fn id_picc_from_bac(bac_key: &BacKey) -> Result<Vec<u8>, EmrtdError> {
    let mrz_information = bac_key.mrz_information()?;
    let document_number_length = bac_key.padded_document_number().len() + 1;
    Ok(mrz_information.as_bytes()[..document_number_length].to_vec())
}

fn rejected(step: &'static str) -> impl Fn(EmrtdError) -> EmrtdError {
    move |err| match err {
        EmrtdError::RecvApduError(sw1, sw2) => EmrtdError::TerminalAuthDenied {
            reason: String::from(step),
            status: Some([sw1, sw2]),
        },
        err => err,
    }
}

/// Runs Terminal Authentication inside the current session.
///
/// `certificates` are sent in the given order, each verified by the key
/// named by its CAR; the last one is the terminal certificate whose key
/// `signer` holds. The signed data is
/// `id_picc ‖ r_PICC ‖ ephemeral_key ‖ auxiliary_data`, where
/// `ephemeral_key` is `Comp(PK_PCD)` of the Chip Authentication key pair and
/// `id_picc` comes from [`id_picc_from_bac`] or
/// [`crate::pace::PaceResult::id_picc`].
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if `certificates` is empty.
/// * `EmrtdError::TerminalAuthDenied` if the chip rejects any step.
/// * `EmrtdError` on transport, signer or secure messaging failures.
pub fn do_ta<C: CardTransceiver + ?Sized, S: TerminalSigner + ?Sized>(
    card: &mut C,
    wrapper: &mut SecureMessagingWrapper,
    certificates: &[CvCertificate],
    signer: &mut S,
    id_picc: &[u8],
    ephemeral_key: &[u8],
    auxiliary_data: Option<&[u8]>,
) -> Result<TerminalAuthResult, EmrtdError> {
    let Some(terminal_certificate) = certificates.last() else {
        error!("Terminal Authentication needs at least the terminal certificate");
        return Err(EmrtdError::InvalidArgument(
            "Certificate chain for Terminal Authentication is empty",
        ));
    };
    info!("Starting Terminal Authentication");

    for certificate in certificates {
        trace!(
            "Verifying certificate {} issued by {}",
            String::from_utf8_lossy(&certificate.chr),
            String::from_utf8_lossy(&certificate.car)
        );
        send_mse_set_dst(card, Some(&mut *wrapper), &certificate.car)
            .map_err(rejected("MSE:Set DST"))?;
        send_pso_verify_certificate(
            card,
            Some(&mut *wrapper),
            &certificate.body,
            &certificate.signature,
        )
        .map_err(rejected("PSO:Verify Certificate"))?;
    }

    send_mse_set_at_ta(
        card,
        Some(&mut *wrapper),
        &terminal_certificate.chr,
        auxiliary_data,
        Some(ephemeral_key),
    )
    .map_err(rejected("MSE:Set AT"))?;
    let challenge =
        send_get_challenge(card, Some(&mut *wrapper)).map_err(rejected("Get Challenge"))?;
    trace!("Chip challenge: {}", bytes2hex(&challenge));

    let data = [
        id_picc,
        &challenge[..],
        ephemeral_key,
        auxiliary_data.unwrap_or_default(),
    ]
    .concat();
    let signature = signer.sign(&data)?;
    send_external_authenticate(card, Some(wrapper), &signature)
        .map_err(rejected("External Authenticate"))?;

    info!("Terminal Authentication succeeded");
    Ok(TerminalAuthResult {
        chr: terminal_certificate.chr.clone(),
        challenge,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        asn1::encode_tlv,
        ec::NamedCurve,
        testing::{MockCard, MockRng, SimulatedChip, TerminalKey},
    };
    use hex_literal::hex;

    fn certificate(car: &[u8], chr: &[u8]) -> CvCertificate {
        let body = encode_tlv(
            &[0x7F, 0x4E],
            &[encode_tlv(&[0x42], car), encode_tlv(&[0x5F, 0x20], chr)].concat(),
        );
        CvCertificate {
            car: car.to_vec(),
            chr: chr.to_vec(),
            body,
            signature: vec![0xA5; 64],
        }
    }

    fn chain() -> Vec<CvCertificate> {
        vec![
            certificate(b"DECVCA00001", b"DEDVTA00001"),
            certificate(b"DEDVTA00001", b"DEIS0000001"),
        ]
    }

    #[test]
    fn test_id_picc_from_bac() -> Result<(), EmrtdError> {
        let bac_key = BacKey::new("L898902C", "690806", "940623")?;
        assert_eq!(id_picc_from_bac(&bac_key)?, b"L898902C<3");
        Ok(())
    }

    #[test]
    fn test_ta_against_simulated_chip() -> Result<(), EmrtdError> {
        let curve = NamedCurve::BrainpoolP256r1.curve();
        let terminal_private_key = BigUint::from(0xC0FF_EE00_u32);
        let terminal_public_key = curve.multiply_generator(&terminal_private_key)?;
        let bac_key = BacKey::new("L898902C", "690806", "940623")?;
        let id_picc = id_picc_from_bac(&bac_key)?;
        let mut chip = SimulatedChip::new().with_bac(&bac_key)?.with_terminal_authentication(
            b"DECVCA00001",
            TerminalKey {
                curve: curve.clone(),
                public_key: terminal_public_key,
                digest: DigestAlgorithm::SHA256,
            },
        );
        let mut wrapper = crate::bac::do_bac(&mut chip, &bac_key, &mut MockRng::default())?.wrapper;

        let mut signer = EcdsaTerminalSigner::new(
            curve.clone(),
            terminal_private_key,
            DigestAlgorithm::SHA256,
            MockRng::default(),
        );
        let ephemeral_key = [0x42; 32];
        let result = do_ta(
            &mut chip,
            &mut wrapper,
            &chain(),
            &mut signer,
            &id_picc,
            &ephemeral_key,
            Some(&hex!("7315 0609 04007F000703010401 5308 3230323631303139")),
        )?;
        assert_eq!(result.chr, b"DEIS0000001");
        assert_eq!(result.challenge.len(), 8);
        assert_eq!(result.signature.len(), 64);
        assert!(chip.is_terminal_authenticated());

        // A signature by another key is rejected
        let mut wrapper = crate::bac::do_bac(&mut chip, &bac_key, &mut MockRng::default())?.wrapper;
        let mut signer = EcdsaTerminalSigner::new(
            curve,
            BigUint::from(0xBAD_u32),
            DigestAlgorithm::SHA256,
            MockRng::default(),
        );
        let result = do_ta(
            &mut chip,
            &mut wrapper,
            &chain(),
            &mut signer,
            &id_picc,
            &ephemeral_key,
            None,
        );
        assert!(result.is_err_and(|e| matches!(
            e,
            EmrtdError::TerminalAuthDenied { status: Some([0x63, 0x00]), .. }
        )));
        Ok(())
    }

    #[test]
    fn test_ta_broken_chain() -> Result<(), EmrtdError> {
        let curve = NamedCurve::BrainpoolP256r1.curve();
        let bac_key = BacKey::new("L898902C", "690806", "940623")?;
        let mut chip = SimulatedChip::new().with_bac(&bac_key)?.with_terminal_authentication(
            b"DECVCA00001",
            TerminalKey {
                curve: curve.clone(),
                public_key: curve.g.clone(),
                digest: DigestAlgorithm::SHA256,
            },
        );
        let mut wrapper = crate::bac::do_bac(&mut chip, &bac_key, &mut MockRng::default())?.wrapper;
        let mut signer = EcdsaTerminalSigner::new(
            curve,
            BigUint::from(1_u32),
            DigestAlgorithm::SHA256,
            MockRng::default(),
        );

        // The DV certificate is missing, so the chip does not know the CAR of the IS certificate
        let result = do_ta(
            &mut chip,
            &mut wrapper,
            &chain()[1..],
            &mut signer,
            b"L898902C<3",
            &[0x42; 32],
            None,
        );
        assert!(result.is_err_and(|e| matches!(
            e,
            EmrtdError::TerminalAuthDenied { ref reason, status: Some([0x6A, 0x88]) }
                if reason == "MSE:Set DST"
        )));
        assert!(!chip.is_terminal_authenticated());
        Ok(())
    }

    #[test]
    fn test_ta_empty_chain() -> Result<(), EmrtdError> {
        let mut card = MockCard::new(vec![]);
        let mut wrapper = SecureMessagingWrapper::with_zero_ssc(
            vec![0; 16],
            vec![0; 16],
            crate::crypto::EncryptionAlgorithm::AES128,
        )?;
        let curve = NamedCurve::BrainpoolP256r1.curve();
        let mut signer = EcdsaTerminalSigner::new(
            curve,
            BigUint::from(1_u32),
            DigestAlgorithm::SHA256,
            MockRng::default(),
        );
        let result = do_ta(&mut card, &mut wrapper, &[], &mut signer, b"", &[], None);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
        Ok(())
    }
}

//! Secure messaging: protection of command APDUs and verification of
//! response APDUs with the session keys of an access control protocol.
//!
//! For more details and examples, see ICAO Doc 9303-11 Section 9.8 and Appendix D.4
//! <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>

use alloc::{format, string::String, vec, vec::Vec};
use constant_time_eq::constant_time_eq;
use core::fmt;
use tracing::{error, trace, warn};

use crate::{
    apdu::{encode_le, Apdu, Response, CLA_SECURE_MESSAGING, MAX_EXTENDED_NE, MAX_SHORT_NE},
    asn1::{encode_tlv, tlv_iter},
    bytes2hex,
    crypto::{
        cbc_decrypt, cbc_encrypt, compute_mac, ecb_encrypt, padding_method_2, remove_padding,
        EncryptionAlgorithm,
    },
    EmrtdError,
};

/// Default maximum number of response bytes requested per protected READ
/// BINARY, leaving room for the secure messaging overhead in a short APDU.
pub const DEFAULT_MAX_TRANSCEIVE_LENGTH: usize = 223;

/// Session state of a secure channel: keys, cipher and Send Sequence Counter.
///
/// A wrapper is created by a successful access control protocol and is
/// replaced, never modified, by the next one.
#[derive(Clone)]
pub struct SecureMessagingWrapper {
    /// The encryption algorithm of the session, which also fixes the MAC.
    enc_alg: EncryptionAlgorithm,
    /// The session key used for encryption.
    ks_enc: Vec<u8>,
    /// The session key used for MAC generation.
    ks_mac: Vec<u8>,
    /// The Send Sequence Counter (SSC), one cipher block wide.
    ssc: Vec<u8>,
    should_check_mac: bool,
    max_transceive_length: usize,
}

impl fmt::Debug for SecureMessagingWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureMessagingWrapper")
            .field("enc_alg", &self.enc_alg)
            .field("ssc", &bytes2hex(&self.ssc))
            .field("should_check_mac", &self.should_check_mac)
            .field("max_transceive_length", &self.max_transceive_length)
            .finish_non_exhaustive()
    }
}

impl SecureMessagingWrapper {
    /// Creates a wrapper from session keys and an initial SSC.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if the key or SSC lengths do not fit `enc_alg`.
    pub fn new(
        ks_enc: Vec<u8>,
        ks_mac: Vec<u8>,
        enc_alg: EncryptionAlgorithm,
        ssc: Vec<u8>,
    ) -> Result<Self, EmrtdError> {
        if ks_enc.len() != enc_alg.key_size() || ks_mac.len() != enc_alg.key_size() {
            error!(
                "Session keys of {} and {} bytes do not fit {enc_alg:?}",
                ks_enc.len(),
                ks_mac.len()
            );
            return Err(EmrtdError::InvalidArgument(
                "Session key length does not fit the encryption algorithm",
            ));
        }
        if ssc.len() != enc_alg.block_size() {
            error!("SSC of {} bytes does not fit {enc_alg:?}", ssc.len());
            return Err(EmrtdError::InvalidArgument(
                "SSC length does not fit the encryption algorithm",
            ));
        }
        Ok(Self {
            enc_alg,
            ks_enc,
            ks_mac,
            ssc,
            should_check_mac: true,
            max_transceive_length: DEFAULT_MAX_TRANSCEIVE_LENGTH,
        })
    }

    /// Creates a wrapper with an all-zero SSC, as PACE and Chip Authentication do.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if the key lengths do not fit `enc_alg`.
    pub fn with_zero_ssc(
        ks_enc: Vec<u8>,
        ks_mac: Vec<u8>,
        enc_alg: EncryptionAlgorithm,
    ) -> Result<Self, EmrtdError> {
        Self::new(ks_enc, ks_mac, enc_alg, vec![0; enc_alg.block_size()])
    }

    #[must_use]
    pub fn encryption_algorithm(&self) -> EncryptionAlgorithm {
        self.enc_alg
    }

    #[must_use]
    pub fn ks_enc(&self) -> &[u8] {
        &self.ks_enc
    }

    #[must_use]
    pub fn ks_mac(&self) -> &[u8] {
        &self.ks_mac
    }

    /// The current value of the Send Sequence Counter.
    #[must_use]
    pub fn ssc(&self) -> &[u8] {
        &self.ssc
    }

    #[must_use]
    pub fn should_check_mac(&self) -> bool {
        self.should_check_mac
    }

    pub fn set_should_check_mac(&mut self, should_check_mac: bool) {
        self.should_check_mac = should_check_mac;
    }

    /// Maximum number of plain response bytes to request at once.
    #[must_use]
    pub fn max_transceive_length(&self) -> usize {
        self.max_transceive_length
    }

    pub fn set_max_transceive_length(&mut self, max_transceive_length: usize) {
        self.max_transceive_length = max_transceive_length.clamp(1, MAX_EXTENDED_NE);
    }

    /// Increment the Send Sequence Counter (SSC).
    ///
    /// # Errors
    ///
    /// * `EmrtdError::OverflowSscError` if the SSC would wrap around.
    fn increment_ssc(&mut self) -> Result<(), EmrtdError> {
        for byte in self.ssc.iter_mut().rev() {
            let (value, carry) = byte.overflowing_add(1);
            *byte = value;
            if !carry {
                return Ok(());
            }
        }
        error!("SSC overflow");
        Err(EmrtdError::OverflowSscError())
    }

    /// IV of the current message: zero for 3DES, `E(KSenc, SSC)` for AES.
    fn iv(&self) -> Result<Vec<u8>, EmrtdError> {
        match self.enc_alg {
            EncryptionAlgorithm::DES3 => Ok(vec![0; 8]),
            alg => ecb_encrypt(alg, &self.ks_enc, &self.ssc),
        }
    }

    fn mac(&self, data: &[u8]) -> Result<Vec<u8>, EmrtdError> {
        let block_size = self.enc_alg.block_size();
        let n = padding_method_2(&[&self.ssc[..], data].concat(), block_size)?;
        compute_mac(&self.ks_mac, &n, self.enc_alg.mac_algorithm())
    }

    /// Protects a command APDU.
    ///
    /// The SSC is incremented before use. Command data is padded, encrypted
    /// and carried in DO'87' (even INS, with padding indicator) or DO'85'
    /// (odd INS); Ne is carried in DO'97' and the MAC in DO'8E'.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the SSC overflows or a cipher operation fails.
    pub fn wrap(&mut self, apdu: &Apdu) -> Result<Apdu, EmrtdError> {
        self.increment_ssc()?;
        let block_size = self.enc_alg.block_size();

        let mut header = apdu.get_command_header();
        header[0] |= CLA_SECURE_MESSAGING;

        let mut payload = Vec::new();
        if let Some(data) = &apdu.data {
            let padded = padding_method_2(data, block_size)?;
            let encrypted_data = cbc_encrypt(self.enc_alg, &self.ks_enc, &self.iv()?, &padded)?;
            if apdu.ins % 2 == 0 {
                // For a command with even INS, any command data is encrypted
                // and encapsulated in a Tag 87 with padding indicator (01).
                payload.extend(encode_tlv(&[0x87], &[&[0x01], &encrypted_data[..]].concat()));
            } else {
                // For a command with odd INS, any command data is encrypted
                // and encapsulated in a Tag 85 without padding indicator.
                payload.extend(encode_tlv(&[0x85], &encrypted_data));
            }
        }

        let extended = apdu.is_extended();
        if let Some(ne) = apdu.ne {
            // Commands with response (Le field not empty)
            // have a protected Le-field (Tag 97) in the command data.
            payload.extend(encode_tlv(&[0x97], &encode_le(ne, extended, true)));
        }

        let padded_header = padding_method_2(&header, block_size)?;
        let cc = self.mac(&[&padded_header[..], &payload].concat())?;
        payload.extend(encode_tlv(&[0x8E], &cc));

        let ne = if extended || payload.len() > 255 {
            MAX_EXTENDED_NE
        } else {
            MAX_SHORT_NE
        };
        let protected = Apdu::new(
            header[0],
            header[1],
            header[2],
            header[3],
            Some(payload),
            Some(ne),
        );
        trace!(
            "Protected APDU: {}",
            bytes2hex(&protected.to_bytes().unwrap_or_default())
        );
        Ok(protected)
    }

    /// Verifies and decrypts a protected response APDU.
    ///
    /// The SSC is incremented before use. A response that carries no data
    /// objects at all and a status other than 9000 is returned unchanged,
    /// since the chip answers errors in plain.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MacMismatch` if the MAC is wrong or missing while MAC
    ///   checking is enabled.
    /// * `EmrtdError::MalformedInput` for unparsable or unexpected data objects.
    /// * `EmrtdError::BadPadding` if the decrypted data is not padded.
    pub fn unwrap(&mut self, response: &Response) -> Result<Response, EmrtdError> {
        self.increment_ssc()?;
        trace!(
            "Protected response ({:02X}{:02X}): {}",
            response.status[0],
            response.status[1],
            bytes2hex(&response.data)
        );

        if response.data.is_empty() {
            if response.is_success() && self.should_check_mac {
                error!("Response with status 9000 carries no secure messaging data objects");
                return Err(EmrtdError::MacMismatch);
            }
            warn!(
                "Unprotected response with status {:02X}{:02X}",
                response.status[0], response.status[1]
            );
            return Ok(response.clone());
        }

        let mut encrypted: Option<(&[u8], bool)> = None;
        let mut mac_input: Vec<u8> = Vec::new();
        let mut do99: Option<&[u8]> = None;
        let mut do8e: Option<&[u8]> = None;
        for tlv in tlv_iter(&response.data) {
            let tlv = tlv.map_err(|err| {
                error!("Malformed secure messaging response: {err}");
                EmrtdError::MalformedInput(format!("malformed secure messaging response: {err}"))
            })?;
            match tlv.tag {
                [0x85] => {
                    encrypted = Some((tlv.value, false));
                    mac_input.extend_from_slice(tlv.raw);
                }
                [0x87] => {
                    encrypted = Some((tlv.value, true));
                    mac_input.extend_from_slice(tlv.raw);
                }
                [0x99] => {
                    do99 = Some(tlv.value);
                    mac_input.extend_from_slice(tlv.raw);
                }
                [0x8E] => do8e = Some(tlv.value),
                tag => {
                    error!("Tag {} not supported in protected response", bytes2hex(tag));
                    return Err(EmrtdError::MalformedInput(format!(
                        "tag {} not supported in protected response",
                        bytes2hex(tag)
                    )));
                }
            }
        }

        if self.should_check_mac {
            let Some(received) = do8e else {
                error!("Protected response carries no MAC");
                return Err(EmrtdError::MacMismatch);
            };
            let cc = self.mac(&mac_input)?;
            if !constant_time_eq(&cc, received) {
                error!("MAC verification failed");
                return Err(EmrtdError::MacMismatch);
            }
        }

        let status = match do99 {
            Some(&[sw1, sw2]) => [sw1, sw2],
            Some(other) => {
                error!("DO'99' must hold two status bytes, found {}", bytes2hex(other));
                return Err(EmrtdError::MalformedInput(String::from(
                    "DO'99' must hold two status bytes",
                )));
            }
            None => response.status,
        };

        let data = match encrypted {
            None => Vec::new(),
            Some((value, has_indicator)) => {
                let cryptogram = if has_indicator {
                    match value.split_first() {
                        Some((0x01, rest)) => rest,
                        _ => {
                            error!("DO'87' without padding indicator 01");
                            return Err(EmrtdError::MalformedInput(String::from(
                                "DO'87' without padding indicator 01",
                            )));
                        }
                    }
                } else {
                    value
                };
                let block_size = self.enc_alg.block_size();
                if cryptogram.is_empty() || cryptogram.len() % block_size != 0 {
                    error!(
                        "Encrypted data of {} bytes is not block aligned",
                        cryptogram.len()
                    );
                    return Err(EmrtdError::MalformedInput(format!(
                        "encrypted data of {} bytes is not a multiple of {block_size}",
                        cryptogram.len()
                    )));
                }
                let padded = cbc_decrypt(self.enc_alg, &self.ks_enc, &self.iv()?, cryptogram)?;
                remove_padding(&padded)?.to_vec()
            }
        };
        trace!(
            "Response ({:02X}{:02X}): {}",
            status[0],
            status[1],
            bytes2hex(&data)
        );
        Ok(Response { data, status })
    }
}

/// The chip's end of the channel, used by the simulated chip in tests.
#[cfg(test)]
impl SecureMessagingWrapper {
    /// Verifies and decrypts a protected command APDU.
    pub(crate) fn unwrap_command(&mut self, protected: &Apdu) -> Result<Apdu, EmrtdError> {
        self.increment_ssc()?;
        let body = protected.data.clone().unwrap_or_default();
        let mut mac_input =
            padding_method_2(&protected.get_command_header(), self.enc_alg.block_size())?;
        let mut data = None;
        let mut ne = None;
        let mut cc = None;
        for tlv in tlv_iter(&body) {
            let tlv = tlv?;
            match tlv.tag {
                [tag @ (0x85 | 0x87)] => {
                    let cryptogram = if *tag == 0x87 { &tlv.value[1..] } else { tlv.value };
                    let padded = cbc_decrypt(self.enc_alg, &self.ks_enc, &self.iv()?, cryptogram)?;
                    data = Some(remove_padding(&padded)?.to_vec());
                    mac_input.extend_from_slice(tlv.raw);
                }
                [0x97] => {
                    ne = Some(crate::apdu::decode_le(tlv.value));
                    mac_input.extend_from_slice(tlv.raw);
                }
                [0x8E] => cc = Some(tlv.value.to_vec()),
                _ => {
                    return Err(EmrtdError::MalformedInput(String::from(
                        "unexpected command data object",
                    )))
                }
            }
        }
        if cc != Some(self.mac(&mac_input)?) {
            return Err(EmrtdError::MacMismatch);
        }
        Ok(Apdu::new(
            protected.cla & !CLA_SECURE_MESSAGING,
            protected.ins,
            protected.p1,
            protected.p2,
            data,
            ne,
        ))
    }

    /// Protects a plain response APDU.
    pub(crate) fn wrap_response(&mut self, response: &Response) -> Result<Response, EmrtdError> {
        self.increment_ssc()?;
        let mut data = Vec::new();
        if !response.data.is_empty() {
            let padded = padding_method_2(&response.data, self.enc_alg.block_size())?;
            let cryptogram = cbc_encrypt(self.enc_alg, &self.ks_enc, &self.iv()?, &padded)?;
            data.extend(encode_tlv(&[0x87], &[&[0x01], &cryptogram[..]].concat()));
        }
        data.extend(encode_tlv(&[0x99], &response.status));
        let cc = self.mac(&data)?;
        data.extend(encode_tlv(&[0x8E], &cc));
        Ok(Response {
            data,
            status: response.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // Example taken from https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf Appendix D.4
    fn appendix_d_wrapper() -> SecureMessagingWrapper {
        SecureMessagingWrapper::new(
            hex!("979EC13B1CBFE9DCD01AB0FED307EAE5 979EC13B1CBFE9DC").to_vec(),
            hex!("F1CB1F1FB5ADF208806B89DC579DC1F8 F1CB1F1FB5ADF208").to_vec(),
            EncryptionAlgorithm::DES3,
            hex!("887022120C06C226").to_vec(),
        )
        .expect("valid session keys")
    }

    #[test]
    fn test_appendix_d_select_and_read() -> Result<(), EmrtdError> {
        let mut sm = appendix_d_wrapper();

        let select = Apdu::new(0x00, 0xA4, 0x02, 0x0C, Some(hex!("011E").to_vec()), None);
        let protected = sm.wrap(&select)?;
        assert_eq!(
            protected.to_bytes()?,
            hex!("0CA4020C15 8709016375432908C044F6 8E08BF8B92D635FF24F8 00")
        );
        assert_eq!(sm.ssc(), hex!("887022120C06C227"));

        let response = sm.unwrap(&Response::from_bytes(&hex!(
            "990290008E08FA855A5D4C50A8ED 9000"
        ))?)?;
        assert!(response.data.is_empty());
        assert!(response.is_success());

        let read = Apdu::new(0x00, 0xB0, 0x00, 0x00, None, Some(4));
        assert_eq!(
            sm.wrap(&read)?.to_bytes()?,
            hex!("0CB000000D 970104 8E08ED6705417E96BA55 00")
        );
        let response = sm.unwrap(&Response::from_bytes(&hex!(
            "8709019FF0EC34F9922651 99029000 8E08AD55CC17140B2DED 9000"
        ))?)?;
        assert_eq!(response.data, hex!("60145F01"));

        let read = Apdu::new(0x00, 0xB0, 0x00, 0x04, None, Some(0x12));
        assert_eq!(
            sm.wrap(&read)?.to_bytes()?,
            hex!("0CB000040D 970112 8E082EA28A70F3C7B535 00")
        );
        let response = sm.unwrap(&Response::from_bytes(&hex!(
            "871901FB9235F4E4037F2327DCC8964F1F9B8C30F42C8E2FFF224A
             99029000 8E08C8B2787EAEA07D74 9000"
        ))?)?;
        assert_eq!(response.data, hex!("04303130365F36063034303030305C026175"));
        assert_eq!(sm.ssc(), hex!("887022120C06C22C"));
        Ok(())
    }

    #[test]
    fn test_tampered_response_is_rejected() -> Result<(), EmrtdError> {
        let valid = hex!("8709019FF0EC34F9922651 99029000 8E08AD55CC17140B2DED 9000");
        for i in 0..valid.len() - 2 {
            let mut sm = appendix_d_wrapper();
            sm.wrap(&Apdu::new(0x00, 0xA4, 0x02, 0x0C, Some(hex!("011E").to_vec()), None))?;
            sm.unwrap(&Response::from_bytes(&hex!("990290008E08FA855A5D4C50A8ED 9000"))?)?;
            sm.wrap(&Apdu::new(0x00, 0xB0, 0x00, 0x00, None, Some(4)))?;

            let mut tampered = valid;
            tampered[i] ^= 0x01;
            assert!(sm.unwrap(&Response::from_bytes(&tampered)?).is_err(), "byte {i}");
        }
        Ok(())
    }

    #[test]
    fn test_missing_mac() -> Result<(), EmrtdError> {
        let mut sm = appendix_d_wrapper();
        assert!(sm
            .unwrap(&Response::from_bytes(&hex!("99029000 9000"))?)
            .is_err_and(|e| matches!(e, EmrtdError::MacMismatch)));
        assert!(sm
            .unwrap(&Response::from_bytes(&hex!("9000"))?)
            .is_err_and(|e| matches!(e, EmrtdError::MacMismatch)));

        // Plain error status words pass through
        let response = sm.unwrap(&Response::from_bytes(&hex!("6A82"))?)?;
        assert_eq!(response.status, hex!("6A82"));
        assert_eq!(sm.ssc(), hex!("887022120C06C229"));
        Ok(())
    }

    #[test]
    fn test_malformed_response() -> Result<(), EmrtdError> {
        let mut sm = appendix_d_wrapper();
        sm.set_should_check_mac(false);
        assert!(sm
            .unwrap(&Response::from_bytes(&hex!("870501AABBCCDD 9000"))?)
            .is_err_and(|e| matches!(e, EmrtdError::MalformedInput(_))));
        assert!(sm
            .unwrap(&Response::from_bytes(&hex!("8709 9000"))?)
            .is_err_and(|e| matches!(e, EmrtdError::MalformedInput(_))));
        assert!(sm
            .unwrap(&Response::from_bytes(&hex!("5301AA 9000"))?)
            .is_err_and(|e| matches!(e, EmrtdError::MalformedInput(_))));
        Ok(())
    }

    #[test]
    fn test_aes_round_trip() -> Result<(), EmrtdError> {
        let ks_enc = hex!("F5F0E35C0D7161EE6724EE513A0D9A7F").to_vec();
        let ks_mac = hex!("FE251C7858B356B24514B3BD5F4297D1").to_vec();
        let aes = EncryptionAlgorithm::AES128;
        let mut terminal =
            SecureMessagingWrapper::with_zero_ssc(ks_enc.clone(), ks_mac.clone(), aes)?;
        let mut chip = SecureMessagingWrapper::with_zero_ssc(ks_enc, ks_mac, aes)?;

        let apdu = Apdu::new(0x00, 0xA4, 0x02, 0x0C, Some(hex!("0101").to_vec()), None);
        let protected = terminal.wrap(&apdu)?;
        assert_eq!(protected.cla, 0x0C);
        assert_eq!(terminal.ssc(), hex!("00000000000000000000000000000001"));

        // The chip side checks the command MAC with the same SSC
        chip.increment_ssc()?;
        let body = protected.data.clone().unwrap_or_default();
        let mac_pos = body.len() - 10;
        let expected = chip.mac(
            &[
                &padding_method_2(&protected.get_command_header(), 16)?[..],
                &body[..mac_pos],
            ]
            .concat(),
        )?;
        assert_eq!(&body[mac_pos + 2..], &expected[..]);

        // and answers with encrypted data
        chip.increment_ssc()?;
        let plain = hex!("61135F1F");
        let cryptogram = cbc_encrypt(
            EncryptionAlgorithm::AES128,
            chip.ks_enc(),
            &chip.iv()?,
            &padding_method_2(&plain, 16)?,
        )?;
        let do87 = encode_tlv(&[0x87], &[&[0x01], &cryptogram[..]].concat());
        let do99 = encode_tlv(&[0x99], &hex!("9000"));
        let cc = chip.mac(&[&do87[..], &do99[..]].concat())?;
        let data = [do87, do99, encode_tlv(&[0x8E], &cc)].concat();

        let response = terminal.unwrap(&Response {
            data,
            status: hex!("9000"),
        })?;
        assert_eq!(response.data, plain);
        assert_eq!(terminal.ssc(), chip.ssc());
        Ok(())
    }

    #[test]
    fn test_chip_side_round_trip() -> Result<(), EmrtdError> {
        let mut terminal = appendix_d_wrapper();
        let mut chip = appendix_d_wrapper();
        let apdu = Apdu::new(0x00, 0xB1, 0x00, 0x00, Some(hex!("5402FFFF").to_vec()), Some(0x20));
        assert_eq!(chip.unwrap_command(&terminal.wrap(&apdu)?)?, apdu);

        let plain = Response {
            data: hex!("5302AABB").to_vec(),
            status: hex!("9000"),
        };
        assert_eq!(terminal.unwrap(&chip.wrap_response(&plain)?)?, plain);
        assert_eq!(terminal.ssc(), chip.ssc());
        Ok(())
    }

    #[test]
    fn test_extended_length_wrap() -> Result<(), EmrtdError> {
        let mut sm = appendix_d_wrapper();
        let apdu = Apdu::new(0x00, 0x2A, 0x00, 0xBE, Some(vec![0x7F; 300]), None);
        let protected = sm.wrap(&apdu)?;
        assert!(protected.is_extended());
        let bytes = protected.to_bytes()?;
        assert_eq!(&bytes[..5], hex!("0C2A00BE00"));
        assert_eq!(&bytes[bytes.len() - 2..], hex!("0000"));
        Ok(())
    }

    #[test]
    fn test_ssc_overflow() -> Result<(), EmrtdError> {
        let mut sm = SecureMessagingWrapper::new(
            vec![0x01; 24],
            vec![0x02; 24],
            EncryptionAlgorithm::DES3,
            hex!("FFFFFFFFFFFFFFFF").to_vec(),
        )?;
        assert!(sm
            .wrap(&Apdu::new(0x00, 0xB0, 0x00, 0x00, None, Some(4)))
            .is_err_and(|e| matches!(e, EmrtdError::OverflowSscError())));
        let wrong_ssc_length = SecureMessagingWrapper::new(
            vec![0x01; 24],
            vec![0x02; 24],
            EncryptionAlgorithm::DES3,
            vec![0; 16],
        );
        assert!(wrong_ssc_length.is_err());
        Ok(())
    }
}

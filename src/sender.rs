//! Command builders of the access control protocols and the file system.
//!
//! Every sender takes the transceiver and an optional secure messaging
//! wrapper. With a wrapper the command is protected and the response
//! verified; without one the command goes out in plain.

use alloc::{format, string::String, vec::Vec};
use num_bigint_dig::BigUint;
use tracing::{error, trace};

use crate::{
    apdu::{
        Apdu, Response, CLA_COMMAND_CHAINING, CLA_ISO7816, INS_EXTERNAL_AUTHENTICATE,
        INS_GENERAL_AUTHENTICATE, INS_GET_CHALLENGE, INS_INTERNAL_AUTHENTICATE, INS_MSE, INS_PSO,
        INS_READ_BINARY, INS_READ_BINARY2, INS_SELECT, MAX_EXTENDED_NE, MAX_SHORT_NE,
    },
    asn1::{encode_tlv, expect_tlv, oid_to_bytes},
    bytes2hex,
    card::CardTransceiver,
    numeric::i2os_minimal,
    secure_messaging::SecureMessagingWrapper,
    EmrtdError,
};

/// Largest offset that fits P1-P2 of READ BINARY (B0).
pub const MAX_SHORT_OFFSET: usize = 0x7FFF;

/// Sends an APDU through `wrapper` (if any) and returns the plain response.
///
/// # Errors
///
/// * `EmrtdError` on transport failure or if the response can not be verified.
pub fn transceive<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    apdu: &Apdu,
) -> Result<Response, EmrtdError> {
    match wrapper {
        None => {
            let response = Response::from_bytes(&card.transmit(&apdu.to_bytes()?)?)?;
            trace!(
                "APDU response ({:02X}{:02X}): {}",
                response.status[0],
                response.status[1],
                bytes2hex(&response.data)
            );
            Ok(response)
        }
        Some(wrapper) => {
            let protected = wrapper.wrap(apdu)?;
            let response = Response::from_bytes(&card.transmit(&protected.to_bytes()?)?)?;
            wrapper.unwrap(&response)
        }
    }
}

/// Returns the response data if the status word is 9000.
fn expect_success(response: Response, command: &str) -> Result<Vec<u8>, EmrtdError> {
    match response.status {
        [0x90, 0x00] => Ok(response.data),
        [sw1, sw2] => {
            error!(
                "Received invalid SW during {command}: {}",
                describe_status(response.status)
            );
            Err(EmrtdError::RecvApduError(sw1, sw2))
        }
    }
}

/// Selects an application by AID.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip rejects the selection.
pub fn send_select_applet<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    aid: &[u8],
) -> Result<(), EmrtdError> {
    trace!("Selecting application {}...", bytes2hex(aid));
    let apdu = Apdu::new(CLA_ISO7816, INS_SELECT, 0x04, 0x0C, Some(aid.to_vec()), None);
    expect_success(transceive(card, wrapper, &apdu)?, "Select Application")?;
    Ok(())
}

/// Selects an EF of the current application by file identifier.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip rejects the selection.
pub fn send_select_file<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    fid: u16,
) -> Result<(), EmrtdError> {
    trace!("Selecting File {fid:04X}...");
    let apdu = Apdu::new(
        CLA_ISO7816,
        INS_SELECT,
        0x02,
        0x0C,
        Some(fid.to_be_bytes().to_vec()),
        None,
    );
    expect_success(transceive(card, wrapper, &apdu)?, "Select EF")?;
    Ok(())
}

/// READ BINARY of up to `le` bytes at `offset` of the selected EF.
///
/// Offsets beyond `0x7FFF` use READ BINARY with odd INS (B1) and an offset
/// data object. An end of file warning (6282) still returns the data read.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip answers with an error status.
pub fn send_read_binary<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    offset: usize,
    le: usize,
    extended: bool,
) -> Result<Vec<u8>, EmrtdError> {
    let le = le.clamp(1, if extended { MAX_EXTENDED_NE } else { MAX_SHORT_NE });
    if offset <= MAX_SHORT_OFFSET {
        let [p1, p2] = u16::try_from(offset)
            .map_err(EmrtdError::IntCastError)?
            .to_be_bytes();
        let apdu = Apdu::new(CLA_ISO7816, INS_READ_BINARY, p1, p2, None, Some(le));
        return read_binary_response(transceive(card, wrapper, &apdu)?);
    }

    let offset_do = encode_tlv(&[0x54], &i2os_minimal(&BigUint::from(offset)));
    // DO'53' header of the response takes up to 4 bytes
    let ne = (le + 4).min(if extended { MAX_EXTENDED_NE } else { MAX_SHORT_NE });
    let apdu = Apdu::new(CLA_ISO7816, INS_READ_BINARY2, 0x00, 0x00, Some(offset_do), Some(ne));
    let data = read_binary_response(transceive(card, wrapper, &apdu)?)?;
    let (value, _) = expect_tlv(&data, &[0x53])?;
    Ok(value.to_vec())
}

/// READ BINARY with short file identifier addressing, which selects the EF
/// implicitly. `offset` must be below 256.
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if `sfi` or `offset` are out of range.
/// * `EmrtdError::RecvApduError` if the chip answers with an error status.
pub fn send_read_binary_sfi<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    sfi: u8,
    offset: usize,
    le: usize,
) -> Result<Vec<u8>, EmrtdError> {
    if sfi == 0 || sfi > 0x1E {
        error!("Short file identifier out of range: {sfi:02X}");
        return Err(EmrtdError::InvalidArgument("Short file identifier out of range"));
    }
    let p2 = u8::try_from(offset).map_err(EmrtdError::IntCastError)?;
    let apdu = Apdu::new(
        CLA_ISO7816,
        INS_READ_BINARY,
        0x80 | sfi,
        p2,
        None,
        Some(le.clamp(1, MAX_SHORT_NE)),
    );
    read_binary_response(transceive(card, wrapper, &apdu)?)
}

fn read_binary_response(response: Response) -> Result<Vec<u8>, EmrtdError> {
    match response.status {
        [0x90, 0x00] => Ok(response.data),
        // End of file reached before reading Ne bytes
        [0x62, 0x82] if !response.data.is_empty() => Ok(response.data),
        [sw1, sw2] => {
            error!(
                "Received invalid SW during Read Binary: {}",
                describe_status(response.status)
            );
            Err(EmrtdError::RecvApduError(sw1, sw2))
        }
    }
}

/// GET CHALLENGE for an 8 byte nonce.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` on an error status.
/// * `EmrtdError::InvalidResponseError` if the nonce is not 8 bytes long.
pub fn send_get_challenge<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
) -> Result<Vec<u8>, EmrtdError> {
    let apdu = Apdu::new(CLA_ISO7816, INS_GET_CHALLENGE, 0x00, 0x00, None, Some(8));
    let challenge = expect_success(transceive(card, wrapper, &apdu)?, "Get Challenge")?;
    if challenge.len() != 8 {
        error!(
            "Card response length should be equal to the requested amount 8, found {}",
            challenge.len()
        );
        return Err(EmrtdError::InvalidResponseError());
    }
    Ok(challenge)
}

/// EXTERNAL AUTHENTICATE of BAC: sends `E_IFD ‖ M_IFD` and returns the
/// chip's `E_IC ‖ M_IC` together with the status word.
///
/// # Errors
///
/// * `EmrtdError` on transport failure.
pub fn send_mutual_authenticate<C: CardTransceiver + ?Sized>(
    card: &mut C,
    data: &[u8],
) -> Result<Response, EmrtdError> {
    let apdu = Apdu::new(
        CLA_ISO7816,
        INS_EXTERNAL_AUTHENTICATE,
        0x00,
        0x00,
        Some(data.to_vec()),
        Some(data.len()),
    );
    transceive(card, None, &apdu)
}

/// EXTERNAL AUTHENTICATE of Terminal Authentication with the terminal's signature.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip rejects the signature.
pub fn send_external_authenticate<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    signature: &[u8],
) -> Result<(), EmrtdError> {
    let apdu = Apdu::new(
        CLA_ISO7816,
        INS_EXTERNAL_AUTHENTICATE,
        0x00,
        0x00,
        Some(signature.to_vec()),
        None,
    );
    expect_success(transceive(card, wrapper, &apdu)?, "External Authenticate")?;
    Ok(())
}

/// INTERNAL AUTHENTICATE of Active Authentication, returns the signature.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` on an error status.
pub fn send_internal_authenticate<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    challenge: &[u8],
) -> Result<Vec<u8>, EmrtdError> {
    let apdu = Apdu::new(
        CLA_ISO7816,
        INS_INTERNAL_AUTHENTICATE,
        0x00,
        0x00,
        Some(challenge.to_vec()),
        Some(MAX_SHORT_NE),
    );
    expect_success(transceive(card, wrapper, &apdu)?, "Internal Authenticate")
}

fn send_mse<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    command: &str,
) -> Result<(), EmrtdError> {
    let apdu = Apdu::new(CLA_ISO7816, INS_MSE, p1, p2, Some(data), None);
    expect_success(transceive(card, wrapper, &apdu)?, command)?;
    Ok(())
}

/// MSE:Set AT selecting PACE with a password type and optional standardized
/// domain parameter id.
///
/// # Errors
///
/// * `EmrtdError::InvalidOidError` for a malformed OID.
/// * `EmrtdError::RecvApduError` if the chip rejects the parameters.
pub fn send_mse_set_at_pace<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    oid: &str,
    key_reference: u8,
    parameter_id: Option<u8>,
) -> Result<(), EmrtdError> {
    let mut data = encode_tlv(&[0x80], &oid_to_bytes(oid)?);
    data.extend(encode_tlv(&[0x83], &[key_reference]));
    if let Some(id) = parameter_id {
        data.extend(encode_tlv(&[0x84], &[id]));
    }
    send_mse(card, wrapper, 0xC1, 0xA4, data, "MSE:Set AT (PACE)")
}

/// MSE:Set AT selecting Chip Authentication with an optional key id.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip rejects the parameters.
pub fn send_mse_set_at_ca<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    oid: &str,
    key_id: Option<&[u8]>,
) -> Result<(), EmrtdError> {
    let mut data = encode_tlv(&[0x80], &oid_to_bytes(oid)?);
    if let Some(key_id) = key_id {
        data.extend(encode_tlv(&[0x84], key_id));
    }
    send_mse(card, wrapper, 0x41, 0xA4, data, "MSE:Set AT (CA)")
}

/// MSE:Set KAT of Chip Authentication with 3DES, carrying the terminal's
/// ephemeral public key.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip rejects the key.
pub fn send_mse_set_kat<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    key_data: &[u8],
    key_id: Option<&[u8]>,
) -> Result<(), EmrtdError> {
    let mut data = encode_tlv(&[0x91], key_data);
    if let Some(key_id) = key_id {
        data.extend(encode_tlv(&[0x84], key_id));
    }
    send_mse(card, wrapper, 0x41, 0xA6, data, "MSE:Set KAT")
}

/// MSE:Set DST naming the public key that verifies the next certificate.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip does not know the reference.
pub fn send_mse_set_dst<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    car: &[u8],
) -> Result<(), EmrtdError> {
    send_mse(card, wrapper, 0x81, 0xB6, encode_tlv(&[0x83], car), "MSE:Set DST")
}

/// MSE:Set AT for the external authentication of Terminal Authentication,
/// with the compressed ephemeral public key the terminal will use for Chip
/// Authentication.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip rejects the parameters.
pub fn send_mse_set_at_ta<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    chr: &[u8],
    auxiliary_data: Option<&[u8]>,
    ephemeral_key: Option<&[u8]>,
) -> Result<(), EmrtdError> {
    let mut data = encode_tlv(&[0x83], chr);
    if let Some(aux) = auxiliary_data {
        data.extend(encode_tlv(&[0x67], aux));
    }
    if let Some(key) = ephemeral_key {
        data.extend(encode_tlv(&[0x91], key));
    }
    send_mse(card, wrapper, 0x81, 0xA4, data, "MSE:Set AT (TA)")
}

/// PSO:Verify Certificate with the certificate body and signature.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` if the chip rejects the certificate.
pub fn send_pso_verify_certificate<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    body: &[u8],
    signature: &[u8],
) -> Result<(), EmrtdError> {
    let data = [body, &encode_tlv(&[0x5F, 0x37], signature)[..]].concat();
    let apdu = Apdu::new(CLA_ISO7816, INS_PSO, 0x00, 0xBE, Some(data), None);
    expect_success(transceive(card, wrapper, &apdu)?, "PSO:Verify Certificate")?;
    Ok(())
}

/// General Authenticate with dynamic authentication data `data` (the
/// content of template 7C). All but the last command of a protocol are
/// sent with command chaining. Returns the content of the response's 7C.
///
/// # Errors
///
/// * `EmrtdError::RecvApduError` on an error status.
/// * `EmrtdError::MalformedInput` if the response is not a 7C template.
pub fn send_general_authenticate<C: CardTransceiver + ?Sized>(
    card: &mut C,
    wrapper: Option<&mut SecureMessagingWrapper>,
    data: &[u8],
    is_last: bool,
) -> Result<Vec<u8>, EmrtdError> {
    let cla = if is_last {
        CLA_ISO7816
    } else {
        CLA_ISO7816 | CLA_COMMAND_CHAINING
    };
    let apdu = Apdu::new(
        cla,
        INS_GENERAL_AUTHENTICATE,
        0x00,
        0x00,
        Some(encode_tlv(&[0x7C], data)),
        Some(MAX_SHORT_NE),
    );
    let response = expect_success(transceive(card, wrapper, &apdu)?, "General Authenticate")?;
    match expect_tlv(&response, &[0x7C]) {
        Ok((content, rest)) if rest.is_empty() => Ok(content.to_vec()),
        _ => {
            error!(
                "General Authenticate response is not a dynamic authentication data object: {}",
                bytes2hex(&response)
            );
            Err(EmrtdError::MalformedInput(String::from(
                "General Authenticate response is not a 7C template",
            )))
        }
    }
}

/// Describes a status word for error messages.
#[must_use]
pub fn describe_status(status: [u8; 2]) -> String {
    let meaning = match status {
        [0x62, 0x82] => "end of file reached",
        [0x63, sw2] if sw2 & 0xF0 == 0xC0 => "verification failed, retries left",
        [0x69, 0x82] => "security status not satisfied",
        [0x69, 0x83] => "authentication method blocked",
        [0x69, 0x84] => "reference data not usable",
        [0x69, 0x85] => "conditions of use not satisfied",
        [0x69, 0x87] => "expected secure messaging data objects missing",
        [0x69, 0x88] => "secure messaging data objects incorrect",
        [0x6A, 0x80] => "incorrect parameters in the data field",
        [0x6A, 0x82] => "file or application not found",
        [0x6A, 0x88] => "referenced data not found",
        [0x6B, 0x00] => "wrong parameters P1-P2",
        [0x6D, 0x00] => "instruction not supported",
        _ => "unknown status",
    };
    format!("{:02X}{:02X} ({meaning})", status[0], status[1])
}

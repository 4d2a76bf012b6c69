//! Minimal BER-TLV helpers used by the protocol layers.
//!
//! Only what the access-control protocols and the secure messaging layer
//! need: tag and length parsing, a TLV iterator over a byte slice, TLV
//! encoding and object identifier conversion.

use alloc::{format, string::String, vec, vec::Vec};
use core::{fmt::Write, mem};
use tracing::error;

use crate::{bytes2hex, EmrtdError};

/// Parses the ASN.1 length field.
///
/// ASN.1 length encoding can use a single byte for short lengths (up to 127) or multiple bytes
/// for longer lengths.
///
/// # Arguments
///
/// * `data` - The ASN.1 data.
/// * `tag_len` - Length of ASN.1 tag (T of TLV).
///
/// # Returns
///
/// Result containing a tuple with the start index and length field value, or an `EmrtdError`.
///
/// For example, if `tag_len` is 3 and the length field is a single byte with value 42,
/// the returned value will be (4, 42).
///
/// # Errors
///
/// * `EmrtdError` if the input is incomplete, i.e. if the data is too short to read the length value.
pub(crate) fn len2int(data: &[u8], tag_len: usize) -> Result<(usize, usize), EmrtdError> {
    if data.len() < tag_len + 1 {
        error!(
            "Error during len2int, `data.len()`: `{}` is less than `tag_len`: `{}`",
            data.len(),
            tag_len
        );
        return Err(EmrtdError::ParseAsn1DataError(tag_len + 1, data.len()));
    }

    if data[tag_len] & 0x80 == 0 {
        Ok((tag_len + 1, data[tag_len] as usize))
    } else {
        let length_of_length = ((1 << 7) ^ data[tag_len]) as usize;
        if length_of_length == 0 || length_of_length > mem::size_of::<usize>() {
            error!("Error during len2int, unsupported length of length: {length_of_length}");
            return Err(EmrtdError::MalformedInput(format!(
                "unsupported ASN.1 length of length {length_of_length}"
            )));
        }

        if data.len() < tag_len + 1 + length_of_length {
            error!(
                "Error during len2int, `data.len()`: `{}` is less than `tag_len + 1 + length_of_length`: `{}`",
                data.len(),
                tag_len + 1 + length_of_length
            );
            return Err(EmrtdError::ParseAsn1DataError(
                tag_len + 1 + length_of_length,
                data.len(),
            ));
        }

        let mut buf = [0_u8; mem::size_of::<usize>()];
        buf[mem::size_of::<usize>() - length_of_length..]
            .copy_from_slice(&data[tag_len + 1..tag_len + 1 + length_of_length]);

        Ok((tag_len + 1 + length_of_length, usize::from_be_bytes(buf)))
    }
}

/// Encodes the length field in ASN.1 format.
///
/// If the length is less than 128, a single octet is used to represent the length.
/// Otherwise, the long form is used, where the first octet specifies the number of
/// octets used for the length, followed by the length encoded in big-endian order.
///
/// # Examples
///
/// ```
/// use emrtd_access::int2asn1len;
/// use hex_literal::hex;
///
/// assert_eq!(int2asn1len(42), hex!("2A").to_vec());
/// assert_eq!(int2asn1len(2024), hex!("8207E8").to_vec());
/// ```
#[must_use]
pub fn int2asn1len(length: usize) -> Vec<u8> {
    if length < 128 {
        vec![u8::try_from(length).expect("`length` is less than 128")]
    } else {
        let mut length_bytes: Vec<u8> = Vec::new();
        let mut len = length;

        let mut octet_count: u8 = 0;
        while len > 0 {
            octet_count += 1;
            len >>= 8;
        }
        length_bytes.push(0x80 | octet_count);
        for i in (0..octet_count).rev() {
            let masked_bits = (length >> (8 * i)) & 0xFF;
            length_bytes
                .push(u8::try_from(masked_bits).expect("Bits are masked, must fit in a u8"));
        }
        length_bytes
    }
}

/// Returns the length of the tag field at the start of `data`.
///
/// Supports the multi-byte tags of ISO/IEC 7816-4 (low five bits of the
/// first byte all set, continuation bit 0x80 on subsequent bytes).
fn tag_len(data: &[u8]) -> Result<usize, EmrtdError> {
    let Some(&first) = data.first() else {
        error!("Can not read a tag from empty data");
        return Err(EmrtdError::ParseAsn1DataError(1, 0));
    };
    if first & 0x1F != 0x1F {
        return Ok(1);
    }
    let mut len = 1;
    loop {
        let Some(&b) = data.get(len) else {
            error!("Multi-byte tag is truncated: {}", bytes2hex(data));
            return Err(EmrtdError::ParseAsn1DataError(len + 1, data.len()));
        };
        len += 1;
        if b & 0x80 == 0 {
            return Ok(len);
        }
    }
}

/// Validate the ASN.1 tag of the provided data. Multi-byte tags are supported.
///
/// # Errors
///
/// * `EmrtdError` if the data is incomplete or the tags don't match.
pub(crate) fn validate_asn1_tag(data: &[u8], tag: &[u8]) -> Result<(), EmrtdError> {
    data.get(..tag.len()).map_or_else(
        || {
            error!(
                "Error while validating ASN1 tag, `data.len()`: `{}` is less than `tag.len()`: `{}`",
                data.len(),
                tag.len()
            );
            Err(EmrtdError::ParseAsn1DataError(tag.len(), data.len()))
        },
        |d| {
            if d.starts_with(tag) {
                Ok(())
            } else {
                error!(
                    "Error while validating ASN1 tag, expected: {}, found {}",
                    bytes2hex(tag),
                    bytes2hex(d)
                );
                Err(EmrtdError::ParseAsn1TagError(bytes2hex(tag), bytes2hex(d)))
            }
        },
    )
}

/// Retrieve the ASN.1 child from the provided data.
///
/// Returns the value of the first TLV and the data remaining after it.
///
/// # Errors
///
/// * `EmrtdError` if the data is incomplete.
pub(crate) fn get_asn1_child(data: &[u8], tag_len: usize) -> Result<(&[u8], &[u8]), EmrtdError> {
    if data.len() < tag_len {
        error!(
            "Error during get_asn1_child, `data.len()`: `{}` is less than `tag_len`: `{}`",
            data.len(),
            tag_len
        );
        return Err(EmrtdError::ParseAsn1DataError(tag_len, data.len()));
    }

    let (tl, v) = len2int(data, tag_len)?;
    let end = tl.checked_add(v).ok_or_else(|| {
        error!("Error during get_asn1_child, length overflows");
        EmrtdError::MalformedInput(String::from("ASN.1 length overflows"))
    })?;
    if data.len() < end {
        error!(
            "Error during get_asn1_child, `data.len()`: `{}` is less than `tl + v`: `{}`",
            data.len(),
            end
        );
        return Err(EmrtdError::ParseAsn1DataError(end, data.len()));
    }
    Ok((&data[tl..end], &data[end..]))
}

/// Expects a TLV with the given (possibly multi-byte) tag at the start of
/// `data` and returns its value together with the remaining data.
///
/// # Errors
///
/// * `EmrtdError` if the tag differs or the data is incomplete.
pub(crate) fn expect_tlv<'a>(
    data: &'a [u8],
    tag: &[u8],
) -> Result<(&'a [u8], &'a [u8]), EmrtdError> {
    validate_asn1_tag(data, tag)?;
    get_asn1_child(data, tag.len())
}

/// A single BER-TLV data object borrowed from a larger buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// Tag bytes.
    pub tag: &'a [u8],
    /// Value bytes.
    pub value: &'a [u8],
    /// The complete encoding (tag, length and value).
    pub raw: &'a [u8],
}

impl Tlv<'_> {
    /// Returns the tag as an integer, e.g. `0x7F49` for a two byte tag.
    #[must_use]
    pub fn tag_number(&self) -> u32 {
        self.tag
            .iter()
            .fold(0_u32, |acc, &b| (acc << 8) | u32::from(b))
    }
}

/// Iterator over consecutive TLV objects.
///
/// Yields an error once and then stops if the data is malformed.
pub struct TlvIter<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<Tlv<'a>, EmrtdError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.is_empty() {
            return None;
        }
        let parsed = tag_len(self.data).and_then(|tl| {
            let (value, rest) = get_asn1_child(self.data, tl)?;
            let raw_len = self.data.len() - rest.len();
            Ok((
                Tlv {
                    tag: &self.data[..tl],
                    value,
                    raw: &self.data[..raw_len],
                },
                rest,
            ))
        });
        match parsed {
            Ok((tlv, rest)) => {
                self.data = rest;
                Some(Ok(tlv))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Iterates over the TLV objects in `data`.
#[must_use]
pub fn tlv_iter(data: &[u8]) -> TlvIter<'_> {
    TlvIter {
        data,
        failed: false,
    }
}

/// Finds the value of the first TLV with tag `tag` among the top-level
/// objects of `data`.
///
/// # Errors
///
/// * `EmrtdError` if `data` is not a well formed TLV sequence.
pub fn find_tlv(data: &[u8], tag: u32) -> Result<Option<&[u8]>, EmrtdError> {
    for tlv in tlv_iter(data) {
        let tlv = tlv?;
        if tlv.tag_number() == tag {
            return Ok(Some(tlv.value));
        }
    }
    Ok(None)
}

/// Encodes a TLV object with the given tag.
///
/// # Examples
///
/// ```
/// use emrtd_access::encode_tlv;
/// use hex_literal::hex;
///
/// assert_eq!(encode_tlv(&[0x83], &hex!("01")), hex!("830101").to_vec());
/// ```
#[must_use]
pub fn encode_tlv(tag: &[u8], value: &[u8]) -> Vec<u8> {
    [tag, &int2asn1len(value.len()), value].concat()
}

/// Encodes an object identifier in dotted notation into the content octets
/// of its DER encoding (without tag and length).
///
/// # Errors
///
/// * `EmrtdError::InvalidOidError` if the string is not a valid OID.
pub fn oid_to_bytes(oid: &str) -> Result<Vec<u8>, EmrtdError> {
    let arcs = oid
        .split('.')
        .map(str::parse::<u64>)
        .collect::<Result<Vec<u64>, _>>()
        .map_err(|_| {
            error!("Invalid OID string: {oid}");
            EmrtdError::InvalidOidError()
        })?;
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        error!("Invalid OID string: {oid}");
        return Err(EmrtdError::InvalidOidError());
    }

    let mut out = Vec::new();
    let first = arcs[0] * 40 + arcs[1];
    for arc in core::iter::once(first).chain(arcs[2..].iter().copied()) {
        let mut chunk = vec![u8::try_from(arc & 0x7F).expect("masked to 7 bits")];
        let mut rest = arc >> 7;
        while rest > 0 {
            chunk.push(u8::try_from(rest & 0x7F).expect("masked to 7 bits") | 0x80);
            rest >>= 7;
        }
        chunk.reverse();
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Decodes the content octets of a DER encoded object identifier into its
/// dotted notation.
///
/// # Errors
///
/// * `EmrtdError::InvalidOidError` if the encoding is truncated or empty.
pub fn bytes_to_oid(data: &[u8]) -> Result<String, EmrtdError> {
    if data.is_empty() || data[data.len() - 1] & 0x80 != 0 {
        error!("Invalid OID encoding: {}", bytes2hex(data));
        return Err(EmrtdError::InvalidOidError());
    }

    let mut arcs: Vec<u64> = Vec::new();
    let mut value: u64 = 0;
    for &b in data {
        value = value
            .checked_mul(128)
            .and_then(|v| v.checked_add(u64::from(b & 0x7F)))
            .ok_or_else(|| {
                error!("OID arc overflows: {}", bytes2hex(data));
                EmrtdError::InvalidOidError()
            })?;
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let (a, b) = match value {
                    0..=39 => (0, value),
                    40..=79 => (1, value - 40),
                    _ => (2, value - 80),
                };
                arcs.push(a);
                arcs.push(b);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
    }

    let mut oid = String::new();
    for (i, arc) in arcs.iter().enumerate() {
        if i > 0 {
            oid.push('.');
        }
        write!(&mut oid, "{arc}").expect("Failed to write to string");
    }
    Ok(oid)
}

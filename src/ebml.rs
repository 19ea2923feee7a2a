//! Implements the decoding of EBML coded data.

use crate::element_id::{lookup, ElementId, ElementType, ELEMENT_ID_TO_TYPE};
use crate::reader::MkvReader;
use crate::{EbmlHeader, ParserError, Result};

/// The doc type version this parser supports.
const PARSER_DOC_TYPE_VERSION: u64 = 4;

/// Sentinel for an element whose data size is unknown.
///
/// The true end of such an element is undetermined at parse time and is
/// resolved later by scanning for the next sibling level element.
pub(crate) const UNKNOWN_DATA_SIZE: u64 = u64::MAX;

/// The data an element can contain.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ElementData {
    /// The offset and size of the payload of a master or binary element.
    Location {
        /// Absolute offset of the payload.
        offset: u64,
        /// Size of the payload.
        size: u64,
    },
    /// Unsigned integer.
    Unsigned(u64),
    /// Signed integer.
    Signed(i64),
    /// Float.
    Float(f64),
    /// Date.
    Date(i64),
    /// String.
    String(String),
}

/// Reads a single byte at the given position.
pub(crate) fn parse_u8<R: MkvReader>(r: &mut R, pos: u64) -> Result<u8> {
    let mut bytes = [0_u8];
    r.read(pos, &mut bytes)?;
    Ok(bytes[0])
}

/// Parses a variable length EBML element ID.
///
/// The length marker bits are retained, since element IDs are compared
/// byte for byte including them. Returns the ID and its width in bytes.
pub(crate) fn parse_element_id<R: MkvReader>(r: &mut R, pos: u64) -> Result<(u32, u64)> {
    let first = parse_u8(r, pos)?;
    let len: u64 = match first {
        byte if (byte & 0x80) == 0x80 => 1,
        byte if (byte & 0xC0) == 0x40 => 2,
        byte if (byte & 0xE0) == 0x20 => 3,
        byte if (byte & 0xF0) == 0x10 => 4,
        _ => return Err(ParserError::InvalidElementId),
    };
    let mut id = u32::from(first);
    for i in 1..len {
        let byte = parse_u8(r, pos + i)?;
        id = (id << 8) | u32::from(byte);
    }
    Ok((id, len))
}

/// Parses a variable length integer as used inside block headers and
/// lacing size tables. The length marker bits are stripped.
///
/// Returns the raw value and its width in bytes; the all-ones pattern is
/// *not* mapped to the unknown size sentinel here.
pub(crate) fn parse_vint<R: MkvReader>(r: &mut R, pos: u64) -> Result<(u64, u64)> {
    let first = parse_u8(r, pos)?;
    let leading = u64::from(first.leading_zeros());
    if leading >= 8 {
        return Err(ParserError::InvalidDataSize);
    }
    let len = leading + 1;
    let mut value = u64::from(first) ^ (1 << (8 - len));
    for i in 1..len {
        let byte = parse_u8(r, pos + i)?;
        value = (value << 8) | u64::from(byte);
    }
    Ok((value, len))
}

/// Parses a signed variable length integer as used by EBML lacing.
///
/// The value is range shifted around zero by half the representable range
/// of the encoded width.
pub(crate) fn parse_svint<R: MkvReader>(r: &mut R, pos: u64) -> Result<(i64, u64)> {
    let (value, len) = parse_vint(r, pos)?;
    let bias = (1_i64 << (7 * len - 1)) - 1;
    Ok((value as i64 - bias, len))
}

/// Parses a variable length EBML data size, stripping the marker bits.
///
/// A size whose value is all ones at the encoded width is returned as
/// [`UNKNOWN_DATA_SIZE`]. Returns the size and its width in bytes.
pub(crate) fn parse_data_size<R: MkvReader>(r: &mut R, pos: u64) -> Result<(u64, u64)> {
    let (value, len) = parse_vint(r, pos)?;
    let all_ones = (1_u64 << (7 * len)) - 1;
    if value == all_ones {
        Ok((UNKNOWN_DATA_SIZE, len))
    } else {
        Ok((value, len))
    }
}

/// Parses an element header at the given position.
///
/// Returns the element ID, the declared payload size (possibly
/// [`UNKNOWN_DATA_SIZE`]) and the position of the payload.
pub(crate) fn parse_element_header<R: MkvReader>(
    r: &mut R,
    pos: u64,
) -> Result<(ElementId, u64, u64)> {
    let (id, id_len) = parse_element_id(r, pos)?;
    let (size, size_len) = parse_data_size(r, pos + id_len)?;
    Ok((lookup(id), size, pos + id_len + size_len))
}

/// Parses a big endian unsigned integer of up to 8 bytes.
pub(crate) fn parse_unsigned<R: MkvReader>(r: &mut R, pos: u64, size: u64) -> Result<u64> {
    if size > 8 {
        return Err(ParserError::WrongIntegerSize(size));
    }
    let mut bytes = [0_u8; 8];
    r.read(pos, &mut bytes[8 - size as usize..])?;
    Ok(u64::from_be_bytes(bytes))
}

/// Parses a big endian signed integer of up to 8 bytes, sign extended.
pub(crate) fn parse_signed<R: MkvReader>(r: &mut R, pos: u64, size: u64) -> Result<i64> {
    if size > 8 {
        return Err(ParserError::WrongIntegerSize(size));
    }
    if size == 0 {
        return Ok(0);
    }
    let mut bytes = [0_u8; 8];
    r.read(pos, &mut bytes[8 - size as usize..])?;
    let shift = 64 - 8 * size as u32;
    Ok((u64::from_be_bytes(bytes) as i64) << shift >> shift)
}

/// Parses a big endian signed 16 bit integer, as used for the relative
/// timecode of a block.
pub(crate) fn parse_i16<R: MkvReader>(r: &mut R, pos: u64) -> Result<i16> {
    let mut bytes = [0_u8; 2];
    r.read(pos, &mut bytes)?;
    Ok(i16::from_be_bytes(bytes))
}

/// Parses an IEEE-754 float of 4 or 8 bytes. An empty payload is zero.
pub(crate) fn parse_float<R: MkvReader>(r: &mut R, pos: u64, size: u64) -> Result<f64> {
    match size {
        0 => Ok(0.0),
        4 => {
            let mut bytes = [0_u8; 4];
            r.read(pos, &mut bytes)?;
            Ok(f64::from(f32::from_be_bytes(bytes)))
        }
        8 => {
            let mut bytes = [0_u8; 8];
            r.read(pos, &mut bytes)?;
            Ok(f64::from_be_bytes(bytes))
        }
        _ => Err(ParserError::WrongFloatSize(size)),
    }
}

/// Parses an UTF-8 string, dropping any trailing NUL padding.
pub(crate) fn parse_string<R: MkvReader>(r: &mut R, pos: u64, size: u64) -> Result<String> {
    let mut bytes = vec![0_u8; size as usize];
    r.read(pos, &mut bytes)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes.truncate(end);
    Ok(String::from_utf8(bytes)?)
}

/// Reads a binary payload into an owned buffer.
pub(crate) fn parse_binary<R: MkvReader>(r: &mut R, pos: u64, size: u64) -> Result<Vec<u8>> {
    let mut bytes = vec![0_u8; size as usize];
    r.read(pos, &mut bytes)?;
    Ok(bytes)
}

/// Parses the element at the given position, validating the expected ID,
/// and returns its payload location and size.
pub(crate) fn expect_master<R: MkvReader>(
    r: &mut R,
    pos: u64,
    expected: ElementId,
) -> Result<(u64, u64)> {
    let (id, size, data_pos) = parse_element_header(r, pos)?;
    if id != expected {
        return Err(ParserError::UnexpectedElement {
            expected,
            found: id,
        });
    }
    Ok((data_pos, size))
}

/// Collects all children of a master element into a list of ID and data
/// pairs. Masters and binaries are collected as lazy payload locations.
/// Unknown elements are skipped by their declared size.
pub(crate) fn collect_children<R: MkvReader>(
    r: &mut R,
    start: u64,
    size: u64,
) -> Result<Vec<(ElementId, ElementData)>> {
    let end = start.checked_add(size).ok_or(ParserError::InvalidDataSize)?;
    let mut children = Vec::new();
    let mut pos = start;
    while pos < end {
        let (id, data_size, data_pos) = parse_element_header(r, pos)?;
        if data_size == UNKNOWN_DATA_SIZE {
            return Err(ParserError::InvalidDataSize);
        }
        let data_end = data_pos
            .checked_add(data_size)
            .ok_or(ParserError::InvalidDataSize)?;
        if data_end > end {
            return Err(ParserError::ElementOverflow);
        }
        let element_type = *ELEMENT_ID_TO_TYPE.get(&id).unwrap_or(&ElementType::Unknown);
        match element_type {
            ElementType::Unknown => {
                log::debug!("skipping unknown element inside a master element");
            }
            ElementType::Master | ElementType::Binary => {
                children.push((
                    id,
                    ElementData::Location {
                        offset: data_pos,
                        size: data_size,
                    },
                ));
            }
            ElementType::Unsigned => {
                children.push((id, ElementData::Unsigned(parse_unsigned(r, data_pos, data_size)?)));
            }
            ElementType::Signed => {
                children.push((id, ElementData::Signed(parse_signed(r, data_pos, data_size)?)));
            }
            ElementType::Float => {
                children.push((id, ElementData::Float(parse_float(r, data_pos, data_size)?)));
            }
            ElementType::Date => {
                children.push((id, ElementData::Date(parse_signed(r, data_pos, data_size)?)));
            }
            ElementType::String => {
                children.push((id, ElementData::String(parse_string(r, data_pos, data_size)?)));
            }
        }
        pos = data_end;
    }
    Ok(children)
}

/// Finds a mandatory unsigned integer field in a collected child list.
pub(crate) fn find_unsigned(fields: &[(ElementId, ElementData)], id: ElementId) -> Result<u64> {
    try_find_unsigned(fields, id)?.ok_or(ParserError::MissingElement(id))
}

/// Tries to find an optional unsigned integer field in a collected child list.
pub(crate) fn try_find_unsigned(
    fields: &[(ElementId, ElementData)],
    id: ElementId,
) -> Result<Option<u64>> {
    for (field_id, data) in fields {
        if *field_id == id {
            return if let ElementData::Unsigned(value) = data {
                Ok(Some(*value))
            } else {
                Err(ParserError::UnexpectedDataType(id))
            };
        }
    }
    Ok(None)
}

/// Finds a mandatory string field in a collected child list.
pub(crate) fn find_string(fields: &[(ElementId, ElementData)], id: ElementId) -> Result<String> {
    try_find_string(fields, id)?.ok_or(ParserError::MissingElement(id))
}

/// Tries to find an optional string field in a collected child list.
pub(crate) fn try_find_string(
    fields: &[(ElementId, ElementData)],
    id: ElementId,
) -> Result<Option<String>> {
    for (field_id, data) in fields {
        if *field_id == id {
            return if let ElementData::String(value) = data {
                Ok(Some(value.clone()))
            } else {
                Err(ParserError::UnexpectedDataType(id))
            };
        }
    }
    Ok(None)
}

/// Tries to find an optional float field in a collected child list.
pub(crate) fn try_find_float(
    fields: &[(ElementId, ElementData)],
    id: ElementId,
) -> Result<Option<f64>> {
    for (field_id, data) in fields {
        if *field_id == id {
            return if let ElementData::Float(value) = data {
                Ok(Some(*value))
            } else {
                Err(ParserError::UnexpectedDataType(id))
            };
        }
    }
    Ok(None)
}

/// Tries to find an optional date field in a collected child list.
pub(crate) fn try_find_date(
    fields: &[(ElementId, ElementData)],
    id: ElementId,
) -> Result<Option<i64>> {
    for (field_id, data) in fields {
        if *field_id == id {
            return if let ElementData::Date(value) = data {
                Ok(Some(*value))
            } else {
                Err(ParserError::UnexpectedDataType(id))
            };
        }
    }
    Ok(None)
}

/// Tries to find the payload location of an optional master or binary
/// field in a collected child list.
pub(crate) fn try_find_location(
    fields: &[(ElementId, ElementData)],
    id: ElementId,
) -> Result<Option<(u64, u64)>> {
    for (field_id, data) in fields {
        if *field_id == id {
            return if let ElementData::Location { offset, size } = data {
                Ok(Some((*offset, *size)))
            } else {
                Err(ParserError::UnexpectedDataType(id))
            };
        }
    }
    Ok(None)
}

/// Parses and verifies the EBML document header.
///
/// Returns the header and the position of the first byte after it.
pub(crate) fn parse_ebml_header<R: MkvReader>(r: &mut R, pos: u64) -> Result<(EbmlHeader, u64)> {
    let (data_pos, size) = expect_master(r, pos, ElementId::Ebml)?;
    if size == UNKNOWN_DATA_SIZE {
        return Err(ParserError::InvalidDataSize);
    }
    let fields = collect_children(r, data_pos, size)?;
    let header = EbmlHeader::new(&fields)?;

    if header.doc_type() != "matroska" && header.doc_type() != "webm" {
        return Err(ParserError::UnsupportedDocType(header.doc_type().to_owned()));
    }

    if header.doc_type_read_version() > PARSER_DOC_TYPE_VERSION {
        return Err(ParserError::UnsupportedDocTypeReadVersion(
            header.doc_type_read_version(),
        ));
    }

    Ok((header, data_pos + size))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Encodes a value as a size vint of the given width.
    fn encode_vint(value: u64, len: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len as usize);
        let marked = value | 1 << (7 * len);
        for i in (0..len).rev() {
            bytes.push((marked >> (8 * i)) as u8);
        }
        bytes
    }

    #[test]
    fn test_vint_round_trip() {
        for len in 1..=8_u32 {
            let max = (1_u64 << (7 * len)) - 2;
            for value in [0, 1, 127, max / 2, max] {
                if value > max {
                    continue;
                }
                let data = encode_vint(value, len);
                let mut r: &[u8] = &data;
                let (decoded, width) = parse_data_size(&mut r, 0).unwrap();
                assert_eq!(decoded, value, "value mismatch at width {len}");
                assert_eq!(width, u64::from(len));
            }
        }
    }

    #[test]
    fn test_unknown_size_sentinel() {
        for len in 1..=8_u32 {
            let all_ones = (1_u64 << (7 * len)) - 1;
            let data = encode_vint(all_ones, len);
            let mut r: &[u8] = &data;
            let (decoded, width) = parse_data_size(&mut r, 0).unwrap();
            assert_eq!(decoded, UNKNOWN_DATA_SIZE);
            assert_eq!(width, u64::from(len));

            // The biggest real size at the same width stays distinguishable.
            let data = encode_vint(all_ones - 1, len);
            let mut r: &[u8] = &data;
            let (decoded, _) = parse_data_size(&mut r, 0).unwrap();
            assert_eq!(decoded, all_ones - 1);
            assert_ne!(decoded, UNKNOWN_DATA_SIZE);
        }
    }

    #[test]
    fn test_parse_element_id_keeps_marker_bits() {
        let mut r: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
        assert_eq!(parse_element_id(&mut r, 0).unwrap(), (0x1A45DFA3, 4));

        let mut r: &[u8] = &[0x42, 0x86];
        assert_eq!(parse_element_id(&mut r, 0).unwrap(), (0x4286, 2));

        let mut r: &[u8] = &[0xEC];
        assert_eq!(parse_element_id(&mut r, 0).unwrap(), (0xEC, 1));

        let mut r: &[u8] = &[0x00, 0x80];
        assert!(matches!(
            parse_element_id(&mut r, 0),
            Err(ParserError::InvalidElementId)
        ));
    }

    #[test]
    fn test_parse_unsigned() {
        let mut r: &[u8] = &[0x42, 0x86, 0x81, 0x01];
        let (id, size, data_pos) = parse_element_header(&mut r, 0).unwrap();
        assert_eq!(id, ElementId::EbmlVersion);
        assert_eq!(parse_unsigned(&mut r, data_pos, size).unwrap(), 1);
    }

    #[test]
    fn test_parse_signed() {
        let mut r: &[u8] = &[0xFF, 0xFB];
        assert_eq!(parse_signed(&mut r, 0, 2).unwrap(), -5);
        let mut r: &[u8] = &[0x05];
        assert_eq!(parse_signed(&mut r, 0, 1).unwrap(), 5);
    }

    #[test]
    fn test_parse_i16() {
        let mut r: &[u8] = &[0xFF, 0xFB];
        assert_eq!(parse_i16(&mut r, 0).unwrap(), -5);
    }

    #[test]
    fn test_parse_float_32() {
        let mut r: &[u8] = &[0x43, 0x1C, 0x20, 0x07];
        let value = parse_float(&mut r, 0, 4).unwrap();
        assert!((value - 156.1251).abs() < 0.00001);
    }

    #[test]
    fn test_parse_float_64() {
        let mut r: &[u8] = &[0x40, 0xA9, 0xE0, 0x43, 0x30, 0xBC, 0x60, 0x6E];
        let value = parse_float(&mut r, 0, 8).unwrap();
        assert!((value - 3312.1312312).abs() < 0.00001);
    }

    #[test]
    fn test_parse_string() {
        let data: Vec<u8> = vec![0x6D, 0x61, 0x74, 0x72, 0x6F, 0x73, 0x6B, 0x61, 0x00, 0x00];
        let mut r: &[u8] = &data;
        assert_eq!(parse_string(&mut r, 0, 10).unwrap(), "matroska");
    }

    #[test]
    fn test_parse_svint() {
        // 1 byte: bias 63.
        let mut r: &[u8] = &[0x80];
        assert_eq!(parse_svint(&mut r, 0).unwrap(), (-63, 1));
        // 2 bytes: bias 8191.
        let mut r: &[u8] = &[0x40, 0x00];
        assert_eq!(parse_svint(&mut r, 0).unwrap(), (-8191, 2));
    }

    #[test]
    fn test_insufficient_data() {
        let mut r: &[u8] = &[0x42];
        assert!(matches!(
            parse_element_id(&mut r, 0),
            Err(ParserError::InsufficientData)
        ));
    }
}

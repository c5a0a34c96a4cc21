//! HDF5 attribute message (message type 0x000C).
//!
//! An attribute message bundles the attribute name, its datatype and
//! dataspace messages, and the raw value bytes.
//!
//! # Layout
//!
//! ```text
//! version 1:  version(1) reserved(1) name_size(2) datatype_size(2) dataspace_size(2)
//!             name, datatype and dataspace each padded to 8 bytes, then value
//! version 2:  version(1) flags(1) sizes(6), unpadded fields, then value
//! version 3:  as version 2 plus name encoding(1) before the name
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::dataspace::Dataspace;
use crate::datatype::{CharacterSet, Datatype, ensure_len};
use crate::error::FormatError;

/// A decoded attribute message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMessage {
    /// Attribute name, without the NUL terminator.
    pub name: String,
    /// Encoding of the name (recorded by version 3 only).
    pub name_charset: CharacterSet,
    /// Element type of the value.
    pub datatype: Datatype,
    /// Shape of the value.
    pub dataspace: Dataspace,
    /// Raw value bytes in file layout.
    pub value: Vec<u8>,
}

impl AttributeMessage {
    /// Creates a message whose value is all zero bytes.
    ///
    /// Zero bytes decode as 0 for numbers, an empty string for fixed strings
    /// and an empty (heap-less) reference for variable-length strings.
    pub fn zeroed(name: &str, datatype: Datatype, dataspace: Dataspace) -> Self {
        let len = value_len(&datatype, &dataspace);
        let name_charset = if name.is_ascii() {
            CharacterSet::Ascii
        } else {
            CharacterSet::Utf8
        };
        Self {
            name: name.to_string(),
            name_charset,
            datatype,
            dataspace,
            value: vec![0u8; len],
        }
    }

    /// Number of value bytes this message must carry.
    pub fn expected_value_len(&self) -> usize {
        value_len(&self.datatype, &self.dataspace)
    }

    /// Size [`AttributeMessage::encode`] would produce for these fields,
    /// computed without building the value.
    ///
    /// Saturates at `usize::MAX` when the value size does not fit.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidAttributeVersion`] for versions other
    /// than 1 and 3.
    pub fn encoded_len(
        name: &str,
        datatype: &Datatype,
        dataspace: &Dataspace,
        version: u8,
    ) -> Result<usize, FormatError> {
        let name_len = name.len() + 1;
        let datatype_len = datatype.encode().len();
        let dataspace_len = dataspace.encode().len();
        let fields = match version {
            1 => 8 + pad8(name_len) + pad8(datatype_len) + pad8(dataspace_len),
            3 => 9 + name_len + datatype_len + dataspace_len,
            other => return Err(FormatError::InvalidAttributeVersion(other)),
        };
        Ok(fields.saturating_add(value_len(datatype, dataspace)))
    }

    /// Serializes the message in the given version (1 or 3).
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidAttributeVersion`] for other versions and
    /// [`FormatError::InvalidDatatype`] if a field is too large for its
    /// 16-bit size slot.
    pub fn encode(&self, version: u8) -> Result<Vec<u8>, FormatError> {
        let mut name = self.name.as_bytes().to_vec();
        name.push(0);
        let datatype = self.datatype.encode();
        let dataspace = self.dataspace.encode();

        let name_size = size_u16(name.len(), "name")?;
        let datatype_size = size_u16(datatype.len(), "datatype")?;
        let dataspace_size = size_u16(dataspace.len(), "dataspace")?;

        let mut buf = Vec::with_capacity(16 + name.len() + datatype.len() + dataspace.len() + self.value.len());
        match version {
            1 => {
                buf.extend_from_slice(&[1, 0]);
                buf.extend_from_slice(&name_size.to_le_bytes());
                buf.extend_from_slice(&datatype_size.to_le_bytes());
                buf.extend_from_slice(&dataspace_size.to_le_bytes());
                for field in [&name, &datatype, &dataspace] {
                    buf.extend_from_slice(field);
                    buf.resize(buf.len() + pad8(field.len()) - field.len(), 0);
                }
            }
            3 => {
                buf.extend_from_slice(&[3, 0]);
                buf.extend_from_slice(&name_size.to_le_bytes());
                buf.extend_from_slice(&datatype_size.to_le_bytes());
                buf.extend_from_slice(&dataspace_size.to_le_bytes());
                buf.push(self.name_charset.code());
                buf.extend_from_slice(&name);
                buf.extend_from_slice(&datatype);
                buf.extend_from_slice(&dataspace);
            }
            other => return Err(FormatError::InvalidAttributeVersion(other)),
        }
        buf.extend_from_slice(&self.value);
        Ok(buf)
    }

    /// Parses an attribute message of version 1, 2 or 3, returning the
    /// message and bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if the message is truncated, has an unknown
    /// version, or carries fewer value bytes than its type and shape need.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FormatError> {
        ensure_len(data, 0, 8)?;
        let version = data[0];
        let name_size = usize::from(LittleEndian::read_u16(&data[2..4]));
        let datatype_size = usize::from(LittleEndian::read_u16(&data[4..6]));
        let dataspace_size = usize::from(LittleEndian::read_u16(&data[6..8]));

        let (padded, mut pos, name_charset) = match version {
            1 => (true, 8, CharacterSet::Ascii),
            2 => (false, 8, CharacterSet::Ascii),
            3 => {
                ensure_len(data, 8, 1)?;
                (false, 9, CharacterSet::from_code(data[8])?)
            }
            other => return Err(FormatError::InvalidAttributeVersion(other)),
        };
        let advance = |size: usize| if padded { pad8(size) } else { size };

        ensure_len(data, pos, name_size)?;
        let name = extract_name(&data[pos..pos + name_size])?;
        pos += advance(name_size);

        ensure_len(data, pos, datatype_size)?;
        let (datatype, _) = Datatype::decode(&data[pos..pos + datatype_size])?;
        pos += advance(datatype_size);

        ensure_len(data, pos, dataspace_size)?;
        let (dataspace, _) = Dataspace::decode(&data[pos..pos + dataspace_size])?;
        pos += advance(dataspace_size);

        let len = value_len(&datatype, &dataspace);
        ensure_len(data, pos, len)?;
        let value = data[pos..pos + len].to_vec();

        let message = Self {
            name,
            name_charset,
            datatype,
            dataspace,
            value,
        };
        Ok((message, pos + len))
    }
}

fn value_len(datatype: &Datatype, dataspace: &Dataspace) -> usize {
    usize::try_from(dataspace.num_elements())
        .unwrap_or(usize::MAX)
        .saturating_mul(datatype.size())
}

fn size_u16(len: usize, field: &str) -> Result<u16, FormatError> {
    u16::try_from(len)
        .map_err(|_| FormatError::InvalidDatatype(format!("{field} of {len} bytes exceeds 65535")))
}

/// Round up to the next multiple of 8.
fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

fn extract_name(bytes: &[u8]) -> Result<String, FormatError> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|_| FormatError::InvalidDatatype("attribute name is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AttributeMessage {
        let mut msg = AttributeMessage::zeroed(
            "scale",
            Datatype::native::<i32>(),
            Dataspace::simple(&[3]).unwrap(),
        );
        msg.value = [1i32, -2, 3].iter().flat_map(|v| v.to_ne_bytes()).collect();
        msg
    }

    #[test]
    fn test_zeroed_value_size() {
        let msg = AttributeMessage::zeroed(
            "m",
            Datatype::fixed_string(5),
            Dataspace::simple(&[2, 3]).unwrap(),
        );
        assert_eq!(msg.value.len(), 30);
        assert!(msg.value.iter().all(|&b| b == 0));
        assert_eq!(msg.expected_value_len(), 30);
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        let msg = sample();
        for version in [1, 3] {
            let len =
                AttributeMessage::encoded_len(&msg.name, &msg.datatype, &msg.dataspace, version)
                    .unwrap();
            assert_eq!(len, msg.encode(version).unwrap().len());
        }
        assert_eq!(
            AttributeMessage::encoded_len("x", &msg.datatype, &msg.dataspace, 2).unwrap_err(),
            FormatError::InvalidAttributeVersion(2)
        );
    }

    #[test]
    fn test_encoded_len_of_huge_value_saturates_without_allocating() {
        let space = Dataspace::Simple {
            dims: vec![u64::MAX, 2],
            max_dims: None,
        };
        let len = AttributeMessage::encoded_len("big", &Datatype::native::<u64>(), &space, 3).unwrap();
        assert_eq!(len, usize::MAX);

        let space = Dataspace::simple(&[1 << 36]).unwrap();
        let len = AttributeMessage::encoded_len("big", &Datatype::native::<u8>(), &space, 3).unwrap();
        assert!(len > 1 << 36);
    }

    #[test]
    fn test_version_1_pads_fields_to_eight_bytes() {
        let msg = sample();
        let bytes = msg.encode(1).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(LittleEndian::read_u16(&bytes[2..4]), 6); // "scale\0"
        // name occupies 8 bytes after the 8-byte header
        assert_eq!(&bytes[8..14], b"scale\0");
        assert_eq!(&bytes[14..16], &[0, 0]);
        assert_eq!(AttributeMessage::decode(&bytes).unwrap(), (msg, bytes.len()));
    }

    #[test]
    fn test_version_3_records_name_charset() {
        let mut msg = AttributeMessage::zeroed("größe", Datatype::native::<f64>(), Dataspace::scalar());
        assert_eq!(msg.name_charset, CharacterSet::Utf8);
        msg.value = 2.5f64.to_ne_bytes().to_vec();
        let bytes = msg.encode(3).unwrap();
        assert_eq!(bytes[8], 1);
        assert_eq!(AttributeMessage::decode(&bytes).unwrap(), (msg, bytes.len()));
    }

    #[test]
    fn test_decode_version_2() {
        let msg = sample();
        let mut bytes = msg.encode(3).unwrap();
        bytes.remove(8);
        bytes[0] = 2;
        let (decoded, consumed) = AttributeMessage::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.name, "scale");
        assert_eq!(decoded.value, msg.value);
    }

    #[test]
    fn test_short_value_rejected() {
        let bytes = sample().encode(3).unwrap();
        assert!(matches!(
            AttributeMessage::decode(&bytes[..bytes.len() - 1]),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_consumed_excludes_trailing_bytes() {
        let mut bytes = sample().encode(3).unwrap();
        let len = bytes.len();
        bytes.extend_from_slice(&[0xAA; 5]);
        let (_, consumed) = AttributeMessage::decode(&bytes).unwrap();
        assert_eq!(consumed, len);
    }

    #[test]
    fn test_unknown_version_rejected() {
        assert_eq!(
            sample().encode(2).unwrap_err(),
            FormatError::InvalidAttributeVersion(2)
        );
        let mut bytes = sample().encode(1).unwrap();
        bytes[0] = 9;
        assert_eq!(
            AttributeMessage::decode(&bytes).unwrap_err(),
            FormatError::InvalidAttributeVersion(9)
        );
    }
}

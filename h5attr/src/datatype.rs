//! HDF5 datatype message (message type 0x0003).
//!
//! Only the classes that attribute values use are modelled: fixed-point
//! integers (class 0), IEEE floating point (class 1), fixed-length strings
//! (class 3) and variable-length strings (class 9).
//!
//! # Encoding
//!
//! ```text
//! byte 0        class (low nibble) | version (high nibble)
//! bytes 1..4    24-bit class bit field
//! bytes 4..8    element size (u32, little-endian)
//! bytes 8..     class properties
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::convert::H5Type;
use crate::error::FormatError;

/// In-file size of a variable-length reference: length(4) + collection(8) + index(4).
pub const VL_REFERENCE_SIZE: usize = 16;

const CLASS_FIXED_POINT: u8 = 0;
const CLASS_FLOATING_POINT: u8 = 1;
const CLASS_STRING: u8 = 3;
const CLASS_VARIABLE_LENGTH: u8 = 9;

/// Datatype message version written by [`Datatype::encode`].
const DATATYPE_VERSION: u8 = 1;

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian {
    /// The byte order of the machine running this code.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }
}

/// How unused bytes of a string element are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringPadding {
    /// Terminated by a NUL; bytes after it are unspecified.
    NullTerminate,
    /// Padded with NULs, no terminator required.
    NullPad,
    /// Padded with spaces.
    SpacePad,
}

impl StringPadding {
    fn code(self) -> u8 {
        match self {
            Self::NullTerminate => 0,
            Self::NullPad => 1,
            Self::SpacePad => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self, FormatError> {
        match code {
            0 => Ok(Self::NullTerminate),
            1 => Ok(Self::NullPad),
            2 => Ok(Self::SpacePad),
            _ => Err(FormatError::InvalidStringPadding(code)),
        }
    }
}

/// Character encoding of string data and attribute names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterSet {
    /// 7-bit ASCII.
    #[default]
    Ascii,
    /// UTF-8.
    Utf8,
}

impl CharacterSet {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Ascii => 0,
            Self::Utf8 => 1,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, FormatError> {
        match code {
            0 => Ok(Self::Ascii),
            1 => Ok(Self::Utf8),
            _ => Err(FormatError::InvalidCharacterSet(code)),
        }
    }
}

/// An attribute element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// Two's complement or unsigned integer of 1, 2, 4 or 8 bytes.
    Integer {
        /// Element size in bytes.
        size: usize,
        /// Byte order.
        order: Endian,
        /// Whether the value is signed.
        signed: bool,
    },
    /// IEEE 754 binary32 or binary64.
    Float {
        /// Element size in bytes (4 or 8).
        size: usize,
        /// Byte order.
        order: Endian,
    },
    /// String of exactly `size` bytes per element.
    FixedString {
        /// Element size in bytes.
        size: usize,
        /// Padding of unused bytes.
        padding: StringPadding,
        /// Character set.
        charset: CharacterSet,
    },
    /// String whose body lives in the global heap.
    VarLenString {
        /// Padding recorded for compatibility; bodies are stored unpadded.
        padding: StringPadding,
        /// Character set.
        charset: CharacterSet,
    },
}

impl Datatype {
    /// The memory datatype of a native Rust scalar.
    pub fn native<T: H5Type>() -> Self {
        T::type_descriptor()
    }

    /// A NUL-terminated ASCII string type of `size` bytes per element.
    pub fn fixed_string(size: usize) -> Self {
        Self::FixedString {
            size,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Ascii,
        }
    }

    /// A variable-length ASCII string type.
    pub fn varlen_string() -> Self {
        Self::VarLenString {
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Ascii,
        }
    }

    /// Returns a copy with the character set replaced. Numeric types are unchanged.
    #[must_use]
    pub fn with_charset(self, charset: CharacterSet) -> Self {
        match self {
            Self::FixedString { size, padding, .. } => Self::FixedString {
                size,
                padding,
                charset,
            },
            Self::VarLenString { padding, .. } => Self::VarLenString { padding, charset },
            other => other,
        }
    }

    /// Returns a copy with the string padding replaced. Numeric types are unchanged.
    #[must_use]
    pub fn with_padding(self, padding: StringPadding) -> Self {
        match self {
            Self::FixedString { size, charset, .. } => Self::FixedString {
                size,
                padding,
                charset,
            },
            Self::VarLenString { charset, .. } => Self::VarLenString { padding, charset },
            other => other,
        }
    }

    /// Size in bytes of one element as stored in an attribute value.
    pub fn size(&self) -> usize {
        match self {
            Self::Integer { size, .. } | Self::Float { size, .. } | Self::FixedString { size, .. } => {
                *size
            }
            Self::VarLenString { .. } => VL_REFERENCE_SIZE,
        }
    }

    /// Whether this is a variable-length string type.
    pub fn is_variable_str(&self) -> bool {
        matches!(self, Self::VarLenString { .. })
    }

    /// Whether this is a fixed- or variable-length string type.
    pub fn is_string(&self) -> bool {
        matches!(self, Self::FixedString { .. } | Self::VarLenString { .. })
    }

    /// Character set of a string type, `None` for numeric types.
    pub fn charset(&self) -> Option<CharacterSet> {
        match self {
            Self::FixedString { charset, .. } | Self::VarLenString { charset, .. } => Some(*charset),
            _ => None,
        }
    }

    /// Checks that the type describes elements the library can store and
    /// convert: integers of 1, 2, 4 or 8 bytes, IEEE floats of 4 or 8 bytes,
    /// and fixed strings of 1 to `u32::MAX` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidDatatype`] naming the offending size.
    pub fn validate(&self) -> Result<(), FormatError> {
        match self {
            Self::Integer { size, .. } if !matches!(size, 1 | 2 | 4 | 8) => Err(
                FormatError::InvalidDatatype(format!("integer of size {size}")),
            ),
            Self::Float { size, .. } if !matches!(size, 4 | 8) => Err(
                FormatError::InvalidDatatype(format!("floating point of size {size}")),
            ),
            Self::FixedString { size, .. } if *size == 0 || u32::try_from(*size).is_err() => Err(
                FormatError::InvalidDatatype(format!("fixed-length string of size {size}")),
            ),
            _ => Ok(()),
        }
    }

    /// Serializes the datatype message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        let class = match self {
            Self::Integer { .. } => CLASS_FIXED_POINT,
            Self::Float { .. } => CLASS_FLOATING_POINT,
            Self::FixedString { .. } => CLASS_STRING,
            Self::VarLenString { .. } => CLASS_VARIABLE_LENGTH,
        };
        buf.push(class | (DATATYPE_VERSION << 4));

        match self {
            Self::Integer {
                size,
                order,
                signed,
            } => {
                let mut bf0 = order_bit(*order);
                if *signed {
                    bf0 |= 0x08;
                }
                buf.extend_from_slice(&[bf0, 0, 0]);
                push_u32(&mut buf, *size);
                buf.extend_from_slice(&0u16.to_le_bytes());
                push_u16(&mut buf, size * 8);
            }
            Self::Float { size, order } => {
                let layout = FloatLayout::for_size(*size);
                // Mantissa normalization 2: the most significant bit is implied.
                let bf0 = order_bit(*order) | 0x20;
                buf.extend_from_slice(&[bf0, layout.sign_location, 0]);
                push_u32(&mut buf, *size);
                buf.extend_from_slice(&0u16.to_le_bytes());
                push_u16(&mut buf, size * 8);
                buf.extend_from_slice(&[
                    layout.exponent_location,
                    layout.exponent_size,
                    layout.mantissa_location,
                    layout.mantissa_size,
                ]);
                buf.extend_from_slice(&layout.exponent_bias.to_le_bytes());
            }
            Self::FixedString {
                size,
                padding,
                charset,
            } => {
                buf.extend_from_slice(&[padding.code() | (charset.code() << 4), 0, 0]);
                push_u32(&mut buf, *size);
            }
            Self::VarLenString { padding, charset } => {
                // Type 1 (string) in bits 0-3, padding in bits 4-7.
                buf.extend_from_slice(&[0x01 | (padding.code() << 4), charset.code(), 0]);
                push_u32(&mut buf, VL_REFERENCE_SIZE);
                let base = Self::Integer {
                    size: 1,
                    order: Endian::Little,
                    signed: false,
                };
                buf.extend_from_slice(&base.encode());
            }
        }
        buf
    }

    /// Parses a datatype message, returning the type and the bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] for truncated input, unknown versions, classes
    /// other than integer, float, string and variable-length string, and
    /// inconsistent properties.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FormatError> {
        ensure_len(data, 0, 8)?;
        let class = data[0] & 0x0F;
        let version = data[0] >> 4;
        let (bf0, bf1) = (data[1], data[2]);
        let size = LittleEndian::read_u32(&data[4..8]) as usize;
        let mut pos = 8;

        if !(1..=3).contains(&version) {
            return Err(FormatError::InvalidDatatypeVersion { class, version });
        }

        let datatype = match class {
            CLASS_FIXED_POINT => {
                ensure_len(data, pos, 4)?;
                let bit_offset = LittleEndian::read_u16(&data[pos..pos + 2]);
                let precision = usize::from(LittleEndian::read_u16(&data[pos + 2..pos + 4]));
                pos += 4;
                if !matches!(size, 1 | 2 | 4 | 8) || bit_offset != 0 || precision != size * 8 {
                    return Err(FormatError::InvalidDatatype(format!(
                        "integer of size {size}, offset {bit_offset}, precision {precision}"
                    )));
                }
                Self::Integer {
                    size,
                    order: order_from_bit(bf0),
                    signed: bf0 & 0x08 != 0,
                }
            }
            CLASS_FLOATING_POINT => {
                ensure_len(data, pos, 12)?;
                if bf0 & 0x40 != 0 {
                    return Err(FormatError::InvalidDatatype(
                        "VAX floating point byte order".to_string(),
                    ));
                }
                if !matches!(size, 4 | 8) {
                    return Err(FormatError::InvalidDatatype(format!(
                        "floating point of size {size}"
                    )));
                }
                let expected = FloatLayout::for_size(size);
                let found = FloatLayout {
                    sign_location: bf1,
                    exponent_location: data[pos + 4],
                    exponent_size: data[pos + 5],
                    mantissa_location: data[pos + 6],
                    mantissa_size: data[pos + 7],
                    exponent_bias: LittleEndian::read_u32(&data[pos + 8..pos + 12]),
                };
                pos += 12;
                if found != expected {
                    return Err(FormatError::InvalidDatatype(format!(
                        "non-IEEE floating point layout {found:?}"
                    )));
                }
                Self::Float {
                    size,
                    order: order_from_bit(bf0),
                }
            }
            CLASS_STRING => Self::FixedString {
                size,
                padding: StringPadding::from_code(bf0 & 0x0F)?,
                charset: CharacterSet::from_code(bf0 >> 4)?,
            },
            CLASS_VARIABLE_LENGTH => {
                if bf0 & 0x0F != 0x01 {
                    return Err(FormatError::InvalidDatatype(
                        "variable-length sequences are not supported".to_string(),
                    ));
                }
                let padding = StringPadding::from_code(bf0 >> 4)?;
                let charset = CharacterSet::from_code(bf1 & 0x0F)?;
                let (_base, consumed) = Self::decode(&data[pos..])?;
                pos += consumed;
                Self::VarLenString { padding, charset }
            }
            other => return Err(FormatError::UnsupportedDatatypeClass(other)),
        };
        datatype.validate()?;

        Ok((datatype, pos))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = |o: &Endian| match o {
            Endian::Little => "le",
            Endian::Big => "be",
        };
        match self {
            Self::Integer {
                size,
                order: o,
                signed,
            } => {
                let prefix = if *signed { "int" } else { "uint" };
                write!(f, "{prefix}{} ({})", size * 8, order(o))
            }
            Self::Float { size, order: o } => write!(f, "float{} ({})", size * 8, order(o)),
            Self::FixedString {
                size,
                padding,
                charset,
            } => write!(f, "string[{size}] ({padding:?}, {charset:?})"),
            Self::VarLenString { charset, .. } => write!(f, "vlen string ({charset:?})"),
        }
    }
}

/// IEEE bit layout recorded in a floating-point datatype message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FloatLayout {
    sign_location: u8,
    exponent_location: u8,
    exponent_size: u8,
    mantissa_location: u8,
    mantissa_size: u8,
    exponent_bias: u32,
}

impl FloatLayout {
    fn for_size(size: usize) -> Self {
        if size == 4 {
            Self {
                sign_location: 31,
                exponent_location: 23,
                exponent_size: 8,
                mantissa_location: 0,
                mantissa_size: 23,
                exponent_bias: 127,
            }
        } else {
            Self {
                sign_location: 63,
                exponent_location: 52,
                exponent_size: 11,
                mantissa_location: 0,
                mantissa_size: 52,
                exponent_bias: 1023,
            }
        }
    }
}

fn order_bit(order: Endian) -> u8 {
    match order {
        Endian::Little => 0,
        Endian::Big => 1,
    }
}

fn order_from_bit(bf0: u8) -> Endian {
    if bf0 & 0x01 == 0 {
        Endian::Little
    } else {
        Endian::Big
    }
}

#[allow(clippy::cast_possible_truncation)] // element sizes are bounded by u32 in the format
fn push_u32(buf: &mut Vec<u8>, value: usize) {
    buf.extend_from_slice(&(value as u32).to_le_bytes());
}

#[allow(clippy::cast_possible_truncation)] // precision of at most 64 bits
fn push_u16(buf: &mut Vec<u8>, value: usize) {
    buf.extend_from_slice(&(value as u16).to_le_bytes());
}

pub(crate) fn ensure_len(data: &[u8], offset: usize, needed: usize) -> Result<(), FormatError> {
    match offset.checked_add(needed) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(FormatError::UnexpectedEof {
            expected: offset.saturating_add(needed),
            available: data.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Datatype {
        let (dt, consumed) = Datatype::decode(bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        dt
    }

    #[test]
    fn test_integer_encoding_layout() {
        let dt = Datatype::Integer {
            size: 4,
            order: Endian::Big,
            signed: true,
        };
        let bytes = dt.encode();
        assert_eq!(bytes[0], 0x10); // class 0, version 1
        assert_eq!(bytes[1], 0x09); // big-endian + signed
        assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
        assert_eq!(&bytes[10..12], &32u16.to_le_bytes());
        assert_eq!(decode_all(&bytes), dt);
    }

    #[test]
    fn test_native_float_matches_ieee_layout() {
        let dt = Datatype::native::<f64>();
        let bytes = dt.encode();
        assert_eq!(bytes[0] & 0x0F, 1);
        assert_eq!(bytes[2], 63); // sign bit location
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[16..20], &1023u32.to_le_bytes());
        assert_eq!(decode_all(&bytes), dt);
    }

    #[test]
    fn test_fixed_string_bitfield() {
        let dt = Datatype::fixed_string(12)
            .with_padding(StringPadding::SpacePad)
            .with_charset(CharacterSet::Utf8);
        let bytes = dt.encode();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[1], 0x12);
        assert_eq!(dt.size(), 12);
        assert_eq!(decode_all(&bytes), dt);
    }

    #[test]
    fn test_varlen_string_carries_base_type() {
        let dt = Datatype::varlen_string().with_charset(CharacterSet::Utf8);
        let bytes = dt.encode();
        assert_eq!(bytes[0] & 0x0F, 9);
        assert_eq!(bytes[2], 1); // utf-8
        assert_eq!(bytes.len(), 8 + 12);
        assert!(dt.is_variable_str());
        assert_eq!(dt.size(), VL_REFERENCE_SIZE);
        assert_eq!(decode_all(&bytes), dt);
    }

    #[test]
    fn test_decode_rejects_unsupported_class() {
        let mut bytes = Datatype::native::<u8>().encode();
        bytes[0] = 0x16; // compound
        assert_eq!(
            Datatype::decode(&bytes).unwrap_err(),
            FormatError::UnsupportedDatatypeClass(6)
        );
    }

    #[test]
    fn test_decode_rejects_bad_version_and_truncation() {
        let mut bytes = Datatype::native::<i16>().encode();
        bytes[0] = 0x50;
        assert!(matches!(
            Datatype::decode(&bytes),
            Err(FormatError::InvalidDatatypeVersion { class: 0, version: 5 })
        ));
        let bytes = Datatype::native::<i16>().encode();
        assert!(matches!(
            Datatype::decode(&bytes[..9]),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_vax_and_odd_integer_sizes() {
        let mut bytes = Datatype::native::<f32>().encode();
        bytes[1] |= 0x40;
        assert!(matches!(
            Datatype::decode(&bytes),
            Err(FormatError::InvalidDatatype(_))
        ));

        let mut bytes = Datatype::native::<u32>().encode();
        bytes[4] = 3;
        assert!(matches!(
            Datatype::decode(&bytes),
            Err(FormatError::InvalidDatatype(_))
        ));
    }

    #[test]
    fn test_validate_sizes() {
        assert!(Datatype::native::<u8>().validate().is_ok());
        assert!(Datatype::native::<f32>().validate().is_ok());
        assert!(Datatype::fixed_string(1).validate().is_ok());
        assert!(Datatype::varlen_string().validate().is_ok());

        for size in [0, 3, 16] {
            let dtype = Datatype::Integer {
                size,
                order: Endian::Little,
                signed: true,
            };
            assert!(matches!(dtype.validate(), Err(FormatError::InvalidDatatype(_))), "{size}");
        }
        let half = Datatype::Float {
            size: 2,
            order: Endian::Big,
        };
        assert!(matches!(half.validate(), Err(FormatError::InvalidDatatype(_))));
        assert!(matches!(
            Datatype::fixed_string(0).validate(),
            Err(FormatError::InvalidDatatype(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_fixed_string() {
        let bytes = Datatype::fixed_string(0).encode();
        assert!(matches!(
            Datatype::decode(&bytes),
            Err(FormatError::InvalidDatatype(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Datatype::native::<u16>().to_string(), format!("uint16 ({})", if cfg!(target_endian = "little") { "le" } else { "be" }));
        assert_eq!(Datatype::varlen_string().to_string(), "vlen string (Ascii)");
    }
}

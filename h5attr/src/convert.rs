//! Conversion between memory and file representations of attribute values.
//!
//! Reading an attribute converts its stored bytes from the *file type* to the
//! caller's *memory type*; writing converts the other way. Numbers convert
//! between any integer and float layout as long as the value fits; fixed
//! strings convert between sizes, paddings and character sets. Conversions
//! that would lose a value fail with [`ConversionError::Overflow`] rather
//! than clamping.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::datatype::{CharacterSet, Datatype, Endian, StringPadding};
use crate::error::ConversionError;

/// A native Rust scalar that can be stored in an attribute.
pub trait H5Type: Copy + Sized + 'static {
    /// The memory datatype describing `Self`.
    fn type_descriptor() -> Datatype;

    /// Decodes one value from native-endian bytes of exactly `size_of::<Self>()`.
    fn from_native_bytes(bytes: &[u8]) -> Self;

    /// Appends the native-endian bytes of `self` to `out`.
    fn append_native_bytes(self, out: &mut Vec<u8>);
}

macro_rules! impl_h5type_integer {
    ($($ty:ty => $signed:expr),* $(,)?) => {$(
        impl H5Type for $ty {
            fn type_descriptor() -> Datatype {
                Datatype::Integer {
                    size: std::mem::size_of::<$ty>(),
                    order: Endian::native(),
                    signed: $signed,
                }
            }

            fn from_native_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_ne_bytes(raw)
            }

            fn append_native_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

macro_rules! impl_h5type_float {
    ($($ty:ty),* $(,)?) => {$(
        impl H5Type for $ty {
            fn type_descriptor() -> Datatype {
                Datatype::Float {
                    size: std::mem::size_of::<$ty>(),
                    order: Endian::native(),
                }
            }

            fn from_native_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_ne_bytes(raw)
            }

            fn append_native_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

impl_h5type_integer! {
    i8 => true, i16 => true, i32 => true, i64 => true,
    u8 => false, u16 => false, u32 => false, u64 => false,
}
impl_h5type_float!(f32, f64);

/// Encodes native values into a memory buffer of `T`'s datatype.
pub fn encode_values<T: H5Type>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        value.append_native_bytes(&mut out);
    }
    out
}

/// Decodes a memory buffer of `T`'s datatype into native values.
pub fn decode_values<T: H5Type>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(T::from_native_bytes)
        .collect()
}

/// Converts `count` elements from `src_type` layout to `dst_type` layout.
///
/// # Errors
///
/// - [`ConversionError::InvalidType`] if either type fails [`Datatype::validate`]
/// - [`ConversionError::BufferSize`] if `src` is not `count × src_type.size()` bytes
/// - [`ConversionError::Unsupported`] for string↔number and variable-length types
/// - [`ConversionError::Overflow`] if a value does not fit the destination
/// - string errors from [`encode_fixed_strings`] for fixed-string targets
pub fn convert(
    src: &[u8],
    src_type: &Datatype,
    dst_type: &Datatype,
    count: usize,
) -> Result<Vec<u8>, ConversionError> {
    src_type.validate()?;
    dst_type.validate()?;
    let expected = count.saturating_mul(src_type.size());
    if src.len() != expected {
        return Err(ConversionError::BufferSize {
            expected,
            found: src.len(),
        });
    }
    if src_type.is_variable_str() || dst_type.is_variable_str() {
        return Err(unsupported(src_type, dst_type));
    }
    if src_type == dst_type {
        return Ok(src.to_vec());
    }

    let mut out = Vec::with_capacity(count.saturating_mul(dst_type.size()));
    match (src_type, dst_type) {
        (
            Datatype::Integer {
                size: src_size,
                order: src_order,
                signed: src_signed,
            },
            Datatype::Integer {
                size,
                order,
                signed,
            },
        ) => {
            for element in src.chunks_exact(*src_size) {
                let value = read_int(element, *src_order, *src_signed);
                check_int_range(value, *size, *signed, dst_type)?;
                write_int(value, *size, *order, &mut out);
            }
        }
        (
            Datatype::Float {
                size: src_size,
                order: src_order,
            },
            Datatype::Float { size, order },
        ) => {
            for element in src.chunks_exact(*src_size) {
                let value = read_float(element, *src_order);
                write_float(value, *size, *order, &mut out, dst_type)?;
            }
        }
        (
            Datatype::Integer {
                size: src_size,
                order: src_order,
                signed: src_signed,
            },
            Datatype::Float { size, order },
        ) => {
            for element in src.chunks_exact(*src_size) {
                #[allow(clippy::cast_precision_loss)] // matches the library's int→float conversion
                let value = read_int(element, *src_order, *src_signed) as f64;
                write_float(value, *size, *order, &mut out, dst_type)?;
            }
        }
        (
            Datatype::Float {
                size: src_size,
                order: src_order,
            },
            Datatype::Integer {
                size,
                order,
                signed,
            },
        ) => {
            for element in src.chunks_exact(*src_size) {
                let value = float_to_int(read_float(element, *src_order), *size, *signed, dst_type)?;
                write_int(value, *size, *order, &mut out);
            }
        }
        (
            Datatype::FixedString {
                size: src_size,
                padding: src_padding,
                ..
            },
            Datatype::FixedString {
                size,
                padding,
                charset,
            },
        ) => {
            let strings = decode_fixed_strings(src, *src_size, *src_padding, count)?;
            out = encode_fixed_strings(&strings, *size, *padding, *charset)?;
        }
        _ => return Err(unsupported(src_type, dst_type)),
    }
    Ok(out)
}

/// Encodes strings as fixed-length elements of `size` bytes.
///
/// The output buffer starts zeroed; space-padded types fill the unused tail
/// of each element with spaces.
///
/// # Errors
///
/// - [`ConversionError::StringTooLong`] if a string exceeds `size` bytes
/// - [`ConversionError::NonAscii`] if `charset` is ASCII and a string is not
pub fn encode_fixed_strings<S: AsRef<str>>(
    values: &[S],
    size: usize,
    padding: StringPadding,
    charset: CharacterSet,
) -> Result<Vec<u8>, ConversionError> {
    let mut out = vec![0u8; values.len().saturating_mul(size)];
    for (i, value) in values.iter().enumerate() {
        let bytes = check_charset(value.as_ref(), charset)?.as_bytes();
        if bytes.len() > size {
            return Err(ConversionError::StringTooLong {
                len: bytes.len(),
                max: size,
            });
        }
        let element = &mut out[i * size..(i + 1) * size];
        element[..bytes.len()].copy_from_slice(bytes);
        if padding == StringPadding::SpacePad {
            element[bytes.len()..].fill(b' ');
        }
    }
    Ok(out)
}

/// Decodes `count` fixed-length elements of `size` bytes, stripping padding.
///
/// Each element is read from its own `size`-byte window only.
///
/// # Errors
///
/// - [`ConversionError::BufferSize`] if `bytes` is not `count × size` long
/// - [`ConversionError::InvalidUtf8`] if an element is not valid UTF-8
pub fn decode_fixed_strings(
    bytes: &[u8],
    size: usize,
    padding: StringPadding,
    count: usize,
) -> Result<Vec<String>, ConversionError> {
    let expected = count.saturating_mul(size);
    if bytes.len() != expected {
        return Err(ConversionError::BufferSize {
            expected,
            found: bytes.len(),
        });
    }
    if size == 0 {
        return Ok(vec![String::new(); count]);
    }
    bytes
        .chunks_exact(size)
        .map(|element| {
            String::from_utf8(strip_padding(element, padding).to_vec())
                .map_err(|_| ConversionError::InvalidUtf8)
        })
        .collect()
}

/// Reshapes row-major elements into `rows × cols`, trimming surrounding
/// whitespace from every cell.
///
/// # Errors
///
/// Returns [`ConversionError::ElementCount`] if `cells.len() != rows × cols`.
pub fn string_matrix(
    cells: Vec<String>,
    rows: usize,
    cols: usize,
) -> Result<Vec<Vec<String>>, ConversionError> {
    let expected = rows.saturating_mul(cols);
    if cells.len() != expected {
        return Err(ConversionError::ElementCount {
            expected: expected as u64,
            found: cells.len() as u64,
        });
    }
    let mut matrix = Vec::with_capacity(rows);
    let mut cells = cells.into_iter();
    for _ in 0..rows {
        let row: Vec<String> = cells
            .by_ref()
            .take(cols)
            .map(|cell| cell.trim().to_string())
            .collect();
        matrix.push(row);
    }
    Ok(matrix)
}

/// Verifies text is representable in `charset`.
///
/// # Errors
///
/// Returns [`ConversionError::NonAscii`] for non-ASCII text in an ASCII type.
pub fn check_charset(value: &str, charset: CharacterSet) -> Result<&str, ConversionError> {
    if charset == CharacterSet::Ascii && !value.is_ascii() {
        return Err(ConversionError::NonAscii);
    }
    Ok(value)
}

fn strip_padding(element: &[u8], padding: StringPadding) -> &[u8] {
    match padding {
        StringPadding::NullTerminate => {
            let end = element.iter().position(|&b| b == 0).unwrap_or(element.len());
            &element[..end]
        }
        StringPadding::NullPad => {
            let end = element.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            &element[..end]
        }
        StringPadding::SpacePad => {
            let end = element
                .iter()
                .rposition(|&b| b != b' ' && b != 0)
                .map_or(0, |i| i + 1);
            &element[..end]
        }
    }
}

fn read_int(bytes: &[u8], order: Endian, signed: bool) -> i128 {
    let mut le = [0u8; 16];
    let n = bytes.len().min(16);
    match order {
        Endian::Little => le[..n].copy_from_slice(&bytes[..n]),
        Endian::Big => {
            for (dst, src) in le.iter_mut().zip(bytes[..n].iter().rev()) {
                *dst = *src;
            }
        }
    }
    if signed && n > 0 && le[n - 1] & 0x80 != 0 {
        le[n..].fill(0xFF);
    }
    i128::from_le_bytes(le)
}

fn write_int(value: i128, size: usize, order: Endian, out: &mut Vec<u8>) {
    let le = value.to_le_bytes();
    match order {
        Endian::Little => out.extend_from_slice(&le[..size]),
        Endian::Big => out.extend(le[..size].iter().rev()),
    }
}

fn int_bounds(size: usize, signed: bool) -> (i128, i128) {
    let bits = u32::try_from(size * 8).unwrap_or(64);
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

fn check_int_range(
    value: i128,
    size: usize,
    signed: bool,
    dst_type: &Datatype,
) -> Result<(), ConversionError> {
    let (min, max) = int_bounds(size, signed);
    if value < min || value > max {
        return Err(ConversionError::Overflow {
            value: value.to_string(),
            to: dst_type.to_string(),
        });
    }
    Ok(())
}

fn float_to_int(
    value: f64,
    size: usize,
    signed: bool,
    dst_type: &Datatype,
) -> Result<i128, ConversionError> {
    let overflow = || ConversionError::Overflow {
        value: value.to_string(),
        to: dst_type.to_string(),
    };
    if !value.is_finite() {
        return Err(overflow());
    }
    let truncated = value.trunc();
    let bits = i32::try_from(size * 8).unwrap_or(64);
    // Exclusive upper bound, exactly representable as a power of two.
    let (low, high) = if signed {
        (-(2f64.powi(bits - 1)), 2f64.powi(bits - 1))
    } else {
        (0.0, 2f64.powi(bits))
    };
    if truncated < low || truncated >= high {
        return Err(overflow());
    }
    #[allow(clippy::cast_possible_truncation)] // range checked above
    Ok(truncated as i128)
}

fn read_float(bytes: &[u8], order: Endian) -> f64 {
    match (bytes.len(), order) {
        (4, Endian::Little) => f64::from(LittleEndian::read_f32(bytes)),
        (4, Endian::Big) => f64::from(BigEndian::read_f32(bytes)),
        (_, Endian::Little) => LittleEndian::read_f64(bytes),
        (_, Endian::Big) => BigEndian::read_f64(bytes),
    }
}

fn write_float(
    value: f64,
    size: usize,
    order: Endian,
    out: &mut Vec<u8>,
    dst_type: &Datatype,
) -> Result<(), ConversionError> {
    if size == 4 {
        if value.is_finite() && value.abs() > f64::from(f32::MAX) {
            return Err(ConversionError::Overflow {
                value: value.to_string(),
                to: dst_type.to_string(),
            });
        }
        #[allow(clippy::cast_possible_truncation)] // range checked above
        let narrowed = value as f32;
        let mut raw = [0u8; 4];
        match order {
            Endian::Little => LittleEndian::write_f32(&mut raw, narrowed),
            Endian::Big => BigEndian::write_f32(&mut raw, narrowed),
        }
        out.extend_from_slice(&raw);
    } else {
        let mut raw = [0u8; 8];
        match order {
            Endian::Little => LittleEndian::write_f64(&mut raw, value),
            Endian::Big => BigEndian::write_f64(&mut raw, value),
        }
        out.extend_from_slice(&raw);
    }
    Ok(())
}

fn unsupported(from: &Datatype, to: &Datatype) -> ConversionError {
    ConversionError::Unsupported {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;

    fn be_i16() -> Datatype {
        Datatype::Integer {
            size: 2,
            order: Endian::Big,
            signed: true,
        }
    }

    #[test]
    fn test_invalid_element_sizes_rejected() {
        let zero = Datatype::Integer {
            size: 0,
            order: Endian::Little,
            signed: true,
        };
        assert!(matches!(
            convert(&[], &zero, &Datatype::native::<i32>(), 2),
            Err(ConversionError::InvalidType(FormatError::InvalidDatatype(_)))
        ));

        let wide = Datatype::Integer {
            size: 16,
            order: Endian::Little,
            signed: false,
        };
        assert!(matches!(
            convert(&[0; 8], &Datatype::native::<u64>(), &wide, 1),
            Err(ConversionError::InvalidType(_))
        ));

        let half = Datatype::Float {
            size: 2,
            order: Endian::Little,
        };
        assert!(matches!(
            convert(&[0; 2], &half, &Datatype::native::<f64>(), 1),
            Err(ConversionError::InvalidType(_))
        ));
    }

    #[test]
    fn test_native_round_trip_through_bytes() {
        let values = [1.5f32, -0.25, 1e30];
        let bytes = encode_values(&values);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_values::<f32>(&bytes), values);
    }

    #[test]
    fn test_integer_widening_preserves_sign() {
        let src = encode_values(&[-1i8, 127, -128]);
        let out = convert(&src, &Datatype::native::<i8>(), &Datatype::native::<i64>(), 3).unwrap();
        assert_eq!(decode_values::<i64>(&out), vec![-1, 127, -128]);
    }

    #[test]
    fn test_integer_narrowing_overflow_is_an_error() {
        let src = encode_values(&[300u16]);
        let err = convert(&src, &Datatype::native::<u16>(), &Datatype::native::<u8>(), 1).unwrap_err();
        assert!(matches!(err, ConversionError::Overflow { ref value, .. } if value == "300"));

        let src = encode_values(&[-5i32]);
        assert!(convert(&src, &Datatype::native::<i32>(), &Datatype::native::<u32>(), 1).is_err());

        let src = encode_values(&[u64::MAX]);
        assert!(convert(&src, &Datatype::native::<u64>(), &Datatype::native::<i64>(), 1).is_err());
    }

    #[test]
    fn test_big_endian_file_type() {
        // -2 as big-endian i16
        let src = [0xFF, 0xFE, 0x01, 0x00];
        let out = convert(&src, &be_i16(), &Datatype::native::<i32>(), 2).unwrap();
        assert_eq!(decode_values::<i32>(&out), vec![-2, 256]);

        let back = convert(&out, &Datatype::native::<i32>(), &be_i16(), 2).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn test_float_conversions() {
        let src = encode_values(&[1.5f64, -2.0]);
        let out = convert(&src, &Datatype::native::<f64>(), &Datatype::native::<f32>(), 2).unwrap();
        assert_eq!(decode_values::<f32>(&out), vec![1.5, -2.0]);

        let src = encode_values(&[1e300f64]);
        assert!(convert(&src, &Datatype::native::<f64>(), &Datatype::native::<f32>(), 1).is_err());

        let src = encode_values(&[f64::INFINITY]);
        let out = convert(&src, &Datatype::native::<f64>(), &Datatype::native::<f32>(), 1).unwrap();
        assert!(decode_values::<f32>(&out)[0].is_infinite());
    }

    #[test]
    fn test_float_to_int_truncates_and_checks_range() {
        let src = encode_values(&[2.9f64, -2.9]);
        let out = convert(&src, &Datatype::native::<f64>(), &Datatype::native::<i16>(), 2).unwrap();
        assert_eq!(decode_values::<i16>(&out), vec![2, -2]);

        let src = encode_values(&[f64::NAN]);
        assert!(convert(&src, &Datatype::native::<f64>(), &Datatype::native::<i32>(), 1).is_err());

        let src = encode_values(&[256.0f64]);
        assert!(convert(&src, &Datatype::native::<f64>(), &Datatype::native::<u8>(), 1).is_err());

        let src = encode_values(&[-0.5f64]);
        let out = convert(&src, &Datatype::native::<f64>(), &Datatype::native::<u8>(), 1).unwrap();
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn test_int_to_float() {
        let src = encode_values(&[7u32, 0]);
        let out = convert(&src, &Datatype::native::<u32>(), &Datatype::native::<f64>(), 2).unwrap();
        assert_eq!(decode_values::<f64>(&out), vec![7.0, 0.0]);
    }

    #[test]
    fn test_string_number_conversion_unsupported() {
        let src = vec![0u8; 4];
        let err = convert(&src, &Datatype::fixed_string(4), &Datatype::native::<i32>(), 1).unwrap_err();
        assert!(matches!(err, ConversionError::Unsupported { .. }));

        let err = convert(&[0u8; 16], &Datatype::varlen_string(), &Datatype::varlen_string(), 1).unwrap_err();
        assert!(matches!(err, ConversionError::Unsupported { .. }));
    }

    #[test]
    fn test_buffer_size_checked() {
        let err = convert(&[0u8; 3], &Datatype::native::<u16>(), &Datatype::native::<u32>(), 2).unwrap_err();
        assert_eq!(err, ConversionError::BufferSize { expected: 4, found: 3 });
    }

    #[test]
    fn test_fixed_string_paddings() {
        let bytes = encode_fixed_strings(&["ab", "wxyz"], 4, StringPadding::SpacePad, CharacterSet::Ascii).unwrap();
        assert_eq!(bytes, b"ab  wxyz");
        assert_eq!(
            decode_fixed_strings(&bytes, 4, StringPadding::SpacePad, 2).unwrap(),
            vec!["ab", "wxyz"]
        );

        let bytes = encode_fixed_strings(&["ab"], 4, StringPadding::NullPad, CharacterSet::Ascii).unwrap();
        assert_eq!(bytes, b"ab\0\0");

        // Bytes after the terminator are never exposed.
        let stale = b"ab\0zq";
        assert_eq!(
            decode_fixed_strings(stale, 5, StringPadding::NullTerminate, 1).unwrap(),
            vec!["ab"]
        );
    }

    #[test]
    fn test_fixed_string_errors() {
        assert_eq!(
            encode_fixed_strings(&["toolong"], 4, StringPadding::NullPad, CharacterSet::Ascii).unwrap_err(),
            ConversionError::StringTooLong { len: 7, max: 4 }
        );
        assert_eq!(
            encode_fixed_strings(&["µm"], 8, StringPadding::NullPad, CharacterSet::Ascii).unwrap_err(),
            ConversionError::NonAscii
        );
        assert!(encode_fixed_strings(&["µm"], 8, StringPadding::NullPad, CharacterSet::Utf8).is_ok());
        assert_eq!(
            decode_fixed_strings(&[0xFF, 0xFE], 2, StringPadding::NullPad, 1).unwrap_err(),
            ConversionError::InvalidUtf8
        );
    }

    #[test]
    fn test_fixed_string_resize() {
        let src = encode_fixed_strings(&["abc", "d"], 3, StringPadding::NullPad, CharacterSet::Ascii).unwrap();
        let dst_type = Datatype::fixed_string(5).with_padding(StringPadding::SpacePad);
        let out = convert(&src, &Datatype::fixed_string(3).with_padding(StringPadding::NullPad), &dst_type, 2).unwrap();
        assert_eq!(out, b"abc  d    ");

        let err = convert(&out, &dst_type, &Datatype::fixed_string(2), 2).unwrap_err();
        assert_eq!(err, ConversionError::StringTooLong { len: 3, max: 2 });
    }

    #[test]
    fn test_string_matrix_is_row_major() {
        let cells: Vec<String> = ["a", " b", "c ", "d", "e", "f"].iter().map(|s| s.to_string()).collect();
        let matrix = string_matrix(cells, 2, 3).unwrap();
        assert_eq!(matrix, vec![vec!["a", "b", "c"], vec!["d", "e", "f"]]);

        assert!(string_matrix(vec![String::new(); 5], 2, 3).is_err());
    }
}

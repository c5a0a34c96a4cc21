//! Open attributes and value marshaling.
//!
//! An [`Attribute`] is a handle to a named value attached to a group or
//! dataset. Its value has a *file type* fixed at creation; reads and writes
//! name a *memory type* and the library converts between the two.
//!
//! # Reading and Writing
//!
//! - Raw: [`Attribute::read_raw`] / [`Attribute::write_raw`] move bytes in any
//!   numeric or fixed-string memory layout.
//! - Typed: [`Attribute::read`] / [`Attribute::write`] and their scalar and
//!   2-D forms use native Rust scalars.
//! - Strings: [`Attribute::read_strings`] / [`Attribute::write_strings`]
//!   handle both fixed-length and variable-length string attributes;
//!   [`Attribute::read_fixed_string_matrix`] reshapes a rank-2 string
//!   attribute into rows.
//!
//! Variable-length string bodies live in the file's global heap. Writing a
//! new value stores the new bodies before releasing the old ones, and
//! deleting the attribute releases them.

use tracing::{debug, trace};

use crate::container::{ObjectRecord, StoredAttribute};
use crate::convert::{
    self, H5Type, check_charset, decode_fixed_strings, decode_values, encode_fixed_strings,
    encode_values, string_matrix,
};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{AttributeError, ConversionError, Result};
use crate::handle::{Handle, HandleKind, Hid};
use crate::heap::{GlobalHeap, VlRef};
use crate::message::AttributeMessage;
use crate::object::ObjectLocation;

/// An open attribute.
#[derive(Debug)]
pub struct Attribute {
    location: ObjectLocation,
    name: String,
    handle: Handle,
}

pub(crate) fn create(
    location: &ObjectLocation,
    name: &str,
    datatype: &Datatype,
    dataspace: &Dataspace,
) -> Result<Attribute> {
    validate_name(name)?;
    datatype.validate()?;

    let config = location.shared().config();
    let version = config.attribute_version;
    // Sized before the zeroed value is allocated.
    let size = AttributeMessage::encoded_len(name, datatype, dataspace, version)?;
    if size > config.max_attribute_size {
        return Err(AttributeError::TooLarge {
            name: name.to_string(),
            size,
            max: config.max_attribute_size,
        }
        .into());
    }
    let message = AttributeMessage::zeroed(name, datatype.clone(), dataspace.clone());

    location
        .shared()
        .with_object_mut(location.path(), |record, _| {
            if record.attribute(name).is_some() {
                return Err(AttributeError::AlreadyExists {
                    object: location.path().to_string(),
                    name: name.to_string(),
                }
                .into());
            }
            record.attributes.push(StoredAttribute { version, message });
            Ok(())
        })?;
    debug!(object = location.path(), name, %datatype, size, "created attribute");
    Ok(Attribute::new(location.clone(), name))
}

pub(crate) fn open(location: &ObjectLocation, name: &str) -> Result<Attribute> {
    location
        .shared()
        .with_object(location.path(), |record, _| {
            find(record, location, name).map(|_| ())
        })?;
    debug!(object = location.path(), name, "opened attribute");
    Ok(Attribute::new(location.clone(), name))
}

pub(crate) fn exists(location: &ObjectLocation, name: &str) -> Result<bool> {
    validate_name(name)?;
    location
        .shared()
        .with_object(location.path(), |record, _| Ok(record.attribute(name).is_some()))
}

pub(crate) fn names(location: &ObjectLocation) -> Result<Vec<String>> {
    location.shared().with_object(location.path(), |record, _| {
        Ok(record
            .attributes
            .iter()
            .map(|a| a.message.name.clone())
            .collect())
    })
}

pub(crate) fn delete(location: &ObjectLocation, name: &str) -> Result<()> {
    location
        .shared()
        .with_object_mut(location.path(), |record, heap| {
            let index = record
                .attributes
                .iter()
                .position(|a| a.message.name == name)
                .ok_or_else(|| not_found(location, name))?;
            let refs = heap_refs(&record.attributes[index].message)?;
            for vl in &refs {
                heap.get(vl)?;
            }
            for vl in &refs {
                heap.release(vl)?;
            }
            record.attributes.remove(index);
            Ok(())
        })?;
    debug!(object = location.path(), name, "deleted attribute");
    Ok(())
}

impl Attribute {
    fn new(location: ObjectLocation, name: &str) -> Self {
        let handle = Handle::new(location.shared().registry(), HandleKind::Attribute);
        Self {
            location,
            name: name.to_string(),
            handle,
        }
    }

    /// The attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attribute identifier.
    pub fn id(&self) -> Hid {
        self.handle.id()
    }

    /// Absolute path of the object the attribute is attached to.
    pub fn object_path(&self) -> &str {
        self.location.path()
    }

    /// A copy of the attribute's file type.
    ///
    /// # Errors
    ///
    /// Fails if the handle is closed or the attribute was deleted.
    pub fn datatype(&self) -> Result<Datatype> {
        self.with_message(|message, _| Ok(message.datatype.clone()))
    }

    /// A copy of the attribute's dataspace.
    ///
    /// # Errors
    ///
    /// Fails if the handle is closed or the attribute was deleted.
    pub fn space(&self) -> Result<Dataspace> {
        self.with_message(|message, _| Ok(message.dataspace.clone()))
    }

    /// Number of elements in the dataspace.
    ///
    /// # Errors
    ///
    /// Fails if the handle is closed or the attribute was deleted.
    pub fn num_elements(&self) -> Result<u64> {
        self.with_message(|message, _| Ok(message.dataspace.num_elements()))
    }

    /// Releases the attribute identifier.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidHandle`](crate::error::HandleError::InvalidHandle)
    /// if it was already released.
    pub fn close(self) -> Result<()> {
        debug!(object = self.location.path(), name = %self.name, "closed attribute");
        Ok(self.handle.close()?)
    }

    /// Reads the value converted to `mem_type`.
    ///
    /// Returns `num_elements × mem_type.size()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Unsupported`] if the file type cannot be
    /// converted to `mem_type` (including any variable-length string type)
    /// and [`ConversionError::Overflow`] if a value does not fit.
    pub fn read_raw(&self, mem_type: &Datatype) -> Result<Vec<u8>> {
        mem_type.validate()?;
        let bytes = self.with_message(|message, _| {
            Ok(convert::convert(
                &message.value,
                &message.datatype,
                mem_type,
                element_count(message),
            )?)
        })?;
        trace!(name = %self.name, %mem_type, bytes = bytes.len(), "read attribute");
        Ok(bytes)
    }

    /// Writes a value laid out as `mem_type`, converting it to the file type.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::BufferSize`] if `bytes` is not
    /// `num_elements × mem_type.size()` long, [`ConversionError::Unsupported`]
    /// for incompatible or variable-length types, and
    /// [`ConversionError::Overflow`] if a value does not fit the file type.
    pub fn write_raw(&self, mem_type: &Datatype, bytes: &[u8]) -> Result<()> {
        mem_type.validate()?;
        self.with_message_mut(|message, _| {
            message.value = convert::convert(
                bytes,
                mem_type,
                &message.datatype,
                element_count(message),
            )?;
            Ok(())
        })?;
        trace!(name = %self.name, %mem_type, bytes = bytes.len(), "wrote attribute");
        Ok(())
    }

    /// Reads every element as `T`.
    ///
    /// # Errors
    ///
    /// See [`Attribute::read_raw`].
    pub fn read<T: H5Type>(&self) -> Result<Vec<T>> {
        let bytes = self.read_raw(&Datatype::native::<T>())?;
        Ok(decode_values(&bytes))
    }

    /// Reads the single element of a one-element attribute.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::ElementCount`] unless the dataspace holds
    /// exactly one element.
    pub fn read_scalar<T: H5Type>(&self) -> Result<T> {
        let values = self.read::<T>()?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(ConversionError::ElementCount {
                expected: values.len() as u64,
                found: 1,
            }
            .into()),
        }
    }

    /// Reads a rank-2 attribute as rows.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Rank`] unless the dataspace has rank 2.
    pub fn read_2d<T: H5Type>(&self) -> Result<Vec<Vec<T>>> {
        let (rows, cols) = self.matrix_dims()?;
        let values = self.read::<T>()?;
        if cols == 0 {
            return Ok(vec![Vec::new(); rows]);
        }
        Ok(values.chunks(cols).map(<[T]>::to_vec).collect())
    }

    /// Writes every element from native values.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::ElementCount`] if `values.len()` differs from
    /// the number of elements, plus the errors of [`Attribute::write_raw`].
    pub fn write<T: H5Type>(&self, values: &[T]) -> Result<()> {
        self.check_count(values.len())?;
        self.write_raw(&Datatype::native::<T>(), &encode_values(values))
    }

    /// Writes the single element of a one-element attribute.
    ///
    /// # Errors
    ///
    /// See [`Attribute::write`].
    pub fn write_scalar<T: H5Type>(&self, value: T) -> Result<()> {
        self.write(&[value])
    }

    /// Reads every element of a string attribute.
    ///
    /// Fixed-length elements have their padding stripped; variable-length
    /// elements are read from the global heap.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Unsupported`] for numeric attributes and
    /// [`ConversionError::InvalidUtf8`] for undecodable text.
    pub fn read_strings(&self) -> Result<Vec<String>> {
        let strings = self.with_message(decode_strings)?;
        trace!(name = %self.name, count = strings.len(), "read strings");
        Ok(strings)
    }

    /// Reads the single element of a one-element string attribute.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::ElementCount`] unless the dataspace holds
    /// exactly one element, plus the errors of [`Attribute::read_strings`].
    pub fn read_string(&self) -> Result<String> {
        let strings = self.read_strings()?;
        let count = strings.len();
        let mut strings = strings.into_iter();
        match (strings.next(), count) {
            (Some(value), 1) => Ok(value),
            _ => Err(ConversionError::ElementCount {
                expected: count as u64,
                found: 1,
            }
            .into()),
        }
    }

    /// Writes every element of a string attribute.
    ///
    /// # Errors
    ///
    /// - [`ConversionError::ElementCount`] if `values.len()` differs from the number of elements
    /// - [`ConversionError::StringTooLong`] if a string exceeds a fixed-length element
    /// - [`ConversionError::NonAscii`] for non-ASCII text in an ASCII type
    /// - [`ConversionError::Unsupported`] for numeric attributes
    pub fn write_strings<S: AsRef<str>>(&self, values: &[S]) -> Result<()> {
        self.check_count(values.len())?;
        self.with_message_mut(|message, heap| encode_strings(message, heap, values))?;
        trace!(name = %self.name, count = values.len(), "wrote strings");
        Ok(())
    }

    /// Writes the single element of a one-element string attribute.
    ///
    /// # Errors
    ///
    /// See [`Attribute::write_strings`].
    pub fn write_string(&self, value: &str) -> Result<()> {
        self.write_strings(&[value])
    }

    /// Reads a rank-2 fixed-length string attribute as rows of trimmed cells.
    ///
    /// Element `(i, j)` is stored at row-major index `i * cols + j`.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Rank`] unless the dataspace has rank 2 and
    /// [`ConversionError::Unsupported`] unless the type is a fixed-length
    /// string.
    pub fn read_fixed_string_matrix(&self) -> Result<Vec<Vec<String>>> {
        let (rows, cols) = self.matrix_dims()?;
        let strings = self.with_message(|message, heap| {
            if !matches!(message.datatype, Datatype::FixedString { .. }) {
                return Err(unsupported(&message.datatype, "fixed-length string").into());
            }
            decode_strings(message, heap)
        })?;
        Ok(string_matrix(strings, rows, cols)?)
    }

    /// Writes rows of strings into a rank-2 string attribute.
    ///
    /// # Errors
    ///
    /// - [`ConversionError::Rank`] unless the dataspace has rank 2
    /// - [`ConversionError::RaggedMatrix`] if rows differ in length
    /// - [`ConversionError::Shape`] if the matrix shape differs from the dataspace
    /// - the errors of [`Attribute::write_strings`]
    pub fn write_string_matrix(&self, rows: &[Vec<String>]) -> Result<()> {
        let (dim_rows, dim_cols) = self.matrix_dims()?;
        let cols = rows.first().map_or(0, Vec::len);
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(ConversionError::RaggedMatrix {
                row,
                len: r.len(),
                expected: cols,
            }
            .into());
        }
        if (rows.len(), cols) != (dim_rows, dim_cols) {
            return Err(ConversionError::Shape {
                expected: vec![dim_rows as u64, dim_cols as u64],
                found: vec![rows.len() as u64, cols as u64],
            }
            .into());
        }
        let cells: Vec<&str> = rows.iter().flatten().map(String::as_str).collect();
        self.write_strings(&cells)
    }

    fn matrix_dims(&self) -> Result<(usize, usize)> {
        let space = self.space()?;
        match space {
            Dataspace::Simple { ref dims, .. } if dims.len() == 2 => {
                Ok((to_usize(dims[0]), to_usize(dims[1])))
            }
            other => Err(ConversionError::Rank {
                expected: 2,
                found: other.rank(),
            }
            .into()),
        }
    }

    fn check_count(&self, found: usize) -> Result<()> {
        let expected = self.num_elements()?;
        if found as u64 != expected {
            return Err(ConversionError::ElementCount {
                expected,
                found: found as u64,
            }
            .into());
        }
        Ok(())
    }

    fn with_message<R>(
        &self,
        f: impl FnOnce(&AttributeMessage, &GlobalHeap) -> Result<R>,
    ) -> Result<R> {
        self.handle.ensure_valid()?;
        self.location
            .shared()
            .with_object(self.location.path(), |record, heap| {
                let stored = find(record, &self.location, &self.name)?;
                f(&stored.message, heap)
            })
    }

    fn with_message_mut<R>(
        &self,
        f: impl FnOnce(&mut AttributeMessage, &mut GlobalHeap) -> Result<R>,
    ) -> Result<R> {
        self.handle.ensure_valid()?;
        self.location
            .shared()
            .with_object_mut(self.location.path(), |record, heap| {
                let stored = record
                    .attribute_mut(&self.name)
                    .ok_or_else(|| not_found(&self.location, &self.name))?;
                f(&mut stored.message, heap)
            })
    }
}

fn find<'a>(
    record: &'a ObjectRecord,
    location: &ObjectLocation,
    name: &str,
) -> Result<&'a StoredAttribute> {
    record
        .attribute(name)
        .ok_or_else(|| not_found(location, name).into())
}

fn not_found(location: &ObjectLocation, name: &str) -> AttributeError {
    AttributeError::NotFound {
        object: location.path().to_string(),
        name: name.to_string(),
    }
}

fn validate_name(name: &str) -> std::result::Result<(), AttributeError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(AttributeError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

fn element_count(message: &AttributeMessage) -> usize {
    to_usize(message.dataspace.num_elements())
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn unsupported(from: &Datatype, to: &str) -> ConversionError {
    ConversionError::Unsupported {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Heap references held by a variable-length value; empty for other types.
fn heap_refs(message: &AttributeMessage) -> Result<Vec<VlRef>> {
    if !message.datatype.is_variable_str() {
        return Ok(Vec::new());
    }
    Ok(VlRef::parse_all(&message.value)?
        .into_iter()
        .filter(|vl| !vl.is_empty())
        .collect())
}

fn decode_strings(message: &AttributeMessage, heap: &GlobalHeap) -> Result<Vec<String>> {
    match message.datatype {
        Datatype::FixedString { size, padding, .. } => Ok(decode_fixed_strings(
            &message.value,
            size,
            padding,
            element_count(message),
        )?),
        Datatype::VarLenString { .. } => VlRef::parse_all(&message.value)?
            .iter()
            .map(|vl| {
                if vl.is_empty() {
                    return Ok(String::new());
                }
                let body = heap.get(vl)?;
                Ok(String::from_utf8(body.to_vec()).map_err(|_| ConversionError::InvalidUtf8)?)
            })
            .collect(),
        ref other => Err(unsupported(other, "string").into()),
    }
}

fn encode_strings<S: AsRef<str>>(
    message: &mut AttributeMessage,
    heap: &mut GlobalHeap,
    values: &[S],
) -> Result<()> {
    match message.datatype {
        Datatype::FixedString {
            size,
            padding,
            charset,
        } => {
            message.value = encode_fixed_strings(values, size, padding, charset)?;
            Ok(())
        }
        Datatype::VarLenString { charset, .. } => {
            for value in values {
                check_charset(value.as_ref(), charset)?;
            }
            let old = heap_refs(message)?;
            for vl in &old {
                heap.get(vl)?;
            }

            let mut new = Vec::with_capacity(values.len());
            for value in values {
                match heap.insert(value.as_ref().as_bytes()) {
                    Ok(vl) => new.push(vl),
                    Err(e) => {
                        for vl in new.iter().filter(|vl| !vl.is_empty()) {
                            heap.release(vl)?;
                        }
                        return Err(e.into());
                    }
                }
            }
            for vl in &old {
                heap.release(vl)?;
            }
            message.value = new.iter().flat_map(|vl| vl.to_bytes()).collect();
            Ok(())
        }
        ref other => Err(unsupported(other, "string").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::datatype::{CharacterSet, Endian, StringPadding};
    use crate::error::{FormatError, H5Error};
    use crate::file::File;
    use crate::object::Location;

    fn scratch() -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("attrs.h5a")).unwrap();
        (dir, file)
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("units").is_ok());
        assert!(validate_name("a/b").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("x\0").is_err());
    }

    #[test]
    fn test_new_attribute_reads_zero() {
        let (_dir, file) = scratch();
        let attr = file.new_attribute::<i32>("zeros", &Dataspace::simple(&[3]).unwrap()).unwrap();
        assert_eq!(attr.read::<i32>().unwrap(), vec![0, 0, 0]);

        let text = file
            .create_attribute("text", &Datatype::varlen_string(), &Dataspace::scalar())
            .unwrap();
        assert_eq!(text.read_string().unwrap(), "");
    }

    #[test]
    fn test_duplicate_and_missing_names() {
        let (_dir, file) = scratch();
        file.new_attribute::<u8>("dup", &Dataspace::scalar()).unwrap();
        let err = file.new_attribute::<u8>("dup", &Dataspace::scalar()).unwrap_err();
        assert!(matches!(err, H5Error::Attribute(AttributeError::AlreadyExists { .. })));

        let err = file.open_attribute("nope").unwrap_err();
        assert!(matches!(err, H5Error::Attribute(AttributeError::NotFound { .. })));
        assert!(!file.attribute_exists("nope").unwrap());
        assert!(file.attribute_exists("").is_err());
    }

    #[test]
    fn test_scalar_requires_one_element() {
        let (_dir, file) = scratch();
        let attr = file.new_attribute::<f64>("pair", &Dataspace::simple(&[2]).unwrap()).unwrap();
        let err = attr.read_scalar::<f64>().unwrap_err();
        assert!(matches!(
            err,
            H5Error::Conversion(ConversionError::ElementCount { expected: 2, found: 1 })
        ));
        assert!(matches!(
            attr.write_scalar(1.0f64),
            Err(H5Error::Conversion(ConversionError::ElementCount { expected: 2, found: 1 }))
        ));
    }

    #[test]
    fn test_huge_shapes_rejected_as_too_large() {
        let (_dir, file) = scratch();
        // 64 GiB of u8: sized arithmetically, never allocated.
        let err = file
            .new_attribute::<u8>("huge", &Dataspace::simple(&[1 << 36]).unwrap())
            .unwrap_err();
        assert!(matches!(err, H5Error::Attribute(AttributeError::TooLarge { .. })));

        let overflowing = Dataspace::Simple {
            dims: vec![u64::MAX, 2],
            max_dims: None,
        };
        let err = file.new_attribute::<u8>("overflow", &overflowing).unwrap_err();
        assert!(matches!(
            err,
            H5Error::Attribute(AttributeError::TooLarge { size: usize::MAX, .. })
        ));
        assert!(file.attribute_names().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_datatype_sizes_rejected() {
        let (_dir, file) = scratch();
        let space = Dataspace::simple(&[2]).unwrap();
        for dtype in [
            Datatype::Integer {
                size: 0,
                order: Endian::Little,
                signed: true,
            },
            Datatype::Integer {
                size: 16,
                order: Endian::Little,
                signed: false,
            },
            Datatype::Float {
                size: 2,
                order: Endian::Little,
            },
            Datatype::fixed_string(0),
        ] {
            let err = file.create_attribute("bad", &dtype, &space).unwrap_err();
            assert!(
                matches!(err, H5Error::Format(FormatError::InvalidDatatype(_))),
                "{dtype}"
            );
            let err = file.create_dataset("bad", &dtype, &space).unwrap_err();
            assert!(matches!(err, H5Error::Format(FormatError::InvalidDatatype(_))));
        }

        let attr = file.new_attribute::<i32>("ok", &space).unwrap();
        let odd = Datatype::Integer {
            size: 3,
            order: Endian::Big,
            signed: true,
        };
        assert!(matches!(
            attr.read_raw(&odd),
            Err(H5Error::Format(FormatError::InvalidDatatype(_)))
        ));
        assert!(matches!(
            attr.write_raw(&odd, &[0u8; 6]),
            Err(H5Error::Format(FormatError::InvalidDatatype(_)))
        ));
        assert_eq!(attr.read::<i32>().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_too_large_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig {
            max_attribute_size: 128,
            ..FileConfig::default()
        };
        let file = File::create_with_config(dir.path().join("small.h5a"), config).unwrap();
        let err = file
            .new_attribute::<f64>("big", &Dataspace::simple(&[100]).unwrap())
            .unwrap_err();
        assert!(matches!(err, H5Error::Attribute(AttributeError::TooLarge { max: 128, .. })));
    }

    #[test]
    fn test_vl_overwrite_releases_heap_objects() {
        let (_dir, file) = scratch();
        let attr = file
            .create_attribute("tags", &Datatype::varlen_string(), &Dataspace::simple(&[2]).unwrap())
            .unwrap();
        attr.write_strings(&["alpha", "beta"]).unwrap();
        attr.write_strings(&["gamma", ""]).unwrap();
        assert_eq!(attr.read_strings().unwrap(), vec!["gamma", ""]);

        let live = file
            .object_location()
            .shared()
            .with_object("/", |_, heap| Ok(heap.len()))
            .unwrap();
        assert_eq!(live, 1);

        file.delete_attribute("tags").unwrap();
        let live = file
            .object_location()
            .shared()
            .with_object("/", |_, heap| Ok(heap.len()))
            .unwrap();
        assert_eq!(live, 0);
        assert!(matches!(
            attr.read_strings(),
            Err(H5Error::Attribute(AttributeError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_raw_vl_access_unsupported() {
        let (_dir, file) = scratch();
        let attr = file
            .create_attribute("vl", &Datatype::varlen_string(), &Dataspace::scalar())
            .unwrap();
        let err = attr.read_raw(&Datatype::varlen_string()).unwrap_err();
        assert!(matches!(err, H5Error::Conversion(ConversionError::Unsupported { .. })));
    }

    #[test]
    fn test_ascii_type_rejects_non_ascii() {
        let (_dir, file) = scratch();
        let attr = file
            .create_attribute("unit", &Datatype::varlen_string(), &Dataspace::scalar())
            .unwrap();
        let err = attr.write_string("µm").unwrap_err();
        assert!(matches!(err, H5Error::Conversion(ConversionError::NonAscii)));

        let utf8 = file
            .create_attribute(
                "unit8",
                &Datatype::fixed_string(8)
                    .with_charset(CharacterSet::Utf8)
                    .with_padding(StringPadding::NullPad),
                &Dataspace::scalar(),
            )
            .unwrap();
        utf8.write_string("µm").unwrap();
        assert_eq!(utf8.read_string().unwrap(), "µm");
    }

    #[test]
    fn test_matrix_shape_checks() {
        let (_dir, file) = scratch();
        let attr = file
            .create_attribute("grid", &Datatype::fixed_string(4), &Dataspace::simple(&[2, 2]).unwrap())
            .unwrap();
        let ragged = vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]];
        assert!(matches!(
            attr.write_string_matrix(&ragged),
            Err(H5Error::Conversion(ConversionError::RaggedMatrix { row: 1, len: 1, expected: 2 }))
        ));
        let wide = vec![vec!["a".to_string(); 4]];
        assert!(matches!(
            attr.write_string_matrix(&wide),
            Err(H5Error::Conversion(ConversionError::Shape { .. }))
        ));

        let flat = file.new_attribute::<i32>("flat", &Dataspace::simple(&[4]).unwrap()).unwrap();
        assert!(matches!(
            flat.read_2d::<i32>(),
            Err(H5Error::Conversion(ConversionError::Rank { expected: 2, found: 1 }))
        ));
    }

    #[test]
    fn test_closed_handle_rejected() {
        let (_dir, file) = scratch();
        let attr = file.new_attribute::<u16>("n", &Dataspace::scalar()).unwrap();
        let id = attr.id();
        attr.close().unwrap();
        assert!(!file.object_location().shared().registry().is_valid(id));
        assert_eq!(file.open_handle_count(HandleKind::Attribute), 0);
    }
}

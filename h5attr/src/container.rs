//! On-disk container format.
//!
//! A container holds a tree of groups and datasets, the attribute messages
//! attached to each, and the global heap those messages' variable-length
//! strings point into. Message encodings follow HDF5; the framing around
//! them is specific to this crate.
//!
//! # File Format
//!
//! ```text
//! [0..64)          Superblock
//! [64..64+H)       Global heap collection (H = heap size)
//! [64+H..64+H+T)   Object table (T = table size)
//! ```
//!
//! Superblock:
//!
//! ```text
//! [0..8)    signature "\x89H5A\r\n\x1a\n"
//! [8..12)   format version (u32)
//! [12..16)  object count (u32)
//! [16..24)  heap size (u64)
//! [24..32)  table size (u64)
//! [32..36)  lookup3 checksum of bytes [64..)
//! [36..64)  reserved
//! ```
//!
//! Object table entry:
//!
//! ```text
//! path_len(2) path kind(1)
//! kind 1 only: datatype_len(2) datatype dataspace_len(2) dataspace
//! attribute_count(4), then per attribute: message_len(4) message
//! ```
//!
//! Files are never modified in place: [`write`] builds the full image in a
//! temporary sibling file and renames it over the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use tracing::debug;

use crate::checksum::lookup3;
use crate::dataspace::Dataspace;
use crate::datatype::{Datatype, ensure_len};
use crate::error::{FileError, FormatError, Result};
use crate::heap::GlobalHeap;
use crate::message::AttributeMessage;

/// Magic bytes identifying a container file.
const SIGNATURE: [u8; 8] = *b"\x89H5A\r\n\x1a\n";

/// Current container format version.
const FORMAT_VERSION: u32 = 1;

/// Size of the superblock in bytes.
pub const SUPERBLOCK_SIZE: usize = 64;

/// Address of the global heap collection.
pub const HEAP_ADDRESS: u64 = SUPERBLOCK_SIZE as u64;

const KIND_GROUP: u8 = 0;
const KIND_DATASET: u8 = 1;

/// What an object table entry describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    /// A group; may contain other objects.
    Group,
    /// A dataset with a type and shape. No raw data is stored.
    Dataset {
        /// Element type.
        datatype: Datatype,
        /// Shape.
        dataspace: Dataspace,
    },
}

/// An attribute message together with the version it is encoded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttribute {
    /// Message version (1 or 3).
    pub version: u8,
    /// The attribute itself.
    pub message: AttributeMessage,
}

/// One group or dataset and its attributes, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Group or dataset.
    pub kind: ObjectKind,
    /// Attributes in creation order.
    pub attributes: Vec<StoredAttribute>,
}

impl ObjectRecord {
    /// An empty group.
    pub fn group() -> Self {
        Self {
            kind: ObjectKind::Group,
            attributes: Vec::new(),
        }
    }

    /// A dataset with no attributes.
    pub fn dataset(datatype: Datatype, dataspace: Dataspace) -> Self {
        Self {
            kind: ObjectKind::Dataset {
                datatype,
                dataspace,
            },
            attributes: Vec::new(),
        }
    }

    /// Finds an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&StoredAttribute> {
        self.attributes.iter().find(|a| a.message.name == name)
    }

    /// Finds an attribute by name for modification.
    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut StoredAttribute> {
        self.attributes.iter_mut().find(|a| a.message.name == name)
    }
}

/// Everything stored in a container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerImage {
    /// Variable-length string bodies.
    pub heap: GlobalHeap,
    /// Objects keyed by absolute path, in path order.
    pub objects: Vec<(String, ObjectRecord)>,
}

impl Default for ContainerImage {
    fn default() -> Self {
        Self {
            heap: GlobalHeap::new(HEAP_ADDRESS),
            objects: vec![("/".to_string(), ObjectRecord::group())],
        }
    }
}

impl ContainerImage {
    /// Serializes the image.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if an attribute message cannot be encoded or a
    /// field exceeds its length slot.
    pub fn encode(&self) -> std::result::Result<Vec<u8>, FormatError> {
        let heap = self.heap.encode();
        let mut table = Vec::new();
        for (path, record) in &self.objects {
            push_u16_field(&mut table, path.as_bytes(), "object path")?;
            match &record.kind {
                ObjectKind::Group => table.push(KIND_GROUP),
                ObjectKind::Dataset {
                    datatype,
                    dataspace,
                } => {
                    table.push(KIND_DATASET);
                    push_u16_field(&mut table, &datatype.encode(), "dataset datatype")?;
                    push_u16_field(&mut table, &dataspace.encode(), "dataset dataspace")?;
                }
            }
            table.extend_from_slice(&len_u32(record.attributes.len(), "attribute count")?.to_le_bytes());
            for attribute in &record.attributes {
                let message = attribute.message.encode(attribute.version)?;
                table.extend_from_slice(&len_u32(message.len(), "attribute message")?.to_le_bytes());
                table.extend_from_slice(&message);
            }
        }

        let mut out = vec![0u8; SUPERBLOCK_SIZE];
        out.extend_from_slice(&heap);
        out.extend_from_slice(&table);

        out[0..8].copy_from_slice(&SIGNATURE);
        LittleEndian::write_u32(&mut out[8..12], FORMAT_VERSION);
        LittleEndian::write_u32(&mut out[12..16], len_u32(self.objects.len(), "object count")?);
        LittleEndian::write_u64(&mut out[16..24], heap.len() as u64);
        LittleEndian::write_u64(&mut out[24..32], table.len() as u64);
        let checksum = lookup3(&out[SUPERBLOCK_SIZE..]);
        LittleEndian::write_u32(&mut out[32..36], checksum);
        Ok(out)
    }

    /// Parses and validates a container image.
    ///
    /// `path` is used for error messages only.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Corrupted`] for a bad signature, version, size or
    /// body, and [`FileError::ChecksumMismatch`] if the body checksum differs.
    pub fn decode(data: &[u8], path: &str) -> Result<Self> {
        let corrupted = |reason: String| FileError::Corrupted {
            path: path.to_string(),
            reason,
        };

        if data.len() < SUPERBLOCK_SIZE {
            return Err(corrupted(format!(
                "file too small: {} bytes, expected at least {SUPERBLOCK_SIZE}",
                data.len()
            ))
            .into());
        }
        if data[0..8] != SIGNATURE {
            return Err(corrupted(format!(
                "invalid signature: expected {SIGNATURE:?}, found {:?}",
                &data[0..8]
            ))
            .into());
        }
        let version = LittleEndian::read_u32(&data[8..12]);
        if version != FORMAT_VERSION {
            return Err(corrupted(format!(
                "unsupported version: expected {FORMAT_VERSION}, found {version}"
            ))
            .into());
        }

        let object_count = LittleEndian::read_u32(&data[12..16]);
        let heap_size = LittleEndian::read_u64(&data[16..24]);
        let table_size = LittleEndian::read_u64(&data[24..32]);
        let body_len = (data.len() - SUPERBLOCK_SIZE) as u64;
        if heap_size.checked_add(table_size) != Some(body_len) {
            return Err(corrupted(format!(
                "size mismatch: heap {heap_size} + table {table_size} bytes, body is {body_len}"
            ))
            .into());
        }

        let stored = LittleEndian::read_u32(&data[32..36]);
        let computed = lookup3(&data[SUPERBLOCK_SIZE..]);
        if stored != computed {
            return Err(FileError::ChecksumMismatch {
                path: path.to_string(),
                stored,
                computed,
            }
            .into());
        }

        // Both sizes fit: their sum equals a length already in memory.
        #[allow(clippy::cast_possible_truncation)]
        let heap_end = SUPERBLOCK_SIZE + heap_size as usize;
        let heap = GlobalHeap::decode(&data[SUPERBLOCK_SIZE..heap_end], HEAP_ADDRESS)
            .map_err(|e| corrupted(format!("global heap: {e}")))?;
        let objects = decode_table(&data[heap_end..], object_count)
            .map_err(|e| corrupted(format!("object table: {e}")))?;

        Ok(Self { heap, objects })
    }
}

/// Reads and validates a container file through a read-only memory map.
///
/// # Errors
///
/// Returns [`FileError::Io`] if the file cannot be opened,
/// [`FileError::MemoryMap`] if mapping fails, and the errors of
/// [`ContainerImage::decode`] for invalid contents.
pub fn read(path: &Path) -> Result<ContainerImage> {
    let path_str = path.display().to_string();
    let file = fs::File::open(path).map_err(|e| FileError::Io {
        path: path_str.clone(),
        source: e,
    })?;
    let len = file
        .metadata()
        .map_err(|e| FileError::Io {
            path: path_str.clone(),
            source: e,
        })?
        .len();
    if len < SUPERBLOCK_SIZE as u64 {
        return Err(FileError::Corrupted {
            path: path_str,
            reason: format!("file too small: {len} bytes, expected at least {SUPERBLOCK_SIZE}"),
        }
        .into());
    }

    // SAFETY: The mapping is read-only and dropped before this function
    // returns. Containers are only ever replaced by rename, never truncated or
    // rewritten in place, so the mapped pages stay valid while we decode.
    let mmap = unsafe {
        Mmap::map(&file).map_err(|e| FileError::MemoryMap {
            path: path_str.clone(),
            source: e,
        })?
    };
    let image = ContainerImage::decode(&mmap, &path_str)?;
    debug!(path = %path_str, objects = image.objects.len(), heap_objects = image.heap.len(), "read container");
    Ok(image)
}

/// Writes a container image to `path` atomically.
///
/// The image is written to a temporary sibling, optionally synced, then
/// renamed over `path`.
///
/// # Errors
///
/// Returns [`FileError::Io`] if any filesystem step fails and
/// [`FormatError`] if the image cannot be encoded.
pub fn write(path: &Path, image: &ContainerImage, sync: bool) -> Result<()> {
    let bytes = image.encode()?;
    let tmp = temp_path(path);
    let io_err = |source: std::io::Error| FileError::Io {
        path: tmp.display().to_string(),
        source,
    };

    let mut file = fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(&bytes).map_err(io_err)?;
    if sync {
        file.sync_all().map_err(io_err)?;
    }
    drop(file);

    fs::rename(&tmp, path).map_err(|e| FileError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!(path = %path.display(), bytes = bytes.len(), sync, "wrote container");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn len_u32(len: usize, field: &str) -> std::result::Result<u32, FormatError> {
    u32::try_from(len)
        .map_err(|_| FormatError::InvalidObjectTable(format!("{field} of {len} exceeds u32")))
}

fn push_u16_field(
    buf: &mut Vec<u8>,
    bytes: &[u8],
    field: &str,
) -> std::result::Result<(), FormatError> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        FormatError::InvalidObjectTable(format!("{field} of {} bytes exceeds u16", bytes.len()))
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Sequential reader over the object table.
struct TableReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TableReader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], FormatError> {
        ensure_len(self.data, self.pos, n)?;
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> std::result::Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16_field(&mut self) -> std::result::Result<&'a [u8], FormatError> {
        let len = usize::from(LittleEndian::read_u16(self.take(2)?));
        self.take(len)
    }

    fn u32(&mut self) -> std::result::Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }
}

fn decode_table(
    data: &[u8],
    count: u32,
) -> std::result::Result<Vec<(String, ObjectRecord)>, FormatError> {
    let mut reader = TableReader { data, pos: 0 };
    let mut objects: Vec<(String, ObjectRecord)> = Vec::new();

    for _ in 0..count {
        let path = std::str::from_utf8(reader.u16_field()?)
            .map_err(|_| FormatError::InvalidObjectTable("object path is not UTF-8".to_string()))?
            .to_string();
        if objects.iter().any(|(p, _)| *p == path) {
            return Err(FormatError::InvalidObjectTable(format!(
                "duplicate object '{path}'"
            )));
        }

        let kind = match reader.u8()? {
            KIND_GROUP => ObjectKind::Group,
            KIND_DATASET => {
                let (datatype, _) = Datatype::decode(reader.u16_field()?)?;
                let (dataspace, _) = Dataspace::decode(reader.u16_field()?)?;
                ObjectKind::Dataset {
                    datatype,
                    dataspace,
                }
            }
            other => {
                return Err(FormatError::InvalidObjectTable(format!(
                    "unknown object kind {other}"
                )));
            }
        };

        let attribute_count = reader.u32()?;
        let mut attributes = Vec::new();
        for _ in 0..attribute_count {
            let len = reader.u32()? as usize;
            let bytes = reader.take(len)?;
            let (message, consumed) = AttributeMessage::decode(bytes)?;
            if consumed != len {
                return Err(FormatError::InvalidObjectTable(format!(
                    "attribute '{}' on '{path}' has {} trailing bytes",
                    message.name,
                    len - consumed
                )));
            }
            // Version 2 messages are rewritten as version 3.
            let version = if bytes[0] == 1 { 1 } else { 3 };
            attributes.push(StoredAttribute { version, message });
        }
        objects.push((path, ObjectRecord { kind, attributes }));
    }

    if reader.pos != data.len() {
        return Err(FormatError::InvalidObjectTable(format!(
            "{} trailing bytes",
            data.len() - reader.pos
        )));
    }
    if !objects.iter().any(|(p, _)| p == "/") {
        return Err(FormatError::InvalidObjectTable(
            "root group missing".to_string(),
        ));
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::H5Error;

    fn sample_image() -> ContainerImage {
        let mut image = ContainerImage::default();
        let vl = image.heap.insert(b"metres").unwrap();

        let mut units = AttributeMessage::zeroed("units", Datatype::varlen_string(), Dataspace::scalar());
        units.value = vl.to_bytes().to_vec();
        let mut scale = AttributeMessage::zeroed("scale", Datatype::native::<f64>(), Dataspace::scalar());
        scale.value = 0.5f64.to_ne_bytes().to_vec();

        let mut dataset = ObjectRecord::dataset(Datatype::native::<i32>(), Dataspace::simple(&[4, 4]).unwrap());
        dataset.attributes.push(StoredAttribute { version: 3, message: units });
        dataset.attributes.push(StoredAttribute { version: 1, message: scale });
        image.objects.push(("/data".to_string(), dataset));
        image
    }

    #[test]
    fn test_encode_decode() {
        let image = sample_image();
        let bytes = image.encode().unwrap();
        assert_eq!(&bytes[0..8], &SIGNATURE);
        let decoded = ContainerImage::decode(&bytes, "mem").unwrap();
        assert_eq!(decoded, image);
        assert_eq!(decoded.heap.address(), HEAP_ADDRESS);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = sample_image().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = ContainerImage::decode(&bytes, "mem").unwrap_err();
        assert!(matches!(err, H5Error::File(FileError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_invalid_signature_and_size() {
        let mut bytes = sample_image().encode().unwrap();
        bytes[1] = b'X';
        let err = ContainerImage::decode(&bytes, "mem").unwrap_err();
        assert!(err.to_string().contains("invalid signature"));

        let err = ContainerImage::decode(b"short", "mem").unwrap_err();
        assert!(err.to_string().contains("file too small"));

        let mut bytes = sample_image().encode().unwrap();
        bytes.push(0);
        let err = ContainerImage::decode(&bytes, "mem").unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.h5a");
        let image = sample_image();
        write(&path, &image, true).unwrap();
        assert!(!dir.path().join("image.h5a.tmp").exists());
        assert_eq!(read(&path).unwrap(), image);

        // Rewriting replaces the previous contents.
        write(&path, &ContainerImage::default(), false).unwrap();
        assert_eq!(read(&path).unwrap().objects.len(), 1);
    }

    #[test]
    fn test_attribute_slot_with_trailing_bytes_rejected() {
        let mut message = AttributeMessage::zeroed("n", Datatype::native::<u8>(), Dataspace::scalar())
            .encode(3)
            .unwrap();
        message.extend_from_slice(&[0xEE; 3]);

        let mut table = Vec::new();
        push_u16_field(&mut table, b"/", "object path").unwrap();
        table.push(KIND_GROUP);
        table.extend_from_slice(&1u32.to_le_bytes());
        table.extend_from_slice(&len_u32(message.len(), "attribute message").unwrap().to_le_bytes());
        table.extend_from_slice(&message);

        let err = decode_table(&table, 1).unwrap_err();
        assert!(matches!(err, FormatError::InvalidObjectTable(ref msg) if msg.contains("3 trailing bytes")));
    }

    #[test]
    fn test_read_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(&dir.path().join("missing.h5a")).unwrap_err();
        assert!(matches!(err, H5Error::File(FileError::Io { .. })));

        let empty = dir.path().join("empty.h5a");
        fs::write(&empty, b"").unwrap();
        let err = read(&empty).unwrap_err();
        assert!(matches!(err, H5Error::File(FileError::Corrupted { .. })));
    }
}

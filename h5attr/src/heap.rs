//! Global heap collection holding variable-length string bodies.
//!
//! A variable-length value stores a 16-byte [`VlRef`] per element; the bytes
//! themselves live as objects in a global heap collection:
//!
//! ```text
//! "GCOL" version(1) reserved(3) collection_size(8)
//! per object: index(2) refcount(2) reserved(4) size(8) data (padded to 8)
//! ```
//!
//! Object indices are 1-based. Index 0 is the free-space marker and ends
//! parsing.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::datatype::{VL_REFERENCE_SIZE, ensure_len};
use crate::error::FormatError;

/// Magic signature for global heap collections.
const GCOL_SIGNATURE: [u8; 4] = *b"GCOL";

/// Global heap collection version.
const GCOL_VERSION: u8 = 1;

/// signature(4) + version(1) + reserved(3) + collection_size(8).
const COLLECTION_HEADER_SIZE: usize = 16;

/// index(2) + refcount(2) + reserved(4) + size(8).
const OBJECT_HEADER_SIZE: usize = 16;

/// A variable-length element reference as stored in an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VlRef {
    /// Length of the element body in bytes.
    pub length: u32,
    /// Address of the heap collection holding the body.
    pub collection: u64,
    /// Object index within the collection.
    pub index: u32,
}

impl VlRef {
    /// The empty element, which owns no heap object.
    pub const EMPTY: Self = Self {
        length: 0,
        collection: 0,
        index: 0,
    };

    /// Whether this reference is the empty element.
    pub fn is_empty(&self) -> bool {
        self.length == 0 && self.collection == 0
    }

    /// Serializes the reference into its 16-byte form.
    pub fn to_bytes(self) -> [u8; VL_REFERENCE_SIZE] {
        let mut out = [0u8; VL_REFERENCE_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.length);
        LittleEndian::write_u64(&mut out[4..12], self.collection);
        LittleEndian::write_u32(&mut out[12..16], self.index);
        out
    }

    /// Parses a 16-byte reference.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::UnexpectedEof`] if fewer than 16 bytes are given.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        ensure_len(data, 0, VL_REFERENCE_SIZE)?;
        Ok(Self {
            length: LittleEndian::read_u32(&data[0..4]),
            collection: LittleEndian::read_u64(&data[4..12]),
            index: LittleEndian::read_u32(&data[12..16]),
        })
    }

    /// Parses every reference in a value buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::UnexpectedEof`] if the buffer length is not a
    /// multiple of 16.
    pub fn parse_all(value: &[u8]) -> Result<Vec<Self>, FormatError> {
        if value.len() % VL_REFERENCE_SIZE != 0 {
            return Err(FormatError::UnexpectedEof {
                expected: value.len().next_multiple_of(VL_REFERENCE_SIZE),
                available: value.len(),
            });
        }
        value.chunks_exact(VL_REFERENCE_SIZE).map(Self::from_bytes).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapObject {
    refcount: u16,
    data: Vec<u8>,
}

/// An in-memory global heap collection at a fixed file address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeap {
    address: u64,
    objects: BTreeMap<u16, HeapObject>,
}

impl GlobalHeap {
    /// Creates an empty collection located at `address`.
    pub fn new(address: u64) -> Self {
        Self {
            address,
            objects: BTreeMap::new(),
        }
    }

    /// File address of the collection.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the collection holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Stores `data` as a new object and returns a reference to it.
    ///
    /// Empty data yields [`VlRef::EMPTY`] without allocating an object.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::HeapFull`] when every index is in use, or when
    /// `data` is longer than a reference can describe.
    pub fn insert(&mut self, data: &[u8]) -> Result<VlRef, FormatError> {
        if data.is_empty() {
            return Ok(VlRef::EMPTY);
        }
        let length = u32::try_from(data.len()).map_err(|_| FormatError::HeapFull)?;
        let index = self.free_index().ok_or(FormatError::HeapFull)?;
        self.objects.insert(
            index,
            HeapObject {
                refcount: 1,
                data: data.to_vec(),
            },
        );
        Ok(VlRef {
            length,
            collection: self.address,
            index: u32::from(index),
        })
    }

    /// Returns the bytes a reference points at.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::HeapObjectNotFound`] if the reference names
    /// another collection or a missing object.
    pub fn get(&self, vl: &VlRef) -> Result<&[u8], FormatError> {
        if vl.is_empty() {
            return Ok(&[]);
        }
        let object = self.lookup(vl)?;
        let len = (vl.length as usize).min(object.data.len());
        Ok(&object.data[..len])
    }

    /// Drops one reference to an object, removing it when none remain.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::HeapObjectNotFound`] for dangling references.
    pub fn release(&mut self, vl: &VlRef) -> Result<(), FormatError> {
        if vl.is_empty() {
            return Ok(());
        }
        let key = self.key(vl)?;
        let remove = match self.objects.get_mut(&key) {
            Some(object) => {
                object.refcount = object.refcount.saturating_sub(1);
                object.refcount == 0
            }
            None => return Err(not_found(vl)),
        };
        if remove {
            self.objects.remove(&key);
        }
        Ok(())
    }

    /// Serializes the collection.
    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self
            .objects
            .values()
            .map(|o| OBJECT_HEADER_SIZE + o.data.len().next_multiple_of(8))
            .sum();
        let total = COLLECTION_HEADER_SIZE + body;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&GCOL_SIGNATURE);
        buf.extend_from_slice(&[GCOL_VERSION, 0, 0, 0]);
        buf.extend_from_slice(&(total as u64).to_le_bytes());
        for (index, object) in &self.objects {
            buf.extend_from_slice(&index.to_le_bytes());
            buf.extend_from_slice(&object.refcount.to_le_bytes());
            buf.extend_from_slice(&[0; 4]);
            buf.extend_from_slice(&(object.data.len() as u64).to_le_bytes());
            buf.extend_from_slice(&object.data);
            buf.resize(buf.len() + object.data.len().next_multiple_of(8) - object.data.len(), 0);
        }
        buf
    }

    /// Parses a collection that lives at `address` in the file.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] for a bad signature or version and for objects
    /// that run past the collection.
    pub fn decode(data: &[u8], address: u64) -> Result<Self, FormatError> {
        ensure_len(data, 0, COLLECTION_HEADER_SIZE)?;
        if data[0..4] != GCOL_SIGNATURE {
            return Err(FormatError::InvalidGlobalHeapSignature);
        }
        if data[4] != GCOL_VERSION {
            return Err(FormatError::InvalidGlobalHeapVersion(data[4]));
        }
        let size = usize::try_from(LittleEndian::read_u64(&data[8..16])).map_err(|_| {
            FormatError::UnexpectedEof {
                expected: usize::MAX,
                available: data.len(),
            }
        })?;
        ensure_len(data, 0, size)?;

        let mut objects = BTreeMap::new();
        let mut pos = COLLECTION_HEADER_SIZE;
        while pos + 2 <= size {
            let index = LittleEndian::read_u16(&data[pos..pos + 2]);
            if index == 0 {
                break;
            }
            ensure_len(&data[..size], pos, OBJECT_HEADER_SIZE)?;
            let refcount = LittleEndian::read_u16(&data[pos + 2..pos + 4]);
            let len = usize::try_from(LittleEndian::read_u64(&data[pos + 8..pos + 16]))
                .unwrap_or(usize::MAX);
            pos += OBJECT_HEADER_SIZE;
            ensure_len(&data[..size], pos, len)?;
            objects.insert(
                index,
                HeapObject {
                    refcount,
                    data: data[pos..pos + len].to_vec(),
                },
            );
            pos += len.next_multiple_of(8);
        }

        Ok(Self { address, objects })
    }

    fn free_index(&self) -> Option<u16> {
        let mut candidate: u16 = 1;
        for &used in self.objects.keys() {
            if used != candidate {
                break;
            }
            candidate = candidate.checked_add(1)?;
        }
        Some(candidate)
    }

    fn key(&self, vl: &VlRef) -> Result<u16, FormatError> {
        if vl.collection != self.address {
            return Err(not_found(vl));
        }
        u16::try_from(vl.index).map_err(|_| not_found(vl))
    }

    fn lookup(&self, vl: &VlRef) -> Result<&HeapObject, FormatError> {
        let key = self.key(vl)?;
        self.objects.get(&key).ok_or_else(|| not_found(vl))
    }
}

fn not_found(vl: &VlRef) -> FormatError {
    FormatError::HeapObjectNotFound {
        collection: vl.collection,
        index: vl.index,
    }
}

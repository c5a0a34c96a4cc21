//! HDF5 dataspace message (message type 0x0001).
//!
//! A dataspace gives the shape of an attribute value: a single element
//! (scalar), an N-dimensional array (simple) or no elements at all (null).

use byteorder::{ByteOrder, LittleEndian};

use crate::datatype::ensure_len;
use crate::error::FormatError;

/// Maximum dimension value meaning "unlimited".
pub const UNLIMITED: u64 = u64::MAX;

/// Maximum rank HDF5 allows.
pub const MAX_RANK: usize = 32;

/// Dataspace message version written by [`Dataspace::encode`].
const DATASPACE_VERSION: u8 = 2;

/// Width of a stored dimension.
const LENGTH_SIZE: usize = 8;

/// The shape of an attribute or dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dataspace {
    /// Exactly one element.
    Scalar,
    /// A rectangular array.
    Simple {
        /// Current extent of each dimension.
        dims: Vec<u64>,
        /// Maximum extent of each dimension, if recorded.
        max_dims: Option<Vec<u64>>,
    },
    /// No elements.
    Null,
}

impl Dataspace {
    /// A scalar dataspace.
    pub fn scalar() -> Self {
        Self::Scalar
    }

    /// A null dataspace.
    pub fn null() -> Self {
        Self::Null
    }

    /// A simple dataspace whose maximum extent equals its current extent.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidDataspace`] if `dims` is empty, has
    /// more than [`MAX_RANK`] entries, or holds more than `u64::MAX` elements.
    pub fn simple(dims: &[u64]) -> Result<Self, FormatError> {
        check_extent(dims)?;
        Ok(Self::Simple {
            dims: dims.to_vec(),
            max_dims: None,
        })
    }

    /// A simple dataspace with an explicit maximum extent.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidDataspace`] if the ranks differ or any
    /// current dimension exceeds its maximum.
    pub fn simple_with_max(dims: &[u64], max_dims: &[u64]) -> Result<Self, FormatError> {
        check_extent(dims)?;
        if dims.len() != max_dims.len() {
            return Err(FormatError::InvalidDataspace(format!(
                "rank {} does not match max rank {}",
                dims.len(),
                max_dims.len()
            )));
        }
        if let Some((d, m)) = dims.iter().zip(max_dims).find(|(d, m)| d > m) {
            return Err(FormatError::InvalidDataspace(format!(
                "dimension {d} exceeds maximum {m}"
            )));
        }
        Ok(Self::Simple {
            dims: dims.to_vec(),
            max_dims: Some(max_dims.to_vec()),
        })
    }

    /// Number of dimensions. Scalar and null dataspaces have rank 0.
    pub fn rank(&self) -> usize {
        match self {
            Self::Simple { dims, .. } => dims.len(),
            Self::Scalar | Self::Null => 0,
        }
    }

    /// Total number of elements. Scalar = 1, null = 0.
    ///
    /// Saturates at `u64::MAX` for a hand-built extent whose product does
    /// not fit.
    pub fn num_elements(&self) -> u64 {
        match self {
            Self::Scalar => 1,
            Self::Null => 0,
            Self::Simple { dims, .. } => checked_product(dims).unwrap_or(u64::MAX),
        }
    }

    /// Current and maximum dimensions, as `H5Sget_simple_extent_dims` reports them.
    ///
    /// Scalar and null dataspaces report empty vectors.
    pub fn simple_extent_dims(&self) -> (Vec<u64>, Vec<u64>) {
        match self {
            Self::Simple { dims, max_dims } => {
                let max = max_dims.clone().unwrap_or_else(|| dims.clone());
                (dims.clone(), max)
            }
            Self::Scalar | Self::Null => (Vec::new(), Vec::new()),
        }
    }

    /// Serializes the dataspace message (version 2, 8-byte lengths).
    pub fn encode(&self) -> Vec<u8> {
        let empty: &[u64] = &[];
        let (type_code, dims, max_dims) = match self {
            Self::Scalar => (0u8, empty, None),
            Self::Simple { dims, max_dims } => (1, dims.as_slice(), max_dims.as_ref()),
            Self::Null => (2, empty, None),
        };
        let mut buf = Vec::with_capacity(4 + dims.len() * LENGTH_SIZE * 2);
        buf.push(DATASPACE_VERSION);
        #[allow(clippy::cast_possible_truncation)] // rank is bounded by MAX_RANK
        buf.push(dims.len() as u8);
        buf.push(u8::from(max_dims.is_some()));
        buf.push(type_code);
        for dim in dims {
            buf.extend_from_slice(&dim.to_le_bytes());
        }
        if let Some(max_dims) = max_dims {
            for dim in max_dims {
                buf.extend_from_slice(&dim.to_le_bytes());
            }
        }
        buf
    }

    /// Parses a dataspace message, returning the dataspace and bytes consumed.
    ///
    /// Version 1 messages (rank 0 meaning scalar) and version 2 messages are
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] for truncated input, unknown versions or types,
    /// and current dimensions exceeding their maximum.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FormatError> {
        ensure_len(data, 0, 4)?;
        let version = data[0];
        let rank = usize::from(data[1]);
        let flags = data[2];

        let (type_code, mut pos) = match version {
            1 => {
                ensure_len(data, 0, 8)?;
                (if rank == 0 { 0 } else { 1 }, 8)
            }
            2 => (data[3], 4),
            other => return Err(FormatError::InvalidDataspaceVersion(other)),
        };

        let dims = read_dims(data, &mut pos, rank)?;
        let max_dims = if flags & 0x01 != 0 {
            Some(read_dims(data, &mut pos, rank)?)
        } else {
            None
        };
        // Version 1 may carry permutation indices that nothing uses.
        if version == 1 && flags & 0x02 != 0 {
            ensure_len(data, pos, rank * LENGTH_SIZE)?;
            pos += rank * LENGTH_SIZE;
        }

        let space = match type_code {
            0 => Self::Scalar,
            1 => match max_dims {
                Some(max) => Self::simple_with_max(&dims, &max)?,
                None => Self::simple(&dims)?,
            },
            2 => Self::Null,
            other => return Err(FormatError::InvalidDataspaceType(other)),
        };
        Ok((space, pos))
    }
}

fn check_extent(dims: &[u64]) -> Result<(), FormatError> {
    let rank = dims.len();
    if rank == 0 || rank > MAX_RANK {
        return Err(FormatError::InvalidDataspace(format!(
            "rank {rank} outside 1..={MAX_RANK}"
        )));
    }
    if checked_product(dims).is_none() {
        return Err(FormatError::InvalidDataspace(format!(
            "extent {dims:?} overflows the element count"
        )));
    }
    Ok(())
}

fn checked_product(dims: &[u64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
}

fn read_dims(data: &[u8], pos: &mut usize, rank: usize) -> Result<Vec<u64>, FormatError> {
    ensure_len(data, *pos, rank * LENGTH_SIZE)?;
    let dims = (0..rank)
        .map(|i| {
            let start = *pos + i * LENGTH_SIZE;
            LittleEndian::read_u64(&data[start..start + LENGTH_SIZE])
        })
        .collect();
    *pos += rank * LENGTH_SIZE;
    Ok(dims)
}

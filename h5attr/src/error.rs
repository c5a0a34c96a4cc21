//! Error types for the h5attr attribute library.

use thiserror::Error;

/// The main error type for all h5attr operations.
///
/// This enum covers every failure the attribute API can surface, from opening
/// a container file through message decoding to value conversion.
#[derive(Error, Debug)]
pub enum H5Error {
    /// Error reading, writing or validating a container file.
    #[error("file error: {0}")]
    File(#[from] FileError),

    /// Error decoding or encoding HDF5 message bytes.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Error using an identifier.
    #[error("handle error: {0}")]
    Handle(#[from] HandleError),

    /// Error locating or creating a group or dataset.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    /// Error creating, opening or deleting an attribute.
    #[error("attribute error: {0}")]
    Attribute(#[from] AttributeError),

    /// Error converting values between memory and file types.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Error validating or loading configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur while accessing a container file.
#[derive(Error, Debug)]
pub enum FileError {
    /// The file could not be read, written, created or renamed.
    #[error("I/O failed on '{path}': {source}")]
    Io {
        /// The path being accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping failed.
    #[error("memory mapping failed for file '{path}': {source}")]
    MemoryMap {
        /// The file path that failed to map.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid container.
    #[error("'{path}' is corrupted: {reason}")]
    Corrupted {
        /// The file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// The stored checksum does not match the file contents.
    #[error("checksum mismatch in '{path}': stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// The file path.
        path: String,
        /// Checksum recorded in the superblock.
        stored: u32,
        /// Checksum computed over the file body.
        computed: u32,
    },

    /// A write was attempted on a file opened read-only.
    #[error("file '{path}' is open read-only")]
    ReadOnly {
        /// The file path.
        path: String,
    },
}

/// Errors raised while decoding HDF5 message bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The buffer ended before the message did.
    #[error("unexpected end of data: need {expected} bytes, have {available}")]
    UnexpectedEof {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        available: usize,
    },

    /// Unsupported datatype message version for a class.
    #[error("unsupported datatype version {version} for class {class}")]
    InvalidDatatypeVersion {
        /// Datatype class id.
        class: u8,
        /// Message version.
        version: u8,
    },

    /// Datatype class not usable for attributes.
    #[error("unsupported datatype class {0}")]
    UnsupportedDatatypeClass(u8),

    /// Datatype properties are inconsistent.
    #[error("invalid datatype: {0}")]
    InvalidDatatype(String),

    /// Unknown string padding code.
    #[error("invalid string padding {0}")]
    InvalidStringPadding(u8),

    /// Unknown character set code.
    #[error("invalid character set {0}")]
    InvalidCharacterSet(u8),

    /// Unsupported dataspace message version.
    #[error("unsupported dataspace version {0}")]
    InvalidDataspaceVersion(u8),

    /// Unknown dataspace type code.
    #[error("invalid dataspace type {0}")]
    InvalidDataspaceType(u8),

    /// Dataspace dimensions are inconsistent.
    #[error("invalid dataspace: {0}")]
    InvalidDataspace(String),

    /// Unsupported attribute message version.
    #[error("unsupported attribute message version {0}")]
    InvalidAttributeVersion(u8),

    /// Global heap collection does not start with `GCOL`.
    #[error("invalid global heap signature")]
    InvalidGlobalHeapSignature,

    /// Unsupported global heap collection version.
    #[error("unsupported global heap version {0}")]
    InvalidGlobalHeapVersion(u8),

    /// A variable-length reference names a missing heap object.
    #[error("global heap object {index} not found in collection at {collection:#x}")]
    HeapObjectNotFound {
        /// Collection address in the reference.
        collection: u64,
        /// Object index in the reference.
        index: u32,
    },

    /// No free object index is left in the heap collection.
    #[error("global heap collection is full")]
    HeapFull,

    /// The container's object table is malformed.
    #[error("invalid object table: {0}")]
    InvalidObjectTable(String),
}

/// Errors that can occur when using identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The identifier was never issued or has already been released.
    #[error("invalid handle: {id}")]
    InvalidHandle {
        /// The raw identifier value.
        id: u64,
    },
}

/// Errors that can occur when locating or creating groups and datasets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// No object exists at the path.
    #[error("object '{path}' not found")]
    NotFound {
        /// The absolute object path.
        path: String,
    },

    /// An object already exists at the path.
    #[error("object '{path}' already exists")]
    AlreadyExists {
        /// The absolute object path.
        path: String,
    },

    /// The object name is not usable as a link name.
    #[error("invalid object name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// The object at the path is a dataset where a group is required.
    #[error("object '{path}' is not a group")]
    NotAGroup {
        /// The absolute object path.
        path: String,
    },

    /// The object at the path is a group where a dataset is required.
    #[error("object '{path}' is not a dataset")]
    NotADataset {
        /// The absolute object path.
        path: String,
    },
}

/// Errors that can occur when creating, opening or deleting attributes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    /// No attribute with the name exists on the object.
    #[error("attribute '{name}' not found on '{object}'")]
    NotFound {
        /// The object path.
        object: String,
        /// The attribute name.
        name: String,
    },

    /// An attribute with the name already exists on the object.
    #[error("attribute '{name}' already exists on '{object}'")]
    AlreadyExists {
        /// The object path.
        object: String,
        /// The attribute name.
        name: String,
    },

    /// The attribute name is empty or contains a NUL byte.
    #[error("invalid attribute name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// The encoded attribute message exceeds the configured limit.
    #[error("attribute '{name}' encodes to {size} bytes (max {max})")]
    TooLarge {
        /// The attribute name.
        name: String,
        /// Encoded message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Errors that can occur converting between memory and file representations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// No conversion path exists between the two types.
    #[error("no conversion from {from} to {to}")]
    Unsupported {
        /// Source type description.
        from: String,
        /// Destination type description.
        to: String,
    },

    /// A source or destination type has an element size that cannot be
    /// converted.
    #[error("invalid datatype: {0}")]
    InvalidType(#[from] FormatError),

    /// A value does not fit in the destination type.
    #[error("value {value} out of range for {to}")]
    Overflow {
        /// Rendering of the offending value.
        value: String,
        /// Destination type description.
        to: String,
    },

    /// The number of elements supplied or requested does not match.
    #[error("element count mismatch: dataspace has {expected}, got {found}")]
    ElementCount {
        /// Elements in the dataspace.
        expected: u64,
        /// Elements supplied.
        found: u64,
    },

    /// The raw buffer length does not match count × element size.
    #[error("buffer size mismatch: expected {expected} bytes, got {found}")]
    BufferSize {
        /// Required length in bytes.
        expected: usize,
        /// Supplied length in bytes.
        found: usize,
    },

    /// The dataspace rank does not match the requested shape.
    #[error("rank mismatch: expected rank {expected}, dataspace has rank {found}")]
    Rank {
        /// Rank required by the operation.
        expected: usize,
        /// Rank of the dataspace.
        found: usize,
    },

    /// The supplied shape differs from the dataspace dimensions.
    #[error("shape mismatch: dataspace is {expected:?}, got {found:?}")]
    Shape {
        /// Dataspace dimensions.
        expected: Vec<u64>,
        /// Supplied dimensions.
        found: Vec<u64>,
    },

    /// A string does not fit in a fixed-length string element.
    #[error("string of {len} bytes does not fit fixed-length type of {max} bytes")]
    StringTooLong {
        /// Byte length of the string.
        len: usize,
        /// Element size of the string type.
        max: usize,
    },

    /// Non-ASCII text was written to an ASCII string type.
    #[error("string contains non-ASCII characters but the type is ASCII")]
    NonAscii,

    /// Stored string bytes are not valid UTF-8.
    #[error("string data is not valid UTF-8")]
    InvalidUtf8,

    /// Matrix rows have differing lengths.
    #[error("ragged matrix: row {row} has {len} columns, expected {expected}")]
    RaggedMatrix {
        /// Index of the offending row.
        row: usize,
        /// Its length.
        len: usize,
        /// Length of the first row.
        expected: usize,
    },
}

/// Errors that can occur when validating or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Description of what is invalid.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to load config from '{path}': {source}")]
    Load {
        /// The config file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for `FileConfig`.
    #[error("failed to parse config from '{path}': {source}")]
    Parse {
        /// The config file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, H5Error>`.
pub type Result<T> = std::result::Result<T, H5Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_errors_convert_into_top_level() {
        let err: H5Error = HandleError::InvalidHandle { id: 7 }.into();
        assert!(matches!(err, H5Error::Handle(HandleError::InvalidHandle { id: 7 })));
        assert_eq!(err.to_string(), "handle error: invalid handle: 7");
    }

    #[test]
    fn test_display_includes_context() {
        let err = AttributeError::NotFound {
            object: "/grp".to_string(),
            name: "units".to_string(),
        };
        assert_eq!(err.to_string(), "attribute 'units' not found on '/grp'");

        let err = FileError::ChecksumMismatch {
            path: "a.h5a".to_string(),
            stored: 0xdead_beef,
            computed: 1,
        };
        assert!(err.to_string().contains("deadbeef"));
    }
}

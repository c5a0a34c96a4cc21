//! # h5attr
//!
//! HDF5 attributes in safe, pure Rust.
//!
//! h5attr implements the HDF5 attribute API: small named values attached
//! to groups and datasets. It handles scalar, array, fixed-length string,
//! variable-length string and string-matrix values, converts between native
//! Rust types and the stored layout, and tracks the identifiers through which
//! files, groups, datasets and attributes are accessed.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - HDF5 datatype, dataspace and attribute message encodings
//! - Range-checked numeric conversion between any integer and float layout
//! - Variable-length strings stored in a reference-counted global heap
//! - Fixed-length string reads never expose bytes past an element's size
//! - Atomic, checksummed file writes; no native HDF5 library required
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use h5attr::{Dataspace, Datatype, File, Location};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::create("run.h5a")?;
//! let dataset = file.create_dataset("temperature", &Datatype::native::<f32>(), &Dataspace::simple(&[1024])?)?;
//!
//! // Numeric attribute
//! let scale = dataset.new_attribute::<f64>("scale_factor", &Dataspace::scalar())?;
//! scale.write_scalar(0.01f64)?;
//!
//! // Variable-length string attribute
//! let units = dataset.create_attribute("units", &Datatype::varlen_string(), &Dataspace::scalar())?;
//! units.write_string("kelvin")?;
//!
//! // Read back with conversion
//! let factor: f32 = dataset.open_attribute("scale_factor")?.read_scalar()?;
//! assert_eq!(factor, 0.01);
//! file.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`File`] — Open container; the root group
//! - [`Location`] — Attribute operations on files, groups and datasets
//! - [`Attribute`] — Open attribute; raw, typed and string reads and writes
//! - [`Datatype`] / [`Dataspace`] — Element type and shape of a value
//! - [`FileConfig`] — Encoding options
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`file`] — File lifecycle, flush and close
//! - [`object`] — Groups, datasets and the `Location` trait
//! - [`attribute`] — Attribute handles and value marshaling
//! - [`convert`] — Memory/file type conversion and string codecs
//! - [`datatype`] — Datatype message
//! - [`dataspace`] — Dataspace message
//! - [`message`] — Attribute message
//! - [`heap`] — Global heap for variable-length strings
//! - [`handle`] — Identifier registry
//! - [`container`] — On-disk framing
//! - [`config`] — File configuration
//! - [`checksum`] — Jenkins lookup3
//! - [`error`] — Error types

pub mod attribute;
pub mod checksum;
pub mod config;
pub mod container;
pub mod convert;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod file;
pub mod handle;
pub mod heap;
pub mod message;
pub mod object;

// Re-export primary API types at crate root for convenience.
pub use attribute::Attribute;
pub use config::FileConfig;
pub use convert::H5Type;
pub use dataspace::Dataspace;
pub use datatype::{CharacterSet, Datatype, Endian, StringPadding};
pub use error::{H5Error, Result};
pub use file::{File, OpenMode};
pub use handle::{HandleKind, Hid};
pub use object::{Dataset, Group, Location, Object};

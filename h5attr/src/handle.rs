//! Identifier bookkeeping for open files, groups, datasets and attributes.
//!
//! Every open object is represented by an [`Hid`] issued by a
//! [`HandleRegistry`]. Identifiers increase monotonically and are never
//! reused, so a stale id can always be told apart from a live one.
//!
//! # Overview
//!
//! - [`Hid`] - Opaque identifier, `Copy`, tagged with its [`HandleKind`]
//! - [`HandleRegistry`] - Issues and releases identifiers
//! - [`Handle`] - RAII guard that releases its identifier on close or drop
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use h5attr::handle::{Handle, HandleKind, HandleRegistry};
//!
//! let registry = Arc::new(HandleRegistry::new());
//! let handle = Handle::new(&registry, HandleKind::Attribute);
//! let id = handle.id();
//! assert!(registry.is_valid(id));
//!
//! handle.close().unwrap();
//! assert!(!registry.is_valid(id));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::HandleError;

/// Bits of an [`Hid`] reserved for the sequence number.
const KIND_SHIFT: u32 = 56;

/// An opaque object identifier.
///
/// The top byte records the kind of object, the remaining bits a sequence
/// number unique within the issuing registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hid(u64);

impl Hid {
    /// The raw identifier value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The kind of object this identifier was issued for.
    pub fn kind(self) -> Option<HandleKind> {
        HandleKind::from_tag(self.0 >> KIND_SHIFT)
    }
}

impl fmt::Display for Hid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The type of object an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// An open container file.
    File,
    /// An open group.
    Group,
    /// An open dataset.
    Dataset,
    /// An open attribute.
    Attribute,
}

impl HandleKind {
    fn tag(self) -> u64 {
        match self {
            Self::File => 1,
            Self::Group => 2,
            Self::Dataset => 3,
            Self::Attribute => 4,
        }
    }

    fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(Self::File),
            2 => Some(Self::Group),
            3 => Some(Self::Dataset),
            4 => Some(Self::Attribute),
            _ => None,
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Group => "group",
            Self::Dataset => "dataset",
            Self::Attribute => "attribute",
        };
        f.write_str(name)
    }
}

/// Issues and tracks identifiers.
///
/// # Thread Safety
///
/// The registry is internally synchronized and is shared through an `Arc`
/// by every handle it issues.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Last sequence number issued.
    sequence: u64,
    /// Identifiers currently open.
    live: HashMap<Hid, HandleKind>,
}

impl HandleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh identifier for an object of `kind`.
    pub fn register(&self, kind: HandleKind) -> Hid {
        let mut state = self.state.lock();
        state.sequence += 1;
        let id = Hid((kind.tag() << KIND_SHIFT) | state.sequence);
        state.live.insert(id, kind);
        trace!(%id, %kind, "registered handle");
        id
    }

    /// Releases an identifier, returning the kind it was issued for.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidHandle`] if `id` was never issued or has
    /// already been released.
    pub fn release(&self, id: Hid) -> Result<HandleKind, HandleError> {
        let kind = self
            .state
            .lock()
            .live
            .remove(&id)
            .ok_or(HandleError::InvalidHandle { id: id.raw() })?;
        trace!(%id, %kind, "released handle");
        Ok(kind)
    }

    /// Whether `id` is currently open.
    pub fn is_valid(&self, id: Hid) -> bool {
        self.state.lock().live.contains_key(&id)
    }

    /// The kind of an open identifier, `None` if it is not open.
    pub fn kind(&self, id: Hid) -> Option<HandleKind> {
        self.state.lock().live.get(&id).copied()
    }

    /// Number of open identifiers of `kind`.
    pub fn count(&self, kind: HandleKind) -> usize {
        self.state.lock().live.values().filter(|k| **k == kind).count()
    }

    /// Number of open identifiers of any kind.
    pub fn total(&self) -> usize {
        self.state.lock().live.len()
    }
}

/// An open identifier that is released when closed or dropped.
#[derive(Debug)]
pub struct Handle {
    id: Hid,
    registry: Arc<HandleRegistry>,
    released: bool,
}

impl Handle {
    /// Registers a new identifier of `kind` with `registry`.
    pub fn new(registry: &Arc<HandleRegistry>, kind: HandleKind) -> Self {
        Self {
            id: registry.register(kind),
            registry: Arc::clone(registry),
            released: false,
        }
    }

    /// The identifier.
    pub fn id(&self) -> Hid {
        self.id
    }

    /// Whether the identifier is still open in its registry.
    pub fn is_valid(&self) -> bool {
        !self.released && self.registry.is_valid(self.id)
    }

    /// Checks the identifier is still open.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidHandle`] if it has been released.
    pub fn ensure_valid(&self) -> Result<(), HandleError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(HandleError::InvalidHandle { id: self.id.raw() })
        }
    }

    /// Releases the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidHandle`] if the registry no longer knows
    /// the identifier.
    pub fn close(mut self) -> Result<(), HandleError> {
        self.released = true;
        self.registry.release(self.id).map(|_| ())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.registry.release(self.id)
        {
            warn!(id = %self.id, error = %e, "failed to release handle on drop");
        }
    }
}

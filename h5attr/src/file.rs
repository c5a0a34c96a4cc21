//! Open container files.
//!
//! A [`File`] is the entry point to the attribute API. It owns the in-memory
//! object tree loaded from disk, hands out [`Group`], [`Dataset`] and
//! [`Attribute`](crate::attribute::Attribute) handles, and writes the tree
//! back on [`File::flush`].
//!
//! # Lifecycle
//!
//! Every handle opened from a file shares its state. Closing the `File`
//! releases the file identifier but leaves that state alive while any other
//! handle is still open; the state is flushed one last time when the final
//! handle goes away. Changes made through a read-only file are rejected with
//! [`FileError::ReadOnly`].
//!
//! # Example
//!
//! ```rust,no_run
//! use h5attr::{Dataspace, File, Location};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::create("example.h5a")?;
//! let attr = file.new_attribute::<f64>("scale", &Dataspace::scalar())?;
//! attr.write_scalar(0.5f64)?;
//! attr.close()?;
//! file.close()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::FileConfig;
use crate::container::{self, ContainerImage, ObjectKind, ObjectRecord};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{FileError, ObjectError, Result};
use crate::handle::{Handle, HandleKind, HandleRegistry, Hid};
use crate::heap::GlobalHeap;
use crate::object::{Dataset, Group, Location, Object, ObjectLocation};

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads only; any change fails.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Mutable contents of an open file.
#[derive(Debug)]
pub(crate) struct FileState {
    /// Objects keyed by absolute path.
    pub(crate) objects: BTreeMap<String, ObjectRecord>,
    /// Variable-length string bodies.
    pub(crate) heap: GlobalHeap,
    /// Whether the state differs from what is on disk.
    pub(crate) dirty: bool,
}

impl FileState {
    fn from_image(image: ContainerImage) -> Self {
        Self {
            objects: image.objects.into_iter().collect(),
            heap: image.heap,
            dirty: false,
        }
    }

    fn to_image(&self) -> ContainerImage {
        ContainerImage {
            heap: self.heap.clone(),
            objects: self
                .objects
                .iter()
                .map(|(path, record)| (path.clone(), record.clone()))
                .collect(),
        }
    }
}

/// State shared by a file and every handle opened from it.
#[derive(Debug)]
pub(crate) struct FileShared {
    path: PathBuf,
    mode: OpenMode,
    config: FileConfig,
    registry: Arc<HandleRegistry>,
    state: Mutex<FileState>,
}

impl FileShared {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn config(&self) -> &FileConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(FileError::ReadOnly {
                path: self.path.display().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Runs `f` on the object at `path`.
    pub(crate) fn with_object<R>(
        &self,
        path: &str,
        f: impl FnOnce(&ObjectRecord, &GlobalHeap) -> Result<R>,
    ) -> Result<R> {
        let state = self.state.lock();
        let record = state.objects.get(path).ok_or_else(|| ObjectError::NotFound {
            path: path.to_string(),
        })?;
        f(record, &state.heap)
    }

    /// Runs `f` on the object at `path` for modification, marking the file
    /// dirty if `f` succeeds.
    pub(crate) fn with_object_mut<R>(
        &self,
        path: &str,
        f: impl FnOnce(&mut ObjectRecord, &mut GlobalHeap) -> Result<R>,
    ) -> Result<R> {
        self.ensure_writable()?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let record = state
            .objects
            .get_mut(path)
            .ok_or_else(|| ObjectError::NotFound {
                path: path.to_string(),
            })?;
        let result = f(record, &mut state.heap)?;
        state.dirty = true;
        Ok(result)
    }

    /// Adds a new object at `path`.
    pub(crate) fn insert_object(&self, path: &str, record: ObjectRecord) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.state.lock();
        if state.objects.contains_key(path) {
            return Err(ObjectError::AlreadyExists {
                path: path.to_string(),
            }
            .into());
        }
        state.objects.insert(path.to_string(), record);
        state.dirty = true;
        Ok(())
    }

    /// Returns the kind of the object at `path`.
    pub(crate) fn object_kind(&self, path: &str) -> Result<ObjectKind> {
        self.with_object(path, |record, _| Ok(record.kind.clone()))
    }

    /// Names of the direct children of the group at `path`, in name order.
    pub(crate) fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let state = self.state.lock();
        state
            .objects
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn object_summaries(&self) -> Vec<ObjectSummary> {
        let state = self.state.lock();
        state
            .objects
            .iter()
            .map(|(path, record)| ObjectSummary {
                path: path.clone(),
                is_dataset: matches!(record.kind, ObjectKind::Dataset { .. }),
                attribute_count: record.attributes.len(),
            })
            .collect()
    }

    /// Writes the state to disk if it has changed.
    fn flush(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(());
        }
        container::write(&self.path, &state.to_image(), self.config.sync_on_flush)?;
        state.dirty = false;
        debug!(path = %self.path.display(), "flushed file");
        Ok(())
    }
}

impl Drop for FileShared {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush file on close");
        }
    }
}

/// A one-line description of an object, as listed by [`File::objects`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Absolute path.
    pub path: String,
    /// `true` for datasets, `false` for groups.
    pub is_dataset: bool,
    /// Number of attributes attached.
    pub attribute_count: usize,
}

/// An open container file.
///
/// The file itself is the root group `/`: attributes created through its
/// [`Location`] implementation attach to the root.
#[derive(Debug)]
pub struct File {
    location: ObjectLocation,
    handle: Handle,
}

impl File {
    /// Creates a new file, replacing any existing file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the file cannot be written.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_config(path, FileConfig::default())
    }

    /// Creates a new file with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` is invalid and [`FileError::Io`] if
    /// the file cannot be written.
    pub fn create_with_config<P: AsRef<Path>>(path: P, config: FileConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let image = ContainerImage::default();
        container::write(path, &image, config.sync_on_flush)?;
        debug!(path = %path.display(), "created file");
        Ok(Self::from_image(path, OpenMode::ReadWrite, config, image))
    }

    /// Opens an existing file read-only.
    ///
    /// # Errors
    ///
    /// Returns [`FileError`] if the file is missing, unreadable or corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, OpenMode::ReadOnly, FileConfig::default())
    }

    /// Opens an existing file for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns [`FileError`] if the file is missing, unreadable or corrupted.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, OpenMode::ReadWrite, FileConfig::default())
    }

    /// Opens an existing file with an explicit mode and configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` is invalid and [`FileError`] if
    /// the file is missing, unreadable or corrupted.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        config: FileConfig,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let image = container::read(path)?;
        debug!(path = %path.display(), ?mode, "opened file");
        Ok(Self::from_image(path, mode, config, image))
    }

    fn from_image(path: &Path, mode: OpenMode, config: FileConfig, image: ContainerImage) -> Self {
        let registry = Arc::new(HandleRegistry::new());
        let shared = Arc::new(FileShared {
            path: path.to_path_buf(),
            mode,
            config,
            registry: Arc::clone(&registry),
            state: Mutex::new(FileState::from_image(image)),
        });
        Self {
            location: ObjectLocation::new(shared, "/".to_string()),
            handle: Handle::new(&registry, HandleKind::File),
        }
    }

    /// Writes pending changes to disk. Does nothing for read-only files.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the file cannot be written.
    pub fn flush(&self) -> Result<()> {
        self.handle.ensure_valid()?;
        self.location.shared().flush()
    }

    /// Flushes and closes the file identifier.
    ///
    /// Groups, datasets and attributes opened from this file stay usable.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the flush fails.
    pub fn close(self) -> Result<()> {
        self.location.shared().flush()?;
        debug!(path = %self.path().display(), "closed file");
        self.handle.close()?;
        Ok(())
    }

    /// The file identifier.
    pub fn id(&self) -> Hid {
        self.handle.id()
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        self.location.shared().path()
    }

    /// The mode the file was opened in.
    pub fn mode(&self) -> OpenMode {
        self.location.shared().mode
    }

    /// The active configuration.
    pub fn config(&self) -> &FileConfig {
        self.location.shared().config()
    }

    /// Number of open identifiers of `kind` issued by this file.
    pub fn open_handle_count(&self, kind: HandleKind) -> usize {
        self.location.shared().registry().count(kind)
    }

    /// Every object in the file, in path order.
    pub fn objects(&self) -> Vec<ObjectSummary> {
        self.location.shared().object_summaries()
    }

    /// Opens the root group as a separate handle.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`](crate::error::HandleError) if the file is closed.
    pub fn root(&self) -> Result<Group> {
        self.handle.ensure_valid()?;
        Ok(Group::from_location(self.location.clone()))
    }

    /// Opens a group or dataset by absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::NotFound`] if nothing exists at `path`.
    pub fn open_object(&self, path: &str) -> Result<Object> {
        self.handle.ensure_valid()?;
        let path = normalize_path(path);
        let location = ObjectLocation::new(Arc::clone(self.location.shared()), path);
        location.open()
    }

    /// Creates a group in the root group.
    ///
    /// # Errors
    ///
    /// See [`Group::create_group`].
    pub fn create_group(&self, name: &str) -> Result<Group> {
        self.handle.ensure_valid()?;
        self.location.create_group(name)
    }

    /// Opens a group in the root group.
    ///
    /// # Errors
    ///
    /// See [`Group::open_group`].
    pub fn open_group(&self, name: &str) -> Result<Group> {
        self.handle.ensure_valid()?;
        self.location.open_group(name)
    }

    /// Creates a dataset in the root group.
    ///
    /// # Errors
    ///
    /// See [`Group::create_dataset`].
    pub fn create_dataset(
        &self,
        name: &str,
        datatype: &Datatype,
        dataspace: &Dataspace,
    ) -> Result<Dataset> {
        self.handle.ensure_valid()?;
        self.location.create_dataset(name, datatype, dataspace)
    }

    /// Opens a dataset in the root group.
    ///
    /// # Errors
    ///
    /// See [`Group::open_dataset`].
    pub fn open_dataset(&self, name: &str) -> Result<Dataset> {
        self.handle.ensure_valid()?;
        self.location.open_dataset(name)
    }

    /// Names of the root group's members.
    pub fn member_names(&self) -> Vec<String> {
        self.location.shared().child_names("/")
    }
}

impl Location for File {
    fn object_location(&self) -> &ObjectLocation {
        &self.location
    }

    fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Turns `grp/ds`, `/grp/ds/` and `/grp//ds` into `/grp/ds`.
fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

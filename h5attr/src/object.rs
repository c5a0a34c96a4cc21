//! Groups, datasets and the [`Location`] trait attributes hang off.
//!
//! Attributes can be attached to any object that implements [`Location`]:
//! the [`File`](crate::File) (its root group), a [`Group`], a [`Dataset`] or
//! an [`Object`] returned by a path lookup. The trait's provided methods are
//! the attribute entry points:
//!
//! | Method | Does |
//! |--------|------|
//! | [`Location::create_attribute`] | create a zero-filled attribute |
//! | [`Location::open_attribute`] | open an existing attribute by name |
//! | [`Location::attribute_exists`] | test whether a name is in use |
//! | [`Location::delete_attribute`] | remove an attribute |

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::attribute::{self, Attribute};
use crate::container::{ObjectKind, ObjectRecord};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::convert::H5Type;
use crate::error::{ObjectError, Result};
use crate::file::FileShared;
use crate::handle::{Handle, HandleKind, Hid};

/// Where an open object lives: the file it belongs to and its absolute path.
#[derive(Debug, Clone)]
pub struct ObjectLocation {
    shared: Arc<FileShared>,
    path: String,
}

impl ObjectLocation {
    pub(crate) fn new(shared: Arc<FileShared>, path: String) -> Self {
        Self { shared, path }
    }

    pub(crate) fn shared(&self) -> &Arc<FileShared> {
        &self.shared
    }

    /// Absolute path of the object within its file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the file on disk.
    pub fn file_path(&self) -> &Path {
        self.shared.path()
    }

    fn child(&self, name: &str) -> Result<Self> {
        validate_name(name)?;
        let path = if self.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path)
        };
        Ok(Self::new(Arc::clone(&self.shared), path))
    }

    pub(crate) fn create_group(&self, name: &str) -> Result<Group> {
        let child = self.child(name)?;
        self.shared.insert_object(&child.path, ObjectRecord::group())?;
        debug!(path = %child.path, "created group");
        Ok(Group::from_location(child))
    }

    pub(crate) fn open_group(&self, name: &str) -> Result<Group> {
        match self.child(name)?.open()? {
            Object::Group(group) => Ok(group),
            Object::Dataset(dataset) => Err(ObjectError::NotAGroup {
                path: dataset.location.path.clone(),
            }
            .into()),
        }
    }

    pub(crate) fn create_dataset(
        &self,
        name: &str,
        datatype: &Datatype,
        dataspace: &Dataspace,
    ) -> Result<Dataset> {
        datatype.validate()?;
        let child = self.child(name)?;
        self.shared.insert_object(
            &child.path,
            ObjectRecord::dataset(datatype.clone(), dataspace.clone()),
        )?;
        debug!(path = %child.path, %datatype, "created dataset");
        Ok(Dataset::from_location(child))
    }

    pub(crate) fn open_dataset(&self, name: &str) -> Result<Dataset> {
        match self.child(name)?.open()? {
            Object::Dataset(dataset) => Ok(dataset),
            Object::Group(group) => Err(ObjectError::NotADataset {
                path: group.location.path.clone(),
            }
            .into()),
        }
    }

    /// Opens whatever object exists at this location.
    pub(crate) fn open(self) -> Result<Object> {
        let object = match self.shared.object_kind(&self.path)? {
            ObjectKind::Group => Object::Group(Group::from_location(self)),
            ObjectKind::Dataset { .. } => Object::Dataset(Dataset::from_location(self)),
        };
        debug!(path = %object.object_location().path, "opened object");
        Ok(object)
    }
}

/// An object attributes can be attached to.
///
/// Implementors supply their location and identifier; the attribute
/// operations are provided. Every operation fails with
/// [`HandleError::InvalidHandle`](crate::error::HandleError::InvalidHandle)
/// once the identifier has been released.
pub trait Location {
    /// Where the object lives.
    fn object_location(&self) -> &ObjectLocation;

    /// The object's open identifier.
    fn handle(&self) -> &Handle;

    /// The object's identifier.
    fn id(&self) -> Hid {
        self.handle().id()
    }

    /// Absolute path of the object within its file.
    fn object_path(&self) -> &str {
        self.object_location().path()
    }

    /// Creates an attribute whose value is zero-filled.
    ///
    /// Numbers read back as 0, fixed strings and variable-length strings as
    /// empty strings until the attribute is written.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::InvalidName`](crate::error::AttributeError::InvalidName) for an empty or NUL-containing name
    /// - [`AttributeError::AlreadyExists`](crate::error::AttributeError::AlreadyExists) if the name is taken
    /// - [`AttributeError::TooLarge`](crate::error::AttributeError::TooLarge) if the message exceeds the configured limit
    /// - [`FileError::ReadOnly`](crate::error::FileError::ReadOnly) for read-only files
    fn create_attribute(
        &self,
        name: &str,
        datatype: &Datatype,
        dataspace: &Dataspace,
    ) -> Result<Attribute> {
        self.handle().ensure_valid()?;
        attribute::create(self.object_location(), name, datatype, dataspace)
    }

    /// Creates an attribute typed after the native scalar `T`.
    ///
    /// # Errors
    ///
    /// See [`Location::create_attribute`].
    fn new_attribute<T: H5Type>(&self, name: &str, dataspace: &Dataspace) -> Result<Attribute>
    where
        Self: Sized,
    {
        self.create_attribute(name, &Datatype::native::<T>(), dataspace)
    }

    /// Opens an existing attribute.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::NotFound`](crate::error::AttributeError::NotFound)
    /// if no attribute has that name.
    fn open_attribute(&self, name: &str) -> Result<Attribute> {
        self.handle().ensure_valid()?;
        attribute::open(self.object_location(), name)
    }

    /// Whether an attribute with that name exists.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or the object's identifier is no longer
    /// valid; a missing attribute is `Ok(false)`.
    fn attribute_exists(&self, name: &str) -> Result<bool> {
        self.handle().ensure_valid()?;
        attribute::exists(self.object_location(), name)
    }

    /// Attribute names in creation order.
    ///
    /// # Errors
    ///
    /// Fails if the object's identifier is no longer valid.
    fn attribute_names(&self) -> Result<Vec<String>> {
        self.handle().ensure_valid()?;
        attribute::names(self.object_location())
    }

    /// Number of attributes attached.
    ///
    /// # Errors
    ///
    /// Fails if the object's identifier is no longer valid.
    fn attribute_count(&self) -> Result<usize> {
        Ok(self.attribute_names()?.len())
    }

    /// Removes an attribute, releasing any heap storage it holds.
    ///
    /// Handles still open on the attribute fail with `NotFound` afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::NotFound`](crate::error::AttributeError::NotFound)
    /// if no attribute has that name and
    /// [`FileError::ReadOnly`](crate::error::FileError::ReadOnly) for
    /// read-only files.
    fn delete_attribute(&self, name: &str) -> Result<()> {
        self.handle().ensure_valid()?;
        attribute::delete(self.object_location(), name)
    }
}

/// An open group.
#[derive(Debug)]
pub struct Group {
    location: ObjectLocation,
    handle: Handle,
}

impl Group {
    pub(crate) fn from_location(location: ObjectLocation) -> Self {
        let handle = Handle::new(location.shared.registry(), HandleKind::Group);
        Self { location, handle }
    }

    /// Last component of the group's path; `/` for the root group.
    pub fn name(&self) -> &str {
        base_name(&self.location.path)
    }

    /// Creates a child group.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::InvalidName`] for a bad name and
    /// [`ObjectError::AlreadyExists`] if the name is taken.
    pub fn create_group(&self, name: &str) -> Result<Group> {
        self.handle.ensure_valid()?;
        self.location.create_group(name)
    }

    /// Opens a child group.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::NotFound`] if it does not exist and
    /// [`ObjectError::NotAGroup`] if the name refers to a dataset.
    pub fn open_group(&self, name: &str) -> Result<Group> {
        self.handle.ensure_valid()?;
        self.location.open_group(name)
    }

    /// Creates a child dataset with the given type and shape.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::InvalidName`] for a bad name and
    /// [`ObjectError::AlreadyExists`] if the name is taken.
    pub fn create_dataset(
        &self,
        name: &str,
        datatype: &Datatype,
        dataspace: &Dataspace,
    ) -> Result<Dataset> {
        self.handle.ensure_valid()?;
        self.location.create_dataset(name, datatype, dataspace)
    }

    /// Opens a child dataset.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::NotFound`] if it does not exist and
    /// [`ObjectError::NotADataset`] if the name refers to a group.
    pub fn open_dataset(&self, name: &str) -> Result<Dataset> {
        self.handle.ensure_valid()?;
        self.location.open_dataset(name)
    }

    /// Names of direct members, in name order.
    pub fn member_names(&self) -> Vec<String> {
        self.location.shared.child_names(&self.location.path)
    }

    /// Releases the group identifier.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidHandle`](crate::error::HandleError::InvalidHandle)
    /// if it was already released.
    pub fn close(self) -> Result<()> {
        debug!(path = %self.location.path, "closed group");
        Ok(self.handle.close()?)
    }
}

impl Location for Group {
    fn object_location(&self) -> &ObjectLocation {
        &self.location
    }

    fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// An open dataset. Datasets carry a type and shape but no data.
#[derive(Debug)]
pub struct Dataset {
    location: ObjectLocation,
    handle: Handle,
}

impl Dataset {
    pub(crate) fn from_location(location: ObjectLocation) -> Self {
        let handle = Handle::new(location.shared.registry(), HandleKind::Dataset);
        Self { location, handle }
    }

    /// Last component of the dataset's path.
    pub fn name(&self) -> &str {
        base_name(&self.location.path)
    }

    /// A copy of the dataset's element type.
    ///
    /// # Errors
    ///
    /// Fails if the identifier is no longer valid.
    pub fn datatype(&self) -> Result<Datatype> {
        Ok(self.kind()?.0)
    }

    /// A copy of the dataset's shape.
    ///
    /// # Errors
    ///
    /// Fails if the identifier is no longer valid.
    pub fn space(&self) -> Result<Dataspace> {
        Ok(self.kind()?.1)
    }

    fn kind(&self) -> Result<(Datatype, Dataspace)> {
        self.handle.ensure_valid()?;
        match self.location.shared.object_kind(&self.location.path)? {
            ObjectKind::Dataset {
                datatype,
                dataspace,
            } => Ok((datatype, dataspace)),
            ObjectKind::Group => Err(ObjectError::NotADataset {
                path: self.location.path.clone(),
            }
            .into()),
        }
    }

    /// Releases the dataset identifier.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidHandle`](crate::error::HandleError::InvalidHandle)
    /// if it was already released.
    pub fn close(self) -> Result<()> {
        debug!(path = %self.location.path, "closed dataset");
        Ok(self.handle.close()?)
    }
}

impl Location for Dataset {
    fn object_location(&self) -> &ObjectLocation {
        &self.location
    }

    fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// A group or dataset opened by path.
#[derive(Debug)]
pub enum Object {
    /// A group.
    Group(Group),
    /// A dataset.
    Dataset(Dataset),
}

impl Object {
    /// Releases the identifier.
    ///
    /// # Errors
    ///
    /// Fails if it was already released.
    pub fn close(self) -> Result<()> {
        match self {
            Self::Group(group) => group.close(),
            Self::Dataset(dataset) => dataset.close(),
        }
    }
}

impl Location for Object {
    fn object_location(&self) -> &ObjectLocation {
        match self {
            Self::Group(group) => &group.location,
            Self::Dataset(dataset) => &dataset.location,
        }
    }

    fn handle(&self) -> &Handle {
        match self {
            Self::Group(group) => &group.handle,
            Self::Dataset(dataset) => &dataset.handle,
        }
    }
}

fn base_name(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((_, "")) | None => "/",
        Some((_, name)) => name,
    }
}

/// Checks a group or dataset name.
fn validate_name(name: &str) -> std::result::Result<(), ObjectError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('/') {
        "name contains '/'"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else if name == "." {
        "'.' is reserved"
    } else {
        return Ok(());
    };
    Err(ObjectError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

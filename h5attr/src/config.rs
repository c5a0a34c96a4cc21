//! Per-file configuration.
//!
//! [`FileConfig`] controls how attributes are encoded when a file is written.
//! It can be built in code or loaded from a JSON file:
//!
//! ```json
//! {
//!   "attribute_version": 3,
//!   "max_attribute_size": 65535,
//!   "sync_on_flush": true,
//!   "default_charset": "utf8"
//! }
//! ```
//!
//! Missing fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::datatype::{CharacterSet, Datatype};
use crate::error::{ConfigError, Result};

/// Largest message an HDF5 object header can hold.
pub const MAX_HEADER_MESSAGE_SIZE: usize = 65_535;

/// Configuration applied to an open file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Attribute message version written for new attributes (1 or 3).
    pub attribute_version: u8,
    /// Maximum encoded size of one attribute message.
    pub max_attribute_size: usize,
    /// Whether to `fsync` the container after writing it.
    pub sync_on_flush: bool,
    /// Character set for string types built through [`FileConfig::string_type`].
    pub default_charset: CharacterSet,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            attribute_version: 3,
            max_attribute_size: MAX_HEADER_MESSAGE_SIZE,
            sync_on_flush: true,
            default_charset: CharacterSet::Ascii,
        }
    }
}

impl FileConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the attribute version is not 1 or
    /// 3, or the size limit is zero or above the object header limit.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.attribute_version, 1 | 3) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "attribute_version must be 1 or 3, got {}",
                    self.attribute_version
                ),
            }
            .into());
        }

        if self.max_attribute_size == 0 || self.max_attribute_size > MAX_HEADER_MESSAGE_SIZE {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "max_attribute_size must be in 1..={MAX_HEADER_MESSAGE_SIZE}, got {}",
                    self.max_attribute_size
                ),
            }
            .into());
        }

        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON, and
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// A string type in the configured character set.
    ///
    /// `Some(size)` gives a fixed-length type of `size` bytes, `None` a
    /// variable-length type.
    pub fn string_type(&self, size: Option<usize>) -> Datatype {
        let base = match size {
            Some(size) => Datatype::fixed_string(size),
            None => Datatype::varlen_string(),
        };
        base.with_charset(self.default_charset)
    }
}

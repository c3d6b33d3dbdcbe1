use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::btree::BTreeParams;
use crate::types::{lookup3, AttrError, Result};

use super::codec::VersionBounds;
use super::metrics::AttrMetrics;
use super::record::{CORDER_RECORD_LEN, NAME_RECORD_LEN};

/// Function hashing an attribute name into the name-index key.
pub type NameHashFn = fn(&[u8]) -> u32;

/// Default attribute name hash: lookup3 with a zero seed.
pub fn lookup3_name_hash(name: &[u8]) -> u32 {
    lookup3(name, 0)
}

fn default_name_hash() -> NameHashFn {
    lookup3_name_hash
}

/// Configuration supplied when creating or opening dense attribute storage.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseOptions {
    /// Assign creation indices to inserted attributes.
    pub track_creation_order: bool,
    /// Maintain the creation-order index (implies tracking).
    pub index_creation_order: bool,
    /// Parameters of the name index.
    pub name_index: BTreeParams,
    /// Parameters of the creation-order index.
    pub corder_index: BTreeParams,
    /// Attribute message versions the file may use.
    pub versions: VersionBounds,
    /// Name hash; not part of the serialized form.
    #[serde(skip, default = "default_name_hash")]
    pub name_hash: NameHashFn,
    /// Optional metrics sink.
    #[serde(skip)]
    pub metrics: Option<Arc<dyn AttrMetrics>>,
}

impl Default for DenseOptions {
    fn default() -> Self {
        Self {
            track_creation_order: false,
            index_creation_order: false,
            name_index: BTreeParams::default(),
            corder_index: BTreeParams::default(),
            versions: VersionBounds::default(),
            name_hash: default_name_hash(),
            metrics: None,
        }
    }
}

impl std::fmt::Debug for DenseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseOptions")
            .field("track_creation_order", &self.track_creation_order)
            .field("index_creation_order", &self.index_creation_order)
            .field("name_index", &self.name_index)
            .field("corder_index", &self.corder_index)
            .field("versions", &self.versions)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl DenseOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables creation-order tracking.
    pub fn track_creation_order(mut self, enabled: bool) -> Self {
        self.track_creation_order = enabled;
        if !enabled {
            self.index_creation_order = false;
        }
        self
    }

    /// Enables or disables the creation-order index; enabling also turns on tracking.
    pub fn index_creation_order(mut self, enabled: bool) -> Self {
        self.index_creation_order = enabled;
        if enabled {
            self.track_creation_order = true;
        }
        self
    }

    /// Sets the name-index parameters.
    pub fn name_index(mut self, params: BTreeParams) -> Self {
        self.name_index = params;
        self
    }

    /// Sets the creation-order-index parameters.
    pub fn corder_index(mut self, params: BTreeParams) -> Self {
        self.corder_index = params;
        self
    }

    /// Sets the attribute message version bounds.
    pub fn versions(mut self, bounds: VersionBounds) -> Self {
        self.versions = bounds;
        self
    }

    /// Replaces the name hash.
    pub fn name_hash(mut self, hash: NameHashFn) -> Self {
        self.name_hash = hash;
        self
    }

    /// Installs a metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn AttrMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Checks that the settings can be honoured.
    pub fn validate(&self) -> Result<()> {
        if self.index_creation_order && !self.track_creation_order {
            return Err(AttrError::Invalid(
                "indexing creation order requires tracking it",
            ));
        }
        self.name_index.validate(NAME_RECORD_LEN)?;
        self.corder_index.validate(CORDER_RECORD_LEN)?;
        self.versions.validate()
    }

    /// Parses options from TOML text.
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, ConfigError> {
        let options: Self =
            toml::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Renders options as TOML.
    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }
}

/// Errors raised while loading [`DenseOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read dense storage config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The text is not valid TOML for these options.
    #[error("failed to parse dense storage config{}: {source}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        /// File that failed, if any.
        path: Option<PathBuf>,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// Options could not be rendered.
    #[error("failed to serialize dense storage config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// Parsed values are inconsistent.
    #[error("invalid dense storage config: {0}")]
    Invalid(#[from] AttrError),
}

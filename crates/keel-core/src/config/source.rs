//! Configuration sources.
//!
//! A [`ConfigSource`] yields one raw layer document, or nothing when the layer
//! is absent. The resolver never touches the filesystem itself; it only sees
//! the documents produced here.
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::data::{ConfigData, ConfigFormat};
use crate::config::error::ConfigSystemError;
use crate::kernel::constants;

/// A provider of one raw configuration layer.
pub trait ConfigSource: Send + Sync + Debug {
    /// Human-readable description used in error messages
    fn describe(&self) -> String;

    /// Load the layer document; `Ok(None)` means the layer is absent.
    fn load(&self) -> Result<Option<ConfigData>, ConfigSystemError>;
}

/// A layer stored in a file; the format follows the file extension.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    required: bool,
}

impl FileSource {
    /// A file that must exist (the project manifest)
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: true,
        }
    }

    /// A file whose absence simply means the layer is empty
    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

impl ConfigSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Option<ConfigData>, ConfigSystemError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound && !self.required => {
                debug!("Optional configuration layer {} is absent", self.path.display());
                return Ok(None);
            }
            Err(err) => {
                let reason = if err.kind() == ErrorKind::NotFound {
                    "file not found".to_string()
                } else {
                    format!("cannot be read: {}", err)
                };
                return Err(ConfigSystemError::SourceUnavailable {
                    source_name: self.describe(),
                    reason,
                    source: Some(err),
                });
            }
        };

        let format = ConfigFormat::from_path(&self.path)
            .ok_or_else(|| ConfigSystemError::UnsupportedFormat(self.path.clone()))?;
        debug!("Loading configuration layer {} as {}", self.path.display(), format.extension());
        ConfigData::deserialize(&contents, format, &self.describe()).map(Some)
    }
}

/// An in-memory layer, used for embedding and tests.
#[derive(Debug, Clone)]
pub struct InlineSource {
    name: String,
    data: Option<ConfigData>,
}

impl InlineSource {
    pub fn new(name: impl Into<String>, data: ConfigData) -> Self {
        Self {
            name: name.into(),
            data: Some(data),
        }
    }

    /// A layer that is never present
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    /// Parse a document of the given format up front
    pub fn from_str(name: impl Into<String>, contents: &str, format: ConfigFormat) -> Result<Self, ConfigSystemError> {
        let name = name.into();
        let data = ConfigData::deserialize(contents, format, &name)?;
        Ok(Self::new(name, data))
    }
}

impl ConfigSource for InlineSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn load(&self) -> Result<Option<ConfigData>, ConfigSystemError> {
        Ok(self.data.clone())
    }
}

/// The three layers of one project, plus the root they are relative to.
#[derive(Debug)]
pub struct ProjectSources {
    pub root: PathBuf,
    pub manifest: Box<dyn ConfigSource>,
    pub local: Box<dyn ConfigSource>,
    pub global: Box<dyn ConfigSource>,
}

impl ProjectSources {
    pub fn new(
        root: impl Into<PathBuf>,
        manifest: Box<dyn ConfigSource>,
        local: Box<dyn ConfigSource>,
        global: Box<dyn ConfigSource>,
    ) -> Self {
        Self {
            root: root.into(),
            manifest,
            local,
            global,
        }
    }

    /// Standard layout: `<root>/keel.toml`, `<root>/.keel/config.toml` and
    /// the user-wide override from [`global_config_path`].
    pub fn for_project(root: impl Into<PathBuf>) -> Self {
        Self::with_global_path(root, global_config_path())
    }

    /// Standard project layout with an explicit global override location.
    /// `None` leaves the global layer absent.
    pub fn with_global_path(root: impl Into<PathBuf>, global: Option<PathBuf>) -> Self {
        let root = root.into();
        let manifest = FileSource::required(root.join(constants::MANIFEST_FILE));
        let local = FileSource::optional(
            root.join(constants::LOCAL_OVERRIDE_DIR)
                .join(constants::OVERRIDE_FILE),
        );
        let global: Box<dyn ConfigSource> = match global {
            Some(path) => Box::new(FileSource::optional(path)),
            None => Box::new(InlineSource::absent("global override")),
        };
        Self::new(root, Box::new(manifest), Box::new(local), global)
    }
}

/// `$XDG_CONFIG_HOME/keel/config.toml`, else `$HOME/.config/keel/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".config")))?;
    Some(
        base.join(constants::GLOBAL_CONFIG_DIR)
            .join(constants::OVERRIDE_FILE),
    )
}

/// The user's home directory from `$HOME`.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

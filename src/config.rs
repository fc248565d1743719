//! Invocation settings.
//!
//! All environment-derived values (home directory, user name, working
//! directory) are resolved once in [`Settings::from_environment`] and passed
//! into the pipeline as plain data. Nothing under [`crate::pipeline`] reads
//! the environment.
//!
//! An optional TOML file can override the defaults. It is only required to
//! exist when given explicitly with `--config`. The format parameters
//! (filesystem, label, dev-workload flag) are fixed and not configurable.
//!
//! Example `config.toml`:
//! ```toml
//! image_dir = "D:/images"
//! default_size = "100GB"
//! powershell = "pwsh"
//! ```

use crate::disk::{ByteSize, FormatSpec};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default size limit for new images.
pub const DEFAULT_SIZE: ByteSize = ByteSize::gib(50);

/// Directory under the home directory used when no `image_dir` is configured.
pub const DEFAULT_IMAGE_DIRNAME: &str = ".devdrive";

/// Image file extension.
pub const IMAGE_EXTENSION: &str = "vhdx";

/// Config file name under the user config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Fallback user name when neither `USERNAME` nor `USER` is set.
const FALLBACK_USERNAME: &str = "devdrive";

/// Parsed config file. Every key is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Directory for the default image; relative to home if not absolute.
    pub image_dir: Option<PathBuf>,
    /// Default size limit, `<integer><unit>`.
    pub default_size: Option<String>,
    /// PowerShell executable.
    pub powershell: Option<String>,
}

impl ConfigFile {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config("load config", format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::config("parse config", format!("{}: {}", path.display(), e)))
    }
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// The user's home directory.
    pub home_dir: PathBuf,
    /// The user name, used to name the default image.
    pub username: String,
    /// Directory relative paths are resolved against.
    pub current_dir: PathBuf,
    /// Directory holding the default image.
    pub image_dir: PathBuf,
    /// Size limit used when `--size` is not given.
    pub default_size: ByteSize,
    /// Filesystem settings for new volumes. Always [`FormatSpec::default`].
    pub format: FormatSpec,
    /// PowerShell executable override for the production platform.
    pub powershell: Option<String>,
}

impl Settings {
    /// Build settings from explicit values with all other defaults applied.
    pub fn new(
        home_dir: impl Into<PathBuf>,
        username: impl Into<String>,
        current_dir: impl Into<PathBuf>,
    ) -> Self {
        let home_dir = home_dir.into();
        Self {
            image_dir: home_dir.join(DEFAULT_IMAGE_DIRNAME),
            home_dir,
            username: username.into(),
            current_dir: current_dir.into(),
            default_size: DEFAULT_SIZE,
            format: FormatSpec::default(),
            powershell: None,
        }
    }

    /// Resolve settings from the process environment and config file.
    ///
    /// `explicit_config` must exist if given; otherwise the default config
    /// location is read only when present.
    pub fn from_environment(explicit_config: Option<&Path>) -> Result<Self> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| Error::config("resolve home", "could not determine home directory"))?;

        let username = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_USERNAME.to_string());

        let current_dir = std::env::current_dir()
            .map_err(|e| Error::config("resolve working directory", e.to_string()))?;

        let mut settings = Self::new(home_dir, username, current_dir);

        let file = match explicit_config {
            Some(path) => Some(ConfigFile::load(path)?),
            None => match Self::default_config_path() {
                Some(path) if path.exists() => {
                    tracing::debug!(path = %path.display(), "loading config file");
                    Some(ConfigFile::load(&path)?)
                }
                _ => None,
            },
        };

        if let Some(file) = file {
            settings.apply(file)?;
        }

        Ok(settings)
    }

    /// Default config file location (`<config_dir>/devdrive/config.toml`).
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("devdrive").join(CONFIG_FILENAME))
    }

    /// Overlay config file values onto these settings.
    pub fn apply(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(dir) = file.image_dir {
            self.image_dir = if dir.is_absolute() {
                dir
            } else {
                self.home_dir.join(dir)
            };
        }
        if let Some(size) = file.default_size {
            self.default_size = size.parse()?;
        }
        if file.powershell.is_some() {
            self.powershell = file.powershell;
        }
        Ok(())
    }

    /// Image path used when `--path` is not given.
    pub fn default_image_path(&self) -> PathBuf {
        self.image_dir.join(format!("{}.{}", self.username, IMAGE_EXTENSION))
    }
}

//! Configuration and the explicit context passed to every construction.
//!
//! Configuration is a JSON file (`~/.marvin/config.json` by default) holding
//! the default release, the release table, the data-access mode and the
//! remote endpoints. [`MarvinContext`] bundles the loaded configuration with
//! the collaborators the core consumes: a path resolver, an optional
//! downloader, an optional database session and an optional remote client.

use crate::database::DatabaseSession;
use crate::error::MarvinResult;
use crate::paths::{Downloader, HttpDownloader, PathResolver, TemplatePathResolver};
use crate::remote::{HttpRemoteClient, RemoteClient};
use crate::vacs::VacRegistry;
use crate::versions::{ReleaseTable, VersionContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV_VAR: &str = "MARVIN_CONFIG";

/// Errors loading or interpreting configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown release: {0}")]
    UnknownRelease(String),
    #[error("HOME not set")]
    HomeNotSet,
}

/// Which backends construction may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    /// Local backends first, remote as a fallback.
    #[default]
    Auto,
    /// File or database only.
    Local,
    /// Remote API only.
    Remote,
}

impl DataMode {
    pub fn allows_local(self) -> bool {
        self != DataMode::Remote
    }

    pub fn allows_remote(self) -> bool {
        self != DataMode::Local
    }
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DataMode::Auto => "auto",
            DataMode::Local => "local",
            DataMode::Remote => "remote",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DataMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DataMode::Auto),
            "local" => Ok(DataMode::Local),
            "remote" => Ok(DataMode::Remote),
            other => Err(format!("unknown mode '{other}', expected auto, local or remote")),
        }
    }
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| ConfigError::HomeNotSet)
}

/// User configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarvinConfig {
    /// Release used when a construction does not name versions.
    pub release: String,
    /// Release name to version table.
    pub releases: ReleaseTable,
    /// Data-access mode.
    pub mode: DataMode,
    /// Base URL of the remote API.
    pub api_url: String,
    /// Base URL of the science archive used for downloads.
    pub sas_url: String,
    /// Root of the local archive mirror.
    pub sas_base_dir: PathBuf,
    /// Whether missing files may be downloaded.
    pub allow_download: bool,
    /// Timeout applied to every HTTP call.
    pub http_timeout_secs: u64,
}

impl Default for MarvinConfig {
    fn default() -> Self {
        let sas_base_dir = std::env::var("SAS_BASE_DIR")
            .map(PathBuf::from)
            .or_else(|_| home_dir().map(|h| h.join("sas")))
            .unwrap_or_else(|_| PathBuf::from("sas"));
        Self {
            release: "MPL-5".to_string(),
            releases: ReleaseTable::default(),
            mode: DataMode::Auto,
            api_url: "https://api.sdss.org/marvin/api".to_string(),
            sas_url: "https://data.sdss.org/sas".to_string(),
            sas_base_dir,
            allow_download: false,
            http_timeout_secs: 30,
        }
    }
}

impl MarvinConfig {
    /// Default config location, `~/.marvin/config.json`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(home_dir()?.join(".marvin").join("config.json"))
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save to a JSON file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from `$MARVIN_CONFIG`, else the default path, else defaults.
    ///
    /// A file that exists but fails to parse is an error.
    pub fn from_env_or_default() -> Result<Self, ConfigError> {
        let path = match std::env::var(CONFIG_ENV_VAR) {
            Ok(p) => PathBuf::from(p),
            Err(_) => match Self::default_path() {
                Ok(p) => p,
                Err(_) => return Ok(Self::default()),
            },
        };
        if path.exists() {
            log::debug!("Loading config from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Version context of the configured default release.
    pub fn default_versions(&self) -> Result<VersionContext, ConfigError> {
        self.releases.lookup_versions(&self.release)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Configuration plus collaborators, passed to every construction.
///
/// Cloning is cheap: collaborators are shared behind `Arc`.
#[derive(Clone)]
pub struct MarvinContext {
    pub config: Arc<MarvinConfig>,
    /// Versions used when a request does not name its own.
    pub versions: VersionContext,
    pub paths: Arc<dyn PathResolver>,
    pub downloader: Option<Arc<dyn Downloader>>,
    pub database: Option<Arc<dyn DatabaseSession>>,
    pub remote: Option<Arc<dyn RemoteClient>>,
    pub vacs: Arc<VacRegistry>,
}

impl MarvinContext {
    /// Build a context with the HTTP collaborators the config asks for.
    ///
    /// No database session is attached; use [`MarvinContext::with_database`].
    pub fn from_config(config: MarvinConfig) -> MarvinResult<Self> {
        let versions = config.default_versions()?;
        let timeout = config.http_timeout();
        let paths: Arc<dyn PathResolver> =
            Arc::new(TemplatePathResolver::new(&config.sas_base_dir));
        let downloader: Option<Arc<dyn Downloader>> = if config.allow_download {
            Some(Arc::new(HttpDownloader::new(
                &config.sas_url,
                &config.sas_base_dir,
                timeout,
            )))
        } else {
            None
        };
        let remote: Option<Arc<dyn RemoteClient>> = if config.mode.allows_remote() {
            Some(Arc::new(HttpRemoteClient::new(&config.api_url, timeout)))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            versions,
            paths,
            downloader,
            database: None,
            remote,
            vacs: Arc::new(VacRegistry::with_builtin()),
        })
    }

    /// Local-only context rooted at `sas_base_dir`, with no network collaborators.
    pub fn local(sas_base_dir: &Path, versions: VersionContext) -> Self {
        let config = MarvinConfig {
            mode: DataMode::Local,
            sas_base_dir: sas_base_dir.to_path_buf(),
            release: versions.release.clone().unwrap_or_default(),
            ..MarvinConfig::default()
        };
        Self {
            config: Arc::new(config),
            versions,
            paths: Arc::new(TemplatePathResolver::new(sas_base_dir)),
            downloader: None,
            database: None,
            remote: None,
            vacs: Arc::new(VacRegistry::with_builtin()),
        }
    }

    pub fn mode(&self) -> DataMode {
        self.config.mode
    }

    pub fn with_mode(mut self, mode: DataMode) -> Self {
        Arc::make_mut(&mut self.config).mode = mode;
        self
    }

    pub fn with_versions(mut self, versions: VersionContext) -> Self {
        self.versions = versions;
        self
    }

    /// Switch the default versions to a named release.
    pub fn with_release(mut self, release: &str) -> MarvinResult<Self> {
        self.versions = self.config.releases.lookup_versions(release)?;
        Ok(self)
    }

    pub fn with_paths(mut self, paths: Arc<dyn PathResolver>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_database(mut self, database: Arc<dyn DatabaseSession>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn without_remote(mut self) -> Self {
        self.remote = None;
        self
    }

    pub fn without_database(mut self) -> Self {
        self.database = None;
        self
    }

    pub fn with_vacs(mut self, vacs: VacRegistry) -> Self {
        self.vacs = Arc::new(vacs);
        self
    }
}

impl fmt::Debug for MarvinContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MarvinContext")
            .field("mode", &self.config.mode)
            .field("versions", &self.versions)
            .field("downloader", &self.downloader.is_some())
            .field("database", &self.database.is_some())
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::DapVersion;
    use tempfile::TempDir;

    #[test]
    fn test_config_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = MarvinConfig {
            release: "DR15".to_string(),
            mode: DataMode::Local,
            http_timeout_secs: 5,
            ..MarvinConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = MarvinConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.default_versions().unwrap().drpver, "v2_4_3");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MarvinConfig = serde_json::from_str(r#"{"mode": "remote"}"#).unwrap();
        assert_eq!(config.mode, DataMode::Remote);
        assert_eq!(config.release, "MPL-5");
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_bad_config_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            MarvinConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_data_mode_parse() {
        assert_eq!("Remote".parse::<DataMode>().unwrap(), DataMode::Remote);
        assert!("sometimes".parse::<DataMode>().is_err());
        assert!(DataMode::Auto.allows_local() && DataMode::Auto.allows_remote());
        assert!(!DataMode::Local.allows_remote());
        assert!(!DataMode::Remote.allows_local());
    }

    #[test]
    fn test_context_builders() {
        let dir = TempDir::new().unwrap();
        let versions = VersionContext::new("v2_0_1", DapVersion::new(2, 0, 2));
        let ctx = MarvinContext::local(dir.path(), versions);
        assert_eq!(ctx.mode(), DataMode::Local);
        assert!(ctx.remote.is_none());

        let ctx = ctx.with_mode(DataMode::Auto).with_release("MPL-6").unwrap();
        assert_eq!(ctx.mode(), DataMode::Auto);
        assert_eq!(ctx.versions.dapver, DapVersion::new(2, 1, 3));
        assert!(ctx.clone().with_release("bogus").is_err());
    }
}

//! Filesystem-backed persistence and configuration for the stock ledger.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use sl_core::{LedgerError, LedgerResult, NumericPolicy, StorageAdapter};

/// Default directory name for the store.
pub const STORE_DIR_NAME: &str = "stockledger";

/// Environment variable overriding the store directory.
pub const PATH_ENV: &str = "STOCKLEDGER_PATH";

/// Environment variable overriding the numeric parsing policy.
pub const POLICY_ENV: &str = "STOCKLEDGER_NUMERIC_POLICY";

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Storage adapter writing one JSON file per key.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a new store rooted at the provided directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root path of the store.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve the default store path (~/.stockledger).
    pub fn default_path() -> LedgerResult<PathBuf> {
        if let Some(dir) = dirs::home_dir() {
            return Ok(dir.join(format!(".{STORE_DIR_NAME}")));
        }
        Err(LedgerError::Persistence(
            "unable to determine a default store path".into(),
        ))
    }

    /// Check if the store directory exists.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Create the store directory.
    pub fn init(&self) -> LedgerResult<()> {
        if self.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.root).map_err(|err| LedgerError::Persistence(err.to_string()))
    }

    fn key_path(&self, key: &str) -> LedgerResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(LedgerError::Persistence(format!(
                "invalid storage key `{key}`"
            )));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl StorageAdapter for FsStore {
    fn load(&self, key: &str) -> LedgerResult<Option<String>> {
        let path = self.key_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "reading collection");
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|err| LedgerError::Persistence(err.to_string()))
    }

    fn save(&self, key: &str, value: &str) -> LedgerResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| LedgerError::Persistence(err.to_string()))?;
        }
        fs::write(&path, value).map_err(|err| LedgerError::Persistence(err.to_string()))
    }
}

/// Contents of `config.yaml`.
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Store directory chosen at `init`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// How unparseable numeric form input is handled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_policy: Option<NumericPolicy>,
}

/// Effective settings after applying environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store_path: PathBuf,
    pub numeric_policy: NumericPolicy,
}

impl Settings {
    /// Combine config file values with environment overrides.
    ///
    /// Environment wins over the config file, which wins over defaults.
    pub fn resolve(
        config: &LedgerConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> LedgerResult<Self> {
        let non_blank = |value: String| (!value.trim().is_empty()).then_some(value);

        let store_path = match env(PATH_ENV)
            .and_then(non_blank)
            .or_else(|| config.path.clone().and_then(non_blank))
        {
            Some(path) => PathBuf::from(path),
            None => FsStore::default_path()?,
        };

        let numeric_policy = match env(POLICY_ENV).and_then(non_blank) {
            Some(value) => value.parse()?,
            None => config.numeric_policy.unwrap_or_default(),
        };

        Ok(Self {
            store_path,
            numeric_policy,
        })
    }
}

fn config_path() -> LedgerResult<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(STORE_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    Err(LedgerError::Persistence(
        "unable to determine config directory".into(),
    ))
}

/// Read a config file, returning defaults when it does not exist.
pub fn load_config_from(path: &Path) -> LedgerResult<LedgerConfig> {
    if !path.exists() {
        return Ok(LedgerConfig::default());
    }
    let contents =
        fs::read_to_string(path).map_err(|err| LedgerError::Persistence(err.to_string()))?;
    serde_yaml::from_str(&contents).map_err(|err| LedgerError::Persistence(err.to_string()))
}

/// Write a config file, creating its directory.
pub fn save_config_to(path: &Path, config: &LedgerConfig) -> LedgerResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LedgerError::Persistence(err.to_string()))?;
    }
    let contents =
        serde_yaml::to_string(config).map_err(|err| LedgerError::Persistence(err.to_string()))?;
    fs::write(path, contents).map_err(|err| LedgerError::Persistence(err.to_string()))
}

/// Read the user config file.
pub fn load_config() -> LedgerResult<LedgerConfig> {
    load_config_from(&config_path()?)
}

/// Remember the store path in the user config, keeping other settings.
pub fn set_config_path(path: &Path) -> LedgerResult<()> {
    let config_file = config_path()?;
    let mut config = load_config_from(&config_file)?;
    config.path = Some(path.to_string_lossy().to_string());
    save_config_to(&config_file, &config)
}

/// Resolve settings from the user config file and the process environment.
pub fn resolve_settings() -> LedgerResult<Settings> {
    let config = load_config()?;
    Settings::resolve(&config, |name| std::env::var(name).ok())
}

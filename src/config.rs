//! Suite-level configuration (spec §10.3): `fixtures.yaml` at the discovery root.
//!
//! Grounded on the teacher's `schema.rs::SuiteConfig`/`bintest.yaml` (version, timeout, serial,
//! databases, loaded once and merged with file/case-level overrides).

use crate::database::DatabaseConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "fixtures.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Yaml { path: PathBuf, #[source] source: serde_yaml::Error },
    #[error("unsupported fixtures.yaml version {0}, expected 1")]
    UnsupportedVersion(u32),
}

fn default_version() -> u32 {
    1
}

/// Suite-level configuration loaded from `fixtures.yaml` at the discovery root.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SuiteConfig {
    /// Schema version; currently only `1` is supported.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Default per-case timeout in seconds, overridable per document.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Worker pool size. `None`/absent runs cases serially.
    #[serde(default)]
    pub parallel: Option<usize>,

    /// Persist successful transactions instead of always rolling back.
    #[serde(default)]
    pub commit: bool,

    /// Root used to resolve `ExternalFile` fixture/expectation paths. Defaults to the discovery
    /// root's own directory when absent.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Named database connections, keyed by the name fixture documents reference.
    #[serde(default)]
    pub databases: HashMap<String, DatabaseConfig>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            timeout: None,
            parallel: None,
            commit: false,
            base_dir: None,
            databases: HashMap::new(),
        }
    }
}

impl SuiteConfig {
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Resolves `base_dir` relative to the directory containing `fixtures.yaml`.
    pub fn resolved_base_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => config_dir.join(dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loads `fixtures.yaml` from `root` if present; returns the default config otherwise. A
/// discovery root with no suite file is valid — fixture documents can still run without any
/// configured databases (e.g. `validate`-only workflows).
pub fn load_suite_config(root: &Path) -> Result<SuiteConfig, ConfigError> {
    let path = root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(SuiteConfig::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
    let config: SuiteConfig =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml { path: path.clone(), source })?;
    if config.version != 1 {
        return Err(ConfigError::UnsupportedVersion(config.version));
    }
    Ok(config)
}

/// A single case's effective settings once suite, document, and case-level overrides are
/// collapsed to one set of values, following the teacher's
/// suite-overridden-by-file-overridden-by-case precedence chain.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveOptions {
    pub timeout: Option<Duration>,
    pub commit: bool,
}

pub fn resolve_options(
    suite: &SuiteConfig,
    document_commit: Option<bool>,
    case_timeout: Option<Duration>,
) -> EffectiveOptions {
    EffectiveOptions {
        timeout: case_timeout.or_else(|| suite.timeout_duration()),
        commit: document_commit.unwrap_or(suite.commit),
    }
}

//! Configuration for durabatch.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DURABATCH_HOME, DURABATCH_OBJECTS,
//!    DURABATCH_CLASSIFIER_URL, DURABATCH_CLASSIFIER_TOKEN)
//! 2. Config file (.durabatch/config.yaml)
//! 3. Defaults (~/.durabatch)
//!
//! Config file discovery:
//! - Searches current directory and parents for .durabatch/config.yaml
//! - `home` is relative to the .durabatch/ directory, `objects` to its parent

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::retry::{Backoff, RetryPolicy};
use crate::domain::DEFAULT_PREFIX;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:8080/classify";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub batch: Option<BatchConfig>,
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .durabatch/)
    pub home: Option<String>,
    /// Object store root (relative to the project root)
    pub objects: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub default_prefix: Option<String>,
    pub list_retry: Option<RetryPolicy>,
    pub update_retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory (instance ledgers)
    pub home: PathBuf,
    /// Object store root
    pub objects: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub batch: BatchSettings,
    pub classifier: ClassifierSettings,
}

/// Policies and defaults used by the batch coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Prefix used when an instance is created without one
    pub default_prefix: String,
    /// Policy of the listing step
    pub list_retry: RetryPolicy,
    /// Policy of the per-item update step
    pub update_retry: RetryPolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            default_prefix: DEFAULT_PREFIX.to_string(),
            list_retry: RetryPolicy::default(),
            update_retry: default_update_retry(),
        }
    }
}

/// 3 attempts, 2s exponential backoff, 30s per attempt
pub fn default_update_retry() -> RetryPolicy {
    RetryPolicy::new(3)
        .with_delay(Duration::from_secs(2))
        .with_backoff(Backoff::Exponential)
        .with_timeout(Duration::from_secs(30))
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub endpoint: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CLASSIFIER_URL.to_string(),
            token: None,
            timeout_seconds: 30,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".durabatch").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Apply the batch section of a config file over the defaults
fn resolve_batch(config: Option<&BatchConfig>) -> Result<BatchSettings> {
    let mut settings = BatchSettings::default();
    let Some(batch) = config else {
        return Ok(settings);
    };

    if let Some(ref prefix) = batch.default_prefix {
        settings.default_prefix = prefix.clone();
    }
    if let Some(ref policy) = batch.list_retry {
        policy.validate().context("Invalid batch.list_retry")?;
        settings.list_retry = policy.clone();
    }
    if let Some(ref policy) = batch.update_retry {
        policy.validate().context("Invalid batch.update_retry")?;
        settings.update_retry = policy.clone();
    }

    Ok(settings)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".durabatch");

    let config_file = find_config_file();
    let parsed = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    let (home_from_file, objects_from_file) = match (&config_file, &parsed) {
        (Some(config_path), Some(config)) => {
            let durabatch_dir = config_path.parent().unwrap_or(Path::new("."));
            let project_root = durabatch_dir.parent().unwrap_or(Path::new("."));
            (
                config
                    .paths
                    .home
                    .as_deref()
                    .map(|p| resolve_path(durabatch_dir, p)),
                config
                    .paths
                    .objects
                    .as_deref()
                    .map(|p| resolve_path(project_root, p)),
            )
        }
        _ => (None, None),
    };

    let home = std::env::var("DURABATCH_HOME")
        .map(PathBuf::from)
        .ok()
        .or(home_from_file)
        .unwrap_or(default_home);

    let objects = std::env::var("DURABATCH_OBJECTS")
        .map(PathBuf::from)
        .ok()
        .or(objects_from_file)
        .unwrap_or_else(|| home.join("objects"));

    let batch = resolve_batch(parsed.as_ref().and_then(|c| c.batch.as_ref()))?;

    let mut classifier = ClassifierSettings::default();
    if let Some(section) = parsed.as_ref().and_then(|c| c.classifier.as_ref()) {
        if let Some(ref endpoint) = section.endpoint {
            classifier.endpoint = endpoint.clone();
        }
        if let Some(timeout) = section.timeout_seconds {
            classifier.timeout_seconds = timeout;
        }
    }
    if let Ok(endpoint) = std::env::var("DURABATCH_CLASSIFIER_URL") {
        classifier.endpoint = endpoint;
    }
    classifier.token = std::env::var("DURABATCH_CLASSIFIER_TOKEN").ok();

    Ok(ResolvedConfig {
        home,
        objects,
        config_file,
        batch,
        classifier,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the instances directory ($DURABATCH_HOME/instances)
pub fn instances_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("instances"))
}

/// Get the object store root.
pub fn objects_dir() -> Result<PathBuf> {
    Ok(config()?.objects.clone())
}

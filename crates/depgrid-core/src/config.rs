use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config as cfg;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Exclusion rules applied while keying a directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    /// Directory names skipped wherever they appear.
    pub excluded_dirs: Vec<String>,
    /// File extensions (with leading dot) that never receive a key.
    pub excluded_extensions: Vec<String>,
    /// Glob patterns matched against normalized paths.
    pub excluded_paths: Vec<String>,
    /// File-name suffixes skipped during scans (mini trackers live next to code).
    pub skip_file_suffixes: Vec<String>,
    pub skip_file_names: Vec<String>,
}

impl Default for KeySettings {
    fn default() -> Self {
        let dirs = [
            ".git",
            ".svn",
            ".hg",
            ".vscode",
            ".idea",
            "__pycache__",
            "__MACOSX",
            "venv",
            ".venv",
            "node_modules",
            "bower_components",
            "build",
            "dist",
            "target",
            ".mypy_cache",
            ".pytest_cache",
            ".tox",
            ".cache",
        ];
        let extensions = [
            ".pyc", ".pyo", ".pyd", ".dll", ".exe", ".so", ".o", ".a", ".lib", ".pdb", ".swp",
            ".log", ".tmp", ".bak", ".DS_Store", ".jar",
        ];
        Self {
            excluded_dirs: dirs.iter().map(|s| s.to_string()).collect(),
            excluded_extensions: extensions.iter().map(|s| s.to_string()).collect(),
            excluded_paths: Vec::new(),
            skip_file_suffixes: vec!["_module.md".to_string()],
            skip_file_names: vec![".gitkeep".to_string()],
        }
    }
}

/// Cache eviction policy applied when a namespace reaches capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used
    Lfu,
    /// First in, first out
    Fifo,
}

/// Per-namespace override; unset fields fall back to the cache-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceSettings {
    #[serde(default)]
    pub max_size: Option<usize>,
    /// `0` disables expiry for the namespace.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub eviction: Option<EvictionPolicy>,
}

/// Fully resolved namespace parameters handed to a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub max_size: usize,
    pub ttl: Option<Duration>,
    pub eviction: EvictionPolicy,
}

impl NamespaceConfig {
    pub fn new(max_size: usize, ttl: Option<Duration>) -> Self {
        Self {
            max_size,
            ttl,
            eviction: EvictionPolicy::Lru,
        }
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        CacheSettings::default().namespace("default")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "CacheSettings::default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "CacheSettings::default_max_size")]
    pub default_max_size: usize,
    #[serde(default)]
    pub eviction: EvictionPolicy,
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub persist_dir: Option<PathBuf>,
    #[serde(default = "CacheSettings::default_namespaces")]
    pub namespaces: HashMap<String, NamespaceSettings>,
}

impl CacheSettings {
    fn default_ttl_secs() -> u64 {
        300
    }

    fn default_max_size() -> usize {
        5000
    }

    fn default_namespaces() -> HashMap<String, NamespaceSettings> {
        [
            ("embeddings_generation", 150),
            ("key_generation", 5000),
            ("reranking", 1000),
        ]
        .into_iter()
        .map(|(name, size)| {
            (
                name.to_string(),
                NamespaceSettings {
                    max_size: Some(size),
                    ..Default::default()
                },
            )
        })
        .collect()
    }

    /// Resolve the effective parameters for `name`.
    pub fn namespace(&self, name: &str) -> NamespaceConfig {
        let overrides = self.namespaces.get(name);
        let max_size = overrides
            .and_then(|o| o.max_size)
            .unwrap_or(self.default_max_size);
        let ttl_secs = overrides
            .and_then(|o| o.ttl_secs)
            .unwrap_or(self.default_ttl_secs);
        let eviction = overrides
            .and_then(|o| o.eviction)
            .unwrap_or(self.eviction);
        NamespaceConfig {
            max_size,
            ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            eviction,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: Self::default_ttl_secs(),
            default_max_size: Self::default_max_size(),
            eviction: EvictionPolicy::default(),
            persist: false,
            persist_dir: None,
            namespaces: Self::default_namespaces(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub keys: KeySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            keys: KeySettings::default(),
            cache: CacheSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("DEPGRID_ENV")
            .ok()
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings: Settings = toml::from_str(&text)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        Ok(settings)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("serializing settings")?;
        fs::write(path, text).with_context(|| format!("writing settings to {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.cache.default_max_size > 0,
            "cache.default_max_size must be > 0"
        );
        for (name, ns) in &self.cache.namespaces {
            anyhow::ensure!(!name.trim().is_empty(), "cache namespace names cannot be empty");
            if let Some(size) = ns.max_size {
                anyhow::ensure!(size > 0, "cache.namespaces.{}.max_size must be > 0", name);
            }
        }
        if self.cache.persist {
            anyhow::ensure!(
                self.cache.persist_dir.is_some(),
                "cache.persist requires cache.persist_dir"
            );
        }
        for ext in &self.keys.excluded_extensions {
            anyhow::ensure!(
                ext.starts_with('.'),
                "keys.excluded_extensions entries must start with '.': {}",
                ext
            );
        }
        for pattern in &self.keys.excluded_paths {
            globset::Glob::new(pattern)
                .with_context(|| format!("keys.excluded_paths: invalid glob '{}'", pattern))?;
        }
        tracing_subscriber::EnvFilter::try_new(&self.logging.level)
            .with_context(|| format!("logging.level: invalid filter '{}'", self.logging.level))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigManager;

impl ConfigManager {
    /// Load and validate settings from the default configuration directory.
    pub fn load(env_override: Option<String>) -> Result<Settings> {
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let settings = Self::load_from_sources(&Self::default_config_dir(), &env_name)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Get the default configuration directory.
    ///
    /// Priority order:
    /// 1. ~/.depgrid/
    /// 2. ./config/
    /// 3. Current directory
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let depgrid_dir = home_dir.join(".depgrid");
            if depgrid_dir.exists() {
                info!("Using config directory: {:?}", depgrid_dir);
                return depgrid_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let mut builder = cfg::Config::builder();
        for stem in ["default", env_name] {
            for ext in ["toml", "yaml", "yml", "json"] {
                builder = builder.add_source(
                    cfg::File::from(config_dir.join(format!("{}.{}", stem, ext))).required(false),
                );
            }
        }
        builder = builder
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("DEPGRID").separator("__"));

        let settings: Settings = builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_overrides_fall_back_to_defaults() {
        let settings = CacheSettings::default();
        let emb = settings.namespace("embeddings_generation");
        assert_eq!(emb.max_size, 150);
        assert_eq!(emb.ttl, Some(Duration::from_secs(300)));

        let other = settings.namespace("grid_decompress");
        assert_eq!(other.max_size, 5000);
        assert_eq!(other.eviction, EvictionPolicy::Lru);
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let mut settings = CacheSettings::default();
        settings.namespaces.insert(
            "metadata".into(),
            NamespaceSettings {
                ttl_secs: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(settings.namespace("metadata").ttl, None);
    }

    #[test]
    fn default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn persist_without_dir_is_rejected() {
        let mut settings = Settings::default();
        settings.cache.persist = true;
        assert!(settings.validate().is_err());
    }
}

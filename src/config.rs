use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IndexError, Result};
use crate::fingerprint::HashAlgorithm;

pub const DEFAULT_DATABASE: &str = "str2func.db";
pub const LOCAL_CONFIG_FILE: &str = "strdb.toml";
const ENV_PREFIX: &str = "STRDB";
const MAX_WORKERS: usize = 4096;

/// How adjacent string-literal tokens (`"ab" "cd"`) are recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatPolicy {
    /// One logical literal per run of adjacent tokens, located at the first token.
    #[default]
    Join,
    /// Every physical token is its own literal.
    Separate,
}

impl ConcatPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConcatPolicy::Join => "join",
            ConcatPolicy::Separate => "separate",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    /// In-memory map snapshotted to a JSON file on flush.
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub database: PathBuf,
    pub backend: StoreBackend,
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub concatenation: ConcatPolicy,
    pub parse_timeout_ms: u64,
    /// Worker threads; 0 means one per CPU.
    pub workers: usize,
    pub include_lambdas: bool,
    pub strict_syntax: bool,
    pub min_length: usize,
    pub follow_symlinks: bool,
    /// Files above this size are skipped; 0 disables the limit.
    pub max_file_size: u64,
    pub hash: HashAlgorithm,
    pub autosave_secs: u64,
    pub force: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            backend: StoreBackend::Sqlite,
            extensions: ["c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude: Vec::new(),
            concatenation: ConcatPolicy::Join,
            parse_timeout_ms: 30_000,
            workers: 0,
            include_lambdas: false,
            strict_syntax: false,
            min_length: 0,
            follow_symlinks: true,
            max_file_size: 16 * 1024 * 1024,
            hash: HashAlgorithm::Xxh64,
            autosave_secs: 1800,
            force: false,
        }
    }
}

impl IndexerConfig {
    /// Load configuration from the user config directory, `./strdb.toml`,
    /// an explicit file, and `STRDB_*` environment variables, in that order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(dirs) = ProjectDirs::from("", "", "strdb") {
            let user_file = dirs.config_dir().join("config.toml");
            builder = builder.add_source(File::from(user_file).format(FileFormat::Toml).required(false));
        }

        builder = builder.add_source(
            File::from(PathBuf::from(LOCAL_CONFIG_FILE))
                .format(FileFormat::Toml)
                .required(false),
        );

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(IndexError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path.to_path_buf()).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("extensions")
                .with_list_parse_key("exclude"),
        );

        let config: IndexerConfig = builder.build()?.try_deserialize()?;
        config.normalized()
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: IndexerConfig = toml::from_str(source)
            .map_err(|e| IndexError::Config(e.to_string()))?;
        config.normalized()
    }

    /// Normalize extensions and check every option, before any work starts.
    pub fn normalized(mut self) -> Result<Self> {
        self.extensions = self
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self.extensions.sort();
        self.extensions.dedup();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(IndexError::Config("at least one file extension is required".to_string()));
        }
        if self.parse_timeout_ms == 0 {
            return Err(IndexError::Config("parse_timeout_ms must be greater than zero".to_string()));
        }
        if self.workers > MAX_WORKERS {
            return Err(IndexError::Config(format!(
                "workers = {} exceeds the limit of {}",
                self.workers, MAX_WORKERS
            )));
        }
        if self.database.as_os_str().is_empty() {
            return Err(IndexError::Config("database path is empty".to_string()));
        }
        self.exclude_set()?;
        Ok(())
    }

    pub fn exclude_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_secs > 0).then(|| Duration::from_secs(self.autosave_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IndexerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concatenation, ConcatPolicy::Join);
        assert_eq!(config.database, PathBuf::from("str2func.db"));
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = IndexerConfig::from_toml_str(
            r#"
            extensions = [".C", "cpp", "cpp"]
            concatenation = "separate"
            workers = 3
            hash = "xxh3"
            "#,
        )
        .unwrap();

        assert_eq!(config.extensions, vec!["c".to_string(), "cpp".to_string()]);
        assert_eq!(config.concatenation, ConcatPolicy::Separate);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.hash, HashAlgorithm::Xxh3);
        assert_eq!(config.parse_timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_options_are_config_errors() {
        let err = IndexerConfig::from_toml_str("extensions = []").unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));

        let err = IndexerConfig::from_toml_str("parse_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));

        let err = IndexerConfig::from_toml_str("exclude = [\"a/{b\"]").unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));

        let err = IndexerConfig::from_toml_str("concatenation = \"sometimes\"").unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));

        let mut config = IndexerConfig::default();
        config.workers = MAX_WORKERS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "min_length = 11\nstrict_syntax = true\n").unwrap();

        let config = IndexerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.min_length, 11);
        assert!(config.strict_syntax);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            IndexerConfig::load(Some(&missing)),
            Err(IndexError::Config(_))
        ));
    }
}

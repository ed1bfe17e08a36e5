//! Lightweight configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_CHUNKING__CHUNK_SIZE=800`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_in(Path::new("."))
    }

    /// Loads `config*.toml` from `base` for the environment named by `RUST_ENV`.
    pub fn load_in(base: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(base.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(base.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(base.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(base.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, env_name };
        config.validate_for_env()?;
        Ok(config)
    }

    /// Wraps an already-assembled figment (tests, embedding in other apps).
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config = Self { figment, env_name: "custom".to_string() };
        config.validate_for_env()?;
        Ok(config)
    }

    pub fn env_name(&self) -> &str { &self.env_name }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::Config(format!("Failed to get '{key}': {e}")))
    }

    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self) -> Result<()> {
        let settings = self.settings()?;
        match self.env_name.as_str() {
            "prod" | "production" if settings.embedding.provider == EmbeddingProvider::Hash => Err(Error::Config(
                "embedding.provider = \"hash\" is not allowed in production".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingSettings,
    pub search: SearchSettings,
    pub embedding: EmbeddingSettings,
    pub runtime: RuntimeSettings,
}

impl Settings {
    /// Rejects combinations that would make ingestion or search meaningless.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        let s = &self.search;
        if !(0.0..=1.0).contains(&s.hybrid_weight) {
            return Err(Error::InvalidConfig(format!("search.hybrid_weight must be in [0, 1], got {}", s.hybrid_weight)));
        }
        if s.default_limit == 0 || s.default_limit > s.max_limit {
            return Err(Error::InvalidConfig(format!(
                "search.default_limit must be in 1..={}, got {}",
                s.max_limit, s.default_limit
            )));
        }
        if s.candidate_multiplier == 0 {
            return Err(Error::InvalidConfig("search.candidate_multiplier must be at least 1".to_string()));
        }
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be greater than zero".to_string()));
        }
        if self.embedding.batch_size == 0 || self.runtime.embed_concurrency == 0 {
            return Err(Error::InvalidConfig("embedding.batch_size and runtime.embed_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub raw_txt_dir: String,
    pub store_dir: String,
    pub collection: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            raw_txt_dir: "./data/txt".to_string(),
            store_dir: "./data/indexes".to_string(),
            collection: "documents".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub boundary_window: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200, boundary_window: 100 }
    }
}

impl ChunkingSettings {
    pub fn validate(&self) -> Result<()> {
        crate::chunker::Chunker::from_settings(self).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub max_limit: usize,
    pub hybrid_weight: f32,
    /// Each signal fetches `limit * candidate_multiplier` candidates before fusion.
    pub candidate_multiplier: usize,
    pub min_vector_score: Option<f32>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_limit: 10, max_limit: 100, hybrid_weight: 0.7, candidate_multiplier: 2, min_vector_score: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProvider {
    #[default]
    Hash,
    BgeM3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub dim: usize,
    pub model_dir: Option<String>,
    pub max_len: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: EmbeddingProvider::Hash, dim: 1024, model_dir: None, max_len: 256, batch_size: 32 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub embed_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub embed_concurrency: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { embed_timeout_ms: 30_000, store_timeout_ms: 10_000, embed_concurrency: 4 }
    }
}

impl RuntimeSettings {
    pub fn embed_timeout(&self) -> Duration { Duration::from_millis(self.embed_timeout_ms) }
    pub fn store_timeout(&self) -> Duration { Duration::from_millis(self.store_timeout_ms) }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

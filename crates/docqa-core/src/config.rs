//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nested keys, e.g. `APP_CHUNKING__MAX_SIZE`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Chunker sizing, in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_size: usize,
    pub overlap: usize,
    /// Tried in order; `""` means cut at `max_size` regardless of content.
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            overlap: 200,
            separators: ["\n\n", "\n", ". ", " ", ""].iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_size: usize, overlap: usize, separators: &[&str]) -> Self {
        Self { max_size, overlap, separators: separators.iter().map(|s| (*s).to_string()).collect() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::config("chunking.max_size must be positive"));
        }
        if self.overlap >= self.max_size {
            return Err(Error::config(format!(
                "chunking.overlap ({}) must be smaller than chunking.max_size ({})",
                self.overlap, self.max_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Lance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub collection: String,
    pub backend: BackendKind,
    /// Storage directory. `None` keeps the memory backend purely in-process.
    pub path: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { collection: "documents".to_string(), backend: BackendKind::Memory, path: Some("./data/index".to_string()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hash,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub dim: usize,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            dim: 384,
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            batch_size: 64,
        }
    }
}

/// Smallest usable context budget: the `[Document 1]` label line plus one
/// character of chunk text.
pub const MIN_CONTEXT_CHARS: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Budget for the labeled context block, in characters.
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 4, max_context_chars: 8000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    Anthropic,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GenerationProvider,
    pub model: String,
    /// Defaults to the provider's public endpoint.
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// 0 or 1.
    pub max_retries: u32,
    pub excerpt_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::Anthropic,
            model: "claude-3-5-sonnet-20241022".to_string(),
            base_url: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 2048,
            temperature: 0.3,
            timeout_secs: 60,
            max_retries: 1,
            excerpt_chars: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub input_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { input_dir: "./data/docs".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub data: DataConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be positive"));
        }
        if self.retrieval.max_context_chars < MIN_CONTEXT_CHARS {
            return Err(Error::config(format!(
                "retrieval.max_context_chars must be at least {MIN_CONTEXT_CHARS}, got {}",
                self.retrieval.max_context_chars
            )));
        }
        if self.embedding.dim == 0 {
            return Err(Error::config("embedding.dim must be positive"));
        }
        if self.generation.max_retries > 1 {
            return Err(Error::config("generation.max_retries may be at most 1"));
        }
        if self.index.collection.trim().is_empty() {
            return Err(Error::config("index.collection must not be empty"));
        }
        Ok(())
    }

    /// Resolve relative `index.path` and `data.input_dir` against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(path) = &self.index.path {
            self.index.path = Some(resolve_with_base(base, path).to_string_lossy().into_owned());
        }
        self.data.input_dir = resolve_with_base(base, &self.data.input_dir).to_string_lossy().into_owned();
    }
}

pub struct Config {
    figment: Figment,
    /// Directory relative paths in the settings are resolved against.
    base_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let base_dir = env::current_dir().map_err(|e| Error::config(format!("cannot read working directory: {e}")))?;
        let config = Self { figment, base_dir };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Build from an explicit figment (defaults are merged underneath).
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Settings::default())).merge(figment);
        let config = Self { figment, base_dir: env::current_dir().unwrap_or_default() };
        config.settings()?.validate()?;
        Ok(config)
    }

    /// Resolve relative settings paths against `dir` instead of the working directory.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::config(format!("Failed to get '{key}': {e}")))
    }

    /// Extracted settings with relative paths resolved against the base directory.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings: Settings = self.figment.extract().map_err(|e| Error::config(e.to_string()))?;
        settings.resolve_paths(&self.base_dir);
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> Result<()> {
        let settings = self.settings()?;
        settings.validate()?;
        match env {
            "prod" | "production" => {
                if settings.embedding.provider == EmbeddingProvider::Hash {
                    tracing::warn!("hash embeddings are a development fallback; configure embedding.provider for production");
                }
                if settings.index.path.is_none() {
                    tracing::warn!("index.path is unset; the index will not survive a restart");
                }
            }
            "dev" | "development" | "test" | "testing" => {}
            other => tracing::debug!(env = other, "unknown RUST_ENV, using config.toml only"),
        }
        Ok(())
    }
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

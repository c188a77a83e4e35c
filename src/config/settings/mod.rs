
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_OPENAI_CHAT_MODEL: &str = "OPENAI_CHAT_MODEL";
pub const ENV_OPENAI_EMBEDDING_MODEL: &str = "OPENAI_EMBEDDING_MODEL";
pub const ENV_RAW_DATA_PATH: &str = "RAW_DATA_PATH";
pub const ENV_VECTOR_DB_PATH: &str = "VECTOR_DB_PATH";
pub const ENV_COLLECTION_NAME: &str = "COLLECTION_NAME";
pub const ENV_TOP_K: &str = "TOP_K";
pub const ENV_CHUNK_SIZE: &str = "CHUNK_SIZE";
pub const ENV_CHUNK_OVERLAP: &str = "CHUNK_OVERLAP";
pub const ENV_API_PREFIX: &str = "API_PREFIX";
pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_RENDER: &str = "RENDER";
pub const ENV_IS_PULL_REQUEST: &str = "IS_PULL_REQUEST";
pub const ENV_VERBOSE: &str = "VERBOSE";

/// Process-wide configuration, built once at startup and shared read-only.
///
/// Scalar fields come first so the TOML serializer emits them before any table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub render: bool,
    #[serde(default)]
    pub is_pull_request: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub batch_size: u32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    #[inline]
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1/".to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            temperature: 0.0,
            batch_size: 100,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub raw_data_path: PathBuf,
    pub vector_db_path: PathBuf,
    pub collection_name: String,
}

impl Default for DataConfig {
    #[inline]
    fn default() -> Self {
        Self {
            raw_data_path: PathBuf::from("final_result.pkl"),
            vector_db_path: PathBuf::from("chroma_db"),
            collection_name: "quickstart".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of nearest records handed to the response synthesizer
    pub top_k: usize,
    /// Splitter chunk size in estimated tokens
    pub chunk_size: usize,
    /// Tokens repeated between adjacent chunks of one document
    pub chunk_overlap: usize,
    /// Model context window used when packing retrieved context
    pub context_window: usize,
    /// Tokens reserved for the model's answer
    pub num_output: usize,
    /// Tool-calling rounds the agent may run before it must answer
    pub max_function_calls: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 3,
            chunk_size: 1024,
            chunk_overlap: 20,
            context_window: 4096,
            num_output: 256,
            max_function_calls: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentConfig {
    pub metadata_template: String,
    pub metadata_separator: String,
    pub text_template: String,
}

impl Default for DocumentConfig {
    #[inline]
    fn default() -> Self {
        Self {
            metadata_template: "{key}: {value}".to_string(),
            metadata_separator: "\n".to_string(),
            text_template: "{metadata_str}\n\n{content}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
}

impl Default for ServerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api".to_string(),
        }
    }
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl Default for Settings {
    #[inline]
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            render: false,
            is_pull_request: false,
            verbose: false,
            openai: OpenAiConfig::default(),
            data: DataConfig::default(),
            retrieval: RetrievalConfig::default(),
            document: DocumentConfig::default(),
            server: ServerConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

/// Deployment environment derived from the hosting flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Local,
    Preview,
    Production,
}

impl fmt::Display for AppEnvironment {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Preview => "preview",
            Self::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing API key: set OPENAI_API_KEY or openai.api_key in config.toml")]
    MissingApiKey,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid top_k: {0} (must be at least 1)")]
    InvalidTopK(usize),
    #[error("Invalid chunk size: {0} (must be between 32 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    InvalidChunkOverlap(usize, usize),
    #[error("Context window ({0}) must be larger than the reserved output ({1})")]
    InvalidContextWindow(usize, usize),
    #[error("Invalid collection name: {0:?} (cannot be empty)")]
    InvalidCollectionName(String),
    #[error("Invalid API prefix: {0:?} (must start with '/' and must not end with '/')")]
    InvalidApiPrefix(String),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnvValue { key: String, value: String },
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Settings {
    /// Load settings from `config_dir/config.toml` (if present) and the process environment
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        Self::load_with_env(config_dir, |key| std::env::var(key).ok())
    }

    /// Load settings using an explicit environment lookup
    #[inline]
    pub fn load_with_env<P, F>(config_dir: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_dir = config_dir.as_ref();
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        let mut settings = if config_path.exists() {
            let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                path: config_path.clone(),
                source,
            })?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };
        settings.base_dir = config_dir.to_path_buf();

        settings.apply_env_overrides(lookup)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Overwrite fields with any values present in the environment
    #[inline]
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_OPENAI_API_KEY) {
            self.openai.api_key = value;
        }
        if let Some(value) = lookup(ENV_OPENAI_BASE_URL) {
            self.openai.base_url = value;
        }
        if let Some(value) = lookup(ENV_OPENAI_CHAT_MODEL) {
            self.openai.chat_model = value;
        }
        if let Some(value) = lookup(ENV_OPENAI_EMBEDDING_MODEL) {
            self.openai.embedding_model = value;
        }
        if let Some(value) = lookup(ENV_RAW_DATA_PATH) {
            self.data.raw_data_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_VECTOR_DB_PATH) {
            self.data.vector_db_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_COLLECTION_NAME) {
            self.data.collection_name = value;
        }
        if let Some(value) = lookup(ENV_TOP_K) {
            self.retrieval.top_k = parse_env(ENV_TOP_K, &value)?;
        }
        if let Some(value) = lookup(ENV_CHUNK_SIZE) {
            self.retrieval.chunk_size = parse_env(ENV_CHUNK_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_CHUNK_OVERLAP) {
            self.retrieval.chunk_overlap = parse_env(ENV_CHUNK_OVERLAP, &value)?;
        }
        if let Some(value) = lookup(ENV_API_PREFIX) {
            self.server.api_prefix = value;
        }
        if let Some(value) = lookup(ENV_HOST) {
            self.server.host = value;
        }
        if let Some(value) = lookup(ENV_PORT) {
            self.server.port = parse_env(ENV_PORT, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.log_level = value;
        }
        if let Some(value) = lookup(ENV_RENDER) {
            self.render = parse_bool(ENV_RENDER, &value)?;
        }
        if let Some(value) = lookup(ENV_IS_PULL_REQUEST) {
            self.is_pull_request = parse_bool(ENV_IS_PULL_REQUEST, &value)?;
        }
        if let Some(value) = lookup(ENV_VERBOSE) {
            self.verbose = parse_bool(ENV_VERBOSE, &value)?;
        }
        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.retrieval.validate()?;

        if self.data.collection_name.trim().is_empty() {
            return Err(ConfigError::InvalidCollectionName(
                self.data.collection_name.clone(),
            ));
        }

        let prefix = &self.server.api_prefix;
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(ConfigError::InvalidApiPrefix(prefix.clone()));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        Ok(())
    }

    #[inline]
    pub fn environment(&self) -> AppEnvironment {
        match (self.render, self.is_pull_request) {
            (false, _) => AppEnvironment::Local,
            (true, true) => AppEnvironment::Preview,
            (true, false) => AppEnvironment::Production,
        }
    }

    /// Runtime worker threads for the current environment.
    ///
    /// Hosted instances are memory bound, so they run a fixed small pool instead of
    /// scaling with the core count.
    #[inline]
    pub fn worker_count(&self) -> usize {
        match self.environment() {
            AppEnvironment::Local => 1,
            AppEnvironment::Preview | AppEnvironment::Production => 3,
        }
    }

    #[inline]
    pub fn raw_data_path(&self) -> PathBuf {
        self.resolve(&self.data.raw_data_path)
    }

    #[inline]
    pub fn vector_db_path(&self) -> PathBuf {
        self.resolve(&self.data.vector_db_path)
    }

    #[inline]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Copy of the settings that is safe to print
    #[inline]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.openai.api_key = mask_secret(&self.openai.api_key);
        copy
    }

    #[inline]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl OpenAiConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        self.api_url()?;

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if self.batch_size == 0 || self.batch_size > 2048 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    /// Base URL of the API, always ending in `/` so endpoint paths join below it
    #[inline]
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(url)
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(32..=8192).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkOverlap(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }

        if self.context_window <= self.num_output {
            return Err(ConfigError::InvalidContextWindow(
                self.context_window,
                self.num_output,
            ));
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnvValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", chars[..3].iter().collect::<String>(), tail)
}

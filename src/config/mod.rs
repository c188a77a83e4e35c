// Configuration module
// Loads TOML settings and environment overrides into a validated `Settings`

pub mod settings;


pub use settings::{
    AppEnvironment, ConfigError, DataConfig, DocumentConfig, OpenAiConfig, RetrievalConfig,
    ServerConfig, Settings,
};

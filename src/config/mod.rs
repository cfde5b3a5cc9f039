// Configuration management
// TOML settings under the knowledge base directory

pub mod settings;

pub use settings::{Config, ConfigError, OllamaConfig, SearchConfig};

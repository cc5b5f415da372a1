//! Configuration loading from files and environment variables

use crate::error::{Error, Result};
use config::{Config as ConfigLib, Environment, File};
use std::path::Path;

use super::Config;

impl Config {
    /// Loads configuration from a TOML file with environment variable
    /// overrides.
    ///
    /// Environment variables are prefixed with `ENGRAM_` and use double
    /// underscores for nested values. For example:
    /// - `ENGRAM_SERVER__PORT=8080`
    /// - `ENGRAM_EMBEDDINGS__PROVIDER=mock`
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut builder = ConfigLib::builder();

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("ENGRAM")
                .separator("__")
                .try_parsing(true),
        );

        // Convenience override used by deployment scripts
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            builder = builder
                .set_override("embeddings.api_key", key)
                .map_err(|e| Error::config(format!("Failed to set EMBEDDING_API_KEY: {e}")))?;
        }

        let config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize config: {e}")))
    }

    /// Creates a config from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from an optional file path.
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Config file (`engram.toml` in the working directory, or the
    ///    given path)
    /// 3. Environment variables (`ENGRAM_*`)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let default_path = Path::new("engram.toml");
        let path = config_path.unwrap_or(default_path);
        Self::from_file(path)
    }
}

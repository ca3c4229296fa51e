//! Configuration for modelchain
//!
//! Settings for both contracts, local storage and logging. Values come
//! from a TOML file, then `MODELCHAIN_*` environment variables override
//! individual keys.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use serde::{Serialize, Deserialize};
use tracing::debug;

/// Error types for configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Parsing error
    #[error("Parsing error: {0}")]
    ParseError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Token ledger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Name the token contract is installed under
    pub contract_name: String,
    /// Organization allowed to mint, burn, authorize and set prices
    pub issuer_msp: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            contract_name: "tokens".to_string(),
            issuer_msp: "Org2MSP".to_string(),
        }
    }
}

/// Where model bundles are fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BlobSourceConfig {
    /// Bundles stored as `<path>/<cid>`
    Directory { path: PathBuf },
    /// An IPFS node's HTTP API
    Ipfs { api_url: String },
}

impl Default for BlobSourceConfig {
    fn default() -> Self {
        BlobSourceConfig::Directory { path: PathBuf::from("blobs") }
    }
}

/// Model registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name the registry contract is installed under
    pub contract_name: String,
    /// Directory bundles are unpacked into, one subdirectory per cid
    pub models_dir: PathBuf,
    /// Role a caller needs to upload models
    pub developer_role: String,
    /// Largest bundle accepted from the blob source
    pub max_bundle_bytes: u64,
    /// Seconds a remote bundle fetch may take end to end
    pub fetch_timeout_secs: u64,
    /// Bundle source
    pub blob: BlobSourceConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            contract_name: "models".to_string(),
            models_dir: PathBuf::from("models"),
            developer_role: "dev".to_string(),
            max_bundle_bytes: 512 * 1024 * 1024, // 512 MB
            fetch_timeout_secs: 120,
            blob: BlobSourceConfig::default(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the state database
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/state"),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub token: TokenConfig,
    pub registry: RegistryConfig,
    pub storage: StorageConfig,
    /// Log level
    pub log_level: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            token: TokenConfig::default(),
            registry: RegistryConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl MarketConfig {
    /// Load configuration from a TOML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// File (when given and present), then environment overrides, then validation
    pub async fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) if fs::metadata(path).await.is_ok() => {
                debug!("Loading configuration from {}", path.display());
                Self::from_file(path).await?
            }
            _ => Self::default(),
        };
        env::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the contracts cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        let required = [
            ("token.contract_name", &self.token.contract_name),
            ("token.issuer_msp", &self.token.issuer_msp),
            ("registry.contract_name", &self.registry.contract_name),
            ("registry.developer_role", &self.registry.developer_role),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!("{} cannot be empty", key)));
            }
        }

        for name in [&self.token.contract_name, &self.registry.contract_name] {
            if name.contains('/') {
                return Err(ConfigError::InvalidConfig(format!(
                    "contract name {} cannot contain '/'",
                    name
                )));
            }
        }

        if self.token.contract_name == self.registry.contract_name {
            return Err(ConfigError::InvalidConfig(
                "token and registry contracts need distinct names".to_string(),
            ));
        }

        if self.registry.max_bundle_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "registry.max_bundle_bytes must be positive".to_string(),
            ));
        }

        if self.registry.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "registry.fetch_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

pub mod env;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MarketConfig::from_toml(
            r#"
            log_level = "debug"

            [token]
            issuer_msp = "IssuerMSP"

            [registry.blob]
            kind = "ipfs"
            api_url = "http://ipfs_host:5001"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.token.issuer_msp, "IssuerMSP");
        assert_eq!(config.token.contract_name, "tokens");
        assert_eq!(config.registry.developer_role, "dev");
        assert_eq!(
            config.registry.blob,
            BlobSourceConfig::Ipfs { api_url: "http://ipfs_host:5001".to_string() }
        );
    }

    #[test]
    fn test_validation() {
        assert!(MarketConfig::default().validate().is_ok());

        let mut config = MarketConfig::default();
        config.registry.contract_name = "tokens".to_string();
        assert!(config.validate().is_err());

        let mut config = MarketConfig::default();
        config.token.issuer_msp = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = MarketConfig::default();
        config.token.contract_name = "a/b".to_string();
        assert!(config.validate().is_err());

        let mut config = MarketConfig::default();
        config.registry.fetch_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modelchain.toml");

        let mut config = MarketConfig::default();
        config.registry.models_dir = PathBuf::from("/var/lib/models");
        config.save_to_file(&path).await.unwrap();

        let loaded = MarketConfig::from_file(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}

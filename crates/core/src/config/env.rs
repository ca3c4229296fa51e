//! Environment variable overrides
//!
//! Every key of [`MarketConfig`] can be overridden by a `MODELCHAIN_`
//! prefixed variable. Unparseable values are logged and ignored.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use super::{BlobSourceConfig, MarketConfig};

/// Environment variable prefix for modelchain configuration
pub const ENV_PREFIX: &str = "MODELCHAIN_";

fn lookup(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key)).ok()
}

/// Parse an environment variable with the modelchain prefix
fn parse_env<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Failed to parse env variable {}{}: {}", ENV_PREFIX, key, e);
                default
            }
        },
        None => default,
    }
}

/// Parse a path environment variable
fn parse_path_env(key: &str, default: PathBuf) -> PathBuf {
    lookup(key).map(PathBuf::from).unwrap_or(default)
}

/// Apply `MODELCHAIN_*` overrides on top of `config`
pub fn apply_env_overrides(config: &mut MarketConfig) {
    config.token.contract_name = parse_env("TOKEN_CONTRACT", config.token.contract_name.clone());
    config.token.issuer_msp = parse_env("ISSUER_MSP", config.token.issuer_msp.clone());

    config.registry.contract_name = parse_env("REGISTRY_CONTRACT", config.registry.contract_name.clone());
    config.registry.models_dir = parse_path_env("MODELS_DIR", config.registry.models_dir.clone());
    config.registry.developer_role = parse_env("DEVELOPER_ROLE", config.registry.developer_role.clone());
    config.registry.max_bundle_bytes = parse_env("MAX_BUNDLE_BYTES", config.registry.max_bundle_bytes);
    config.registry.fetch_timeout_secs = parse_env("FETCH_TIMEOUT_SECS", config.registry.fetch_timeout_secs);

    // an IPFS url wins over a blob directory when both are set
    if let Some(api_url) = lookup("IPFS_API") {
        config.registry.blob = BlobSourceConfig::Ipfs { api_url };
    } else if let Some(path) = lookup("BLOB_DIR") {
        config.registry.blob = BlobSourceConfig::Directory { path: PathBuf::from(path) };
    }

    config.storage.path = parse_path_env("STORAGE_PATH", config.storage.path.clone());
    config.log_level = parse_env("LOG_LEVEL", config.log_level.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    // Every env var touched here is unique to this test, so parallel tests do not race.
    #[test]
    fn test_overrides_apply() {
        env::set_var("MODELCHAIN_ISSUER_MSP", "BankMSP");
        env::set_var("MODELCHAIN_MAX_BUNDLE_BYTES", "not-a-number");
        env::set_var("MODELCHAIN_IPFS_API", "http://localhost:5001");

        let mut config = MarketConfig::default();
        apply_env_overrides(&mut config);

        assert_eq!(config.token.issuer_msp, "BankMSP");
        assert_eq!(config.registry.max_bundle_bytes, MarketConfig::default().registry.max_bundle_bytes);
        assert_eq!(
            config.registry.blob,
            BlobSourceConfig::Ipfs { api_url: "http://localhost:5001".to_string() }
        );

        env::remove_var("MODELCHAIN_ISSUER_MSP");
        env::remove_var("MODELCHAIN_MAX_BUNDLE_BYTES");
        env::remove_var("MODELCHAIN_IPFS_API");
    }
}

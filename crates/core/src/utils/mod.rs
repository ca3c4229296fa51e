//! Utility functions for modelchain
//!
//! Small helpers shared by the contracts.

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Error types for utility operations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UtilError {
    /// Parsing error
    #[error("Parsing error: {0}")]
    ParseError(String),
}

/// Result type for utility operations
pub type UtilResult<T> = Result<T, UtilError>;

/// Get the current timestamp in seconds
pub fn timestamp_secs() -> u64 {
    let start = SystemTime::now();
    let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0));
    since_epoch.as_secs()
}

/// Parse a string to a specific type
pub fn parse_string<T: FromStr>(value: &str) -> UtilResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>()
        .map_err(|e| UtilError::ParseError(format!("Failed to parse {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_string::<i64>("-42"), Ok(-42));
        assert!(matches!(parse_string::<i64>("4.2"), Err(UtilError::ParseError(_))));
        assert!(parse_string::<u64>("").is_err());
    }

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01
        assert!(timestamp_secs() > 1_577_836_800);
    }
}

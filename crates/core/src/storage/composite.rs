//! Composite keys
//!
//! A composite key joins a namespace with an ordered list of components so
//! that every key sharing a leading subset of components forms a contiguous
//! prefix range. The encoding is `\0ns\0a\0b\0`; simple keys never begin
//! with `\0`, which keeps the two key spaces apart.

use super::{StorageError, StorageResult};

/// Separator and leading marker of every composite key
pub const COMPOSITE_KEY_NAMESPACE: char = '\u{0}';

/// Build a composite key. With a partial component list the result is the
/// prefix shared by every longer key in the namespace.
pub fn create_composite_key(object_type: &str, attributes: &[&str]) -> StorageResult<String> {
    validate_component(object_type)?;
    if object_type.is_empty() {
        return Err(StorageError::InvalidKey("composite key namespace cannot be empty".to_string()));
    }

    let mut key = String::with_capacity(
        2 + object_type.len() + attributes.iter().map(|a| a.len() + 1).sum::<usize>(),
    );
    key.push(COMPOSITE_KEY_NAMESPACE);
    key.push_str(object_type);
    key.push(COMPOSITE_KEY_NAMESPACE);
    for attribute in attributes {
        validate_component(attribute)?;
        key.push_str(attribute);
        key.push(COMPOSITE_KEY_NAMESPACE);
    }
    Ok(key)
}

/// Split a composite key back into its namespace and components
pub fn split_composite_key(key: &str) -> StorageResult<(String, Vec<String>)> {
    let body = key
        .strip_prefix(COMPOSITE_KEY_NAMESPACE)
        .and_then(|rest| rest.strip_suffix(COMPOSITE_KEY_NAMESPACE))
        .ok_or_else(|| StorageError::InvalidKey(format!("{:?} is not a composite key", key)))?;

    let mut parts = body.split(COMPOSITE_KEY_NAMESPACE).map(str::to_string);
    let object_type = parts.next().unwrap_or_default();
    Ok((object_type, parts.collect()))
}

/// Whether `key` lives in the composite key space
pub fn is_composite_key(key: &str) -> bool {
    key.starts_with(COMPOSITE_KEY_NAMESPACE)
}

fn validate_component(component: &str) -> StorageResult<()> {
    if component.contains(COMPOSITE_KEY_NAMESPACE) {
        return Err(StorageError::InvalidKey(format!(
            "composite key component {:?} contains the reserved separator",
            component
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key_round_trip() {
        let key = create_composite_key("allowance", &["alice", "bob"]).unwrap();
        assert_eq!(key, "\u{0}allowance\u{0}alice\u{0}bob\u{0}");
        assert!(is_composite_key(&key));

        let (object_type, parts) = split_composite_key(&key).unwrap();
        assert_eq!(object_type, "allowance");
        assert_eq!(parts, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_partial_key_is_prefix() {
        let full = create_composite_key("byDev", &["dev1", "model"]).unwrap();
        let partial = create_composite_key("byDev", &["dev1"]).unwrap();
        let other = create_composite_key("byDev", &["dev10", "model"]).unwrap();

        assert!(full.starts_with(&partial));
        // the trailing separator stops "dev1" from matching "dev10"
        assert!(!other.starts_with(&partial));
    }

    #[test]
    fn test_rejects_separator_in_component() {
        assert!(create_composite_key("byDev", &["a\u{0}b"]).is_err());
        assert!(create_composite_key("", &["a"]).is_err());
        assert!(split_composite_key("plain").is_err());
        assert!(!is_composite_key("plain"));
    }
}

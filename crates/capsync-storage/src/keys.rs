//! Shared key validation for the file-backed stores.

use crate::traits::{StoreError, StoreResult};

const MAX_KEY_LEN: usize = 200;
const RECORD_EXTENSION: &str = "json";

/// File name for the record stored under `key`.
///
/// Rejects anything that could escape the store directory or collide with the
/// temporary files used during atomic writes.
pub(crate) fn record_file_name(key: &str) -> StoreResult<String> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key is empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidKey(format!(
            "key exceeds {} bytes",
            MAX_KEY_LEN
        )));
    }
    if key.contains("..") || key.starts_with('.') {
        return Err(StoreError::InvalidKey(format!(
            "key contains invalid characters: {}",
            key
        )));
    }
    if key
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(StoreError::InvalidKey(format!(
            "key contains invalid characters: {}",
            key
        )));
    }
    Ok(format!("{}.{}", key, RECORD_EXTENSION))
}

/// Key for a record file name, or `None` for files that are not records
/// (temporary files, foreign files).
pub(crate) fn key_from_file_name(file_name: &str) -> Option<&str> {
    if file_name.starts_with('.') {
        return None;
    }
    file_name
        .strip_suffix(RECORD_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .filter(|stem| !stem.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ids_map_to_json_files() {
        assert_eq!(record_file_name("cap_1").unwrap(), "cap_1.json");
        assert_eq!(
            record_file_name("0b6f7c1e-3d7a-4f0e-9a51-8f0c2f3b9d11").unwrap(),
            "0b6f7c1e-3d7a-4f0e-9a51-8f0c2f3b9d11.json"
        );
    }

    #[test]
    fn traversal_and_separators_are_rejected() {
        for key in ["", "../etc", "a/b", "a\\b", ".hidden", "x..y", "nul\0"] {
            assert!(
                matches!(record_file_name(key), Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
        assert!(record_file_name(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn only_record_files_yield_keys() {
        assert_eq!(key_from_file_name("cap_1.json"), Some("cap_1"));
        assert_eq!(key_from_file_name(".cap_1.json.tmp"), None);
        assert_eq!(key_from_file_name("notes.txt"), None);
        assert_eq!(key_from_file_name(".json"), None);
    }
}

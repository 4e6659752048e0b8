//! Key layout of the durable store.

use crate::{StorageError, StorageResult};

/// Separator between key segments.
pub const SEPARATOR: char = '/';

/// Subtree holding one record per account key slot.
pub const ACCOUNT_KEY_SUBTREE: &str = "fp/ak";

/// Subtree holding the personalized name.
pub const PERSONALIZED_NAME_SUBTREE: &str = "fp/pn";

/// Name of the personalized name record inside its subtree.
pub const PERSONALIZED_NAME_NAME: &str = "name";

/// Subtree holding the factory reset progress flag.
pub const RESET_SUBTREE: &str = "fp_reset";

/// Name of the progress flag inside [`RESET_SUBTREE`].
pub const RESET_IN_PROGRESS_NAME: &str = "reset_in_progress";

/// Joins a subtree and a relative name into a full key.
#[must_use]
pub fn join(subtree: &str, name: &str) -> String {
    format!("{subtree}{SEPARATOR}{name}")
}

/// Returns the name of `key` relative to `subtree`, if `key` lies under it.
#[must_use]
pub fn strip_subtree<'a>(key: &'a str, subtree: &str) -> Option<&'a str> {
    key.strip_prefix(subtree)?
        .strip_prefix(SEPARATOR)
        .filter(|name| !name.is_empty())
}

/// Checks that `key` is a non-empty path of portable segments.
///
/// Segments may contain ASCII letters, digits, `_`, `-` and `.`, and may not
/// be `.` or `..`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidInput`] describing the first bad segment.
pub fn validate(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_input("key", "empty key"));
    }
    for segment in key.split(SEPARATOR) {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::invalid_input(
                "key",
                format!("bad segment {segment:?} in {key:?}"),
            ));
        }
        if !segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
        {
            return Err(StorageError::invalid_input(
                "key",
                format!("unsupported character in {key:?}"),
            ));
        }
    }
    Ok(())
}

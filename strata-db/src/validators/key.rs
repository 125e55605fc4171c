//! Identifier validators

use once_cell::sync::Lazy;
use regex::Regex;
use strata_core::{Doc, StrataError, StrataResult};

/// Maximum identifier length.
pub const MAX_KEY_LENGTH: usize = 36;

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid regex"));

/// String id validator: max 36 chars, `[A-Za-z0-9._-]`, cannot start with
/// a special character. The reserved internal ids (`$id`, `$createdAt`,
/// `$updatedAt`) pass only when `allow_internal` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Key {
    pub allow_internal: bool,
}

impl Key {
    pub const INTERNAL: [&'static str; 3] = [Doc::ID, Doc::CREATED_AT, Doc::UPDATED_AT];

    pub fn new(allow_internal: bool) -> Self {
        Key { allow_internal }
    }

    pub fn validate(&self, key: &str) -> StrataResult<()> {
        if Self::INTERNAL.contains(&key) {
            return if self.allow_internal {
                Ok(())
            } else {
                Err(StrataError::validation(format!(
                    "Key '{}' is reserved for internal use",
                    key
                )))
            };
        }
        if key.is_empty() || key.chars().count() > MAX_KEY_LENGTH {
            return Err(StrataError::validation(format!(
                "Key must be between 1 and {} characters, got '{}'",
                MAX_KEY_LENGTH, key
            )));
        }
        if !KEY_RE.is_match(key) {
            return Err(StrataError::validation(format!(
                "Key '{}' may only contain [A-Za-z0-9._-] and cannot start with a special character",
                key
            )));
        }
        Ok(())
    }
}

/// Alphanumeric-only key, used for labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Label;

impl Label {
    pub fn validate(&self, label: &str) -> StrataResult<()> {
        if label.is_empty() || label.chars().count() > MAX_KEY_LENGTH {
            return Err(StrataError::validation(format!(
                "Label must be between 1 and {} characters, got '{}'",
                MAX_KEY_LENGTH, label
            )));
        }
        if !LABEL_RE.is_match(label) {
            return Err(StrataError::validation(format!(
                "Label '{}' may only contain alphanumeric characters",
                label
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_charset() {
        let key = Key::default();
        assert!(key.validate("users").is_ok());
        assert!(key.validate("user_name.v2-x").is_ok());
        assert!(key.validate("9lives").is_ok());

        assert!(key.validate("").is_err());
        assert!(key.validate("_private").is_err());
        assert!(key.validate(".dot").is_err());
        assert!(key.validate("-dash").is_err());
        assert!(key.validate("has space").is_err());
        assert!(key.validate("émoji").is_err());
        assert!(key.validate(&"x".repeat(37)).is_err());
        assert!(key.validate(&"x".repeat(36)).is_ok());
    }

    #[test]
    fn test_internal_keys_gated() {
        let strict = Key::new(false);
        let relaxed = Key::new(true);
        for internal in Key::INTERNAL {
            assert!(strict.validate(internal).is_err());
            assert!(relaxed.validate(internal).is_ok());
        }
        // $sequence is not an acceptable user key either way.
        assert!(relaxed.validate("$sequence").is_err());
    }

    #[test]
    fn test_label() {
        let label = Label;
        assert!(label.validate("beta7").is_ok());
        assert!(label.validate("with_underscore").is_err());
        assert!(label.validate("").is_err());
    }
}

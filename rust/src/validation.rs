use std::sync::OnceLock;

use regex::Regex;

use crate::error::SyncError;

pub const MAX_USERNAME_LEN: usize = 10;
pub const MAX_TAG_NAME_LEN: usize = 5;
pub const MAX_TAGS: usize = 3;

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid username regex"))
}

/// Validates a handle and returns it in stored form (`@name`).
pub fn validate_username(raw: &str) -> Result<String, SyncError> {
    let name = raw.trim();
    let name = name.strip_prefix('@').unwrap_or(name);
    if name.is_empty() {
        return Err(SyncError::Validation("username is required".into()));
    }
    if name.chars().count() > MAX_USERNAME_LEN {
        return Err(SyncError::Validation(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username_re().is_match(name) {
        return Err(SyncError::Validation(
            "username may only contain letters, numbers, underscores and hyphens".into(),
        ));
    }
    Ok(format!("@{name}"))
}

/// Returns the trimmed tag name.
pub fn validate_tag_name(raw: &str) -> Result<String, SyncError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(SyncError::Validation("tag name is required".into()));
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(SyncError::Validation(format!(
            "tag name must be at most {MAX_TAG_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_normalizes_prefix() {
        assert_eq!(validate_username("alice").unwrap(), "@alice");
        assert_eq!(validate_username("@bob_1-x").unwrap(), "@bob_1-x");
    }

    #[test]
    fn username_rejections() {
        for bad in ["", "@", "abcdefghijk", "has space", "emoji😀", "@@double"] {
            assert!(
                matches!(validate_username(bad), Err(SyncError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_username("abcdefghij").is_ok());
    }

    #[test]
    fn tag_names() {
        assert_eq!(validate_tag_name("  work ").unwrap(), "work");
        assert!(validate_tag_name("   ").is_err());
        assert!(validate_tag_name("toolong").is_err());
    }
}

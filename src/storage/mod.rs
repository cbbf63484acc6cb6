//! Durability helpers shared by the memory and session stores

pub mod jsonl;
pub mod locks;

pub use jsonl::{append_line, read_lines, rewrite_lines};
pub use locks::KeyedLocks;

use anyhow::{bail, Result};

/// Validate an identifier used as a path component.
///
/// Agent, user and session ids end up in file names, so anything that could
/// escape the namespace directory is rejected.
pub fn safe_component<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        bail!("{} id is empty", kind);
    }
    if value.len() > 128 {
        bail!("{} id is longer than 128 bytes", kind);
    }
    if value.starts_with('.') {
        bail!("{} id '{}' starts with a dot", kind, value);
    }
    if value
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '\0' | ':') || c.is_control())
    {
        bail!("{} id '{}' contains a path separator or control character", kind, value);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_component() {
        assert!(safe_component("agent", "seo_agent").is_ok());
        assert!(safe_component("user", "user-42@example.com").is_ok());
        assert!(safe_component("agent", "").is_err());
        assert!(safe_component("agent", "../etc").is_err());
        assert!(safe_component("session", "a/b").is_err());
        assert!(safe_component("session", "a\\b").is_err());
        assert!(safe_component("user", &"x".repeat(200)).is_err());
    }
}

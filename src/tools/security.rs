//! Path jail for filesystem tools
//!
//! Every path a tool touches is canonicalized (symlinks, `..` and `.`
//! resolved) and must stay under the jail root. Paths that do not exist yet
//! are checked through their nearest existing ancestor.

use crate::errors::{AgentError, Result};
use std::path::{Path, PathBuf};

/// Confines tool file access to one directory tree
#[derive(Debug, Clone)]
pub struct PathJail {
    /// Canonicalized jail root directory
    jail_root: PathBuf,
}

impl PathJail {
    pub fn new(jail_root: impl AsRef<Path>) -> Result<Self> {
        let jail_root = jail_root.as_ref();

        if !jail_root.exists() {
            return Err(AgentError::ConfigError(format!(
                "Jail root does not exist: {}",
                jail_root.display()
            )));
        }

        let jail_root = jail_root.canonicalize().map_err(|e| {
            AgentError::ConfigError(format!("Failed to canonicalize jail root: {}", e))
        })?;

        Ok(Self { jail_root })
    }

    /// Resolve `path` (relative paths start at the jail root) and verify it
    /// stays inside the jail
    pub fn resolve(&self, tool: &str, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let full_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.jail_root.join(path)
        };

        // Walk up to the nearest existing ancestor, remembering the tail
        let mut existing = full_path.as_path();
        let mut tail = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_owned());
                    existing = parent;
                }
                _ => {
                    return Err(AgentError::tool(
                        tool,
                        format!("cannot resolve path {}", path.display()),
                    ))
                }
            }
        }

        let mut canonical = existing.canonicalize().map_err(|e| {
            AgentError::tool(tool, format!("cannot resolve path {}: {}", path.display(), e))
        })?;
        for name in tail.into_iter().rev() {
            if name == ".." {
                return Err(AgentError::tool(
                    tool,
                    format!("path escapes the working directory: {}", path.display()),
                ));
            }
            canonical.push(name);
        }

        if !canonical.starts_with(&self.jail_root) {
            return Err(AgentError::tool(
                tool,
                format!("path escapes the working directory: {}", path.display()),
            ));
        }

        Ok(canonical)
    }

    pub fn jail_root(&self) -> &Path {
        &self.jail_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup_test_jail() -> (PathJail, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let jail = PathJail::new(temp_dir.path()).unwrap();
        (jail, temp_dir)
    }

    #[test]
    fn test_jail_creation_nonexistent() {
        let err = PathJail::new("/nonexistent/path/12345").unwrap_err();
        assert!(err.is_fatal_config());
    }

    #[test]
    fn test_resolve_path_within_jail() {
        let (jail, temp_dir) = setup_test_jail();
        fs::write(temp_dir.path().join("brief.md"), "test").unwrap();

        let resolved = jail.resolve("read_file", "brief.md").unwrap();
        assert!(resolved.starts_with(jail.jail_root()));
    }

    #[test]
    fn test_new_nested_path_is_allowed() {
        let (jail, _temp_dir) = setup_test_jail();
        let resolved = jail.resolve("write_file", "drafts/2024/post.md").unwrap();
        assert!(resolved.ends_with("drafts/2024/post.md"));
    }

    #[test]
    fn test_escape_attempts_fail() {
        let (jail, _temp_dir) = setup_test_jail();

        for attempt in [
            "../../../etc/passwd",
            "../../..",
            "/etc/passwd",
            "/tmp/../etc/passwd",
            "subdir/../../..",
            "missing/../../outside.txt",
        ] {
            let result = jail.resolve("read_file", attempt);
            assert!(result.is_err(), "escape attempt should fail: {}", attempt);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_fails() {
        let (jail, temp_dir) = setup_test_jail();
        std::os::unix::fs::symlink("/etc", temp_dir.path().join("link")).unwrap();
        assert!(jail.resolve("read_file", "link/passwd").is_err());
    }
}

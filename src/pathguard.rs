//! Project-root path confinement.
//!
//! Every filesystem-touching tool resolves user-supplied paths through
//! [`PathGuard`] before reading or writing anything. The guard rejects
//! traversal, a fixed set of sensitive host prefixes, and symlink escapes
//! out of the canonicalized project root.

use crate::config::Limits;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Host path prefixes that are never readable, regardless of project root.
const FORBIDDEN_PREFIXES: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
];

/// Rejection reasons produced by path resolution and access checks.
#[derive(Debug)]
pub enum GuardError {
    /// Empty or otherwise unusable path.
    Invalid,
    /// The path contains a `..` segment after lexical cleaning.
    Traversal,
    /// The path matches a forbidden host prefix.
    Forbidden,
    /// The resolved path is not under the project root.
    Escape,
    /// The target exceeds the per-tool file size cap.
    TooLarge { size: u64, max: u64 },
    /// The target is missing.
    NotFound,
    /// The target has the wrong kind (file vs directory).
    WrongKind,
    /// Underlying filesystem error during resolution.
    Io(std::io::Error),
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid path"),
            Self::Traversal => write!(f, "path traversal attempt detected"),
            Self::Forbidden => write!(f, "access to this path is forbidden"),
            Self::Escape => write!(f, "path is outside project directory"),
            Self::TooLarge { size, max } => {
                write!(f, "file exceeds size limit ({size} > {max} bytes)")
            }
            Self::NotFound => write!(f, "path does not exist"),
            Self::WrongKind => write!(f, "path is not the expected kind"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for GuardError {}

/// Confines tool filesystem access to one project root.
pub struct PathGuard {
    /// Project root as configured (not yet canonicalized).
    project_root: PathBuf,
    /// Per-tool resource limits (file size cap).
    limits: Limits,
}

impl PathGuard {
    /// Build a guard for a project root.
    pub fn new(project_root: impl Into<PathBuf>, limits: Limits) -> Self {
        Self {
            project_root: project_root.into(),
            limits,
        }
    }

    /// Resolve a user-supplied path to an absolute path under the project
    /// root, or reject it.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf, GuardError> {
        if user_path.trim().is_empty() {
            return Err(GuardError::Invalid);
        }

        let cleaned = clean_lexically(Path::new(user_path.trim()))?;

        if cleaned.is_absolute() {
            for prefix in FORBIDDEN_PREFIXES {
                if cleaned.starts_with(prefix) {
                    return Err(GuardError::Forbidden);
                }
            }
        }

        // Canonicalize the root with full symlink evaluation. A root that
        // does not exist yet falls back to its lexical form.
        let canonical_root = match self.project_root.canonicalize() {
            Ok(root) => root,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.project_root.clone(),
            Err(e) => return Err(GuardError::Io(e)),
        };

        let joined = if cleaned.is_absolute() {
            cleaned
        } else {
            self.project_root.join(cleaned)
        };

        let evaluated = canonicalize_allowing_missing_tail(&joined)?;

        if !evaluated.starts_with(&canonical_root) {
            return Err(GuardError::Escape);
        }

        Ok(joined)
    }

    /// Check that an already-resolved path is a readable regular file within
    /// the size cap.
    pub fn validate_file_access(&self, abs_path: &Path) -> Result<(), GuardError> {
        let meta = std::fs::metadata(abs_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GuardError::NotFound
            } else {
                GuardError::Io(e)
            }
        })?;
        if meta.is_dir() {
            return Err(GuardError::WrongKind);
        }
        if meta.len() > self.limits.max_file_bytes {
            return Err(GuardError::TooLarge {
                size: meta.len(),
                max: self.limits.max_file_bytes,
            });
        }
        Ok(())
    }

    /// Check that an already-resolved path is a directory.
    pub fn validate_dir_access(&self, abs_path: &Path) -> Result<(), GuardError> {
        let meta = std::fs::metadata(abs_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GuardError::NotFound
            } else {
                GuardError::Io(e)
            }
        })?;
        if !meta.is_dir() {
            return Err(GuardError::WrongKind);
        }
        Ok(())
    }
}

/// Normalize a path lexically, rejecting any `..` component.
fn clean_lexically(path: &Path) -> Result<PathBuf, GuardError> {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => return Err(GuardError::Traversal),
            Component::CurDir => {}
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    Ok(cleaned)
}

/// Canonicalize a path whose trailing components may not exist yet: the
/// deepest existing ancestor is fully resolved and the missing remainder is
/// re-appended. Writes to new files must still pass the guard.
fn canonicalize_allowing_missing_tail(path: &Path) -> Result<PathBuf, GuardError> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut existing = path.to_path_buf();
            let mut tail = Vec::new();
            loop {
                match existing.canonicalize() {
                    Ok(resolved) => {
                        let mut result = resolved;
                        for component in tail.iter().rev() {
                            result.push(component);
                        }
                        return Ok(result);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        match (existing.file_name(), existing.parent()) {
                            (Some(name), Some(parent)) => {
                                tail.push(name.to_os_string());
                                existing = parent.to_path_buf();
                            }
                            // Ran out of ancestors; keep the lexical form.
                            _ => return Ok(path.to_path_buf()),
                        }
                    }
                    Err(e) => return Err(GuardError::Io(e)),
                }
            }
        }
        Err(e) => Err(GuardError::Io(e)),
    }
}

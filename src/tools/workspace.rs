//! Workspace root and path confinement for file-touching tools.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::DelveError;

/// A canonicalized workspace root. Every path a tool touches is resolved
/// against it and must stay inside it, symlinks included.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, DelveError> {
        let root = std::fs::canonicalize(root.as_ref()).map_err(|e| {
            DelveError::Configuration(format!(
                "workspace root {}: {e}",
                root.as_ref().display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, rejecting anything that escapes the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, DelveError> {
        let denied = || DelveError::AccessDenied(relative.to_string());

        let normalized = normalize(&self.root.join(relative));
        if !normalized.starts_with(&self.root) {
            return Err(denied());
        }

        let resolved = canonicalize_existing_prefix(&normalized);
        if !resolved.starts_with(&self.root) {
            return Err(denied());
        }
        Ok(resolved)
    }

    /// Render a path relative to the root for display.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-append the missing tail,
/// so symlinked parents of not-yet-created files are still followed.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(&existing) {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing.pop();
            }
            None => return path.to_path_buf(),
        }
    }
}

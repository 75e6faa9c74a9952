//! Translation between remote absolute paths and index paths.
//!
//! Index paths are relative to the monitored root, `/`-separated, without
//! leading or trailing slashes. The monitored root itself is the empty
//! string.

use crate::error::{Result, SyncError};
use std::path::{Path, PathBuf};

/// Maps remote paths under one remote folder onto one local directory.
#[derive(Debug, Clone)]
pub struct RemotePathMapper {
    remote_root: String,
    local_root: PathBuf,
}

impl RemotePathMapper {
    pub fn new(remote_root: &str, local_root: impl Into<PathBuf>) -> Self {
        let trimmed = remote_root.trim_end_matches('/');
        let remote_root = if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };

        Self {
            remote_root,
            local_root: local_root.into(),
        }
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Index path of `remote_path`, or `None` when it lies outside the
    /// monitored root.
    pub fn to_relative(&self, remote_path: &str) -> Option<String> {
        let path = remote_path.trim_end_matches('/');

        if self.remote_root == "/" {
            return path
                .strip_prefix('/')
                .map(|rest| rest.to_string())
                .or_else(|| path.is_empty().then(String::new));
        }

        if path == self.remote_root {
            return Some(String::new());
        }

        path.strip_prefix(self.remote_root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| rest.to_string())
    }

    /// Remote absolute path of an index path.
    pub fn to_remote(&self, relative: &str) -> String {
        match (self.remote_root.as_str(), relative) {
            (root, "") => root.to_string(),
            ("/", rel) => format!("/{}", rel),
            (root, rel) => format!("{}/{}", root, rel),
        }
    }

    /// Local filesystem path of an index path.
    ///
    /// Rejects components that could escape the local root.
    pub fn to_local(&self, relative: &str) -> Result<PathBuf> {
        let mut local = self.local_root.clone();
        if relative.is_empty() {
            return Ok(local);
        }

        for component in relative.split('/') {
            if component.is_empty()
                || component == "."
                || component == ".."
                || component.contains(['\\', '\0'])
            {
                return Err(SyncError::DataInconsistency {
                    path: relative.to_string(),
                    message: format!("unsafe path component '{}'", component),
                });
            }
            local.push(component);
        }

        Ok(local)
    }
}

/// Joins an index path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent index path; the root's children have the root (`""`) as parent.
pub fn parent_of(relative: &str) -> &str {
    relative.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Last component of an index path.
pub fn name_of(relative: &str) -> &str {
    relative.rsplit_once('/').map_or(relative, |(_, name)| name)
}

/// True when `path` equals `ancestor` or lies beneath it on a component
/// boundary. Every path lies beneath the root (`""`).
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() || path == ancestor {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

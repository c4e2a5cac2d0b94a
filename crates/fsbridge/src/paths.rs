//! Translation between cloud paths and paths under the filesystem root.

use std::path::Path;

use fsbridge_protocol::FileRecord;

use crate::error::{BridgeError, Result};

/// Longest absolute path the helper accepts, exclusive.
pub const PATH_MAX: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    /// Normalized root without trailing slash; empty for `/`.
    root: String,
}

impl PathTranslator {
    pub fn new(fs_root: &Path) -> Self {
        let root = normalize(&fs_root.to_string_lossy());
        Self {
            root: if root == "/" { String::new() } else { root },
        }
    }

    pub fn root(&self) -> &str {
        if self.root.is_empty() { "/" } else { &self.root }
    }

    /// Absolute path of the per-user tree.
    pub fn user_root(&self) -> String {
        format!("{}/home", self.root)
    }

    /// Map a cloud path into the filesystem and check it stays in the user
    /// tree.
    pub fn translate(&self, cloud_path: &str) -> Result<String> {
        if cloud_path.contains('\n') {
            return Err(BridgeError::InvalidPath(
                "path cannot contain new-lines".to_string(),
            ));
        }

        let path = normalize(&format!("{}/{}", self.root, cloud_path));
        let user_root = self.user_root();
        let inside = path
            .strip_prefix(&user_root)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
        if !inside {
            return Err(BridgeError::InvalidPath(format!(
                "{} is not in the user root",
                cloud_path
            )));
        }
        if path.len() >= PATH_MAX {
            return Err(BridgeError::InvalidPath("path is too long".to_string()));
        }
        Ok(path)
    }

    /// Inverse of [`PathTranslator::translate`] for paths the helper reports.
    pub fn to_cloud_path(&self, real_path: &str) -> String {
        let rest = match real_path.strip_prefix(&self.root) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => real_path,
        };
        normalize(rest)
    }

    /// Rewrite the path fields of a decoded record into cloud paths.
    pub fn record_to_cloud(&self, mut record: FileRecord) -> FileRecord {
        record.path = record.path.map(|path| self.to_cloud_path(&path));
        record.link_target = record.link_target.map(|path| self.to_cloud_path(&path));
        record
    }
}

/// Lexically normalize an absolute path: collapse separators, drop `.`,
/// resolve `..` without climbing above `/`.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

pub fn join_path(base: &str, child: &str) -> String {
    if child.is_empty() {
        normalize(base)
    } else {
        normalize(&format!("{}/{}", base, child))
    }
}

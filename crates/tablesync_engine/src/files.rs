//! Local file storage for configuration files and row attachments.
//!
//! Files are addressed by `(scope, relative_path)` where the scope string
//! matches the store's ETag-cache scopes. Hashes use the manifest's
//! `sha256:<hex>` form so local listings compare directly against server
//! manifest entries.

use crate::error::{SyncError, SyncResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tablesync_protocol::FileManifestEntry;

/// Computes the manifest-form content hash of a byte buffer.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{:x}", hasher.finalize())
}

/// Local file storage abstraction.
pub trait FileStore: Send + Sync {
    /// Reads a file, `None` if absent.
    fn read(&self, scope: &str, relative_path: &str) -> SyncResult<Option<Vec<u8>>>;

    /// Writes (or replaces) a file.
    fn write(&self, scope: &str, relative_path: &str, content: &[u8]) -> SyncResult<()>;

    /// Deletes a file if present.
    fn delete(&self, scope: &str, relative_path: &str) -> SyncResult<()>;

    /// Lists a scope's files as manifest entries (path, hash, length),
    /// sorted by path.
    fn list(&self, scope: &str) -> SyncResult<Vec<FileManifestEntry>>;
}

/// In-memory file store, used in tests and as the reference behavior.
#[derive(Default)]
pub struct MemoryFileStore {
    files: parking_lot::Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryFileStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileStore for MemoryFileStore {
    fn read(&self, scope: &str, relative_path: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self
            .files
            .lock()
            .get(&(scope.to_string(), relative_path.to_string()))
            .cloned())
    }

    fn write(&self, scope: &str, relative_path: &str, content: &[u8]) -> SyncResult<()> {
        self.files
            .lock()
            .insert((scope.to_string(), relative_path.to_string()), content.to_vec());
        Ok(())
    }

    fn delete(&self, scope: &str, relative_path: &str) -> SyncResult<()> {
        self.files
            .lock()
            .remove(&(scope.to_string(), relative_path.to_string()));
        Ok(())
    }

    fn list(&self, scope: &str) -> SyncResult<Vec<FileManifestEntry>> {
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|((_, path), content)| {
                FileManifestEntry::new(path.clone(), content_hash(content), content.len() as u64)
            })
            .collect())
    }
}

/// Disk-backed file store rooted at a directory.
///
/// Scope and relative path segments map to subdirectories. Paths that
/// escape the root (`..` components, absolute paths) are rejected.
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, scope: &str, relative_path: &str) -> SyncResult<PathBuf> {
        let mut path = self.root.clone();
        for part in [scope, relative_path] {
            let rel = Path::new(part);
            if rel.is_absolute()
                || rel
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(SyncError::FileStorage(format!(
                    "path escapes storage root: {part}"
                )));
            }
            path.push(rel);
        }
        Ok(path)
    }

    fn collect(
        &self,
        dir: &Path,
        scope_root: &Path,
        out: &mut Vec<FileManifestEntry>,
    ) -> SyncResult<()> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SyncError::FileStorage(format!("read_dir {}: {e}", dir.display())))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| SyncError::FileStorage(format!("read_dir entry: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, scope_root, out)?;
            } else {
                let content = std::fs::read(&path)
                    .map_err(|e| SyncError::FileStorage(format!("read {}: {e}", path.display())))?;
                let relative = path
                    .strip_prefix(scope_root)
                    .map_err(|e| SyncError::FileStorage(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(FileManifestEntry::new(
                    relative,
                    content_hash(&content),
                    content.len() as u64,
                ));
            }
        }
        Ok(())
    }
}

impl FileStore for DiskFileStore {
    fn read(&self, scope: &str, relative_path: &str) -> SyncResult<Option<Vec<u8>>> {
        let path = self.resolve(scope, relative_path)?;
        match std::fs::read(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::FileStorage(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    fn write(&self, scope: &str, relative_path: &str, content: &[u8]) -> SyncResult<()> {
        let path = self.resolve(scope, relative_path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::FileStorage(format!("mkdir {}: {e}", parent.display())))?;
        }
        std::fs::write(&path, content)
            .map_err(|e| SyncError::FileStorage(format!("write {}: {e}", path.display())))
    }

    fn delete(&self, scope: &str, relative_path: &str) -> SyncResult<()> {
        let path = self.resolve(scope, relative_path)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::FileStorage(format!(
                "remove {}: {e}",
                path.display()
            ))),
        }
    }

    fn list(&self, scope: &str) -> SyncResult<Vec<FileManifestEntry>> {
        let scope_root = self.resolve(scope, "")?;
        if !scope_root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        self.collect(&scope_root, &scope_root, &mut out)?;
        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(out)
    }
}

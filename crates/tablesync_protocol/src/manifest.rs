//! File manifests used for change detection by content hash.

use serde::{Deserialize, Serialize};

/// One file in a manifest listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifestEntry {
    /// Path relative to the manifest's scope (app, table, or row).
    pub relative_path: String,
    /// Content hash in `sha256:<hex>` form. Empty for placeholders.
    pub content_hash: String,
    /// Content length in bytes. Zero-length entries are placeholders and
    /// never trigger a download.
    pub content_length: u64,
    /// Server-provided download locator, when applicable.
    pub download_url: Option<String>,
}

impl FileManifestEntry {
    /// Creates a manifest entry.
    pub fn new(
        relative_path: impl Into<String>,
        content_hash: impl Into<String>,
        content_length: u64,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            content_hash: content_hash.into(),
            content_length,
            download_url: None,
        }
    }

    /// Returns true if this entry is a zero-length placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.content_length == 0
    }
}

/// A manifest listing plus its manifest-level ETag.
///
/// The ETag supports an `If-None-Match` style short-circuit: a client that
/// presents the last ETag it saw gets "no change" instead of the listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifestDocument {
    /// Files in this scope.
    pub entries: Vec<FileManifestEntry>,
    /// Opaque token identifying this version of the listing.
    pub manifest_etag: Option<String>,
}

impl FileManifestDocument {
    /// Creates a manifest document.
    pub fn new(entries: Vec<FileManifestEntry>, manifest_etag: Option<String>) -> Self {
        Self {
            entries,
            manifest_etag,
        }
    }

    /// Looks up an entry by relative path.
    pub fn find(&self, relative_path: &str) -> Option<&FileManifestEntry> {
        self.entries
            .iter()
            .find(|e| e.relative_path == relative_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection() {
        assert!(FileManifestEntry::new("a.html", "", 0).is_placeholder());
        assert!(!FileManifestEntry::new("a.html", "sha256:ab", 12).is_placeholder());
    }

    #[test]
    fn find_by_path() {
        let doc = FileManifestDocument::new(
            vec![
                FileManifestEntry::new("config/app.properties", "sha256:aa", 10),
                FileManifestEntry::new("config/index.html", "sha256:bb", 20),
            ],
            Some("m1".into()),
        );
        assert!(doc.find("config/index.html").is_some());
        assert!(doc.find("missing").is_none());
    }

    #[test]
    fn manifest_json_shape() {
        let doc = FileManifestDocument::new(
            vec![FileManifestEntry::new("f", "sha256:00", 1)],
            Some("etag".into()),
        );
        let json = serde_json::to_string(&doc).unwrap();
        let back: FileManifestDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}

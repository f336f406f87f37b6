//! Manifest diffing: decides per-file actions by content hash.

use tablesync_protocol::FileManifestEntry;

/// Planned per-file actions for one scope.
///
/// The action sets are disjoint and cover every file that appears on
/// either side. Which sets are populated depends on which side is
/// authoritative: pulling fills downloads and local deletes, pushing
/// fills uploads and server deletes.
#[derive(Debug, Default, PartialEq)]
pub struct ManifestDiff {
    /// Server files absent or stale locally (server authoritative).
    pub to_download: Vec<FileManifestEntry>,
    /// Local files absent or stale on the server (local authoritative).
    pub to_upload: Vec<FileManifestEntry>,
    /// Local files the server dropped.
    pub to_delete_local: Vec<FileManifestEntry>,
    /// Server files dropped locally.
    pub to_delete_server: Vec<FileManifestEntry>,
    /// Files identical on both sides.
    pub unchanged: Vec<FileManifestEntry>,
}

impl ManifestDiff {
    /// Returns true when no transfer or delete is needed.
    pub fn is_clean(&self) -> bool {
        self.to_download.is_empty()
            && self.to_upload.is_empty()
            && self.to_delete_local.is_empty()
            && self.to_delete_server.is_empty()
    }
}

/// Diffs a server manifest against a local listing.
///
/// `push_local` picks the authoritative side for hash-mismatched and
/// one-sided entries: when true the local listing wins (mismatches and
/// local-only files become uploads, server-only files become server
/// deletes); when false the server manifest wins (mismatches and
/// server-only files become downloads, local-only files become local
/// deletes).
///
/// Comparison is by content hash, never by timestamp. Zero-length server
/// entries are placeholders: they are treated as unchanged regardless of
/// local presence and never scheduled for download or deletion.
pub fn diff_manifest(
    server: &[FileManifestEntry],
    local: &[FileManifestEntry],
    push_local: bool,
) -> ManifestDiff {
    let mut diff = ManifestDiff::default();
    let local_by_path: std::collections::HashMap<&str, &FileManifestEntry> = local
        .iter()
        .map(|e| (e.relative_path.as_str(), e))
        .collect();
    let mut seen = std::collections::HashSet::new();

    for entry in server {
        seen.insert(entry.relative_path.as_str());
        if entry.is_placeholder() {
            diff.unchanged.push(entry.clone());
            continue;
        }
        match local_by_path.get(entry.relative_path.as_str()) {
            Some(existing) if existing.content_hash == entry.content_hash => {
                diff.unchanged.push(entry.clone());
            }
            Some(existing) if push_local => diff.to_upload.push((*existing).clone()),
            Some(_) => diff.to_download.push(entry.clone()),
            None if push_local => diff.to_delete_server.push(entry.clone()),
            None => diff.to_download.push(entry.clone()),
        }
    }

    for entry in local {
        if !seen.contains(entry.relative_path.as_str()) {
            if push_local {
                diff.to_upload.push(entry.clone());
            } else {
                diff.to_delete_local.push(entry.clone());
            }
        }
    }

    diff
}

/// Diff with the server manifest authoritative.
pub fn diff_manifest_pull(
    server: &[FileManifestEntry],
    local: &[FileManifestEntry],
) -> ManifestDiff {
    diff_manifest(server, local, false)
}

/// Diff with the local listing authoritative.
pub fn diff_manifest_push(
    server: &[FileManifestEntry],
    local: &[FileManifestEntry],
) -> ManifestDiff {
    diff_manifest(server, local, true)
}

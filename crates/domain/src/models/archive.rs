//! Archive entry model.

use serde::Serialize;

use super::document::DocumentRef;

/// One document scheduled for inclusion in an archive.
///
/// Exists only while a single job is being processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub document: DocumentRef,
    /// Collision-free path inside the archive.
    pub archive_path: String,
    /// Path of the text entry written instead when the document cannot be
    /// fetched. Never equal to any other entry's path.
    pub placeholder_path: String,
    pub declared_size: i64,
}

/// Suffix marking the text entry that stands in for a missing document.
pub const PLACEHOLDER_SUFFIX: &str = ".unavailable.txt";

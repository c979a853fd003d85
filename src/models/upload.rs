//! Represents the result of merging an upload into its final file.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A merged artifact, byte-equal to the ordered concatenation of its chunks.
///
/// Once created the file belongs to the output namespace; this service does
/// not track it any further.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Name the artifact was stored under.
    pub filename: String,

    /// Path of the artifact relative to the storage root.
    pub path: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Number of chunks that were concatenated.
    pub chunk_count: u32,

    /// Hex MD5 of the merged bytes. Informational only; it is never checked
    /// against the client fingerprint.
    pub etag: String,

    /// When the merge completed.
    pub merged_at: DateTime<Utc>,
}

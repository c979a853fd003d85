//! Upload identity resolution and path-component validation.
//!
//! Both the client fingerprint and the target filename end up as path
//! components under the storage root, so they are validated here before any
//! other component touches storage.

use crate::errors::{UploadError, UploadResult};
use std::fmt;

const MAX_COMPONENT_LEN: usize = 255;

/// Directory under the storage root that holds every chunk namespace.
pub const CHUNKS_DIR: &str = "chunks";

/// Delimiter between a filename and its chunk index inside a namespace.
const PART_SUFFIX: &str = ".part";

/// Decimal digits of `u32::MAX`.
const MAX_INDEX_DIGITS: usize = 10;

/// Longest filename whose `{filename}.part.{index}` entry still fits in one
/// path component for every possible index.
pub const MAX_FILENAME_LEN: usize = MAX_COMPONENT_LEN - PART_SUFFIX.len() - 1 - MAX_INDEX_DIGITS;

/// Hidden file in the output namespace that a merge is staged in.
pub const MERGE_STAGING_PREFIX: &str = ".merge-";

/// Hidden file in the output namespace written by the readiness check.
pub const READY_PROBE_PREFIX: &str = ".readyz-";

/// Namespace key scoping every chunk of one logical upload.
///
/// Only constructed through [`UploadIdentity::resolve`], so holding one means
/// the key is safe to use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadIdentity(String);

impl UploadIdentity {
    /// Derive the identity for a client fingerprint.
    ///
    /// Deterministic: the same fingerprint always maps to the same namespace,
    /// which is what lets a resumed session find earlier chunks.
    pub fn resolve(fingerprint: &str) -> UploadResult<Self> {
        ensure_component_safe(fingerprint, MAX_COMPONENT_LEN).map_err(|reason| {
            UploadError::InvalidIdentity {
                fingerprint: fingerprint.to_string(),
                reason: reason.into(),
            }
        })?;
        Ok(Self(fingerprint.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the artifact a set of chunks is merged into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetFilename(String);

impl TargetFilename {
    pub fn parse(filename: &str) -> UploadResult<Self> {
        let invalid = |reason: &str| UploadError::InvalidFilename {
            filename: filename.to_string(),
            reason: reason.into(),
        };
        ensure_component_safe(filename, MAX_FILENAME_LEN).map_err(&invalid)?;
        if filename == CHUNKS_DIR {
            return Err(invalid("name is reserved for chunk storage"));
        }
        Ok(Self(filename.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Entry name of chunk `index` of this file inside a namespace.
    pub fn chunk_entry(&self, index: u32) -> String {
        format!("{}{}.{}", self.0, PART_SUFFIX, index)
    }
}

impl fmt::Display for TargetFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a chunk index as sent by a client.
pub fn parse_chunk_index(raw: &str) -> UploadResult<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| UploadError::InvalidChunkIndex(raw.to_string()))
}

/// Extract the chunk index from a namespace entry name.
///
/// The index is whatever follows the *last* `.`, so filenames that carry
/// their own dots (`report.v2.tar.gz.part.3`) still resolve. Entries that are
/// not `{filename}.part.{index}` yield `None`.
pub fn parse_chunk_entry(entry: &str) -> Option<u32> {
    let (stem, index) = entry.rsplit_once('.')?;
    let filename = stem.strip_suffix(PART_SUFFIX)?;
    if filename.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

/// Whether `entry` in the output namespace is scratch left behind by a merge
/// or readiness check rather than a merged artifact.
///
/// Artifacts never start with a dot, so the two cannot collide.
pub fn is_scratch_entry(entry: &str) -> bool {
    entry.starts_with(MERGE_STAGING_PREFIX) || entry.starts_with(READY_PROBE_PREFIX)
}

/// Reject anything that could escape or alias a single directory level.
fn ensure_component_safe(value: &str, max_len: usize) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("must not be empty");
    }
    if value.len() > max_len {
        return Err("too long for a single path component");
    }
    if value.starts_with('.') {
        return Err("must not start with a dot");
    }
    if value
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err("must not contain path separators or control characters");
    }
    Ok(())
}

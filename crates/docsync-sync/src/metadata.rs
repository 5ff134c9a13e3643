//! YAML frontmatter codec and content hashing
//!
//! A document is stored as an optional metadata block followed by its body:
//!
//! ```text
//! ---
//! identifier: R1
//! lastSyncedRevision: 3
//! tags: [draft]
//! ---
//! # Body starts here
//! ```
//!
//! Only the body takes part in hashing, diffing and remote uploads.

use docsync_types::{DocumentMetadata, Error, MetadataCodec, Result};

const DELIMITER: &str = "---";

/// Lowercase hex BLAKE3 hash of a document body
pub fn content_hash(body: &str) -> String {
    blake3::hash(body.as_bytes()).to_hex().to_string()
}

/// Whether `body` still hashes to the hash recorded at the last sync
///
/// An unknown hash never matches.
pub fn matches_hash(body: &str, hash: Option<&str>) -> bool {
    hash.is_some_and(|hash| hash == content_hash(body))
}

/// [`MetadataCodec`] for `---` delimited YAML frontmatter
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontmatterCodec;

impl FrontmatterCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }

    /// Split raw content into the YAML block and the body, if a block is present
    fn split(raw: &str) -> Option<(&str, &str)> {
        let rest = raw
            .strip_prefix("---\r\n")
            .or_else(|| raw.strip_prefix("---\n"))?;

        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            if line.trim_end_matches(['\r', '\n']) == DELIMITER {
                let yaml = &rest[..offset];
                let body = &rest[offset + line.len()..];
                return Some((yaml, body));
            }
            offset += line.len();
        }
        None
    }
}

impl MetadataCodec for FrontmatterCodec {
    fn decode(&self, path: &str, raw: &str) -> Result<(DocumentMetadata, String)> {
        let Some((yaml, body)) = Self::split(raw) else {
            return Ok((DocumentMetadata::default(), raw.to_string()));
        };

        if yaml.trim().is_empty() {
            return Ok((DocumentMetadata::default(), body.to_string()));
        }

        let metadata: DocumentMetadata =
            serde_yaml::from_str(yaml).map_err(|e| Error::decode(path, e.to_string()))?;
        Ok((metadata, body.to_string()))
    }

    fn encode(&self, metadata: &DocumentMetadata, body: &str) -> Result<String> {
        if *metadata == DocumentMetadata::default() {
            // An empty block keeps a body that itself starts with `---` intact.
            if Self::split(body).is_some() {
                return Ok(format!("{DELIMITER}\n{DELIMITER}\n{body}"));
            }
            return Ok(body.to_string());
        }

        let yaml = serde_yaml::to_string(metadata)
            .map_err(|e| Error::other(format!("Failed to serialize metadata: {e}")))?;
        Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
    }
}

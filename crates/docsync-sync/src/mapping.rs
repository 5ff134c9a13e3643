//! Folder mapping between local paths and remote derived paths
//!
//! Local paths are vault-relative (`Notes/Road_map.md`); remote derived paths
//! are folder hierarchy plus display name (`Notes/Road map`). Each path
//! segment is transformed independently:
//!
//! | remote | local |
//! |--------|-------|
//! | `%`    | `%25` |
//! | `_`    | `%5F` |
//! | space  | `_`   |
//!
//! The transform is a bijection on canonical local paths. A local path that
//! does not survive `local -> remote -> local` unchanged is non-canonical
//! and is never used to infer remote moves.

use docsync_config::FolderConfig;

/// Maps local document paths to remote derived paths and back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMapper {
    local_base: String,
    remote_root: String,
    extension: String,
    archive_folder: String,
}

impl FolderMapper {
    /// Create a mapper from folder configuration
    pub fn new(config: &FolderConfig) -> Self {
        Self {
            local_base: normalize(&config.local_base),
            remote_root: normalize(&config.remote_root),
            extension: config.extension.trim_start_matches('.').to_string(),
            archive_folder: normalize(&config.archive_folder),
        }
    }

    /// Local folder scanned for documents (empty for the whole vault)
    pub fn local_base(&self) -> &str {
        &self.local_base
    }

    /// Remote folder listed for documents (empty for the root)
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Document file extension, without the dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Folder receiving archived documents
    pub fn archive_folder(&self) -> &str {
        &self.archive_folder
    }

    /// Whether a local path is a document the engine manages
    pub fn is_managed(&self, local_path: &str) -> bool {
        !within(local_path, &self.archive_folder) && self.local_to_remote(local_path).is_some()
    }

    /// Expected remote derived path for a local document
    ///
    /// `None` when the path lies outside the managed base or lacks the
    /// document extension.
    pub fn local_to_remote(&self, local_path: &str) -> Option<String> {
        let relative = strip_folder(local_path, &self.local_base)?;
        let stem = relative
            .strip_suffix(&self.extension)?
            .strip_suffix('.')?;
        if stem.is_empty() || stem.ends_with('/') {
            return None;
        }

        let mapped = stem
            .split('/')
            .map(decode_segment)
            .collect::<Vec<_>>()
            .join("/");
        Some(join(&self.remote_root, &mapped))
    }

    /// Expected local path for a remote derived path
    ///
    /// `None` when the remote document lies outside the mirrored root.
    pub fn remote_to_local(&self, remote_path: &str) -> Option<String> {
        let relative = strip_folder(remote_path, &self.remote_root)?;
        if relative.is_empty() {
            return None;
        }

        let mapped = relative
            .split('/')
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join("/");
        Some(format!(
            "{}.{}",
            join(&self.local_base, &mapped),
            self.extension
        ))
    }

    /// Whether a local path maps to a remote path that maps back to it
    pub fn is_canonical(&self, local_path: &str) -> bool {
        self.local_to_remote(local_path)
            .and_then(|remote| self.remote_to_local(&remote))
            .is_some_and(|back| back == local_path)
    }

    /// Folder scope and display name for a local document
    pub fn remote_target(&self, local_path: &str) -> Option<(String, String)> {
        let remote = self.local_to_remote(local_path)?;
        let (folder, name) = split_remote(&remote);
        Some((folder.to_string(), name.to_string()))
    }
}

impl Default for FolderMapper {
    fn default() -> Self {
        Self::new(&FolderConfig::default())
    }
}

/// Split a remote derived path into folder scope and display name
pub fn split_remote(remote_path: &str) -> (&str, &str) {
    remote_path.rsplit_once('/').unwrap_or(("", remote_path))
}

fn normalize(folder: &str) -> String {
    folder.trim_matches('/').to_string()
}

fn join(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}

fn within(path: &str, folder: &str) -> bool {
    !folder.is_empty() && strip_folder(path, folder).is_some()
}

fn strip_folder<'a>(path: &'a str, folder: &str) -> Option<&'a str> {
    if folder.is_empty() {
        return Some(path);
    }
    path.strip_prefix(folder)?.strip_prefix('/')
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            ' ' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

fn decode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix("%25") {
            out.push('%');
            rest = tail;
        } else if let Some(tail) = rest
            .strip_prefix("%5F")
            .or_else(|| rest.strip_prefix("%5f"))
        {
            out.push('_');
            rest = tail;
        } else {
            out.push(if c == '_' { ' ' } else { c });
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

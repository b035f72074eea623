//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for the values that flow
//! between the snapshot collector, the planner and the adapters. Each newtype
//! ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Cycle identifier
// ============================================================================

/// Identifier of one sync cycle, used to correlate log lines and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(Uuid);

impl CycleId {
    /// Create a new random CycleId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CycleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CycleId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid CycleId: {e}")))
    }
}

// ============================================================================
// Path types
// ============================================================================

/// A path relative to the sync root, always slash-separated
///
/// This is the key used on both sides of a sync: in the local snapshot, in
/// the remote listing and in the persisted state. A RelativePath is:
/// - Non-empty
/// - Not absolute (no leading `/`)
/// - Free of `.`, `..` and empty components
///
/// Backslashes are converted to `/` on construction and a single trailing
/// slash is dropped. Case is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a new RelativePath
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is empty, absolute or
    /// contains traversal components
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let raw: String = path.into();
        let mut normalized = raw.replace('\\', "/");

        if normalized.ends_with('/') {
            normalized.pop();
        }

        if normalized.is_empty() {
            return Err(DomainError::InvalidPath("Path must not be empty".to_string()));
        }

        if normalized.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must be relative: {raw}"
            )));
        }

        if normalized.contains('\0') {
            return Err(DomainError::InvalidPath(format!(
                "Path contains NUL byte: {raw:?}"
            )));
        }

        for component in normalized.split('/') {
            match component {
                "" => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path contains empty component: {raw}"
                    )))
                }
                "." | ".." => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path contains invalid traversal: {raw}"
                    )))
                }
                _ => {}
            }
        }

        Ok(Self(normalized))
    }

    /// Build a RelativePath from an absolute local path below `root`
    ///
    /// # Errors
    /// Returns error if `path` is not inside `root` or a component is not
    /// valid UTF-8
    pub fn from_local(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let relative = path.strip_prefix(root).map_err(|_| {
            DomainError::InvalidPath(format!(
                "{} is not within {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(c) => {
                    let part = c.to_str().ok_or_else(|| {
                        DomainError::InvalidPath(format!(
                            "Path is not valid UTF-8: {}",
                            path.display()
                        ))
                    })?;
                    parts.push(part);
                }
                _ => {
                    return Err(DomainError::InvalidPath(format!(
                        "Unexpected path component in {}",
                        path.display()
                    )))
                }
            }
        }

        Self::new(parts.join("/"))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of components (`a` is 1, `a/b/c` is 3)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches('/').count() + 1
    }

    /// Final component of the path
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Parent path, or `None` for a top-level entry
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// All proper ancestors, nearest first (`a/b/c` yields `a/b`, `a`)
    pub fn ancestors(&self) -> impl Iterator<Item = RelativePath> + '_ {
        self.0
            .char_indices()
            .rev()
            .filter(|(_, c)| *c == '/')
            .map(move |(idx, _)| Self(self.0[..idx].to_string()))
    }

    /// True when `self` lies strictly below `other`
    #[must_use]
    pub fn is_descendant_of(&self, other: &RelativePath) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(&other.0)
            && self.0.as_bytes()[other.0.len()] == b'/'
    }

    /// Resolve against a local sync root
    #[must_use]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for part in self.0.split('/') {
            path.push(part);
        }
        path
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

// ============================================================================
// Hash types
// ============================================================================

/// A SHA-256 content hash in lowercase hexadecimal (64 characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of the hex encoding of a SHA-256 digest
    pub const HEX_LEN: usize = 64;

    /// Create a new ContentHash from a hex string
    ///
    /// Uppercase input is accepted and normalized to lowercase.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHash` if the string is not 64 hex digits
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash: String = hash.into();

        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Expected {} hex characters, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "Hash contains non-hex characters: {hash}"
            )));
        }

        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Build a ContentHash from raw digest bytes
    ///
    /// # Errors
    /// Returns error if `digest` is not 32 bytes long
    pub fn from_digest(digest: &[u8]) -> Result<Self, DomainError> {
        if digest.len() * 2 != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Expected 32 digest bytes, got {}",
                digest.len()
            )));
        }

        let mut hex = String::with_capacity(Self::HEX_LEN);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Ok(Self(hex))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ============================================================================
// Tests
// ============================================================================

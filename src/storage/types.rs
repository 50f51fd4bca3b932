//! core type-safe identifiers for the storage layer.

use std::fmt::{self, Formatter, Write as _};

use serde::{Serialize, Serializer};

/// length of a digest in bytes (SHA-256)
pub const DIGEST_LEN: usize = 32;

/// length of a digest in hex characters
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// A content digest: the SHA-256 of an object's canonical serialization.
///
/// This is the storage key for every object. The typed wrappers below
/// ([`BlobId`], [`TreeId`], [`CommitId`]) exist so we don't accidentally pass
/// a blob digest where a commit digest is expected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub(crate) fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// parse a digest from a 64-character lowercase hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        let hex = hex.as_bytes();
        if hex.len() != DIGEST_HEX_LEN {
            return Err(InvalidNameError::BadDigest(hex.len()));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        for (i, pair) in hex.chunks(2).enumerate() {
            bytes[i] = digit_value(pair[0])? << 4 | digit_value(pair[1])?;
        }
        Ok(Self(bytes))
    }

    /// short form of the digest (first 7 hex chars), for messages and logs
    pub fn short(&self) -> String {
        self.to_string()[..7].to_string()
    }
}

fn digit_value(c: u8) -> Result<u8, InvalidNameError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(InvalidNameError::InvalidCharacter {
            ch: c as char,
            position: 0,
        }),
    }
}

static HEX_CHARS: &[u8] = b"0123456789abcdef";

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for &byte in self.0.iter() {
            f.write_char(HEX_CHARS[(byte >> 4) as usize].into())?;
            f.write_char(HEX_CHARS[(byte & 0xf) as usize].into())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

macro_rules! typed_digest {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub struct $name(pub(crate) Digest);

        impl $name {
            pub(crate) fn new(digest: Digest) -> Self {
                Self(digest)
            }

            pub(crate) fn raw(&self) -> Digest {
                self.0
            }

            /// parse from a 64-character hex string
            pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
                Digest::from_hex(hex).map(Self)
            }

            /// short form of the id
            pub fn short(&self) -> String {
                self.0.short()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_digest!(
    /// digest of a blob object
    BlobId
);
typed_digest!(
    /// digest of a tree object
    TreeId
);
typed_digest!(
    /// digest of a commit object
    CommitId
);

/// A validated branch name.
///
/// Branch names may contain `/` (nested namespaces), since they map onto
/// files under `refs/heads/`. The rules here are stricter than git's:
/// every `/`-separated segment must be non-empty, must not be `.` or `..`,
/// and must not contain control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BranchName(String);

impl BranchName {
    /// the conventional default branch name
    pub const MAIN: &'static str = "main";

    /// create a new BranchName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.len() > 255 {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if name.starts_with('/') {
            return Err(InvalidNameError::AbsolutePath(name));
        }
        if name.ends_with('/') {
            return Err(InvalidNameError::EmptySegment(name));
        }
        validate_segments(&name)?;
        Ok(Self(name))
    }

    /// the conventional default branch
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// the ref path relative to the repository directory, e.g. `refs/heads/main`
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// get the short name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated working path: the key into a tree hierarchy.
///
/// Always relative, `/`-delimited, with no `.`/`..` segments. Backslashes
/// are normalized to `/` before validation so Windows-style upload paths
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoPath(String);

impl RepoPath {
    /// create a new RepoPath, normalizing separators and validating
    pub fn new(path: impl Into<String>) -> Result<Self, InvalidNameError> {
        let path = path.into().replace('\\', "/");
        if path.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if path.starts_with('/') {
            return Err(InvalidNameError::AbsolutePath(path));
        }
        if path.ends_with('/') {
            return Err(InvalidNameError::EmptySegment(path));
        }
        if path.len() > 4096 {
            return Err(InvalidNameError::TooLong(path.len()));
        }
        validate_segments(&path)?;
        Ok(Self(path))
    }

    /// the `/`-separated segments, in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// the final segment (file or directory name)
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RepoPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// shared segment rules for branch names and working paths
fn validate_segments(value: &str) -> Result<(), InvalidNameError> {
    for segment in value.split('/') {
        if segment.is_empty() {
            return Err(InvalidNameError::EmptySegment(value.to_string()));
        }
        if segment == "." || segment == ".." {
            return Err(InvalidNameError::Traversal(value.to_string()));
        }
        for (i, c) in segment.chars().enumerate() {
            if c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { ch: c, position: i });
            }
        }
    }
    Ok(())
}

/// commit identity (author/committer) as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default identity for operations the engine performs on its own behalf
    pub fn engine() -> Self {
        Self::new("forgestore", "forgestore@localhost")
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::engine()
    }
}

/// error type for invalid names (branches, paths, digests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { ch: char, position: usize },
    AbsolutePath(String),
    Traversal(String),
    EmptySegment(String),
    DuplicateEntry(String),
    BadDigest(usize),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { ch, position } => {
                write!(f, "invalid character {:?} at position {}", ch, position)
            }
            Self::AbsolutePath(path) => write!(f, "path must be relative: '{}'", path),
            Self::Traversal(path) => write!(f, "path contains '.' or '..': '{}'", path),
            Self::EmptySegment(path) => write!(f, "path contains an empty segment: '{}'", path),
            Self::DuplicateEntry(name) => write!(f, "duplicate entry name: '{}'", name),
            Self::BadDigest(len) => write!(f, "digest must be 64 hex characters, got {}", len),
        }
    }
}

impl std::error::Error for InvalidNameError {}

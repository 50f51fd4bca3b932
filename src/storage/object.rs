//! The object model: blobs, trees, and commits.
//!
//! Every object is serialized to a canonical byte form and addressed by the
//! SHA-256 of `"<kind> <len>\0<payload>"`. The header disambiguates type and
//! length, so no two distinct (kind, payload) pairs share a digest. Objects
//! are immutable; logically identical content always hashes identically.
//!
//! Canonical forms:
//! - blob: the raw file bytes
//! - tree: one line per entry, `<kind> <hex-digest>\t<name>\n`, sorted by
//!   entry name bytes
//! - commit: `tree`/`parent` header lines, `author`/`committer` identity
//!   lines with unix-second timestamps, a blank line, then the message

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::storage::types::{BlobId, CommitId, Digest, InvalidNameError, Signature, TreeId};

/// the fundamental object type (blob, tree, or commit)
///
/// We use the word `kind` to avoid conflict with the Rust reserved word `type`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Blob,
    Tree,
    Commit,
}

impl Kind {
    pub(crate) fn from_token(token: &str) -> Option<Kind> {
        match token {
            "blob" => Some(Kind::Blob),
            "tree" => Some(Kind::Tree),
            "commit" => Some(Kind::Commit),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Kind::Blob => "blob",
            Kind::Tree => "tree",
            Kind::Commit => "commit",
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// compute the digest of an object from its kind and canonical payload
pub fn object_digest(kind: Kind, payload: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(payload.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload);
    Digest::new(hasher.finalize().into())
}

/// what a tree entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTarget {
    Blob(BlobId),
    Tree(TreeId),
}

impl EntryTarget {
    /// the object kind of the target
    pub fn kind(&self) -> Kind {
        match self {
            EntryTarget::Blob(_) => Kind::Blob,
            EntryTarget::Tree(_) => Kind::Tree,
        }
    }

    /// the raw digest of the target
    pub fn digest(&self) -> Digest {
        match self {
            EntryTarget::Blob(id) => id.raw(),
            EntryTarget::Tree(id) => id.raw(),
        }
    }
}

/// one named slot in a directory snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub target: EntryTarget,
}

impl TreeEntry {
    /// create an entry, validating the name
    pub fn new(name: impl Into<String>, target: EntryTarget) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_entry_name(&name)?;
        Ok(Self { name, target })
    }

    /// whether this entry names a subdirectory
    pub fn is_dir(&self) -> bool {
        matches!(self.target, EntryTarget::Tree(_))
    }
}

/// entry names are single path segments: no separators, no traversal
fn validate_entry_name(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name == "." || name == ".." {
        return Err(InvalidNameError::Traversal(name.to_string()));
    }
    for (i, c) in name.chars().enumerate() {
        if c == '/' || c == '\\' || c.is_control() {
            return Err(InvalidNameError::InvalidCharacter { ch: c, position: i });
        }
    }
    Ok(())
}

/// serialize tree entries to canonical bytes, sorting by name.
///
/// Canonical ordering is what makes two logically identical directories hash
/// identically regardless of input order. Duplicate names are rejected.
pub fn serialize_tree(entries: &[TreeEntry]) -> Result<Vec<u8>, InvalidNameError> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let mut out = Vec::new();
    let mut prev: Option<&str> = None;
    for entry in sorted {
        validate_entry_name(&entry.name)?;
        if prev == Some(entry.name.as_str()) {
            return Err(InvalidNameError::DuplicateEntry(entry.name.clone()));
        }
        prev = Some(&entry.name);
        out.extend_from_slice(entry.target.kind().as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.target.digest().to_string().as_bytes());
        out.push(b'\t');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

/// parse tree entries back from canonical bytes
pub(crate) fn parse_tree(payload: &[u8]) -> Result<Vec<TreeEntry>, String> {
    let text = std::str::from_utf8(payload).map_err(|e| format!("tree is not utf-8: {}", e))?;

    let mut entries = Vec::new();
    for line in text.lines() {
        let (head, name) = line
            .split_once('\t')
            .ok_or_else(|| format!("malformed tree line: {:?}", line))?;
        let (kind_token, hex) = head
            .split_once(' ')
            .ok_or_else(|| format!("malformed tree line: {:?}", line))?;
        let digest =
            Digest::from_hex(hex).map_err(|e| format!("bad digest in tree line: {}", e))?;
        let target = match Kind::from_token(kind_token) {
            Some(Kind::Blob) => EntryTarget::Blob(BlobId::new(digest)),
            Some(Kind::Tree) => EntryTarget::Tree(TreeId::new(digest)),
            _ => return Err(format!("bad entry kind {:?}", kind_token)),
        };
        let entry =
            TreeEntry::new(name, target).map_err(|e| format!("bad entry name: {}", e))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// commit identity with the moment it was recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
}

impl Actor {
    /// stamp a signature with a timestamp
    pub fn at(signature: &Signature, when: DateTime<Utc>) -> Self {
        Self {
            name: signature.name.clone(),
            email: signature.email.clone(),
            when,
        }
    }

    fn format_line(&self) -> Result<String, InvalidNameError> {
        validate_identity(&self.name)?;
        validate_identity(&self.email)?;
        Ok(format!(
            "{} <{}> {}",
            self.name,
            self.email,
            self.when.timestamp()
        ))
    }

    fn parse_line(line: &str) -> Result<Self, String> {
        let open = line
            .rfind(" <")
            .ok_or_else(|| format!("malformed identity line: {:?}", line))?;
        let name = line[..open].to_string();
        let rest = &line[open + 2..];
        let (email, ts) = rest
            .split_once("> ")
            .ok_or_else(|| format!("malformed identity line: {:?}", line))?;
        let seconds: i64 = ts
            .parse()
            .map_err(|_| format!("bad timestamp {:?}", ts))?;
        let when = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| format!("timestamp out of range: {}", seconds))?;
        Ok(Self {
            name,
            email: email.to_string(),
            when,
        })
    }
}

/// identity fields must not be able to forge header structure
fn validate_identity(value: &str) -> Result<(), InvalidNameError> {
    for (i, c) in value.chars().enumerate() {
        if c == '<' || c == '>' || c == '\n' {
            return Err(InvalidNameError::InvalidCharacter { ch: c, position: i });
        }
    }
    Ok(())
}

/// the recorded content of a commit object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    pub tree: TreeId,
    /// zero (root commit) or one parent; this engine records no merges
    pub parents: Vec<CommitId>,
    pub author: Actor,
    pub committer: Actor,
    pub message: String,
}

/// serialize a commit to canonical bytes
pub fn serialize_commit(data: &CommitData) -> Result<Vec<u8>, InvalidNameError> {
    let mut out = String::new();
    out.push_str(&format!("tree {}\n", data.tree));
    for parent in &data.parents {
        out.push_str(&format!("parent {}\n", parent));
    }
    out.push_str(&format!("author {}\n", data.author.format_line()?));
    out.push_str(&format!("committer {}\n", data.committer.format_line()?));
    out.push('\n');
    out.push_str(&data.message);
    Ok(out.into_bytes())
}

/// parse a commit back from canonical bytes
pub(crate) fn parse_commit(payload: &[u8]) -> Result<CommitData, String> {
    let text = std::str::from_utf8(payload).map_err(|e| format!("commit is not utf-8: {}", e))?;
    let (header, message) = text
        .split_once("\n\n")
        .ok_or_else(|| "commit has no message separator".to_string())?;

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;

    for line in header.lines() {
        let (field, value) = line
            .split_once(' ')
            .ok_or_else(|| format!("malformed header line: {:?}", line))?;
        match field {
            "tree" => {
                let digest =
                    Digest::from_hex(value).map_err(|e| format!("bad tree digest: {}", e))?;
                tree = Some(TreeId::new(digest));
            }
            "parent" => {
                let digest =
                    Digest::from_hex(value).map_err(|e| format!("bad parent digest: {}", e))?;
                parents.push(CommitId::new(digest));
            }
            "author" => author = Some(Actor::parse_line(value)?),
            "committer" => committer = Some(Actor::parse_line(value)?),
            _ => return Err(format!("unknown header field {:?}", field)),
        }
    }

    Ok(CommitData {
        tree: tree.ok_or_else(|| "commit has no tree".to_string())?,
        parents,
        author: author.ok_or_else(|| "commit has no author".to_string())?,
        committer: committer.ok_or_else(|| "commit has no committer".to_string())?,
        message: message.to_string(),
    })
}

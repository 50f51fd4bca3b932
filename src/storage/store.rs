//! The on-disk object store.
//!
//! Objects live as loose files under `objects/`, named by digest with a
//! two-character fan-out directory (`objects/ab/cdef...`). Each file holds
//! the zlib-compressed canonical envelope `"<kind> <len>\0<payload>"`.
//!
//! Writes go to a temp file in the same filesystem and land via atomic
//! rename, so readers never observe a partial object. Storing content that
//! already exists short-circuits on the existing file: put is idempotent and
//! concurrent writers of the same content are harmless.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object::{
    self, object_digest, serialize_commit, serialize_tree, CommitData, Kind, TreeEntry,
};
use crate::storage::types::{BlobId, CommitId, Digest, TreeId};

/// content-addressed storage for one repository
#[derive(Debug, Clone)]
pub struct ObjectStore {
    objects_dir: PathBuf,
}

impl ObjectStore {
    /// create the object directory structure
    pub fn init(repo_dir: &Path) -> StorageResult<Self> {
        let objects_dir = repo_dir.join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    /// open the store of an existing repository
    pub fn open(repo_dir: &Path) -> StorageResult<Self> {
        let objects_dir = repo_dir.join("objects");
        if !objects_dir.is_dir() {
            return Err(StorageError::NotInitialized(repo_dir.to_path_buf()));
        }
        Ok(Self { objects_dir })
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_string();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// whether an object with this digest is present
    pub fn contains(&self, digest: &Digest) -> bool {
        self.object_path(digest).is_file()
    }

    fn put_raw(&self, kind: Kind, payload: &[u8]) -> StorageResult<Digest> {
        let digest = object_digest(kind, payload);
        let path = self.object_path(&digest);
        if path.is_file() {
            // identical content is already stored
            return Ok(digest);
        }

        let mut encoder = Vec::new();
        {
            let mut z = ZlibEncoder::new(&mut encoder, Compression::default());
            z.write_all(kind.as_str().as_bytes())?;
            z.write_all(b" ")?;
            z.write_all(payload.len().to_string().as_bytes())?;
            z.write_all(b"\0")?;
            z.write_all(payload)?;
            z.finish()?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = NamedTempFile::new_in(&self.objects_dir)?;
        tmp.write_all(&encoder)?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(digest)
    }

    fn get_raw(&self, digest: &Digest) -> StorageResult<(Kind, Vec<u8>)> {
        let path = self.object_path(digest);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(digest.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut raw = Vec::new();
        ZlibDecoder::new(file)
            .read_to_end(&mut raw)
            .map_err(|e| corrupt(digest, format!("zlib: {}", e)))?;

        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| corrupt(digest, "missing header terminator".to_string()))?;
        let (kind, len) = parse_header(&raw[..nul]).map_err(|r| corrupt(digest, r))?;
        let payload = raw[nul + 1..].to_vec();
        if payload.len() as u64 != len {
            return Err(corrupt(
                digest,
                format!("length header says {}, payload is {}", len, payload.len()),
            ));
        }
        Ok((kind, payload))
    }

    /// the payload size recorded in an object's header, without reading the
    /// whole object
    pub fn object_size(&self, digest: &Digest) -> StorageResult<u64> {
        let path = self.object_path(digest);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(digest.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        // the header is at most a few dozen bytes; decompress one chunk
        let mut decoder = ZlibDecoder::new(file);
        let mut buf = [0u8; 64];
        let mut header = Vec::new();
        'outer: loop {
            let n = decoder
                .read(&mut buf)
                .map_err(|e| corrupt(digest, format!("zlib: {}", e)))?;
            if n == 0 {
                return Err(corrupt(digest, "missing header terminator".to_string()));
            }
            for &b in &buf[..n] {
                if b == 0 {
                    break 'outer;
                }
                header.push(b);
            }
        }
        let (_, len) = parse_header(&header).map_err(|r| corrupt(digest, r))?;
        Ok(len)
    }

    /// store raw file content; idempotent
    pub fn put_blob(&self, bytes: &[u8]) -> StorageResult<BlobId> {
        self.put_raw(Kind::Blob, bytes).map(BlobId::new)
    }

    /// fetch raw file content
    pub fn get_blob(&self, id: BlobId) -> StorageResult<Vec<u8>> {
        let (kind, payload) = self.get_raw(&id.raw())?;
        expect_kind(&id.raw(), Kind::Blob, kind)?;
        Ok(payload)
    }

    /// store a directory snapshot; entries are canonicalized (sorted) first
    pub fn put_tree(&self, entries: &[TreeEntry]) -> StorageResult<TreeId> {
        let payload = serialize_tree(entries)?;
        self.put_raw(Kind::Tree, &payload).map(TreeId::new)
    }

    /// fetch a directory snapshot
    pub fn get_tree(&self, id: TreeId) -> StorageResult<Vec<TreeEntry>> {
        let (kind, payload) = self.get_raw(&id.raw())?;
        expect_kind(&id.raw(), Kind::Tree, kind)?;
        object::parse_tree(&payload).map_err(|r| corrupt(&id.raw(), r))
    }

    /// store a commit object
    pub fn put_commit(&self, data: &CommitData) -> StorageResult<CommitId> {
        let payload = serialize_commit(data)?;
        self.put_raw(Kind::Commit, &payload).map(CommitId::new)
    }

    /// fetch a commit object
    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitData> {
        let (kind, payload) = match self.get_raw(&id.raw()) {
            Err(StorageError::ObjectNotFound(hex)) => {
                return Err(StorageError::CommitNotFound(hex))
            }
            other => other?,
        };
        expect_kind(&id.raw(), Kind::Commit, kind)?;
        object::parse_commit(&payload).map_err(|r| corrupt(&id.raw(), r))
    }
}

fn parse_header(header: &[u8]) -> Result<(Kind, u64), String> {
    let text = std::str::from_utf8(header).map_err(|_| "header is not utf-8".to_string())?;
    let (kind_token, len) = text
        .split_once(' ')
        .ok_or_else(|| format!("malformed header {:?}", text))?;
    let kind =
        Kind::from_token(kind_token).ok_or_else(|| format!("unknown kind {:?}", kind_token))?;
    let len: u64 = len.parse().map_err(|_| format!("bad length {:?}", len))?;
    Ok((kind, len))
}

fn expect_kind(digest: &Digest, expected: Kind, found: Kind) -> StorageResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(StorageError::UnexpectedEntryType {
            path: digest.to_string(),
            expected: expected.as_str(),
            found: found.as_str(),
        })
    }
}

fn corrupt(digest: &Digest, reason: String) -> StorageError {
    StorageError::CorruptObject {
        id: digest.to_string(),
        reason,
    }
}

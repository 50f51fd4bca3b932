//! The per-repository handle.
//!
//! `Repository` ties the object store, tree builder, and ref store together:
//! it is the only write path into a repository and the home of the read-side
//! queries. Clone it to share across threads; all clones reach the same
//! per-branch CAS locks through the shared inner.
//!
//! Reads are snapshot-at-resolve-time: once a branch is resolved to a commit
//! digest, the rest of the operation walks that fixed digest and never
//! re-resolves, so a ref moving mid-query cannot tear the result.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::storage::commit::{history, read_commit, CommitBuilder, CommitInfo};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object::EntryTarget;
use crate::storage::refs::{Head, RefStore};
use crate::storage::store::ObjectStore;
use crate::storage::tree::{entry_at_path, subtree_at, Change, TreeBuilder};
use crate::storage::types::{BranchName, CommitId, Digest, RepoPath, Signature};

/// bound on CAS retries before a commit gives up with `WriteConflict`
const MAX_COMMIT_ATTEMPTS: usize = 5;

/// entry kind as seen by tree listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Dir,
    File,
}

/// one row of a tree listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub digest: Digest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// file content as served to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub content: String,
    pub size: u64,
    pub encoding: &'static str,
}

/// one branch with its head
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: BranchName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<CommitId>,
    pub is_default: bool,
}

/// a single version-controlled repository.
///
/// Clone to share across threads; it uses `Arc` internally.
#[derive(Clone, Debug)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

#[derive(Debug)]
struct RepositoryInner {
    path: PathBuf,
    objects: ObjectStore,
    refs: RefStore,
}

impl Repository {
    /// initialize a new repository with an unborn default branch
    pub fn init(path: impl AsRef<Path>, default_branch: &BranchName) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join("HEAD").exists() {
            return Err(StorageError::AlreadyInitialized(path.to_path_buf()));
        }
        fs::create_dir_all(path)?;
        let objects = ObjectStore::init(path)?;
        let refs = RefStore::init(path, default_branch)?;

        Ok(Self {
            inner: Arc::new(RepositoryInner {
                path: path.to_path_buf(),
                objects,
                refs,
            }),
        })
    }

    /// open an existing repository
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let refs = RefStore::open(path)?;
        let objects = ObjectStore::open(path)?;

        Ok(Self {
            inner: Arc::new(RepositoryInner {
                path: path.to_path_buf(),
                objects,
                refs,
            }),
        })
    }

    /// get the repository path
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// the branch `HEAD` declares as default
    pub fn default_branch(&self) -> StorageResult<BranchName> {
        self.inner.refs.default_branch()
    }

    /// current head of a branch
    pub fn head(&self, branch: &BranchName) -> StorageResult<Head> {
        self.inner.refs.resolve(branch)
    }

    /// resolve a branch name or a full commit digest to a head.
    ///
    /// Branch names win; a 64-hex identifier naming no branch is looked up
    /// as a commit digest.
    pub fn resolve_rev(&self, rev: &str) -> StorageResult<Head> {
        if let Ok(branch) = BranchName::new(rev) {
            match self.inner.refs.resolve(&branch) {
                Ok(head) => return Ok(head),
                Err(StorageError::RefNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if let Ok(id) = CommitId::from_hex(rev) {
            // verify the digest actually names a stored commit
            let info = read_commit(&self.inner.objects, id)?;
            return Ok(Head::Commit(info.id));
        }
        Err(StorageError::RefNotFound(rev.to_string()))
    }

    // ==================== Write Side ====================

    /// write a batch of files as one commit on `branch`.
    ///
    /// Either every file in the batch is reflected in exactly one new commit
    /// or, on error, the branch is unchanged. Concurrent commits to the same
    /// branch serialize through the ref CAS; this loop retries against the
    /// fresh head up to a fixed bound and then reports `WriteConflict`.
    pub fn commit_files(
        &self,
        branch: &BranchName,
        files: Vec<(RepoPath, Vec<u8>)>,
        message: &str,
        author: &Signature,
    ) -> StorageResult<CommitId> {
        if files.is_empty() {
            return Err(StorageError::EmptyCommit);
        }
        let changes: Vec<Change> = files
            .into_iter()
            .map(|(path, content)| Change::Upsert { path, content })
            .collect();
        self.commit_changes(branch, &changes, message, author)
    }

    /// remove one path as a commit on `branch`
    pub fn remove_path(
        &self,
        branch: &BranchName,
        path: RepoPath,
        message: &str,
        author: &Signature,
    ) -> StorageResult<CommitId> {
        let changes = [Change::Remove { path }];
        self.commit_changes(branch, &changes, message, author)
    }

    fn commit_changes(
        &self,
        branch: &BranchName,
        changes: &[Change],
        message: &str,
        author: &Signature,
    ) -> StorageResult<CommitId> {
        let objects = &self.inner.objects;
        let mut attempt = 0;
        loop {
            attempt += 1;

            let head = self.inner.refs.resolve(branch)?;
            let base_tree = match head.commit() {
                Some(id) => Some(objects.get_commit(id)?.tree),
                None => None,
            };

            let new_tree = TreeBuilder::new(objects).apply(base_tree, changes)?;

            let mut builder = CommitBuilder::new(objects)
                .tree(new_tree)
                .message(message)
                .author(author.clone());
            if let Some(parent) = head.commit() {
                builder = builder.parent(parent);
            }
            let commit_id = builder.commit()?;

            match self.inner.refs.compare_and_swap(branch, head, commit_id) {
                Ok(()) => return Ok(commit_id),
                Err(StorageError::WriteConflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    // a concurrent commit landed first; redo against the new head
                    debug!(
                        "commit on {} lost the ref race (attempt {}), retrying",
                        branch, attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ==================== Read Side ====================

    /// list the entries of the directory `path` at `rev` (`""` for the root),
    /// directories first, then files, alphabetically.
    ///
    /// An unborn branch has no content yet: the listing is empty, not an
    /// error.
    pub fn list_tree(&self, rev: &str, path: &str) -> StorageResult<Vec<FileEntry>> {
        let objects = &self.inner.objects;
        let commit = match self.resolve_rev(rev)?.commit() {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        let root = objects.get_commit(commit)?.tree;

        let dir = if path.is_empty() {
            None
        } else {
            Some(RepoPath::new(path)?)
        };
        let subtree = subtree_at(objects, root, dir.as_ref())?;

        let mut listing = Vec::new();
        for entry in objects.get_tree(subtree)? {
            let full_path = match &dir {
                Some(d) => format!("{}/{}", d, entry.name),
                None => entry.name.clone(),
            };
            let (file_type, size) = match entry.target {
                EntryTarget::Tree(_) => (FileType::Dir, None),
                EntryTarget::Blob(id) => (FileType::File, Some(objects.object_size(&id.raw())?)),
            };
            listing.push(FileEntry {
                name: entry.name,
                path: full_path,
                file_type,
                digest: entry.target.digest(),
                size,
            });
        }
        listing.sort_by(|a, b| a.file_type.cmp(&b.file_type).then(a.name.cmp(&b.name)));
        Ok(listing)
    }

    /// read the file at `path` as UTF-8 text
    pub fn read_file(&self, rev: &str, path: &RepoPath) -> StorageResult<FileContent> {
        let objects = &self.inner.objects;
        let commit = self
            .resolve_rev(rev)?
            .commit()
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))?;
        let root = objects.get_commit(commit)?.tree;

        let entry = entry_at_path(objects, root, path)?;
        let blob = match entry.target {
            EntryTarget::Blob(id) => id,
            EntryTarget::Tree(_) => {
                return Err(StorageError::PathNotFound(path.to_string()));
            }
        };

        let bytes = objects.get_blob(blob)?;
        let size = bytes.len() as u64;
        let content = String::from_utf8(bytes).map_err(|e| e.utf8_error())?;
        Ok(FileContent {
            content,
            size,
            encoding: "utf-8",
        })
    }

    /// commit history from `rev`, newest first, at most `limit` entries
    pub fn log(&self, rev: &str, limit: usize) -> StorageResult<Vec<CommitInfo>> {
        let start = match self.resolve_rev(rev)?.commit() {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        history(&self.inner.objects, start).take(limit).collect()
    }

    /// number of commits reachable from `rev` via first parents
    pub fn commit_count(&self, rev: &str) -> StorageResult<usize> {
        let start = match self.resolve_rev(rev)?.commit() {
            Some(id) => id,
            None => return Ok(0),
        };
        let mut count = 0;
        for info in history(&self.inner.objects, start) {
            info?;
            count += 1;
        }
        Ok(count)
    }

    /// all branches, the unborn default included, sorted by name
    pub fn list_branches(&self) -> StorageResult<Vec<BranchInfo>> {
        let default = self.default_branch()?;
        let mut infos = Vec::new();
        let mut saw_default = false;

        for name in self.inner.refs.list()? {
            let head = match self.inner.refs.resolve(&name) {
                Ok(head) => head.commit(),
                // branch deleted between list and resolve
                Err(StorageError::RefNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let is_default = name == default;
            saw_default |= is_default;
            infos.push(BranchInfo {
                name,
                head,
                is_default,
            });
        }

        if !saw_default {
            infos.push(BranchInfo {
                name: default,
                head: None,
                is_default: true,
            });
        }
        infos.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(infos)
    }

    /// create a branch at an existing commit
    pub fn create_branch(&self, branch: &BranchName, at: CommitId) -> StorageResult<()> {
        // fail closed if the target commit is not stored
        read_commit(&self.inner.objects, at)?;
        self.inner.refs.create(branch, at)
    }

    /// delete a branch; the default branch is protected
    pub fn delete_branch(&self, branch: &BranchName) -> StorageResult<()> {
        self.inner.refs.delete(branch)
    }
}

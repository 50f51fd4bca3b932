//! Commit creation and history traversal.
//!
//! Commits are the atomic units of change: each successful write produces
//! exactly one commit whose parent is the branch head it was built against.
//! History is the chain of first parents; this engine records no merges, so
//! the chain is strictly linear.

use chrono::Utc;
use serde::Serialize;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object::{Actor, CommitData};
use crate::storage::store::ObjectStore;
use crate::storage::types::{CommitId, Signature, TreeId};

/// information about a stored commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author: Actor,
    pub committer: Actor,
}

impl CommitInfo {
    pub(crate) fn from_data(id: CommitId, data: CommitData) -> Self {
        Self {
            id,
            tree_id: data.tree,
            parent_ids: data.parents,
            message: data.message,
            author: data.author,
            committer: data.committer,
        }
    }

    /// whether this is a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// fetch a commit and its metadata
pub fn read_commit(store: &ObjectStore, id: CommitId) -> StorageResult<CommitInfo> {
    let data = store.get_commit(id)?;
    Ok(CommitInfo::from_data(id, data))
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    store: &'a ObjectStore,
    tree_id: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    author: Signature,
    committer: Option<Signature>,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(store: &'a ObjectStore) -> Self {
        Self {
            store,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            author: Signature::engine(),
            committer: None,
        }
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    /// add a parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author identity
    pub fn author(mut self, author: Signature) -> Self {
        self.author = author;
        self
    }

    /// set a committer distinct from the author
    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// stamp the current time, store the commit, and return its id
    pub fn commit(self) -> StorageResult<CommitId> {
        let tree = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;

        let when = Utc::now();
        let author = Actor::at(&self.author, when);
        let committer = match &self.committer {
            Some(sig) => Actor::at(sig, when),
            None => author.clone(),
        };

        self.store.put_commit(&CommitData {
            tree,
            parents: self.parents,
            author,
            committer,
            message: self.message,
        })
    }
}

/// iterate over commit history, newest first, following first parents
pub struct HistoryIterator<'a> {
    store: &'a ObjectStore,
    next: Option<CommitId>,
}

impl<'a> Iterator for HistoryIterator<'a> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        match read_commit(self.store, id) {
            Ok(info) => {
                self.next = info.first_parent();
                Some(Ok(info))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// get history starting at (and including) `start`
pub fn history(store: &ObjectStore, start: CommitId) -> HistoryIterator<'_> {
    HistoryIterator {
        store,
        next: Some(start),
    }
}

//! The repository storage layer.
//!
//! This module is a complete content-addressed version store: blobs, trees,
//! and commits keyed by the SHA-256 of their canonical serialization, with
//! branch refs as the only mutable state. The engine above uses this API and
//! never touches the on-disk layout directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Repository                           │
//! │   (commit_files / list_tree / read_file / log / branches)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │   commit    │       │    refs     │
//!  │ (builder)   │       │ (builder,   │       │ (CAS head   │
//!  │             │       │  history)   │       │  updates)   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┴──────────┐          │
//!                                          ▼          ▼
//!                                   ┌─────────────┐ ┌──────────┐
//!                                   │    store    │ │ ref files│
//!                                   │ (loose objs)│ │ on disk  │
//!                                   └─────────────┘ └──────────┘
//! ```
//!
//! Objects are immutable and deduplicated; writing the same content twice
//! yields the same digest and one stored copy. All branch mutation goes
//! through [`RefStore::compare_and_swap`], which is what keeps concurrent
//! committers from silently losing each other's work.

mod commit;
mod error;
mod object;
mod refs;
mod repository;
mod store;
mod tree;
mod types;

// Re-export public API
pub use commit::{history, read_commit, CommitBuilder, CommitInfo, HistoryIterator};
pub use error::{StorageError, StorageResult};
pub use object::{Actor, CommitData, EntryTarget, Kind, TreeEntry};
pub use refs::{Head, RefStore};
pub use repository::{BranchInfo, FileContent, FileEntry, FileType, Repository};
pub use store::ObjectStore;
pub use tree::{Change, TreeBuilder};
pub use types::{
    BlobId, BranchName, CommitId, Digest, InvalidNameError, RepoPath, Signature, TreeId,
};

//! forgestore - a content-addressed repository storage engine.
//!
//! This crate is the storage core of a code-hosting service: every
//! repository is a directory of immutable objects (blobs, trees, commits)
//! keyed by the SHA-256 of their canonical bytes, plus branch refs updated
//! only through compare-and-swap. Multi-file uploads land as single atomic
//! commits; tree, blob, log, and branch queries read consistent snapshots
//! even while writers race.
//!
//! # Example
//!
//! ```no_run
//! use forgestore::engine::{Engine, FileUpload, SeedFiles};
//! use forgestore::storage::Signature;
//!
//! let engine = Engine::open("./repositories").unwrap();
//! engine
//!     .init_repository("alice", "project", None, SeedFiles::default())
//!     .unwrap();
//!
//! let author = Signature::new("Alice", "alice@example.com");
//! engine
//!     .commit_files(
//!         "alice",
//!         "project",
//!         "main",
//!         vec![FileUpload::new("README.md", "# project")],
//!         "Initial commit",
//!         &author,
//!     )
//!     .unwrap();
//! ```

pub mod engine;
pub mod storage;

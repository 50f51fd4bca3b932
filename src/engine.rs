//! Engine API - the high-level interface consumed by the web layer.
//!
//! An [`Engine`] owns a root directory and maps each repository, identified
//! by an (owner, name) pair, to its own storage namespace under
//! `<root>/<owner>/<name>.git`. No objects or refs are shared between
//! repositories.
//!
//! This layer is also where upload policy lives: per-file validation
//! (binary content, oversized files, malformed paths) is aggregated into a
//! per-file error list while the surviving files proceed into a single
//! commit. Repository handles are cached so every caller in the process
//! shares one set of per-branch CAS locks.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::storage::{
    BranchInfo, BranchName, CommitId, CommitInfo, FileContent, FileEntry, InvalidNameError,
    RepoPath, Repository, Signature, StorageError,
};

/// default number of commits returned by `log`
pub const DEFAULT_LOG_LIMIT: usize = 30;

/// largest accepted file content, in bytes
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// most files accepted in one upload batch
pub const MAX_BATCH_FILES: usize = 100;

/// result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("repository not found: {owner}/{name}")]
    RepositoryNotFound { owner: String, name: String },

    #[error("repository already exists: {owner}/{name}")]
    RepositoryExists { owner: String, name: String },

    #[error("repository has no commits: {owner}/{name}")]
    EmptyRepository { owner: String, name: String },

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("upload batch of {count} files exceeds the limit of {max}")]
    BatchTooLarge { count: usize, max: usize },

    #[error("no files accepted for commit")]
    NothingToCommit { errors: Vec<FileError> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::RepositoryNotFound { .. } => true,
            EngineError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// check if this error is a conflict the caller may retry or rename around
    pub fn is_conflict(&self) -> bool {
        match self {
            EngineError::RepositoryExists { .. } => true,
            EngineError::Storage(e) => e.is_conflict(),
            _ => false,
        }
    }
}

/// Engine configuration options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// root directory holding every repository's storage
    pub root: PathBuf,
    /// branch new repositories start on
    pub default_branch: BranchName,
    /// per-file content size cap, in bytes
    pub max_file_size: u64,
    /// upload batch size cap
    pub max_batch_files: usize,
    /// domain used for derived author emails (`<owner>@<domain>`)
    pub email_domain: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./repositories"),
            default_branch: BranchName::main(),
            max_file_size: MAX_FILE_SIZE,
            max_batch_files: MAX_BATCH_FILES,
            email_domain: "localhost".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with the given root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Set the default branch for new repositories.
    pub fn default_branch(mut self, branch: BranchName) -> Self {
        self.default_branch = branch;
        self
    }

    /// Set the per-file size cap.
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }
}

/// one file as submitted by an upload
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub path: String,
    pub content: Vec<u8>,
}

impl FileUpload {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// a per-file rejection, reported alongside the commit result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub path: String,
    pub reason: String,
}

/// the result of a multi-file commit
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    /// the new head of the branch
    pub commit: CommitId,
    /// paths that made it into the commit
    pub files: Vec<String>,
    /// files rejected by validation; never aborts the accepted ones
    pub errors: Vec<FileError>,
}

/// optional starter content for a new repository
#[derive(Debug, Clone, Default)]
pub struct SeedFiles {
    pub readme: Option<String>,
    pub gitignore: Option<String>,
    pub license: Option<String>,
}

impl SeedFiles {
    fn is_empty(&self) -> bool {
        self.readme.is_none() && self.gitignore.is_none() && self.license.is_none()
    }

    fn into_files(self) -> Vec<(&'static str, String)> {
        let mut files = Vec::new();
        if let Some(content) = self.readme {
            files.push(("README.md", content));
        }
        if let Some(content) = self.gitignore {
            files.push((".gitignore", content));
        }
        if let Some(content) = self.license {
            files.push(("LICENSE", content));
        }
        files
    }
}

/// The repository storage engine.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    repos: RwLock<HashMap<(String, String), Repository>>,
}

impl Engine {
    /// create an engine over the configured root directory
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        fs::create_dir_all(&config.root)?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                repos: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// create an engine with default configuration under `root`
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        Self::new(EngineConfig::new(root))
    }

    fn repo_dir(&self, owner: &str, name: &str) -> PathBuf {
        self.inner
            .config
            .root
            .join(owner)
            .join(format!("{}.git", name))
    }

    /// fetch the cached handle for a repository, opening it on first use
    fn repo(&self, owner: &str, name: &str) -> EngineResult<Repository> {
        validate_slug(owner)?;
        validate_slug(name)?;

        let key = (owner.to_string(), name.to_string());
        if let Some(repo) = self.inner.repos.read().get(&key) {
            return Ok(repo.clone());
        }

        let mut repos = self.inner.repos.write();
        // double-checked: another thread may have opened it meanwhile
        if let Some(repo) = repos.get(&key) {
            return Ok(repo.clone());
        }
        let repo = match Repository::open(self.repo_dir(owner, name)) {
            Ok(repo) => repo,
            Err(StorageError::NotInitialized(_)) => {
                return Err(EngineError::RepositoryNotFound {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        repos.insert(key, repo.clone());
        Ok(repo)
    }

    // ==================== Repository Lifecycle ====================

    /// create a repository.
    ///
    /// With no seed files the default branch is left unborn; otherwise the
    /// seed files become one initial commit authored by the owner.
    pub fn init_repository(
        &self,
        owner: &str,
        name: &str,
        default_branch: Option<&str>,
        seed: SeedFiles,
    ) -> EngineResult<()> {
        validate_slug(owner)?;
        validate_slug(name)?;
        let branch = match default_branch {
            Some(name) => BranchName::new(name)?,
            None => self.inner.config.default_branch.clone(),
        };

        let dir = self.repo_dir(owner, name);
        let repo = match Repository::init(&dir, &branch) {
            Ok(repo) => repo,
            Err(StorageError::AlreadyInitialized(_)) => {
                return Err(EngineError::RepositoryExists {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !seed.is_empty() {
            let author = Signature::new(
                owner,
                format!("{}@{}", owner, self.inner.config.email_domain),
            );
            let mut files = Vec::new();
            for (path, content) in seed.into_files() {
                files.push((RepoPath::new(path)?, content.into_bytes()));
            }
            repo.commit_files(&branch, files, "Initial commit", &author)?;
        }

        self.inner
            .repos
            .write()
            .insert((owner.to_string(), name.to_string()), repo);
        Ok(())
    }

    /// remove all storage for a repository; idempotent on already-deleted
    pub fn delete_repository(&self, owner: &str, name: &str) -> EngineResult<()> {
        validate_slug(owner)?;
        validate_slug(name)?;

        self.inner
            .repos
            .write()
            .remove(&(owner.to_string(), name.to_string()));

        match fs::remove_dir_all(self.repo_dir(owner, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// copy a repository's entire storage (objects and refs) under a new
    /// owner/name; the histories share no state afterwards
    pub fn fork_repository(
        &self,
        source_owner: &str,
        source_name: &str,
        target_owner: &str,
        target_name: &str,
    ) -> EngineResult<()> {
        // also validates the source slugs and confirms the source exists
        self.repo(source_owner, source_name)?;
        validate_slug(target_owner)?;
        validate_slug(target_name)?;

        let target_dir = self.repo_dir(target_owner, target_name);
        if target_dir.exists() {
            return Err(EngineError::RepositoryExists {
                owner: target_owner.to_string(),
                name: target_name.to_string(),
            });
        }
        copy_dir(&self.repo_dir(source_owner, source_name), &target_dir)?;
        Ok(())
    }

    // ==================== Write Side ====================

    /// write an upload batch as one commit.
    ///
    /// Files failing validation are reported in the outcome's error list and
    /// do not abort the rest of the batch; housekeeping paths (`.git/`,
    /// `node_modules/`, OS droppings) are skipped silently. If nothing
    /// survives, no commit is created and the branch is untouched.
    pub fn commit_files(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        uploads: Vec<FileUpload>,
        message: &str,
        author: &Signature,
    ) -> EngineResult<CommitOutcome> {
        let repo = self.repo(owner, name)?;
        let branch = BranchName::new(branch)?;

        if uploads.len() > self.inner.config.max_batch_files {
            return Err(EngineError::BatchTooLarge {
                count: uploads.len(),
                max: self.inner.config.max_batch_files,
            });
        }

        let mut accepted: Vec<(RepoPath, Vec<u8>)> = Vec::new();
        let mut errors = Vec::new();

        for upload in uploads {
            if is_ignored_path(&upload.path) {
                debug!("skipping housekeeping path {:?}", upload.path);
                continue;
            }
            let path = match RepoPath::new(upload.path.clone()) {
                Ok(p) => p,
                Err(e) => {
                    errors.push(FileError {
                        path: upload.path,
                        reason: format!("invalid path: {}", e),
                    });
                    continue;
                }
            };
            if upload.content.contains(&0) {
                errors.push(FileError {
                    path: path.into_string(),
                    reason: "skipped binary file".to_string(),
                });
                continue;
            }
            if upload.content.len() as u64 > self.inner.config.max_file_size {
                errors.push(FileError {
                    path: path.into_string(),
                    reason: format!(
                        "file is {} bytes, limit is {}",
                        upload.content.len(),
                        self.inner.config.max_file_size
                    ),
                });
                continue;
            }
            accepted.push((path, upload.content));
        }

        if accepted.is_empty() {
            warn!(
                "upload to {}/{} rejected every file ({} errors)",
                owner,
                name,
                errors.len()
            );
            return Err(EngineError::NothingToCommit { errors });
        }

        let message = if message.is_empty() {
            format!("Upload {} file(s)", accepted.len())
        } else {
            message.to_string()
        };
        let files: Vec<String> = accepted.iter().map(|(p, _)| p.to_string()).collect();
        let commit = repo.commit_files(&branch, accepted, &message, author)?;

        Ok(CommitOutcome {
            commit,
            files,
            errors,
        })
    }

    /// remove one file as a commit
    pub fn delete_file(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        path: &str,
        message: &str,
        author: &Signature,
    ) -> EngineResult<CommitId> {
        let repo = self.repo(owner, name)?;
        let branch = BranchName::new(branch)?;
        let path = RepoPath::new(path)?;
        Ok(repo.remove_path(&branch, path, message, author)?)
    }

    // ==================== Read Side ====================

    /// list a directory at a branch or commit digest (`""` for the root)
    pub fn list_tree(
        &self,
        owner: &str,
        name: &str,
        rev: &str,
        path: &str,
    ) -> EngineResult<Vec<FileEntry>> {
        Ok(self.repo(owner, name)?.list_tree(rev, path)?)
    }

    /// fetch a file's text content at a branch or commit digest
    pub fn get_file(
        &self,
        owner: &str,
        name: &str,
        rev: &str,
        path: &str,
    ) -> EngineResult<FileContent> {
        let repo = self.repo(owner, name)?;
        let path = RepoPath::new(path)?;
        Ok(repo.read_file(rev, &path)?)
    }

    /// commit history, newest first
    pub fn log(
        &self,
        owner: &str,
        name: &str,
        rev: &str,
        limit: Option<usize>,
    ) -> EngineResult<Vec<CommitInfo>> {
        let repo = self.repo(owner, name)?;
        Ok(repo.log(rev, limit.unwrap_or(DEFAULT_LOG_LIMIT))?)
    }

    /// number of commits reachable from a branch or commit digest
    pub fn commit_count(&self, owner: &str, name: &str, rev: &str) -> EngineResult<usize> {
        Ok(self.repo(owner, name)?.commit_count(rev)?)
    }

    /// all branches with their heads, the default flagged
    pub fn list_branches(&self, owner: &str, name: &str) -> EngineResult<Vec<BranchInfo>> {
        Ok(self.repo(owner, name)?.list_branches()?)
    }

    /// create a branch at `start_point` (a branch or commit digest), or at
    /// the default branch's head when omitted
    pub fn create_branch(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        start_point: Option<&str>,
    ) -> EngineResult<()> {
        let repo = self.repo(owner, name)?;
        let branch = BranchName::new(branch)?;

        let rev = match start_point {
            Some(rev) => rev.to_string(),
            None => repo.default_branch()?.as_str().to_string(),
        };
        let at = repo
            .resolve_rev(&rev)?
            .commit()
            .ok_or_else(|| EngineError::EmptyRepository {
                owner: owner.to_string(),
                name: name.to_string(),
            })?;
        Ok(repo.create_branch(&branch, at)?)
    }

    /// delete a branch; the default branch is protected
    pub fn delete_branch(&self, owner: &str, name: &str, branch: &str) -> EngineResult<()> {
        let repo = self.repo(owner, name)?;
        Ok(repo.delete_branch(&BranchName::new(branch)?)?)
    }
}

/// owner and repository names become path components; keep them boring
fn validate_slug(value: &str) -> Result<(), InvalidNameError> {
    if value.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if value.len() > 64 {
        return Err(InvalidNameError::TooLong(value.len()));
    }
    for (i, c) in value.chars().enumerate() {
        let ok = c.is_ascii_alphanumeric() || c == '-' || c == '_' || (c == '.' && i > 0);
        if !ok {
            return Err(InvalidNameError::InvalidCharacter { ch: c, position: i });
        }
    }
    Ok(())
}

/// housekeeping paths uploads carry along; dropped without an error entry
fn is_ignored_path(path: &str) -> bool {
    let path = path.replace('\\', "/");
    path.starts_with(".git/")
        || path.contains("/.git/")
        || path.starts_with("node_modules/")
        || path.contains("/node_modules/")
        || path.ends_with(".DS_Store")
        || path.ends_with("Thumbs.db")
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        // in-flight temp files are not part of the repository
        if file_name.to_string_lossy().starts_with(".tmp") {
            continue;
        }
        let target = dst.join(&file_name);
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path().join("repositories")).unwrap();
        (dir, engine)
    }

    fn sig() -> Signature {
        Signature::new("Alice", "alice@example.com")
    }

    fn seeded(engine: &Engine) {
        engine
            .init_repository(
                "alice",
                "project",
                None,
                SeedFiles {
                    readme: Some("# project".to_string()),
                    gitignore: Some("target/".to_string()),
                    license: Some("MIT".to_string()),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_init_without_seed_leaves_branch_unborn() {
        let (_dir, engine) = setup();
        engine
            .init_repository("alice", "empty", None, SeedFiles::default())
            .unwrap();

        let branches = engine.list_branches("alice", "empty").unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name.as_str(), "main");
        assert!(branches[0].is_default);
        assert_eq!(branches[0].head, None);

        assert!(engine.list_tree("alice", "empty", "main", "").unwrap().is_empty());
        assert!(engine.log("alice", "empty", "main", None).unwrap().is_empty());
    }

    #[test]
    fn test_init_with_seed_creates_initial_commit() {
        let (_dir, engine) = setup();
        seeded(&engine);

        let log = engine.log("alice", "project", "main", None).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].summary(), "Initial commit");
        assert_eq!(log[0].author.name, "alice");
        assert_eq!(log[0].author.email, "alice@localhost");

        let names: Vec<String> = engine
            .list_tree("alice", "project", "main", "")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".gitignore", "LICENSE", "README.md"]);
    }

    #[test]
    fn test_init_duplicate_fails() {
        let (_dir, engine) = setup();
        seeded(&engine);
        let err = engine
            .init_repository("alice", "project", None, SeedFiles::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::RepositoryExists { .. }));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_custom_default_branch() {
        let (_dir, engine) = setup();
        engine
            .init_repository("alice", "trunked", Some("trunk"), SeedFiles::default())
            .unwrap();

        let branches = engine.list_branches("alice", "trunked").unwrap();
        assert_eq!(branches[0].name.as_str(), "trunk");
        assert!(branches[0].is_default);
    }

    #[test]
    fn test_delete_repository_is_idempotent() {
        let (_dir, engine) = setup();
        seeded(&engine);

        engine.delete_repository("alice", "project").unwrap();
        let err = engine.log("alice", "project", "main", None).unwrap_err();
        assert!(matches!(err, EngineError::RepositoryNotFound { .. }));
        assert!(err.is_not_found());

        // second delete is a no-op
        engine.delete_repository("alice", "project").unwrap();
    }

    #[test]
    fn test_unknown_repository() {
        let (_dir, engine) = setup();
        let err = engine.list_branches("nobody", "nothing").unwrap_err();
        assert!(matches!(err, EngineError::RepositoryNotFound { .. }));
    }

    #[test]
    fn test_slug_validation() {
        let (_dir, engine) = setup();
        for bad in ["", "a/b", "..", "a b", ".hidden", &"x".repeat(65)] {
            let err = engine
                .init_repository(bad, "repo", None, SeedFiles::default())
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidName(_)), "slug {:?}", bad);
        }
    }

    #[test]
    fn test_upload_commits_batch() {
        let (_dir, engine) = setup();
        seeded(&engine);

        let outcome = engine
            .commit_files(
                "alice",
                "project",
                "main",
                vec![
                    FileUpload::new("src/main.rs", "fn main() {}"),
                    FileUpload::new("docs\\guide.md", "# guide"),
                ],
                "Add sources",
                &sig(),
            )
            .unwrap();

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.files, vec!["src/main.rs", "docs/guide.md"]);

        let content = engine
            .get_file("alice", "project", "main", "docs/guide.md")
            .unwrap();
        assert_eq!(content.content, "# guide");
        assert_eq!(engine.commit_count("alice", "project", "main").unwrap(), 2);
    }

    #[test]
    fn test_binary_files_are_reported_not_fatal() {
        let (_dir, engine) = setup();
        seeded(&engine);
        let before = engine.log("alice", "project", "main", None).unwrap()[0].id;

        let outcome = engine
            .commit_files(
                "alice",
                "project",
                "main",
                vec![
                    FileUpload::new("ok1.txt", "text"),
                    FileUpload::new("logo.png", vec![0x89u8, 0x50, 0x00, 0x47]),
                    FileUpload::new("ok2.txt", "more text"),
                ],
                "mixed upload",
                &sig(),
            )
            .unwrap();

        assert_eq!(outcome.files, vec!["ok1.txt", "ok2.txt"]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].path, "logo.png");
        assert!(outcome.errors[0].reason.contains("binary"));

        // the head still advanced past the pre-upload commit
        let log = engine.log("alice", "project", "main", None).unwrap();
        assert_eq!(log[0].id, outcome.commit);
        assert_eq!(log[1].id, before);

        let names: Vec<String> = engine
            .list_tree("alice", "project", "main", "")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.contains(&"ok1.txt".to_string()));
        assert!(!names.contains(&"logo.png".to_string()));
    }

    #[test]
    fn test_all_rejected_leaves_branch_untouched() {
        let (_dir, engine) = setup();
        seeded(&engine);
        let before = engine.log("alice", "project", "main", None).unwrap()[0].id;

        let err = engine
            .commit_files(
                "alice",
                "project",
                "main",
                vec![FileUpload::new("bin.dat", vec![0u8, 1, 2])],
                "only binary",
                &sig(),
            )
            .unwrap_err();

        match err {
            EngineError::NothingToCommit { errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].path, "bin.dat");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            engine.log("alice", "project", "main", None).unwrap()[0].id,
            before
        );
    }

    #[test]
    fn test_housekeeping_paths_skipped_silently() {
        let (_dir, engine) = setup();
        seeded(&engine);

        let outcome = engine
            .commit_files(
                "alice",
                "project",
                "main",
                vec![
                    FileUpload::new("real.txt", "content"),
                    FileUpload::new(".git/config", "core"),
                    FileUpload::new("vendor/node_modules/x.js", "js"),
                    FileUpload::new("sub/.DS_Store", "junk"),
                ],
                "upload",
                &sig(),
            )
            .unwrap();

        assert_eq!(outcome.files, vec!["real.txt"]);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_invalid_and_oversized_paths_reported() {
        let (_dir, engine) = setup();
        seeded(&engine);
        let small = Engine::new(
            EngineConfig::new(engine.inner.config.root.clone()).max_file_size(4),
        )
        .unwrap();

        let outcome = small
            .commit_files(
                "alice",
                "project",
                "main",
                vec![
                    FileUpload::new("ok.txt", "ok"),
                    FileUpload::new("../escape.txt", "x"),
                    FileUpload::new("big.txt", "too large"),
                ],
                "upload",
                &sig(),
            )
            .unwrap();

        assert_eq!(outcome.files, vec!["ok.txt"]);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors[0].reason.contains("invalid path"));
        assert!(outcome.errors[1].reason.contains("limit"));
    }

    #[test]
    fn test_batch_cap() {
        let (_dir, engine) = setup();
        seeded(&engine);

        let uploads: Vec<FileUpload> = (0..MAX_BATCH_FILES + 1)
            .map(|i| FileUpload::new(format!("f{}.txt", i), "x"))
            .collect();
        let err = engine
            .commit_files("alice", "project", "main", uploads, "too many", &sig())
            .unwrap_err();
        assert!(matches!(err, EngineError::BatchTooLarge { .. }));
    }

    #[test]
    fn test_default_commit_message() {
        let (_dir, engine) = setup();
        seeded(&engine);

        engine
            .commit_files(
                "alice",
                "project",
                "main",
                vec![FileUpload::new("a.txt", "a"), FileUpload::new("b.txt", "b")],
                "",
                &sig(),
            )
            .unwrap();

        let log = engine.log("alice", "project", "main", None).unwrap();
        assert_eq!(log[0].summary(), "Upload 2 file(s)");
    }

    #[test]
    fn test_delete_file() {
        let (_dir, engine) = setup();
        seeded(&engine);

        engine
            .delete_file("alice", "project", "main", "LICENSE", "Drop license", &sig())
            .unwrap();

        let names: Vec<String> = engine
            .list_tree("alice", "project", "main", "")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".gitignore", "README.md"]);
    }

    #[test]
    fn test_fork_copies_history_then_diverges() {
        let (_dir, engine) = setup();
        seeded(&engine);

        engine
            .fork_repository("alice", "project", "bob", "project")
            .unwrap();

        let source_head = engine.log("alice", "project", "main", None).unwrap()[0].id;
        let fork_head = engine.log("bob", "project", "main", None).unwrap()[0].id;
        assert_eq!(source_head, fork_head);

        let readme = engine.get_file("bob", "project", "main", "README.md").unwrap();
        assert_eq!(readme.content, "# project");

        // committing to the fork must not move the source
        engine
            .commit_files(
                "bob",
                "project",
                "main",
                vec![FileUpload::new("fork.txt", "mine")],
                "fork work",
                &Signature::new("Bob", "bob@example.com"),
            )
            .unwrap();
        assert_eq!(
            engine.log("alice", "project", "main", None).unwrap()[0].id,
            source_head
        );
    }

    #[test]
    fn test_fork_onto_existing_repo_fails() {
        let (_dir, engine) = setup();
        seeded(&engine);
        engine
            .init_repository("bob", "project", None, SeedFiles::default())
            .unwrap();

        let err = engine
            .fork_repository("alice", "project", "bob", "project")
            .unwrap_err();
        assert!(matches!(err, EngineError::RepositoryExists { .. }));
    }

    #[test]
    fn test_branch_management() {
        let (_dir, engine) = setup();
        seeded(&engine);

        engine
            .create_branch("alice", "project", "feature/x", None)
            .unwrap();
        let branches = engine.list_branches("alice", "project").unwrap();
        let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["feature/x", "main"]);

        // branch from an explicit start point
        let head = engine.log("alice", "project", "main", None).unwrap()[0].id;
        engine
            .create_branch("alice", "project", "pinned", Some(&head.to_string()))
            .unwrap();

        engine.delete_branch("alice", "project", "feature/x").unwrap();
        engine.delete_branch("alice", "project", "pinned").unwrap();
        assert_eq!(engine.list_branches("alice", "project").unwrap().len(), 1);
    }

    #[test]
    fn test_branching_an_empty_repository_fails() {
        let (_dir, engine) = setup();
        engine
            .init_repository("alice", "empty", None, SeedFiles::default())
            .unwrap();

        let err = engine
            .create_branch("alice", "empty", "feature", None)
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyRepository { .. }));
    }

    #[test]
    fn test_log_default_limit() {
        let (_dir, engine) = setup();
        seeded(&engine);

        for i in 0..DEFAULT_LOG_LIMIT + 5 {
            engine
                .commit_files(
                    "alice",
                    "project",
                    "main",
                    vec![FileUpload::new("counter.txt", i.to_string())],
                    &format!("commit {}", i),
                    &sig(),
                )
                .unwrap();
        }

        assert_eq!(
            engine.log("alice", "project", "main", None).unwrap().len(),
            DEFAULT_LOG_LIMIT
        );
        assert_eq!(
            engine
                .log("alice", "project", "main", Some(3))
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_file_entry_wire_shape() {
        let (_dir, engine) = setup();
        seeded(&engine);

        let listing = engine.list_tree("alice", "project", "main", "").unwrap();
        let json = serde_json::to_value(&listing[0]).unwrap();

        assert_eq!(json["name"], ".gitignore");
        assert_eq!(json["type"], "file");
        assert!(json["digest"].as_str().unwrap().len() == 64);
        assert!(json["size"].as_u64().is_some());
    }
}

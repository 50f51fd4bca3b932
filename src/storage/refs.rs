//! Branch references and their compare-and-swap updates.
//!
//! Each branch is one file under `refs/heads/` holding a commit digest in
//! hex. `HEAD` holds `ref: refs/heads/<name>` and records the default
//! branch. A branch with no ref file has never been committed to; only the
//! default branch can be in that *unborn* state, since it is the only branch
//! declared before its first commit.
//!
//! The compare-and-swap is the single point of mutual exclusion in the
//! engine: the read-compare-write runs under a per-branch mutex, and the
//! write itself is a temp file plus atomic rename so a reader never sees a
//! torn ref. Two concurrent committers to one branch serialize here; one
//! wins, the other observes [`StorageError::WriteConflict`] and retries
//! against the new head.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId, Digest};

const HEAD_FILE: &str = "HEAD";
const HEADS_DIR: &str = "refs/heads";
const HEAD_REF_PREFIX: &str = "ref: refs/heads/";

/// where a branch currently points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Head {
    /// the branch points at this commit
    Commit(CommitId),
    /// the branch exists but has never been committed to
    Unborn,
}

impl Head {
    /// the commit, if the branch has one
    pub fn commit(&self) -> Option<CommitId> {
        match self {
            Head::Commit(id) => Some(*id),
            Head::Unborn => None,
        }
    }

    /// whether the branch has never been committed to
    pub fn is_unborn(&self) -> bool {
        matches!(self, Head::Unborn)
    }
}

/// branch storage for one repository.
///
/// Clone this to share across threads; the per-branch lock registry is
/// shared through the `Arc`, which is what makes the CAS effective across
/// every handle in the process.
#[derive(Clone, Debug)]
pub struct RefStore {
    inner: Arc<RefStoreInner>,
}

#[derive(Debug)]
struct RefStoreInner {
    repo_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RefStore {
    /// create the ref namespace and declare the default branch
    pub fn init(repo_dir: &Path, default_branch: &BranchName) -> StorageResult<Self> {
        fs::create_dir_all(repo_dir.join(HEADS_DIR))?;
        fs::write(
            repo_dir.join(HEAD_FILE),
            format!("{}{}\n", HEAD_REF_PREFIX, default_branch),
        )?;
        Ok(Self::handle(repo_dir))
    }

    /// open the ref namespace of an existing repository
    pub fn open(repo_dir: &Path) -> StorageResult<Self> {
        if !repo_dir.join(HEAD_FILE).is_file() {
            return Err(StorageError::NotInitialized(repo_dir.to_path_buf()));
        }
        Ok(Self::handle(repo_dir))
    }

    fn handle(repo_dir: &Path) -> Self {
        Self {
            inner: Arc::new(RefStoreInner {
                repo_dir: repo_dir.to_path_buf(),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// the branch `HEAD` declares as default
    pub fn default_branch(&self) -> StorageResult<BranchName> {
        let text = fs::read_to_string(self.inner.repo_dir.join(HEAD_FILE))?;
        let name = text
            .trim_end()
            .strip_prefix(HEAD_REF_PREFIX)
            .ok_or_else(|| StorageError::CorruptObject {
                id: HEAD_FILE.to_string(),
                reason: format!("malformed head reference: {:?}", text.trim_end()),
            })?;
        BranchName::new(name).map_err(StorageError::from)
    }

    fn ref_path(&self, branch: &BranchName) -> PathBuf {
        self.inner.repo_dir.join(HEADS_DIR).join(branch.as_str())
    }

    fn branch_lock(&self, branch: &BranchName) -> Arc<Mutex<()>> {
        let mut locks = self.inner.locks.lock();
        locks
            .entry(branch.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// read the ref file; `None` when the branch has no ref file
    fn read_ref(&self, branch: &BranchName) -> StorageResult<Option<CommitId>> {
        let text = match fs::read_to_string(self.ref_path(branch)) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let digest =
            Digest::from_hex(text.trim_end()).map_err(|e| StorageError::CorruptObject {
                id: branch.as_ref_path(),
                reason: e.to_string(),
            })?;
        Ok(Some(CommitId::new(digest)))
    }

    fn write_ref(&self, branch: &BranchName, id: CommitId) -> StorageResult<()> {
        let path = self.ref_path(branch);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // temp file lives outside refs/heads so an in-flight write never
        // shows up in list()
        let mut tmp = NamedTempFile::new_in(&self.inner.repo_dir)?;
        writeln!(tmp, "{}", id)?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    /// current commit for a branch, or [`Head::Unborn`] for the default
    /// branch before its first commit. Unknown branch names are NotFound.
    pub fn resolve(&self, branch: &BranchName) -> StorageResult<Head> {
        match self.read_ref(branch)? {
            Some(id) => Ok(Head::Commit(id)),
            None => {
                if *branch == self.default_branch()? {
                    Ok(Head::Unborn)
                } else {
                    Err(StorageError::RefNotFound(branch.to_string()))
                }
            }
        }
    }

    /// whether a branch has a ref file
    pub fn exists(&self, branch: &BranchName) -> bool {
        self.ref_path(branch).is_file()
    }

    /// atomically move `branch` from `expected` to `new`.
    ///
    /// Fails with [`StorageError::WriteConflict`] when the branch no longer
    /// points at `expected`; nothing is written in that case.
    pub fn compare_and_swap(
        &self,
        branch: &BranchName,
        expected: Head,
        new: CommitId,
    ) -> StorageResult<()> {
        let lock = self.branch_lock(branch);
        let _guard = lock.lock();

        let current = match self.read_ref(branch)? {
            Some(id) => Head::Commit(id),
            None => Head::Unborn,
        };
        if current != expected {
            return Err(StorageError::WriteConflict {
                branch: branch.to_string(),
            });
        }
        self.write_ref(branch, new)
    }

    /// all branches with a ref file, sorted by name
    pub fn list(&self) -> StorageResult<Vec<BranchName>> {
        let heads = self.inner.repo_dir.join(HEADS_DIR);
        let mut names = Vec::new();
        collect_refs(&heads, String::new(), &mut names)?;
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(names)
    }

    /// create a new branch pointing at `at`
    pub fn create(&self, branch: &BranchName, at: CommitId) -> StorageResult<()> {
        let lock = self.branch_lock(branch);
        let _guard = lock.lock();

        if self.exists(branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }
        self.write_ref(branch, at)
    }

    /// delete a branch; the default branch is protected
    pub fn delete(&self, branch: &BranchName) -> StorageResult<()> {
        if *branch == self.default_branch()? {
            return Err(StorageError::ProtectedBranch(branch.to_string()));
        }
        let lock = self.branch_lock(branch);
        let _guard = lock.lock();

        match fs::remove_file(self.ref_path(branch)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::RefNotFound(branch.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn collect_refs(dir: &Path, prefix: String, out: &mut Vec<BranchName>) -> StorageResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let qualified = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        if entry.file_type()?.is_dir() {
            collect_refs(&entry.path(), qualified, out)?;
        } else if let Ok(branch) = BranchName::new(qualified) {
            out.push(branch);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object::{object_digest, Kind};
    use tempfile::TempDir;

    fn commit_id(token: &[u8]) -> CommitId {
        CommitId::new(object_digest(Kind::Commit, token))
    }

    fn setup() -> (TempDir, RefStore) {
        let dir = TempDir::new().unwrap();
        let refs = RefStore::init(dir.path(), &BranchName::main()).unwrap();
        (dir, refs)
    }

    #[test]
    fn test_default_branch_starts_unborn() {
        let (_dir, refs) = setup();
        assert_eq!(refs.default_branch().unwrap(), BranchName::main());
        assert!(refs.resolve(&BranchName::main()).unwrap().is_unborn());
    }

    #[test]
    fn test_unknown_branch_is_not_found() {
        let (_dir, refs) = setup();
        let err = refs.resolve(&BranchName::new("nope").unwrap()).unwrap_err();
        assert!(matches!(err, StorageError::RefNotFound(_)));
    }

    #[test]
    fn test_first_commit_via_cas() {
        let (_dir, refs) = setup();
        let main = BranchName::main();
        let c1 = commit_id(b"c1");

        refs.compare_and_swap(&main, Head::Unborn, c1).unwrap();
        assert_eq!(refs.resolve(&main).unwrap(), Head::Commit(c1));
    }

    #[test]
    fn test_cas_detects_stale_expected() {
        let (_dir, refs) = setup();
        let main = BranchName::main();
        let c1 = commit_id(b"c1");
        let c2 = commit_id(b"c2");

        refs.compare_and_swap(&main, Head::Unborn, c1).unwrap();

        // a concurrent writer already moved the branch
        let err = refs.compare_and_swap(&main, Head::Unborn, c2).unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict { .. }));

        // ref unchanged after the failed swap
        assert_eq!(refs.resolve(&main).unwrap(), Head::Commit(c1));

        refs.compare_and_swap(&main, Head::Commit(c1), c2).unwrap();
        assert_eq!(refs.resolve(&main).unwrap(), Head::Commit(c2));
    }

    #[test]
    fn test_branch_lifecycle() {
        let (_dir, refs) = setup();
        let feature = BranchName::new("feature/login").unwrap();
        let c1 = commit_id(b"c1");

        refs.create(&feature, c1).unwrap();
        assert!(refs.exists(&feature));
        assert_eq!(refs.resolve(&feature).unwrap(), Head::Commit(c1));

        let err = refs.create(&feature, c1).unwrap_err();
        assert!(matches!(err, StorageError::BranchAlreadyExists(_)));

        refs.delete(&feature).unwrap();
        assert!(!refs.exists(&feature));
        let err = refs.delete(&feature).unwrap_err();
        assert!(matches!(err, StorageError::RefNotFound(_)));
    }

    #[test]
    fn test_list_includes_nested_names() {
        let (_dir, refs) = setup();
        let c1 = commit_id(b"c1");

        refs.compare_and_swap(&BranchName::main(), Head::Unborn, c1)
            .unwrap();
        refs.create(&BranchName::new("feature/a").unwrap(), c1).unwrap();
        refs.create(&BranchName::new("feature/b").unwrap(), c1).unwrap();

        let names: Vec<String> = refs
            .list()
            .unwrap()
            .into_iter()
            .map(|b| b.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["feature/a", "feature/b", "main"]);
    }

    #[test]
    fn test_default_branch_is_protected() {
        let (_dir, refs) = setup();
        let err = refs.delete(&BranchName::main()).unwrap_err();
        assert!(matches!(err, StorageError::ProtectedBranch(_)));
    }

    #[test]
    fn test_concurrent_cas_single_winner() {
        let (_dir, refs) = setup();
        let main = BranchName::main();
        let base = commit_id(b"base");
        refs.compare_and_swap(&main, Head::Unborn, base).unwrap();

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let refs = refs.clone();
            let main = main.clone();
            handles.push(std::thread::spawn(move || {
                refs.compare_and_swap(&main, Head::Commit(base), commit_id(&[i]))
            }));
        }

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(outcomes
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(StorageError::WriteConflict { .. }))));
    }
}

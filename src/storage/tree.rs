//! Tree construction: applying a batch of path changes to a root tree.
//!
//! [`TreeBuilder::apply`] is a pure function from an old root digest and a
//! batch to a new root digest. It groups the batch by leading path segment,
//! recurses
//! into the matching subtree for each group, stores blobs at the leaves, and
//! reassembles each level's entry list bottom-up. Entries not touched by the
//! batch are carried over by digest without being read.
//!
//! Name-collision policy: an upsert replaces whatever currently holds the
//! name. Writing `a/b.txt` where `a` is a file discards the file and builds
//! a directory; writing `a` where `a` is a directory discards the directory.
//! No merge is attempted.

use std::collections::BTreeMap;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object::{EntryTarget, TreeEntry};
use crate::storage::store::ObjectStore;
use crate::storage::types::{RepoPath, TreeId};

/// one element of a commit batch
#[derive(Debug, Clone)]
pub enum Change {
    /// create or replace the file at `path`
    Upsert { path: RepoPath, content: Vec<u8> },
    /// remove the entry at `path`
    Remove { path: RepoPath },
}

impl Change {
    fn path(&self) -> &RepoPath {
        match self {
            Change::Upsert { path, .. } | Change::Remove { path } => path,
        }
    }
}

/// rebuilds tree objects from batches of changes
pub struct TreeBuilder<'a> {
    store: &'a ObjectStore,
}

struct PathOp<'a> {
    /// path segments not yet consumed by the recursion
    remaining: &'a [&'a str],
    full: &'a RepoPath,
    op: &'a Change,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a ObjectStore) -> Self {
        Self { store }
    }

    /// apply `changes` on top of `root` (`None` for a fresh repository) and
    /// return the digest of the new root tree
    pub fn apply(&self, root: Option<TreeId>, changes: &[Change]) -> StorageResult<TreeId> {
        let segment_lists: Vec<Vec<&str>> = changes
            .iter()
            .map(|c| c.path().segments().collect())
            .collect();
        let ops: Vec<PathOp<'_>> = changes
            .iter()
            .zip(segment_lists.iter())
            .map(|(change, segments)| PathOp {
                remaining: segments.as_slice(),
                full: change.path(),
                op: change,
            })
            .collect();

        match self.apply_level(root, ops)? {
            Some(id) => Ok(id),
            None => self.store.put_tree(&[]),
        }
    }

    /// rebuild one directory level; `None` means the level ended up empty
    /// and the parent should drop its entry
    fn apply_level(
        &self,
        base: Option<TreeId>,
        ops: Vec<PathOp<'_>>,
    ) -> StorageResult<Option<TreeId>> {
        let mut entries: BTreeMap<String, TreeEntry> = match base {
            Some(id) => self
                .store
                .get_tree(id)?
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
            None => BTreeMap::new(),
        };

        let mut groups: BTreeMap<&str, Vec<PathOp<'_>>> = BTreeMap::new();
        for op in ops {
            let (first, rest) = match op.remaining.split_first() {
                Some(split) => split,
                None => continue, // RepoPath guarantees at least one segment
            };
            groups.entry(*first).or_default().push(PathOp {
                remaining: rest,
                full: op.full,
                op: op.op,
            });
        }

        for (name, group) in groups {
            let (deeper, leaves): (Vec<_>, Vec<_>) =
                group.into_iter().partition(|op| !op.remaining.is_empty());

            if !deeper.is_empty() {
                // recurse into the existing subtree, or an empty one if the
                // name is absent or currently a file
                let child_base = match entries.get(name).map(|e| &e.target) {
                    Some(EntryTarget::Tree(id)) => Some(*id),
                    _ => {
                        if deeper
                            .iter()
                            .any(|op| matches!(op.op, Change::Remove { .. }))
                        {
                            let missing = deeper
                                .iter()
                                .find(|op| matches!(op.op, Change::Remove { .. }))
                                .map(|op| op.full.to_string())
                                .unwrap_or_else(|| name.to_string());
                            return Err(StorageError::PathNotFound(missing));
                        }
                        None
                    }
                };
                match self.apply_level(child_base, deeper)? {
                    Some(child_id) => {
                        entries.insert(
                            name.to_string(),
                            TreeEntry::new(name, EntryTarget::Tree(child_id))?,
                        );
                    }
                    None => {
                        entries.remove(name);
                    }
                }
            }

            for leaf in leaves {
                match leaf.op {
                    Change::Upsert { content, .. } => {
                        let blob = self.store.put_blob(content)?;
                        entries.insert(
                            name.to_string(),
                            TreeEntry::new(name, EntryTarget::Blob(blob))?,
                        );
                    }
                    Change::Remove { .. } => {
                        if entries.remove(name).is_none() {
                            return Err(StorageError::PathNotFound(leaf.full.to_string()));
                        }
                    }
                }
            }
        }

        if entries.is_empty() {
            return Ok(None);
        }
        let collected: Vec<TreeEntry> = entries.into_values().collect();
        self.store.put_tree(&collected).map(Some)
    }
}

/// walk from `root` to the entry named by `path`
pub fn entry_at_path(
    store: &ObjectStore,
    root: TreeId,
    path: &RepoPath,
) -> StorageResult<TreeEntry> {
    let segments: Vec<&str> = path.segments().collect();
    let mut current = root;

    for (i, segment) in segments.iter().enumerate() {
        let entries = store.get_tree(current)?;
        let entry = entries
            .into_iter()
            .find(|e| e.name == *segment)
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))?;

        if i + 1 == segments.len() {
            return Ok(entry);
        }
        match entry.target {
            EntryTarget::Tree(id) => current = id,
            EntryTarget::Blob(_) => {
                return Err(StorageError::PathNotFound(path.to_string()));
            }
        }
    }
    Err(StorageError::PathNotFound(path.to_string()))
}

/// resolve the subtree at `path` (`None` for the root itself)
pub fn subtree_at(
    store: &ObjectStore,
    root: TreeId,
    path: Option<&RepoPath>,
) -> StorageResult<TreeId> {
    let path = match path {
        None => return Ok(root),
        Some(p) => p,
    };
    let entry = entry_at_path(store, root, path)?;
    match entry.target {
        EntryTarget::Tree(id) => Ok(id),
        EntryTarget::Blob(_) => Err(StorageError::UnexpectedEntryType {
            path: path.to_string(),
            expected: "tree",
            found: "blob",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();
        (dir, store)
    }

    fn upsert(path: &str, content: &str) -> Change {
        Change::Upsert {
            path: RepoPath::new(path).unwrap(),
            content: content.as_bytes().to_vec(),
        }
    }

    fn remove(path: &str) -> Change {
        Change::Remove {
            path: RepoPath::new(path).unwrap(),
        }
    }

    #[test]
    fn test_apply_to_empty_root() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let root = builder
            .apply(None, &[upsert("README.md", "# hi"), upsert("src/lib.rs", "fn x() {}")])
            .unwrap();

        let entries = store.get_tree(root).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "README.md");
        assert_eq!(entries[1].name, "src");
        assert!(entries[1].is_dir());
    }

    #[test]
    fn test_untouched_entries_carried_over() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let v1 = builder
            .apply(None, &[upsert("a.txt", "a"), upsert("b.txt", "b")])
            .unwrap();
        let v2 = builder.apply(Some(v1), &[upsert("b.txt", "B")]).unwrap();

        let e1 = store.get_tree(v1).unwrap();
        let e2 = store.get_tree(v2).unwrap();
        // a.txt carried over by digest, b.txt replaced
        assert_eq!(e1[0], e2[0]);
        assert_ne!(e1[1], e2[1]);
    }

    #[test]
    fn test_apply_is_deterministic_across_batch_order() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let fwd = builder
            .apply(None, &[upsert("x/a.txt", "1"), upsert("y/b.txt", "2")])
            .unwrap();
        let rev = builder
            .apply(None, &[upsert("y/b.txt", "2"), upsert("x/a.txt", "1")])
            .unwrap();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn test_deep_nesting() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let root = builder
            .apply(None, &[upsert("a/b/c/d.txt", "deep")])
            .unwrap();

        let path = RepoPath::new("a/b/c/d.txt").unwrap();
        let entry = entry_at_path(&store, root, &path).unwrap();
        match entry.target {
            EntryTarget::Blob(id) => assert_eq!(store.get_blob(id).unwrap(), b"deep"),
            EntryTarget::Tree(_) => panic!("expected blob"),
        }
    }

    #[test]
    fn test_file_replaced_by_directory() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let v1 = builder.apply(None, &[upsert("a", "file")]).unwrap();
        let v2 = builder.apply(Some(v1), &[upsert("a/b.txt", "nested")]).unwrap();

        let entries = store.get_tree(v2).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir());
    }

    #[test]
    fn test_directory_replaced_by_file() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let v1 = builder.apply(None, &[upsert("a/b.txt", "nested")]).unwrap();
        let v2 = builder.apply(Some(v1), &[upsert("a", "flat")]).unwrap();

        let entries = store.get_tree(v2).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_dir());
    }

    #[test]
    fn test_remove_file() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let v1 = builder
            .apply(None, &[upsert("keep.txt", "k"), upsert("drop.txt", "d")])
            .unwrap();
        let v2 = builder.apply(Some(v1), &[remove("drop.txt")]).unwrap();

        let entries = store.get_tree(v2).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "keep.txt");
    }

    #[test]
    fn test_removing_last_file_prunes_directory() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let v1 = builder
            .apply(None, &[upsert("top.txt", "t"), upsert("a/b/only.txt", "x")])
            .unwrap();
        let v2 = builder.apply(Some(v1), &[remove("a/b/only.txt")]).unwrap();

        let entries = store.get_tree(v2).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "top.txt");
    }

    #[test]
    fn test_remove_missing_path_fails() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let v1 = builder.apply(None, &[upsert("a.txt", "a")]).unwrap();
        let err = builder.apply(Some(v1), &[remove("missing.txt")]).unwrap_err();
        assert!(matches!(err, StorageError::PathNotFound(_)));

        let err = builder.apply(Some(v1), &[remove("no/such/dir.txt")]).unwrap_err();
        assert!(matches!(err, StorageError::PathNotFound(_)));
    }

    #[test]
    fn test_walk_through_file_is_not_found() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let root = builder.apply(None, &[upsert("a", "file")]).unwrap();
        let path = RepoPath::new("a/b").unwrap();
        let err = entry_at_path(&store, root, &path).unwrap_err();
        assert!(matches!(err, StorageError::PathNotFound(_)));
    }

    #[test]
    fn test_subtree_at_blob_path_is_an_error() {
        let (_dir, store) = setup();
        let builder = TreeBuilder::new(&store);

        let root = builder.apply(None, &[upsert("file.txt", "x")]).unwrap();
        let path = RepoPath::new("file.txt").unwrap();
        let err = subtree_at(&store, root, Some(&path)).unwrap_err();
        assert!(matches!(err, StorageError::UnexpectedEntryType { .. }));
    }
}

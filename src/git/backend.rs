use std::path::Path;
use git2::{Commit, IndexAddOption, Oid, Repository, ResetType, Signature, Status, StatusOptions};
use crate::errors::WaypointError;
use tracing::{debug, info};

/// Version-control operations the checkpoint manager depends on.
///
/// Calls are synchronous and treated as atomic; the manager runs them on the
/// blocking pool and serialises them.
pub trait CheckpointBackend: Send + Sync {
    /// Record the current working tree and return its identifier. When the
    /// tree is unchanged since the last commit, the existing identifier is
    /// returned and nothing new is written, unless `allow_empty` is set.
    fn commit(&self, source_dir: &Path, message: &str, allow_empty: bool) -> Result<String, WaypointError>;

    /// Restore the working tree to exactly `commit_id`.
    fn reset(&self, source_dir: &Path, commit_id: &str) -> Result<(), WaypointError>;

    fn head(&self, source_dir: &Path) -> Result<Option<String>, WaypointError>;
}

/// Checkpoints as commits in the target repository, via libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitBackend;

impl GitBackend {
    fn open_or_init(source_dir: &Path) -> Result<Repository, WaypointError> {
        match Repository::open(source_dir) {
            Ok(repo) => Ok(repo),
            Err(_) => {
                info!(path = %source_dir.display(), "Initialising git repository for checkpoints");
                Repository::init(source_dir)
                    .map_err(|e| WaypointError::Git(format!("Failed to init repo: {}", e)))
            }
        }
    }

    fn signature(repo: &Repository) -> Result<Signature<'static>, WaypointError> {
        match repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Signature::now("waypoint", "waypoint@localhost")
                .map_err(|e| WaypointError::Git(format!("Failed to build signature: {}", e))),
        }
    }

    /// Delete everything in the working tree that the index does not track.
    /// Ignored files are left alone.
    fn remove_untracked(repo: &Repository) -> Result<usize, WaypointError> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| WaypointError::Git("Repository has no working tree".into()))?
            .to_path_buf();
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))
            .map_err(|e| WaypointError::Git(format!("Failed to read status: {}", e)))?;

        let mut removed = 0;
        for entry in statuses.iter().filter(|e| e.status().contains(Status::WT_NEW)) {
            let Some(relative) = entry.path() else { continue };
            let path = workdir.join(relative);
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

impl CheckpointBackend for GitBackend {
    fn commit(&self, source_dir: &Path, message: &str, allow_empty: bool) -> Result<String, WaypointError> {
        let repo = Self::open_or_init(source_dir)?;

        let mut index = repo.index()
            .map_err(|e| WaypointError::Git(format!("Failed to get index: {}", e)))?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(|e| WaypointError::Git(format!("Failed to add files: {}", e)))?;
        // Stage deletions as well
        index.update_all(["*"].iter(), None)
            .map_err(|e| WaypointError::Git(format!("Failed to update index: {}", e)))?;
        index.write()
            .map_err(|e| WaypointError::Git(format!("Failed to write index: {}", e)))?;

        let tree_oid = index.write_tree()
            .map_err(|e| WaypointError::Git(format!("Failed to write tree: {}", e)))?;

        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(head) = &head {
            if head.tree_id() == tree_oid && !allow_empty {
                debug!(commit = %head.id(), "Tree unchanged, reusing HEAD as checkpoint");
                return Ok(head.id().to_string());
            }
        }

        let tree = repo.find_tree(tree_oid)
            .map_err(|e| WaypointError::Git(format!("Failed to find tree: {}", e)))?;
        let sig = Self::signature(&repo)?;
        let parents: Vec<&Commit> = head.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(|e| WaypointError::Git(format!("Failed to create checkpoint: {}", e)))?;

        info!(commit = %oid, message, "Git checkpoint created");
        Ok(oid.to_string())
    }

    fn reset(&self, source_dir: &Path, commit_id: &str) -> Result<(), WaypointError> {
        let repo = Repository::open(source_dir)
            .map_err(|e| WaypointError::Git(format!("Failed to open repo: {}", e)))?;
        let oid = Oid::from_str(commit_id)
            .map_err(|e| WaypointError::Git(format!("Invalid commit id {}: {}", commit_id, e)))?;
        let commit = repo.find_commit(oid)
            .map_err(|e| WaypointError::Git(format!("Checkpoint {} not found: {}", commit_id, e)))?;

        // A hard reset forces its own checkout strategy and keeps untracked files.
        repo.reset(commit.as_object(), ResetType::Hard, None)
            .map_err(|e| WaypointError::Git(format!("Failed to reset to {}: {}", commit_id, e)))?;
        let removed = Self::remove_untracked(&repo)?;

        info!(commit = commit_id, removed, "Working tree reset to checkpoint");
        Ok(())
    }

    fn head(&self, source_dir: &Path) -> Result<Option<String>, WaypointError> {
        let repo = match Repository::open(source_dir) {
            Ok(repo) => repo,
            Err(_) => return Ok(None),
        };
        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        Ok(head.map(|c| c.id().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_initialises_repo() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.py"), "print('hi')").unwrap();
        let backend = GitBackend;
        assert!(backend.head(dir.path()).unwrap().is_none());
        let id = backend.commit(dir.path(), "baseline", false).unwrap();
        assert_eq!(backend.head(dir.path()).unwrap(), Some(id));
    }

    #[test]
    fn test_commit_is_idempotent_on_clean_tree() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let backend = GitBackend;
        let first = backend.commit(dir.path(), "one", false).unwrap();
        let second = backend.commit(dir.path(), "two", false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_deletion_produces_new_commit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        let backend = GitBackend;
        let first = backend.commit(dir.path(), "one", false).unwrap();
        std::fs::remove_file(dir.path().join("b.txt")).unwrap();
        let second = backend.commit(dir.path(), "two", false).unwrap();
        assert_ne!(first, second);
        backend.reset(dir.path(), &first).unwrap();
        assert!(dir.path().join("b.txt").exists());
    }

    #[test]
    fn test_reset_removes_later_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let backend = GitBackend;
        let first = backend.commit(dir.path(), "one", false).unwrap();
        std::fs::write(dir.path().join("later.txt"), "later").unwrap();
        backend.commit(dir.path(), "two", false).unwrap();
        std::fs::write(dir.path().join("untracked.txt"), "x").unwrap();

        backend.reset(dir.path(), &first).unwrap();
        assert!(!dir.path().join("later.txt").exists());
        assert!(!dir.path().join("untracked.txt").exists());
        assert_eq!(backend.head(dir.path()).unwrap(), Some(first));
    }

    #[test]
    fn test_allow_empty_gives_distinct_commit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let backend = GitBackend;
        let first = backend.commit(dir.path(), "one", false).unwrap();
        let second = backend.commit(dir.path(), "two", true).unwrap();
        assert_ne!(first, second);
        assert_eq!(backend.head(dir.path()).unwrap(), Some(second.clone()));
        backend.reset(dir.path(), &first).unwrap();
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_reset_removes_untracked_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let backend = GitBackend;
        let first = backend.commit(dir.path(), "one", false).unwrap();
        std::fs::create_dir_all(dir.path().join("deliverables/nested")).unwrap();
        std::fs::write(dir.path().join("deliverables/nested/partial.md"), "half").unwrap();
        std::fs::write(dir.path().join("a.txt"), "edited").unwrap();

        backend.reset(dir.path(), &first).unwrap();
        assert!(!dir.path().join("deliverables").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a");
        assert_eq!(backend.commit(dir.path(), "again", false).unwrap(), first);
    }

    #[test]
    fn test_reset_unknown_commit_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let backend = GitBackend;
        backend.commit(dir.path(), "one", false).unwrap();
        let err = backend.reset(dir.path(), "0000000000000000000000000000000000000000");
        assert!(matches!(err, Err(WaypointError::Git(_))));
    }
}

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use crate::errors::WaypointError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path, unique per process and per call.
fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(tmp)
}

/// Atomic file write: write to a sibling temp file, then rename over the target.
pub async fn atomic_write(path: &Path, content: &str) -> Result<(), WaypointError> {
    let tmp = temp_path(path);

    let mut file = tokio::fs::File::create(&tmp).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        atomic_write(&path, "one").await.unwrap();
        atomic_write(&path, "two").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let path = Path::new("/tmp/sessions/abc.json");
        let first = temp_path(path);
        let second = temp_path(path);
        assert_ne!(first, second);
        assert_eq!(first.parent(), path.parent());
        assert!(first.to_string_lossy().contains(&std::process::id().to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_writes_leave_one_complete_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let writes = (0..8).map(|i| {
            let path = path.clone();
            tokio::spawn(async move { atomic_write(&path, &format!("writer {}", i)).await })
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("writer "));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

use tokio::sync::Semaphore;
use crate::errors::WaypointError;

/// Ensures only one git operation runs at a time, so checkpoints of
/// concurrently completing agents never race on the index.
pub struct GitSemaphore {
    semaphore: Semaphore,
}

impl GitSemaphore {
    pub fn new() -> Self {
        Self { semaphore: Semaphore::new(1) }
    }

    pub async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, WaypointError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| WaypointError::Internal("Git semaphore closed".into()))
    }
}

impl Default for GitSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

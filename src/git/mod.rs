pub mod backend;
pub mod checkpoint;
pub mod semaphore;

pub use backend::{CheckpointBackend, GitBackend};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use semaphore::GitSemaphore;

// State management module
// Progress markers and leases in SQLite, artifacts on the file system

pub mod db;
pub mod models;
pub mod npy;
pub mod progress;
pub mod queries;
pub mod storage;

pub use db::{init_db, init_in_memory, DbConnection, DbError};
pub use models::{ArtifactKind, ArtifactRecord, Lease, ProgressRecord, COMPLETE_MARKER};
pub use npy::{NpyArray, NpyError};
pub use progress::{JobStatus, ProgressTracker};
pub use queries::{forget_artifact, get_artifact_by_path, list_artifacts, record_artifact};
pub use storage::{calculate_sha256, ArtifactStore, StorageError, StoredFile};

pub mod error;
pub mod snapshot_id;

/// Identifier of a stored repository record.
pub type RepoId = u64;

/// Identifier of a Task, Operation or Log stream.
pub type JobId = u64;

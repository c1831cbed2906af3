use thiserror::Error;

pub type Result<T> = std::result::Result<T, VigilError>;

#[derive(Debug, Error)]
pub enum VigilError {
    #[error("repository not found: {0}")]
    RepoNotFound(u64),

    #[error(
        "repository is already locked; wait for the other operation to finish \
         or remove stale locks manually (lock: {0})"
    )]
    Locked(String),

    #[error("repository {repo_id} is already backing up '{path}'")]
    BackupRunning { repo_id: u64, path: String },

    #[error("no running job with id {0}")]
    NoSuchJob(u64),

    #[error("{collection} record not found: {id}")]
    RecordNotFound { collection: &'static str, id: u64 },

    #[error("a forget policy for repository {repo_id} and path '{path}' already exists")]
    DuplicatePolicy { repo_id: u64, path: String },

    #[error("snapshot not found: '{0}'")]
    SnapshotNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("unsupported backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VigilError {
    /// True for errors raised before a job was accepted: missing repository,
    /// held lock, or a backup already in flight.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            VigilError::RepoNotFound(_) | VigilError::Locked(_) | VigilError::BackupRunning { .. }
        )
    }
}

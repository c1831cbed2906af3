mod guard;
pub mod lock;
mod record;
pub mod registry;

pub use self::guard::BackupGuard;
pub use self::lock::{LockManager, RepoLock};
pub use self::record::{RepositoryField, RepositoryRecord};
pub use self::registry::{ReloadReport, RepositoryHandle, RepositoryRegistry};

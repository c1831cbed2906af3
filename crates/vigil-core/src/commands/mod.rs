pub mod backup;
pub mod check;
pub mod delete;
pub mod forget;
pub mod load_index;
pub mod migrate;
pub mod policy;
pub mod prune;
pub mod rebuild_index;
pub mod restore;
pub mod stats;
pub mod status;
pub mod util;

pub use self::util::{
    OperationJob, blocking, log_sink, resolve_snapshot, start_operation, with_exclusive_lock,
};

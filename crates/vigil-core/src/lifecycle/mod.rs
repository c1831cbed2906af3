//! Job records and their live companions.

mod binding;
mod live;
mod model;
mod operations;
mod store;
mod tasks;

pub use self::binding::{BindFailure, Identify, bind_client};
pub use self::live::{ChannelSink, ClientSink, LiveRegistry, LiveSession, SinkClosed, SinkFrame};
pub use self::model::*;
pub use self::operations::{LogRegistry, OperationRegistry, OperationService};
pub use self::store::{JsonFileStore, MemoryStore, Record, RecordStore};
pub use self::tasks::{ReconcileReport, TaskFilter, TaskLive, TaskRegistry, TaskService};

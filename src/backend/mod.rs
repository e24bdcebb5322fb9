pub mod actor;
pub mod handle;
pub mod messages;

pub use actor::BackendActor;
pub use handle::BackendHandle;
pub use messages::{AggregateCounters, BackendCommand, BackendEvent};

//! Stream synchronization: per-stream search cursors, the scheduler that
//! rotates through them, and change events.

pub mod events;
pub mod scheduler;
pub mod stream;
pub mod subscription;

pub use events::{EventBus, EventChannel, StreamEvent};
pub use scheduler::{
    PRIORITY_NORMAL, PRIORITY_REFRESH, Scheduler, SchedulerCommand, SchedulerHandle, StepReport,
    TransportFactory,
};
pub use stream::{ExecOutcome, QueryStrategy, StreamHealth, StreamUnit, SyncContext};
pub use subscription::{subscribe_issue, unsubscribe_issue};

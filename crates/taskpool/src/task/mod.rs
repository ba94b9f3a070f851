//! Task abstractions
//!
//! Tasks are units of work executed by the worker pool. They:
//! - Report success or a failure with a descriptive cause
//! - May be retried according to the retry policy supplied at submission
//! - Are moved into the pool on submission and dropped after their last attempt

mod definition;

pub use definition::{task_fn, FnTask, Task, TaskError, TaskResult};

//! The worker pool: a bounded set of tasks that turn fire bundles into job
//! executions, fault-isolating listener and handler failures from each
//! other and from the scheduling loop.

pub mod pool;

pub use pool::WorkerPool;

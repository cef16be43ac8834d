//! Background workers
//!
//! - [`queue`]: bounded-concurrency durable write queue

pub mod queue;

pub use queue::{WriteQueue, WriteQueueConfig, WriteQueueStats};

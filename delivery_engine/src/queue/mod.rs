//! An at-least-once background job queue.
//!
//! Producers enqueue [`Job`]s through a cheap, cloneable [`JobProducer`]. The [`TaskQueue`] runs a dispatcher loop
//! that hands each job to a [`JobHandler`] on its own tokio task, with at most `workers` jobs in flight. Failures
//! marked retryable are re-enqueued with exponential backoff; fatal failures, and retryable ones that run out of
//! attempts, land in the [`DeadLetterQueue`].
//!
//! Because a job may run more than once, every handler must be idempotent.
mod dead_letter;
mod jobs;
mod task_queue;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use jobs::Job;
pub use task_queue::{JobError, JobHandler, JobProducer, QueueConfig, QueueError, QueueHandle, TaskQueue};

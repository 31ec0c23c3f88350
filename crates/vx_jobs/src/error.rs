use thiserror::Error;

/// Errors surfaced synchronously by the scheduler entry points.
///
/// There is no task-level error channel: a payload that fails does so on a
/// worker thread, and its event completes regardless (see the crate docs).
/// Clients that need per-task results record them into shared state keyed
/// on the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// [`Scheduler::initialize`] was called while a scheduler is running.
    ///
    /// [`Scheduler::initialize`]: crate::Scheduler::initialize
    #[error("scheduler is already initialized")]
    AlreadyInitialized,

    /// A submission reached the scheduler before [`Scheduler::initialize`]
    /// or after [`Scheduler::shutdown`].
    ///
    /// [`Scheduler::initialize`]: crate::Scheduler::initialize
    /// [`Scheduler::shutdown`]: crate::Scheduler::shutdown
    #[error("scheduler is not initialized")]
    NotInitialized,
}

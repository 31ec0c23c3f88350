//! The task object and the submission entry points.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use vx_os::sync::SpinLock;

use crate::error::SchedulerError;
use crate::event::TaskEvent;
use crate::scheduler::Scheduler;
use crate::thread::NamedThread;

pub(crate) type TaskRef = Arc<Task>;

type Payload = Box<dyn FnOnce() + Send + 'static>;

// -----------------------------------------------------------------------------
// Task

/// A single unit of work, scheduled exactly once by the pool.
///
/// A task is shared (`Arc`) between the queues and the subsequent lists of
/// its prerequisites, but the payload is taken out exactly once: the worker
/// that receives the final dispatch executes it, completes the event, and
/// drops its reference.
pub struct Task {
    payload: SpinLock<Option<Payload>>,
    desired_thread: NamedThread,
    /// Dispatch holds on this task: one per registered, still-incomplete
    /// prerequisite, plus one submission guard while registration is in
    /// flight. Whoever drops the count to zero dispatches.
    pending_prerequisites: AtomicU32,
    event: Arc<TaskEvent>,
}

impl Task {
    fn new(payload: Payload, desired_thread: NamedThread, event: Arc<TaskEvent>) -> TaskRef {
        Arc::new(Task {
            payload: SpinLock::new(Some(payload)),
            desired_thread,
            pending_prerequisites: AtomicU32::new(0),
            event,
        })
    }

    pub(crate) fn desired_thread(&self) -> NamedThread {
        self.desired_thread
    }

    pub(crate) fn event(&self) -> &Arc<TaskEvent> {
        &self.event
    }

    pub(crate) fn increment_pending(&self) {
        self.pending_prerequisites.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the count after the decrement.
    pub(crate) fn decrement_pending(&self) -> u32 {
        let previous = self.pending_prerequisites.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "pending-prerequisite count underflow");
        previous - 1
    }

    /// Takes the payload out; [`None`] if it has already been taken.
    pub(crate) fn take_payload(&self) -> Option<Payload> {
        self.payload.lock().take()
    }

    /// Creates a task, registers it with every still-incomplete
    /// prerequisite, and returns its completion event.
    ///
    /// Registration is a single pass. A submission guard keeps the pending
    /// count above zero until every prerequisite has been visited, so a
    /// prerequisite completing mid-registration cannot dispatch the task
    /// early. Whoever releases the last hold (this function, or the last
    /// completing prerequisite) dispatches it, exactly once.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotInitialized`] when no scheduler is running.
    pub fn create_and_dispatch(
        payload: impl FnOnce() + Send + 'static,
        prerequisites: &[Arc<TaskEvent>],
        desired_thread: NamedThread,
    ) -> Result<Arc<TaskEvent>, SchedulerError> {
        let scheduler = Scheduler::current().ok_or(SchedulerError::NotInitialized)?;

        let event = TaskEvent::new();
        let task = Task::new(Box::new(payload), desired_thread, Arc::clone(&event));

        task.increment_pending();
        for prerequisite in prerequisites {
            if !prerequisite.is_complete() {
                prerequisite.add_subsequent(Arc::clone(&task));
            }
        }
        if task.decrement_pending() == 0 {
            scheduler.dispatch(task);
        }

        Ok(event)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("desired_thread", &self.desired_thread)
            .field(
                "pending_prerequisites",
                &self.pending_prerequisites.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Submission conveniences

/// Submits a task with no prerequisites to the worker pool.
///
/// # Errors
///
/// [`SchedulerError::NotInitialized`] when no scheduler is running.
pub fn submit(payload: impl FnOnce() + Send + 'static) -> Result<Arc<TaskEvent>, SchedulerError> {
    Task::create_and_dispatch(payload, &[], NamedThread::Any)
}

/// Submits a task that runs once `prerequisite` has completed.
///
/// # Errors
///
/// [`SchedulerError::NotInitialized`] when no scheduler is running.
pub fn submit_after(
    payload: impl FnOnce() + Send + 'static,
    prerequisite: &Arc<TaskEvent>,
) -> Result<Arc<TaskEvent>, SchedulerError> {
    Task::create_and_dispatch(payload, std::slice::from_ref(prerequisite), NamedThread::Any)
}

// -----------------------------------------------------------------------------
// Test support

#[cfg(test)]
impl Task {
    /// A payload-less task for queue tests.
    pub(crate) fn for_queue_tests(desired_thread: NamedThread) -> TaskRef {
        Task::new(Box::new(|| {}), desired_thread, TaskEvent::new())
    }

    /// A detached task carrying a real payload, for worker tests.
    pub(crate) fn for_panic_tests(payload: impl FnOnce() + Send + 'static) -> TaskRef {
        Task::new(Box::new(payload), NamedThread::Any, TaskEvent::new())
    }

    pub(crate) fn pending_prerequisites(&self) -> u32 {
        self.pending_prerequisites.load(Ordering::Acquire)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::test_util;

    #[test]
    fn pending_count_round_trips() {
        let task = Task::for_queue_tests(NamedThread::Any);
        task.increment_pending();
        task.increment_pending();
        assert_eq!(task.pending_prerequisites(), 2);
        assert_eq!(task.decrement_pending(), 1);
        assert_eq!(task.decrement_pending(), 0);
    }

    #[test]
    fn payload_can_only_be_taken_once() {
        let task = Task::for_queue_tests(NamedThread::Any);
        assert!(task.take_payload().is_some());
        assert!(task.take_payload().is_none());
    }

    #[test]
    fn submit_without_scheduler_fails() {
        let _serial = test_util::serial();
        assert_eq!(
            submit(|| {}).unwrap_err(),
            SchedulerError::NotInitialized,
        );
    }

    #[test]
    fn completed_prerequisites_do_not_hold_the_task() {
        test_util::with_scheduler(2, || {
            let ran = Arc::new(AtomicU32::new(0));

            let first = submit(|| {}).unwrap();
            first.wait();

            let ran2 = Arc::clone(&ran);
            let second = submit_after(
                move || {
                    ran2.fetch_add(1, Ordering::SeqCst);
                },
                &first,
            )
            .unwrap();
            second.wait();

            assert_eq!(ran.load(Ordering::SeqCst), 1);
        });
    }
}

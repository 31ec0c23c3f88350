//! Completion events: the nodes of the dependency graph.

use std::fmt;
use std::hint;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use vx_os::sync::SpinLock;

use crate::scheduler::Scheduler;
use crate::task::TaskRef;

/// Pause iterations before [`TaskEvent::wait`] starts sleeping.
const WAIT_SPIN_LIMIT: u32 = 1000;

/// Sleep granularity once the spin phase gives up.
const WAIT_SLEEP: Duration = Duration::from_micros(100);

// -----------------------------------------------------------------------------
// TaskEvent

/// The completion signal of a task, and the node other tasks attach their
/// dependencies to.
///
/// An event completes exactly once, when the worker that executed its task
/// signals it. Completion dispatches every registered subsequent whose last
/// prerequisite this was; tasks registered after completion are settled
/// synchronously during registration. Observers poll [`is_complete`] or
/// block in [`wait`].
///
/// [`is_complete`]: TaskEvent::is_complete
/// [`wait`]: TaskEvent::wait
pub struct TaskEvent {
    completed: AtomicBool,
    subsequents: SpinLock<Vec<TaskRef>>,
}

impl TaskEvent {
    pub(crate) fn new() -> Arc<TaskEvent> {
        Arc::new(TaskEvent {
            completed: AtomicBool::new(false),
            subsequents: SpinLock::new(Vec::new()),
        })
    }

    /// Whether the associated task has finished executing.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Registers `task` to be dispatched when this event completes.
    ///
    /// The completed flag is re-checked under the list lock: either the
    /// task makes it into the list before [`complete`] moves the list out,
    /// or the registration settles here, after the lock is released, so
    /// the dispatch never runs inside the critical section.
    ///
    /// [`complete`]: TaskEvent::complete
    pub(crate) fn add_subsequent(&self, task: TaskRef) {
        task.increment_pending();

        let mut subsequents = self.subsequents.lock();
        if !self.is_complete() {
            subsequents.push(task);
            return;
        }
        drop(subsequents);

        Self::settle(task);
    }

    /// Marks the event complete and dispatches every registered subsequent
    /// whose pending count reaches zero.
    ///
    /// Idempotent: only the caller that flips the flag dispatches anything.
    pub fn complete(&self) {
        if self
            .completed
            .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let subsequents = mem::take(&mut *self.subsequents.lock());
        for task in subsequents {
            Self::settle(task);
        }
    }

    /// Releases one dispatch hold on `task`, dispatching it if that was the
    /// last one.
    fn settle(task: TaskRef) {
        if task.decrement_pending() == 0 {
            Scheduler::dispatch_detached(task);
        }
    }

    /// Blocks the calling thread until the event completes.
    ///
    /// Spins briefly, then sleeps in [`WAIT_SLEEP`] increments. Safe from
    /// any thread, but calling it on a worker parks a core of the pool for
    /// the duration; coordinating threads are the intended callers.
    pub fn wait(&self) {
        let mut spins: u32 = 0;
        while !self.is_complete() {
            if spins < WAIT_SPIN_LIMIT {
                spins += 1;
                hint::spin_loop();
            } else {
                thread::sleep(WAIT_SLEEP);
            }
        }
    }
}

impl fmt::Debug for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEvent")
            .field("completed", &self.is_complete())
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::task::{Task, submit};
    use crate::test_util;
    use crate::thread::NamedThread;

    #[test]
    fn complete_is_idempotent() {
        let event = TaskEvent::new();
        assert!(!event.is_complete());

        event.complete();
        assert!(event.is_complete());

        // Further calls observe the flag and return without touching the
        // (already drained) list.
        event.complete();
        event.complete();
        assert!(event.is_complete());
    }

    #[test]
    fn wait_returns_after_completion_from_another_thread() {
        let event = TaskEvent::new();
        let signal = Arc::clone(&event);

        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signal.complete();
        });

        event.wait();
        assert!(event.is_complete());
        completer.join().unwrap();
    }

    #[test]
    fn registration_before_completion_holds_the_task() {
        let event = TaskEvent::new();
        let task = Task::for_queue_tests(NamedThread::Any);

        event.add_subsequent(Arc::clone(&task));
        assert_eq!(task.pending_prerequisites(), 1);
        assert!(!event.is_complete());
    }

    #[test]
    fn late_registration_dispatches_synchronously() {
        test_util::with_scheduler(2, || {
            let ran = Arc::new(AtomicU32::new(0));

            let event = submit(|| {}).unwrap();
            event.wait();
            thread::sleep(Duration::from_millis(10));

            // The prerequisite is long complete; the new task must not need
            // another completion to get dispatched.
            let ran2 = Arc::clone(&ran);
            let late = crate::task::submit_after(
                move || {
                    ran2.fetch_add(1, Ordering::SeqCst);
                },
                &event,
            )
            .unwrap();

            late.wait();
            assert_eq!(ran.load(Ordering::SeqCst), 1);
        });
    }
}

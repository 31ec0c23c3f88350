//! The two task queues of the pool: a spin-locked per-worker deque and the
//! mutex/condvar global queue all outside submissions funnel through.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use vx_os::sync::SpinLock;

use crate::task::TaskRef;

// -----------------------------------------------------------------------------
// LocalQueue

/// A worker's private deque.
///
/// The owner pushes and pops at the tail, so freshly spawned children run
/// before older siblings while their data is still cache-hot. Other workers
/// steal from the head, taking the oldest entry and staying off the end the
/// owner is working. Contention windows are microseconds, hence the spin
/// lock rather than a mutex.
pub(crate) struct LocalQueue {
    tasks: SpinLock<VecDeque<TaskRef>>,
}

impl LocalQueue {
    pub const fn new() -> Self {
        LocalQueue {
            tasks: SpinLock::new(VecDeque::new()),
        }
    }

    /// Owner only: appends at the tail.
    pub fn push(&self, task: TaskRef) {
        self.tasks.lock().push_back(task);
    }

    /// Owner only: removes from the tail (LIFO).
    pub fn pop(&self) -> Option<TaskRef> {
        self.tasks.lock().pop_back()
    }

    /// Any other worker: removes from the head (FIFO).
    pub fn steal(&self) -> Option<TaskRef> {
        self.tasks.lock().pop_front()
    }

    /// Drops every queued task. Called once at worker exit.
    pub fn clear(&self) {
        self.tasks.lock().clear();
    }

    /// Best-effort observation; may be stale the moment it returns.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Best-effort observation; may be stale the moment it returns.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

// -----------------------------------------------------------------------------
// GlobalQueue

/// The shared FIFO for submissions from non-worker threads and for all
/// named-thread work.
///
/// Producers signal one sleeping worker per push; `notify_all` is reserved
/// for shutdown. The global queue is not a steal victim: workers drain it
/// through [`pop`] and [`wait_and_pop`] only.
///
/// [`pop`]: GlobalQueue::pop
/// [`wait_and_pop`]: GlobalQueue::wait_and_pop
pub(crate) struct GlobalQueue {
    tasks: Mutex<VecDeque<TaskRef>>,
    available: Condvar,
}

impl GlobalQueue {
    pub fn new() -> Self {
        GlobalQueue {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends at the tail and wakes one waiter.
    pub fn push(&self, task: TaskRef) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
        self.available.notify_one();
    }

    /// Non-blocking removal from the head.
    pub fn pop(&self) -> Option<TaskRef> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// How long a waiter blocks before giving up for one round.
    ///
    /// Work pushed to another worker's local queue is invisible to this
    /// condvar, so a sleeping worker has to wake at some cadence to re-run
    /// its steal ladder or nested fork/wait workloads stall the pool.
    const IDLE_WAIT: Duration = Duration::from_millis(1);

    /// Blocks until a task is available, `stop` is set, or [`IDLE_WAIT`]
    /// elapses.
    ///
    /// Returns [`None`] on stop (even if tasks remain queued; whatever is
    /// left is discarded by shutdown) and on timeout, in which case the
    /// caller re-runs its acquisition ladder. The predicate re-checks
    /// `stop` under the mutex, so a stop flagged before the notification
    /// cannot be missed.
    ///
    /// [`IDLE_WAIT`]: GlobalQueue::IDLE_WAIT
    pub fn wait_and_pop(&self, stop: &AtomicBool) -> Option<TaskRef> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut tasks, _timed_out) = self
            .available
            .wait_timeout_while(tasks, Self::IDLE_WAIT, |tasks| {
                tasks.is_empty() && !stop.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);

        if stop.load(Ordering::Acquire) {
            return None;
        }
        tasks.pop_front()
    }

    /// Wakes every waiter. Used once, during shutdown, after the stop flags
    /// are set.
    pub fn notify_all(&self) {
        // Taking the mutex orders this wakeup after any waiter that already
        // checked the predicate and is about to block.
        let _tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        self.available.notify_all();
    }

    /// Best-effort observation; may be stale the moment it returns.
    pub fn is_empty(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Best-effort observation; may be stale the moment it returns.
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::task::Task;
    use crate::thread::NamedThread;

    fn dummy_task(tag: u32) -> TaskRef {
        // The payload is never run by these tests; the tag rides on the
        // pending counter so ordering is observable.
        let task = Task::for_queue_tests(NamedThread::Any);
        for _ in 0..tag {
            task.increment_pending();
        }
        task
    }

    fn tag_of(task: &TaskRef) -> u32 {
        task.pending_prerequisites()
    }

    #[test]
    fn local_owner_is_lifo() {
        let queue = LocalQueue::new();
        queue.push(dummy_task(1));
        queue.push(dummy_task(2));
        queue.push(dummy_task(3));

        assert_eq!(queue.len(), 3);
        assert_eq!(tag_of(&queue.pop().unwrap()), 3);
        assert_eq!(tag_of(&queue.pop().unwrap()), 2);
        assert_eq!(tag_of(&queue.pop().unwrap()), 1);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn local_stealers_take_the_oldest() {
        let queue = LocalQueue::new();
        queue.push(dummy_task(1));
        queue.push(dummy_task(2));
        queue.push(dummy_task(3));

        assert_eq!(tag_of(&queue.steal().unwrap()), 1);
        assert_eq!(tag_of(&queue.pop().unwrap()), 3);
        assert_eq!(tag_of(&queue.steal().unwrap()), 2);
        assert!(queue.steal().is_none());
    }

    #[test]
    fn local_clear_drops_everything() {
        let queue = LocalQueue::new();
        for tag in 0..8 {
            queue.push(dummy_task(tag));
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn global_is_fifo() {
        let queue = GlobalQueue::new();
        queue.push(dummy_task(1));
        queue.push(dummy_task(2));

        assert_eq!(queue.len(), 2);
        assert_eq!(tag_of(&queue.pop().unwrap()), 1);
        assert_eq!(tag_of(&queue.pop().unwrap()), 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn wait_and_pop_returns_queued_task() {
        let queue = Arc::new(GlobalQueue::new());
        let stop = AtomicBool::new(false);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                queue.push(dummy_task(7));
            })
        };

        // Idle rounds return None until the producer lands its push.
        let task = loop {
            if let Some(task) = queue.wait_and_pop(&stop) {
                break task;
            }
        };
        assert_eq!(tag_of(&task), 7);
        producer.join().unwrap();
    }

    #[test]
    fn wait_and_pop_observes_stop() {
        let queue = Arc::new(GlobalQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let waiter = {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            thread::spawn(move || queue.wait_and_pop(&stop))
        };

        thread::sleep(Duration::from_millis(10));
        stop.store(true, Ordering::Release);
        queue.notify_all();

        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn wait_and_pop_times_out_when_idle() {
        let queue = GlobalQueue::new();
        let stop = AtomicBool::new(false);

        // Nothing queued, no stop: the wait gives up after one idle round
        // instead of blocking forever.
        assert!(queue.wait_and_pop(&stop).is_none());
    }

    #[test]
    fn stop_wins_even_with_tasks_queued() {
        let queue = GlobalQueue::new();
        let stop = AtomicBool::new(true);
        queue.push(dummy_task(1));

        assert!(queue.wait_and_pop(&stop).is_none());
        assert_eq!(queue.len(), 1);
    }
}

//! The per-worker run loop: acquire, execute, back off.

use std::cell::OnceCell;
use std::hint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_utils::CachePadded;

use crate::queue::LocalQueue;
use crate::scheduler::Scheduler;
use crate::task::TaskRef;
use crate::thread::Runnable;

/// Idle iterations spent pausing before the worker starts yielding.
const SPIN_IDLE_LIMIT: u32 = 256;

/// Idle iterations spent pausing or yielding before the worker blocks on
/// the global queue.
const YIELD_IDLE_LIMIT: u32 = 512;

thread_local! {
    /// The worker bound to this thread, set once at worker startup. Main
    /// and other non-pool threads never populate it.
    static CURRENT_WORKER: OnceCell<Arc<WorkerRunner>> = const { OnceCell::new() };
}

// -----------------------------------------------------------------------------
// WorkerRunner

/// One worker of the pool: an id, a core to sit on, its local queue, and
/// the run loop.
pub(crate) struct WorkerRunner {
    id: usize,
    core: usize,
    scheduler: Weak<Scheduler>,
    local_queue: CachePadded<LocalQueue>,
    stop_requested: AtomicBool,
}

impl WorkerRunner {
    pub fn new(id: usize, core: usize, scheduler: Weak<Scheduler>) -> Arc<WorkerRunner> {
        Arc::new(WorkerRunner {
            id,
            core,
            scheduler,
            local_queue: CachePadded::new(LocalQueue::new()),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn local_queue(&self) -> &LocalQueue {
        &self.local_queue
    }

    /// The worker bound to the calling thread, if any.
    pub fn current() -> Option<Arc<WorkerRunner>> {
        CURRENT_WORKER.with(|slot| slot.get().cloned())
    }

    fn bind_current(self: Arc<Self>) {
        CURRENT_WORKER.with(move |slot| {
            // A thread runs at most one worker over its lifetime.
            let _ = slot.set(self);
        });
    }

    /// The acquisition ladder: own queue, then the global queue, then the
    /// other workers' queues.
    fn acquire_task(&self, scheduler: &Scheduler) -> Option<TaskRef> {
        if let Some(task) = self.local_queue.pop() {
            return Some(task);
        }
        if let Some(task) = scheduler.pop_global() {
            return Some(task);
        }
        scheduler.steal_for(self.id)
    }

    /// Runs the payload and signals completion, which may refill this
    /// worker's local queue with freed subsequents.
    fn execute(task: TaskRef) {
        if let Some(payload) = task.take_payload() {
            if panic::catch_unwind(AssertUnwindSafe(payload)).is_err() {
                log::error!("task payload panicked; completing its event anyway");
            }
        }
        task.event().complete();
    }
}

impl Runnable for WorkerRunner {
    fn run(&self) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };

        Arc::clone(scheduler.worker(self.id)).bind_current();
        if !vx_os::cpu::pin_current_thread(self.core) {
            log::debug!("worker {} running unpinned", self.id);
        }

        // Start barrier: no worker executes anything until the whole pool
        // is live.
        scheduler.worker_ready();
        log::trace!("worker {} ready on core {}", self.id, self.core);

        let mut idle_spins: u32 = 0;
        while !self.is_stop_requested() {
            if let Some(task) = self.acquire_task(&scheduler) {
                Self::execute(task);
                idle_spins = 0;
                continue;
            }

            idle_spins = idle_spins.saturating_add(1);
            if idle_spins < SPIN_IDLE_LIMIT {
                hint::spin_loop();
            } else if idle_spins < YIELD_IDLE_LIMIT {
                thread::yield_now();
            } else if let Some(task) = scheduler.wait_for_task(&self.stop_requested) {
                Self::execute(task);
                idle_spins = 0;
            }
        }

        if !self.local_queue.is_empty() {
            log::debug!(
                "worker {} dropping {} queued tasks on exit",
                self.id,
                self.local_queue.len()
            );
        }
        self.local_queue.clear();
        log::trace!("worker {} exiting", self.id);
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn thread_name(&self) -> String {
        format!("Worker_{}", self.id)
    }
}

// -----------------------------------------------------------------------------
// Tests

//! The process-wide scheduler: pool lifecycle, dispatch routing, and the
//! steal plan.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, ThreadId};

use crate::error::SchedulerError;
use crate::queue::GlobalQueue;
use crate::task::TaskRef;
use crate::thread::{NamedThread, Runnable, Thread, ThreadPriority};
use crate::worker::WorkerRunner;

/// The running scheduler. Tasks submit other tasks without carrying a
/// context handle, so the instance has to be reachable from anywhere.
static INSTANCE: RwLock<Option<Arc<Scheduler>>> = RwLock::new(None);

// -----------------------------------------------------------------------------
// Scheduler

/// Owner of the worker pool.
///
/// Created by [`initialize`], torn down by [`shutdown`]. Submissions go
/// through [`Task::create_and_dispatch`] and the `submit*` free functions;
/// the scheduler itself only routes: tasks submitted from a worker land in
/// that worker's local queue, everything else in the global queue.
///
/// [`initialize`]: Scheduler::initialize
/// [`shutdown`]: Scheduler::shutdown
/// [`Task::create_and_dispatch`]: crate::Task::create_and_dispatch
pub struct Scheduler {
    workers: Box<[Arc<WorkerRunner>]>,
    global_queue: GlobalQueue,
    shutdown_requested: AtomicBool,
    ready_workers: AtomicU32,
    /// Thread handles and the thread-id lookup, populated during startup
    /// and drained by shutdown.
    registry: Mutex<WorkerRegistry>,
}

struct WorkerRegistry {
    handles: Vec<Thread>,
    ids: HashMap<ThreadId, usize>,
}

impl Scheduler {
    /// Starts the process-wide scheduler with `requested_workers` workers.
    ///
    /// `requested_workers <= 0` asks for the maximum: one worker per
    /// logical core not reserved for the main thread and the platform's
    /// named threads. Positive requests are clamped into `1..=maximum`.
    /// Workers are pinned to the top `worker_count` cores, leaving the low
    /// cores to the named threads, and named `Worker_<i>`.
    ///
    /// Blocks until every worker is live: once this returns, submissions
    /// from any thread execute.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::AlreadyInitialized`] when a scheduler is already
    /// running.
    pub fn initialize(requested_workers: i32) -> Result<(), SchedulerError> {
        let mut instance = INSTANCE.write().unwrap_or_else(PoisonError::into_inner);
        if instance.is_some() {
            return Err(SchedulerError::AlreadyInitialized);
        }

        let worker_count = Self::resolve_worker_count(requested_workers);
        let start_core = vx_os::cpu::logical_core_count().saturating_sub(worker_count);

        log::info!("starting scheduler with {worker_count} worker threads");

        let scheduler = Arc::new_cyclic(|weak: &Weak<Scheduler>| Scheduler {
            workers: (0..worker_count)
                .map(|id| WorkerRunner::new(id, start_core + id, Weak::clone(weak)))
                .collect(),
            global_queue: GlobalQueue::new(),
            shutdown_requested: AtomicBool::new(false),
            ready_workers: AtomicU32::new(0),
            registry: Mutex::new(WorkerRegistry {
                handles: Vec::with_capacity(worker_count),
                ids: HashMap::with_capacity(worker_count),
            }),
        });

        scheduler.startup();
        *instance = Some(scheduler);

        log::info!("all workers ready");
        Ok(())
    }

    /// Stops the process-wide scheduler and joins every worker.
    ///
    /// Idempotent; a no-op when nothing is running. Tasks still queued when
    /// the workers drain are dropped, and their events never complete.
    pub fn shutdown() {
        let scheduler = INSTANCE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.request_shutdown();
        }
    }

    /// The running scheduler, if any.
    pub(crate) fn current() -> Option<Arc<Scheduler>> {
        INSTANCE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `thread_id` belongs to one of the running pool's workers.
    pub fn is_worker_thread(thread_id: ThreadId) -> bool {
        Self::current().is_some_and(|scheduler| {
            scheduler
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .ids
                .contains_key(&thread_id)
        })
    }

    /// The number of workers in the running pool; `0` when not initialized.
    pub fn worker_count() -> usize {
        Self::current().map_or(0, |scheduler| scheduler.workers.len())
    }

    /// `clamp(requested, 1, logical_cores - reserved)`, where the reserve
    /// covers the main thread plus the platform's named threads.
    fn resolve_worker_count(requested: i32) -> usize {
        let logical_cores = vx_os::cpu::logical_core_count();

        let mut reserved = 1; // main thread
        if vx_os::cpu::requires_render_thread() {
            reserved += 1;
        }
        if vx_os::cpu::requires_audio_thread() {
            reserved += 1;
        }

        let max_workers = logical_cores.saturating_sub(reserved).max(1);
        if requested <= 0 {
            max_workers
        } else {
            (requested as usize).clamp(1, max_workers)
        }
    }

    fn startup(self: &Arc<Self>) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in &self.workers {
            let runnable = Arc::clone(worker) as Arc<dyn Runnable>;
            let handle =
                Thread::spawn(runnable, ThreadPriority::Low).expect("failed to spawn worker thread");
            registry.ids.insert(handle.thread_id(), worker.id());
            registry.handles.push(handle);
        }
        drop(registry);

        // Start barrier: wait for every worker to come up before accepting
        // the first submission.
        let total = self.workers.len() as u32;
        while self.ready_workers.load(Ordering::Acquire) < total {
            thread::yield_now();
        }
    }

    fn request_shutdown(&self) {
        log::info!("scheduler shutdown requested");
        self.shutdown_requested.store(true, Ordering::Release);

        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in &registry.handles {
            handle.request_stop();
        }
        // Wake sleepers only after every stop flag is visible; the condvar
        // predicate re-checks the flag, so no wakeup can be lost.
        self.global_queue.notify_all();

        // Join outside the registry lock: a draining worker may still call
        // `is_worker_thread` from a payload.
        let handles: Vec<Thread> = registry.handles.drain(..).collect();
        registry.ids.clear();
        drop(registry);

        for mut handle in handles {
            handle.join();
        }

        if !self.global_queue.is_empty() {
            log::debug!(
                "dropping {} tasks left in the global queue",
                self.global_queue.len()
            );
        }
        log::info!("scheduler shutdown complete");
    }

    /// Barrier entry for workers: count in, then spin until the whole pool
    /// has counted in.
    pub(crate) fn worker_ready(&self) {
        let total = self.workers.len() as u32;
        self.ready_workers.fetch_add(1, Ordering::Release);
        while self.ready_workers.load(Ordering::Acquire) < total {
            thread::yield_now();
        }
    }

    /// Routes a task whose prerequisites are all settled into a queue.
    ///
    /// Pool work submitted from a worker goes to that worker's own local
    /// queue; outside submissions and all named-thread work go to the
    /// global queue. Named threads will get dedicated
    /// queues when they learn to drain them.
    pub(crate) fn dispatch(&self, task: TaskRef) {
        if self.is_shutdown_requested() {
            // The queues are already draining; anything pushed now would be
            // dropped unexecuted anyway.
            log::debug!("discarding task dispatched during shutdown");
            return;
        }
        if task.desired_thread() == NamedThread::Any {
            if let Some(worker) = WorkerRunner::current() {
                worker.local_queue().push(task);
                return;
            }
        }
        self.global_queue.push(task);
    }

    /// Dispatches through the singleton, for call sites (event completion)
    /// that do not hold a scheduler reference. A task freed after shutdown
    /// has nowhere to go and is dropped.
    pub(crate) fn dispatch_detached(task: TaskRef) {
        match Self::current() {
            Some(scheduler) => scheduler.dispatch(task),
            None => log::debug!("discarding task dispatched after scheduler shutdown"),
        }
    }

    pub(crate) fn pop_global(&self) -> Option<TaskRef> {
        self.global_queue.pop()
    }

    /// Round-robin steal attempt over the other workers, starting just
    /// past the thief so victims rotate.
    pub(crate) fn steal_for(&self, thief: usize) -> Option<TaskRef> {
        let count = self.workers.len();
        for offset in 1..count {
            let victim = &self.workers[(thief + offset) % count];
            if let Some(task) = victim.local_queue().steal() {
                return Some(task);
            }
        }
        None
    }

    /// Blocks on the global queue until a task or a stop arrives.
    pub(crate) fn wait_for_task(&self, stop: &AtomicBool) -> Option<TaskRef> {
        self.global_queue.wait_and_pop(stop)
    }

    pub(crate) fn worker(&self, id: usize) -> &Arc<WorkerRunner> {
        &self.workers[id]
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }
}

// -----------------------------------------------------------------------------
// Tests

//! The thread abstraction the scheduler runs on: a [`Runnable`] payload, a
//! named OS [`Thread`] wrapper that stops and joins on drop, and the enums
//! describing where work wants to run.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

// -----------------------------------------------------------------------------
// NamedThread

/// Destination hint for a task.
///
/// [`Any`] work runs on the worker pool. The named variants exist for work
/// that must land on one of the engine's distinguished threads; until those
/// threads own dedicated queues, the scheduler routes them through the
/// global queue.
///
/// [`Any`]: NamedThread::Any
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NamedThread {
    /// Any worker of the pool.
    #[default]
    Any,
    /// The main game thread.
    Game,
    /// The render thread.
    Render,
    /// The audio thread.
    Audio,
}

// -----------------------------------------------------------------------------
// ThreadPriority

/// OS scheduling hint for a [`Thread`].
///
/// Purely advisory; platforms that do not expose priorities ignore it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

// -----------------------------------------------------------------------------
// Runnable

/// The payload a [`Thread`] executes.
///
/// `run` is called exactly once on the new thread and is expected to return
/// promptly after [`request_stop`] has been observed.
///
/// [`request_stop`]: Runnable::request_stop
pub trait Runnable: Send + Sync {
    /// The thread body.
    fn run(&self);

    /// Asks `run` to return at its next opportunity.
    fn request_stop(&self);

    /// Whether a stop has been requested.
    fn is_stop_requested(&self) -> bool;

    /// The OS-visible name for the thread running this payload.
    fn thread_name(&self) -> String;
}

// -----------------------------------------------------------------------------
// Thread

/// An owned, named OS thread running a [`Runnable`].
///
/// Dropping the wrapper requests a stop and joins, so a `Thread` can never
/// outlive its owner.
pub struct Thread {
    name: String,
    priority: ThreadPriority,
    runnable: Arc<dyn Runnable>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Launches a named OS thread executing `runnable.run()`.
    pub fn spawn(runnable: Arc<dyn Runnable>, priority: ThreadPriority) -> io::Result<Thread> {
        let name = runnable.thread_name();
        let entry = Arc::clone(&runnable);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || entry.run())?;
        let thread_id = handle.thread().id();

        log::debug!("thread '{name}' started");

        Ok(Thread {
            name,
            priority,
            runnable,
            thread_id,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> ThreadPriority {
        self.priority
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn runnable(&self) -> &Arc<dyn Runnable> {
        &self.runnable
    }

    /// Asks the payload to stop without waiting for it.
    pub fn request_stop(&self) {
        self.runnable.request_stop();
    }

    /// Waits for the thread to finish. Does not itself request a stop.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::debug!("thread '{}' stopped", self.name);
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.runnable.request_stop();
        self.join();
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;

    struct CountingRunnable {
        runs: AtomicU32,
        stop: AtomicBool,
    }

    impl Runnable for CountingRunnable {
        fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            while !self.is_stop_requested() {
                std::thread::yield_now();
            }
        }

        fn request_stop(&self) {
            self.stop.store(true, Ordering::Release);
        }

        fn is_stop_requested(&self) -> bool {
            self.stop.load(Ordering::Acquire)
        }

        fn thread_name(&self) -> String {
            String::from("counting")
        }
    }

    #[test]
    fn drop_stops_and_joins() {
        let runnable = Arc::new(CountingRunnable {
            runs: AtomicU32::new(0),
            stop: AtomicBool::new(false),
        });

        let thread = Thread::spawn(Arc::clone(&runnable) as Arc<dyn Runnable>, ThreadPriority::Low)
            .unwrap();
        assert_eq!(thread.name(), "counting");
        assert_eq!(thread.priority(), ThreadPriority::Low);
        drop(thread);

        // Joined, so the body ran exactly once and observed the stop.
        assert_eq!(runnable.runs.load(Ordering::SeqCst), 1);
        assert!(runnable.is_stop_requested());
    }
}

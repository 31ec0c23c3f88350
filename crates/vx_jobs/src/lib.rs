#![doc = include_str!("../README.md")]

mod error;
mod event;
mod queue;
mod scheduler;
mod task;
mod worker;

pub mod thread;

pub use error::SchedulerError;
pub use event::TaskEvent;
pub use scheduler::Scheduler;
pub use task::{Task, submit, submit_after};
pub use thread::NamedThread;

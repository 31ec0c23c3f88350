#![doc = include_str!("../README.md")]

pub use vx_jobs as jobs;
pub use vx_os as os;

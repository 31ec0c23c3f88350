#![doc = include_str!("../README.md")]

pub mod cpu;
pub mod sync;

//! Ambient kernel glue for the VFS workspace
//!
//! Everything here sits outside the VFS core proper: a pluggable log
//! sink, a host-supplied wall clock, and the boot-time sequence that
//! registers drivers and mounts the root filesystem. None of it is
//! specific to any one architecture, and none of it installs a panic
//! handler — that is a binary's decision, not a library's.

#![no_std]

extern crate alloc;

pub mod init;
pub mod log;
pub mod time;

pub use log::LogSink;
pub use time::HostClock;

//! Block Cache
//!
//! A bounded, associative write-back cache of device blocks sitting
//! between the VFS core and the block device layer (spec component B).

#![no_std]

extern crate alloc;

pub mod cache;

pub use cache::{BlockCache, CacheError, CacheStats};

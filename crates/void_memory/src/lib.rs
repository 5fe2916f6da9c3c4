//! # void_memory - Object Memory
//!
//! The global object allocator behind the host class system. Class objects
//! and the instances built from them live in zero-filled, tracked
//! allocations; root-set allocations stay alive until the allocator goes away.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod object_allocator;

pub use object_allocator::ObjectAllocator;

pub mod prelude {
    pub use crate::ObjectAllocator;
}

//! A page-backed, size-segregated heap arena.
//!
//! `memarena` hands out a fixed-size region reserved from the OS once, up
//! front, and then serves `alloc`/`free` requests against it with a
//! classic size-segregated free-list allocator: 32 buckets, best-fit
//! search within the first bucket that has any satisfying block, physical
//! neighbor splitting on allocation and forward-and-backward coalescing on
//! free. Every block carries a pair of signature words so corruption (and
//! double-frees) can be caught instead of silently misbehaving.
//!
//! ```
//! use memarena::Arena;
//!
//! let mut arena = Arena::init(1 << 20, 8, "example")?;
//! let ptr = arena.alloc(128)?;
//! arena.free(ptr.as_ptr())?;
//! arena.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # What this crate is not
//!
//! This is not a [`GlobalAlloc`](std::alloc::GlobalAlloc). `Arena` is an
//! explicit, owned object you create and pass around, the same way the
//! original allocator driver this crate is modeled on hands a `pool_t*`
//! back from `pool_create`. It is also not thread-safe on its own: `Arena`
//! is `Send` but deliberately not `Sync`, so sharing one across threads
//! requires wrapping it in a mutex yourself rather than this crate
//! pretending it has done that for you.
//!
//! # Logging
//!
//! The crate emits structured events through the [`tracing`] facade:
//! `info` on initialization and teardown, `warn` on a leak detected at
//! teardown, and `debug`-level per-operation tracing gated behind
//! [`Arena::set_debug`] (mirroring the original driver's own `-d` verbose
//! flag). Install a subscriber (`tracing-subscriber`, as the `arena-cli`
//! binary does) to see any of it.

mod arena;
mod block;
mod error;
mod region;
mod size_class;
mod stats;

pub use arena::Arena;
pub use error::{ArenaError, Violation};
pub use stats::Stats;

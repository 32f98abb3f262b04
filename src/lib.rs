//! Makegen core library.
//!
//! Makegen compiles an already-resolved project model into a Makefile:
//! it probes the host toolchain, synthesises the directory hierarchy the
//! build needs, and emits per-module build, test, install, and clean
//! rules in a fixed section order.

pub mod backend;
pub mod cli;
pub mod dirtree;
pub mod emitter;
pub mod handlers;
pub mod model;
pub mod toolchain;

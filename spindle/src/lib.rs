//! # Spindle
//!
//! **Spindle** is a single-threaded fiber runtime for network servers.
//!
//! A [`Scheduler`] runs stackful fibers cooperatively on one thread and
//! integrates them with an `epoll` readiness multiplexer and a deadline
//! table. Fibers are plain closures: code inside them reads like
//! blocking code, while the socket primitives in [`net`] suspend the
//! fiber instead of the thread whenever a syscall would block.
//!
//! It provides:
//!
//! - A **FIFO dispatch loop** that runs every ready fiber once per cycle,
//!   then sweeps expired deadlines, then polls for I/O readiness
//! - **Guarded fiber stacks** with an explicit, generation-checked fiber table
//! - **Timed suspension**: [`Scheduler::sleep`], and timeouts on accept,
//!   connect, read and write
//! - **TCP primitives**: [`net::Listener`] and [`net::Connection`]
//! - **Ergonomic macros**: `#[spindle::main]` and `#[spindle::test]`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spindle::net::Listener;
//!
//! #[spindle::main]
//! fn main(s: &spindle::Scheduler) {
//!     let listener = Listener::listen_tcp(s, 9000).unwrap();
//!
//!     loop {
//!         let conn = listener.accept().unwrap();
//!
//!         s.spawn(move |_| {
//!             let mut buf = [0u8; 1024];
//!             while let Ok(n @ 1..) = conn.read(&mut buf) {
//!                 if conn.write(&buf[..n]).is_err() {
//!                     break;
//!                 }
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`net`]: TCP listener and connection
//! - [`time`]: Clock and deadlines
//!
//! Only Linux on x86_64 and aarch64 is supported.

#[cfg(not(target_os = "linux"))]
compile_error!("spindle requires Linux (epoll)");

mod error;
mod fiber;
mod reactor;
mod runtime;
mod utils;

pub mod net;
pub mod time;

pub use error::{Error, Result};
pub use fiber::{FiberId, FiberStatus, Wakeup};
pub use reactor::io::Direction;
pub use runtime::builder::{
    DEFAULT_MAX_EVENTS, DEFAULT_POLL_TIMEOUT, DEFAULT_STACK_SIZE, FiberBuilder, SchedulerBuilder,
};
pub use runtime::{Scheduler, Stats};

pub use spindle_macros::*;

//! Networking primitives.
//!
//! Thin non-blocking TCP wrappers that suspend the calling fiber
//! instead of blocking the thread:
//! - [`Listener`]: bind, listen and accept,
//! - [`Connection`]: connect, read, write and shutdown.
//!
//! Both must be used from fibers of the [`Scheduler`](crate::Scheduler)
//! they were created with.
mod tcp;

pub use tcp::connection::Connection;
pub use tcp::listener::Listener;

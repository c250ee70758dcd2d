//! Concurrency substrate shared by every long-running component.
//!
//! - [`Dispatcher`]: single-consumer deferred-call queue. Callbacks run on
//!   the dispatcher task with no component lock held, which is how
//!   components call back into each other without nesting locks.
//! - [`Worker`]: cooperative cancellation plus a wait/notify primitive for
//!   one long-running loop.
//! - [`Supervisor`]: spawns worker loops, kills them on shutdown and joins
//!   them within a grace period.

pub mod dispatcher;
pub mod signal;
pub mod supervisor;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use signal::wait_for_shutdown_signal;
pub use supervisor::Supervisor;
pub use worker::{Cancelled, Worker};

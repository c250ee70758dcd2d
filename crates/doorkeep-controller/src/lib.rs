//! Workers driving the serial-attached controllers.
//!
//! - [`LockController`]: one per door. Enumerates the controller, keeps its
//!   key list in sync, drains its event log and arbitrates remote opens.
//! - [`StatusController`]: the auxiliary board with the "open" sign, the
//!   webcam servo, the temperature sensor and the door bell.
//!
//! Both follow the same loop: open the link, drain stale output until the
//! line goes quiet, run the protocol until something fails, close the link,
//! back off and start over. Only cancellation ends the loop.

pub mod error;
pub mod keypad;
pub mod link;
pub mod lock;
pub mod status;

pub use error::{LinkError, Result};
pub use keypad::KeypadBuffer;
pub use link::{LinkOpener, QueuedOpener, SerialOpener, drain_until_quiet, wake_link};
pub use lock::{LinkState, LockConfig, LockContext, LockController, LockHandle};
pub use status::{StatusConfig, StatusController, StatusHandle};

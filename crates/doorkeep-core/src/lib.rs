pub mod constants;
pub mod error;
pub mod facility;
pub mod types;

pub use error::{Error, Result};
pub use facility::{FacilitySnapshot, FacilityState, FacilityStatus, Transition};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

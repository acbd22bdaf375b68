//! Shared domain types for the lapsecam workspace.

pub mod clock;
pub mod config;
pub mod frame;
pub mod lapse;

mod errors;

pub use errors::{storage_error, LapseError, Result};

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{ControllerError, ErrorCategory, Result, Severity};
pub use ids::*;

//! Domain models for Conveyor.

pub mod error;
pub mod role;

pub use error::{ConveyorError, Result};
pub use role::StageRole;

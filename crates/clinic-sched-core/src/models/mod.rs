//! Domain models for the scheduling core.

mod appointment;
mod delivery;
mod patient;

pub use appointment::*;
pub use delivery::*;
pub use patient::*;

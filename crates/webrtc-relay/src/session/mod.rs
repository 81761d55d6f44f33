//! Call session state and the controller driving it

pub mod controller;
pub mod state;

pub use controller::CallController;
pub use state::{CallPhase, CallSnapshot, CallState};

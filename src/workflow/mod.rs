// Request workflow: which status changes are legal

pub mod status_machine;

pub use status_machine::{StatusTransition, StatusWorkflow, TransitionError};

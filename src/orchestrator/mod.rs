//! Application-level orchestration.
//!
//! This module owns run lifecycle control (launch/stop/reset) and the
//! wiring of per-run background tasks. UI/CLI layers drive it with
//! commands and render the events it emits.

mod controller;
mod lifecycle;

pub(crate) use controller::{run_controller, UiCommand};

//! Control-plane CLI for the device fleet.

pub mod cli;
pub mod commands;
pub mod logging;

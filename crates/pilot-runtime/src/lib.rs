//! Device runtime - process supervision and fleet fan-out
//!
//! This crate runs external automation programs against connected devices:
//!
//! - **Process**: one child process per run, line-oriented output capture
//! - **Session**: per-device supervisor, at most one live child at a time
//! - **Fleet**: concurrent fan-out of one script across many devices
//! - **Bridge**: helpers for the external device bridge tool
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐
//! │   Fleet   │  run_on_selected / stop_all / wait_idle
//! └─────┬─────┘
//!       │ one per device
//! ┌─────▼─────────┐
//! │ DeviceSession │  Idle -> Running -> Stopping -> Idle
//! └─────┬─────────┘
//!       │ one per run
//! ┌─────▼─────────┐
//! │ ScriptProcess │  spawn / output lines / terminate / wait
//! └───────────────┘
//! ```
//!
//! Sessions are independent: a fault in one never blocks or fails another.

pub mod bridge;
pub mod error;
pub mod fleet;
pub mod process;
pub mod session;

pub use bridge::Bridge;
pub use error::{Error, Result};
pub use fleet::{Fleet, LaunchOutcome};
pub use process::{ScriptProcess, ScriptSpec};
pub use session::{DeviceSession, LineObserver, SessionConfig, SessionState};

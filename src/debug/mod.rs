//! Interactive step-by-step debugging of test cases.
//!
//! A debug session keeps one browser open across commands. Callers move a
//! cursor through the test case with `step`, `continue_run`, `jump` and
//! `run_range`, and read state back as a [`DebugSessionSnapshot`].

pub mod policy;
pub mod service;
pub mod session;
pub mod types;

pub use policy::{FlaggedPrerequisites, NeverReplay, PrerequisitePolicy};
pub use service::DebugSessionService;
pub use session::{DebugSession, SnapshotBoard};
pub use types::{DebugError, DebugMode, DebugResult, DebugSessionSnapshot, DebugStatus, RangeBounds};

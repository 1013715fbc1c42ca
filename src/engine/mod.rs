//! Engine modules: the part that turns a plan into executed, reported work.
//!
//! The catalog decides *what* runs and in which order; the engine runs it one
//! task at a time against the target drive and hands back a report.

pub mod cancel;
pub mod orchestrator;

pub use cancel::CancelToken;
pub use orchestrator::{Orchestrator, Progress, ProgressEvent, channel_progress};

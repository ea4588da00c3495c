//! Command Line Interface (CLI) layer for dmgmap.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the orchestration logic (`runner`) for the pipeline stages and the
//! metrics evaluator. It wires user-provided options to the underlying
//! library functionality exposed via `dmgmap::api`.
//!
//! If you are embedding dmgmap into another application, prefer using
//! the high-level `dmgmap::api` module instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;

//! Library surface for `zipcraft`: a ZIP archiver with hierarchical
//! `.zipignore` rules, parallel pre-compression, and diff-based incremental
//! update.
//!
//! The CORE (path model, ignore engine, collector, compression pipeline,
//! diff engine) is independently testable here; `main.rs` is a thin CLI
//! wrapper around it.

pub mod cli;
pub mod collector;
pub mod config;
pub mod diagnostics;
pub mod diff;
pub mod error;
pub mod extract;
pub mod ignore;
pub mod path_model;
pub mod pipeline;
pub mod platform;

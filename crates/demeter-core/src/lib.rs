//! Demeter tag watchdog core
//!
//! Polls a Neo4j imaging database for objects carrying Demeter tags and asks
//! the server-side grouping procedure to process each tagged application.
//! Applications whose grouping keeps failing are suppressed for the rest of
//! the process lifetime.
//!
//! # Layout
//!
//! - [`config`]: configuration document, validation and overrides
//! - [`graph`]: session traits and the Neo4j HTTP implementation
//! - [`scanner`]: tag discovery
//! - [`grouping`]: grouping procedure calls
//! - [`tracker`]: failure counting and suppression
//! - [`watchdog`]: the poll loop
//! - [`logging`]: `tracing` subscriber setup

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod graph;
pub mod grouping;
pub mod logging;
pub mod scanner;
pub mod tracker;
pub mod watchdog;

pub use config::Config;
pub use error::Error;
pub use graph::{GraphSession, HttpSessionProvider, SessionProvider};
pub use tracker::{FailureOutcome, FailureTracker};
pub use watchdog::{CycleReport, Watchdog, WatchdogConfig, WatchdogStats};

/// Version of the demeter-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

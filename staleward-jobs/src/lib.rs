//! # Staleward Jobs
//!
//! The `staleward` binary: loads configuration, wires the PostgreSQL host
//! store, the Redis event bus and the metrics push gateway into a
//! [`staleward_core::JobOrchestrator`], and maps run outcomes to exit codes.
//!
//! | Exit code | Meaning                                  |
//! |-----------|------------------------------------------|
//! | 0         | run finished with no failed hosts        |
//! | 1         | run finished but some hosts failed       |
//! | 2         | fatal error, run aborted                 |

#![allow(missing_docs)]

pub mod app;
pub mod cli;
pub mod exit;
pub mod signals;

//! The soakgen log load generator.
//!
//! This library supports the soakgen binary found elsewhere in this project.
//! soakgen writes log records of a fixed size at a fixed rate into a log
//! collection agent, either through a rotating file the agent tails or through
//! the agent's forward socket, to measure how the agent holds up under steady
//! load over long periods.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod scheduler;
pub mod sink;

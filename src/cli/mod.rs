//! Command line interface module
//!
//! Argument parsing and the runner that wires configuration, the remote
//! store and the docker engine into a [`Synchronizer`](crate::sync::Synchronizer).

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;

//! Docker Blob Sync Library
//!
//! Moves Docker images between a local engine and a blob container,
//! transferring only the layers the other side does not already hold.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod image;
pub mod output;
pub mod remote;
pub mod resolver;
pub mod staging;
pub mod sync;
pub mod transfer;

pub use config::Config;
pub use engine::{ContainerEngine, DockerCli, LocalCatalog};
pub use error::{Result, SyncError};
pub use output::OutputManager;
pub use remote::RemoteStore;
pub use sync::Synchronizer;

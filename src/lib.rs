//! This crate delivers queued messages to an SFTP endpoint as files.
//! It includes modules for data types, batching and orchestration, the
//! transfer layer (sessions, uploads, transports), errors and configuration.

pub mod types; // Defines messages, batches, outcomes and run reports.
pub mod error; // Error taxonomy for configuration, connection and upload failures.
pub mod transfer; // Sessions, uploads and the transports behind them.
pub mod batch; // Splits runs into batches and processes them concurrently.
pub mod config; // Defines and loads system configuration.

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use config::Config;
pub use error::{RelayError, TransferError};
pub use batch::{BatchOrchestrator, RunCoordinator};

//! Batch Processing Module
//!
//! This module handles the batched transfer pipeline:
//! - Batcher: Splits a run's messages into fixed-size batches
//! - BatchOrchestrator: Uploads one batch over one scoped session
//! - RunCoordinator: Runs all batches concurrently and aggregates outcomes

mod batcher;
mod coordinator;
pub mod orchestrator;


pub use batcher::{Batcher, Batches, split};
pub use coordinator::RunCoordinator;
pub use orchestrator::BatchOrchestrator;

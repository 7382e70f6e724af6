//! Run Coordinator Module
//!
//! Entry point for one invocation: splits the incoming messages into batches,
//! runs every batch concurrently and folds the per-message outcomes into a
//! single `RunReport`. Waits for all batches; one failing batch never cuts the
//! others short.

use super::{Batcher, BatchOrchestrator, orchestrator::fail_all};
use crate::{
    FailureReason, Message, RunReport,
    config::Config,
    error::RelayError,
    transfer::{SessionManager, Transport, Uploader},
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct RunCoordinator {
    orchestrator: Arc<BatchOrchestrator>,
}

impl RunCoordinator {
    pub fn new(orchestrator: BatchOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wire a coordinator for `config` on top of `transport`
    ///
    /// # Errors
    /// `InvalidConfiguration` when `config` does not pass `Config::validate`.
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, RelayError> {
        config.validate()?;
        let sessions = SessionManager::new(transport, config.sftp.clone());
        let uploader = Uploader::new(config.upload.clone());
        Ok(Self::new(BatchOrchestrator::new(sessions, uploader)))
    }

    /// Deliver `messages` in batches of `batch_size`
    ///
    /// # Errors
    /// Only `InvalidConfiguration`, before any work starts. Transfer failures
    /// are reported per message inside the returned `RunReport`.
    pub async fn run(&self, messages: Vec<Message>, batch_size: usize) -> Result<RunReport, RelayError> {
        let batcher = Batcher::new(batch_size)?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let (messages, duplicates_skipped) = drop_duplicates(messages);
        let batches = batcher.split(messages);
        let total_messages = batches.total_messages();
        let batch_count = batches.len();

        info!(
            %run_id,
            messages = total_messages,
            batches = batch_count,
            batch_size,
            "Processing {} messages.",
            total_messages
        );

        let mut handles = Vec::with_capacity(batch_count);
        for batch in batches {
            let batch_id = batch.batch_id;
            let message_ids: Vec<String> = batch.message_ids().map(str::to_string).collect();
            let orchestrator = Arc::clone(&self.orchestrator);
            let handle = tokio::spawn(async move { orchestrator.process_batch(batch).await });
            handles.push((batch_id, message_ids, handle));
        }

        let mut outcomes = HashMap::with_capacity(total_messages);
        for (batch_id, message_ids, handle) in handles {
            match handle.await {
                Ok(report) => outcomes.extend(report.outcomes),
                Err(e) => {
                    error!(%run_id, batch_id, "Batch task died: {}", e);
                    outcomes.extend(fail_all(message_ids, FailureReason::Unexpected(e.to_string())));
                }
            }
        }

        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_messages,
            batches: batch_count,
            succeeded,
            failed,
            duplicates_skipped,
            outcomes,
        };

        info!(
            %run_id,
            total = report.total_messages,
            succeeded = report.succeeded,
            failed = report.failed,
            batches = report.batches,
            "All messages processed."
        );
        Ok(report)
    }
}

/// Keep the first message for every id; later copies are dropped
fn drop_duplicates(messages: Vec<Message>) -> (Vec<Message>, usize) {
    let mut seen = HashSet::with_capacity(messages.len());
    let mut unique = Vec::with_capacity(messages.len());
    let mut skipped = 0;

    for message in messages {
        if seen.insert(message.message_id.clone()) {
            unique.push(message);
        } else {
            warn!(message_id = %message.message_id, "Duplicate message in run, skipping");
            skipped += 1;
        }
    }
    (unique, skipped)
}

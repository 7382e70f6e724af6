//! Batch Orchestrator Module
//!
//! This module drives one batch from session acquisition to release.
//!
//! # Flow
//! 1. Open one session for the batch (scoped; released on every exit path)
//! 2. Spawn one upload task per message, all sharing that session
//! 3. Await every task, collecting an outcome per message id
//! 4. Release the session only after the last task has finished
//!
//! Uploads take turns on the session's connection, so the tasks overlap only
//! in their waiting, never on the wire.

use crate::{
    BatchReport, Batch, FailureReason, Message, UploadOutcome,
    error::RelayError,
    transfer::{Session, SessionManager, Uploader},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Batch orchestrator
///
/// Stateless between batches; one instance can process many batches
/// concurrently, each with its own session.
pub struct BatchOrchestrator {
    sessions: SessionManager,
    uploader: Arc<Uploader>,
}

impl BatchOrchestrator {
    /// Creates a new batch orchestrator
    ///
    /// # Arguments
    /// * `sessions` - Opens one session per batch against the configured endpoint
    /// * `uploader` - Writes individual messages over a session
    pub fn new(sessions: SessionManager, uploader: Uploader) -> Self {
        Self {
            sessions,
            uploader: Arc::new(uploader),
        }
    }

    /// Upload every message of `batch`, returning one outcome per message id
    ///
    /// A failed upload never stops its siblings. If the session cannot be
    /// opened, every message fails with `FailureReason::Connection` and no
    /// upload is attempted.
    pub async fn process_batch(&self, batch: Batch) -> BatchReport {
        let batch_id = batch.batch_id;
        let message_ids: Vec<String> = batch.message_ids().map(str::to_string).collect();
        debug!(batch_id, messages = message_ids.len(), "Processing batch");

        let uploader = Arc::clone(&self.uploader);
        let messages = batch.messages;
        let result = self
            .sessions
            .scoped(batch_id, move |session| upload_all(session, uploader, messages))
            .await;

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(RelayError::Connection(e)) => {
                error!(batch_id, "Could not open session, failing {} messages: {}", message_ids.len(), e);
                fail_all(message_ids, FailureReason::Connection(e.to_string()))
            }
            Err(e) => {
                error!(batch_id, "Batch aborted: {}", e);
                fail_all(message_ids, FailureReason::Unexpected(e.to_string()))
            }
        };

        let report = BatchReport { batch_id, outcomes };
        info!(
            batch_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Batch complete"
        );
        report
    }
}

async fn upload_all(
    session: Arc<Session>,
    uploader: Arc<Uploader>,
    messages: Vec<Message>,
) -> HashMap<String, UploadOutcome> {
    let handles: Vec<(String, JoinHandle<UploadOutcome>)> = messages
        .into_iter()
        .map(|message| {
            let session = Arc::clone(&session);
            let uploader = Arc::clone(&uploader);
            let message_id = message.message_id.clone();
            let handle = tokio::spawn(async move { uploader.upload(&session, &message).await });
            (message_id, handle)
        })
        .collect();

    let mut outcomes = HashMap::with_capacity(handles.len());
    for (message_id, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(message_id = %message_id, "Upload task died: {}", e);
                UploadOutcome::failure(FailureReason::Unexpected(e.to_string()))
            }
        };
        outcomes.insert(message_id, outcome);
    }
    outcomes
}

pub(crate) fn fail_all(
    message_ids: Vec<String>,
    reason: FailureReason,
) -> HashMap<String, UploadOutcome> {
    message_ids
        .into_iter()
        .map(|id| (id, UploadOutcome::failure(reason.clone())))
        .collect()
}

use crate::error::RelayError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unit of work delivered by the queue trigger
///
/// The body is treated as UTF-8 text but kept as raw bytes so nothing is
/// re-encoded on the way to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub body: Bytes,
}

impl Message {
    pub fn new(message_id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
        }
    }
}

/// Wire shape of a message as read by the binary (`[{"message_id": .., "body": ..}]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub body: String,
}

impl From<InboundMessage> for Message {
    fn from(inbound: InboundMessage) -> Self {
        Message::new(inbound.message_id, inbound.body)
    }
}

/// Parse a JSON array of inbound messages
pub fn parse_messages(json: &str) -> Result<Vec<Message>, RelayError> {
    let inbound: Vec<InboundMessage> = serde_json::from_str(json)?;
    Ok(inbound.into_iter().map(Message::from).collect())
}

/// Ordered group of messages that share one transfer session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Sequential id within a run, starting at 1
    pub batch_id: u64,
    pub messages: Vec<Message>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.message_id.as_str())
    }
}

/// Why a single message did not reach the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("transmission failed: {0}")]
    Transmission(String),
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("transfer timed out after {0} ms")]
    Timeout(u64),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Terminal per-message result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Success { destination: String },
    Failure { reason: FailureReason },
}

impl UploadOutcome {
    pub fn failure(reason: FailureReason) -> Self {
        UploadOutcome::Failure { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            UploadOutcome::Success { .. } => None,
            UploadOutcome::Failure { reason } => Some(reason),
        }
    }
}

/// Outcomes of one batch, keyed by message id
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub batch_id: u64,
    pub outcomes: HashMap<String, UploadOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Aggregate result of a full run, handed back to the trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_messages: usize,
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duplicates_skipped: usize,
    pub outcomes: HashMap<String, UploadOutcome>,
}

impl RunReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }

    /// Every failed message as an `Upload` error, for callers that want to
    /// surface individual reasons
    pub fn errors(&self) -> Vec<RelayError> {
        let mut errors: Vec<RelayError> = self
            .outcomes
            .iter()
            .filter_map(|(message_id, outcome)| {
                outcome.failure_reason().map(|reason| RelayError::Upload {
                    message_id: message_id.clone(),
                    reason: reason.clone(),
                })
            })
            .collect();
        errors.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        errors
    }
}

//! Uploader Module
//!
//! Writes one message to `{remote_directory}/{file_name}` over a session.
//! The payload goes to the connection straight from memory. With
//! `atomic_rename` enabled the bytes land under a hidden staging name first
//! and are renamed into place once fully written, so a truncated transfer
//! never shows up under the final name.

use super::{Session, SessionGuard};
use crate::{
    config::UploadConfig,
    error::TransferError,
    types::{FailureReason, Message, UploadOutcome},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Remote location of one message's file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    directory: String,
    file_name: String,
}

impl Destination {
    pub fn path(&self) -> String {
        join_remote(&self.directory, &self.file_name)
    }

    /// Hidden sibling of the final path, unique per session
    pub fn staging_path(&self, session_id: Uuid) -> String {
        let staged = format!(".{}.{}.part", self.file_name, session_id.simple());
        join_remote(&self.directory, &staged)
    }

    /// Where a previously delivered file waits while it is being replaced
    pub fn backup_path(&self, session_id: Uuid) -> String {
        let parked = format!(".{}.{}.prev", self.file_name, session_id.simple());
        join_remote(&self.directory, &parked)
    }
}

pub struct Uploader {
    config: UploadConfig,
}

impl Uploader {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    /// Derive the destination for a message id
    pub fn destination_for(&self, message_id: &str) -> Result<Destination, FailureReason> {
        validate_message_id(message_id)?;
        Ok(Destination {
            directory: self.config.remote_directory.clone(),
            file_name: self
                .config
                .file_name_template
                .replace("{message_id}", message_id),
        })
    }

    /// Upload `message` over `session`, never panicking on transport errors
    pub async fn upload(&self, session: &Session, message: &Message) -> UploadOutcome {
        let destination = self.destination_for(&message.message_id);
        let outcome = match &destination {
            Err(reason) => UploadOutcome::failure(reason.clone()),
            Ok(destination) => match self.transmit(session, message, destination).await {
                Ok(()) => UploadOutcome::Success {
                    destination: destination.path(),
                },
                Err(e) => UploadOutcome::failure(e.into_failure()),
            },
        };

        match &outcome {
            UploadOutcome::Success { destination } => info!(
                message_id = %message.message_id,
                destination = %destination,
                bytes = message.body.len(),
                "File uploaded"
            ),
            UploadOutcome::Failure { reason } => warn!(
                message_id = %message.message_id,
                destination = %destination.as_ref().map(Destination::path).unwrap_or_default(),
                session_id = %session.id(),
                "Upload failed: {}",
                reason
            ),
        }
        outcome
    }

    async fn transmit(
        &self,
        session: &Session,
        message: &Message,
        destination: &Destination,
    ) -> Result<(), TransferError> {
        let mut guard = session.exclusive().await;
        let final_path = destination.path();

        if !self.config.atomic_rename {
            return guard.write_file(&final_path, message.body.clone()).await;
        }

        let staging = destination.staging_path(session.id());
        let backup = destination.backup_path(session.id());
        let result = stage_and_commit(&mut guard, message, &staging, &final_path, &backup).await;
        if result.is_err() {
            if let Err(e) = guard.remove(&staging).await {
                debug!(path = %staging, "Staging cleanup skipped: {}", e);
            }
        }
        result
    }
}

async fn stage_and_commit(
    guard: &mut SessionGuard<'_>,
    message: &Message,
    staging: &str,
    final_path: &str,
    backup: &str,
) -> Result<(), TransferError> {
    guard.write_file(staging, message.body.clone()).await?;

    let first = match guard.rename(staging, final_path).await {
        Ok(()) => return Ok(()),
        Err(TransferError::Timeout(ms)) => return Err(TransferError::Timeout(ms)),
        Err(first) => first,
    };

    // Only an existing file (a redelivered message) justifies a second attempt
    if !guard.exists(final_path).await.unwrap_or(false) {
        return Err(first);
    }
    debug!(path = %final_path, "Rename failed ({}), replacing existing file", first);

    // The previous file is parked, not deleted, until the new one is in place
    if guard.rename(final_path, backup).await.is_err() {
        return Err(first);
    }
    match guard.rename(staging, final_path).await {
        Ok(()) => {
            if let Err(e) = guard.remove(backup).await {
                warn!(path = %backup, "Could not remove replaced file: {}", e);
            }
            Ok(())
        }
        Err(e) => {
            if let Err(restore) = guard.rename(backup, final_path).await {
                warn!(path = %final_path, backup = %backup, "Could not restore previous file: {}", restore);
            }
            Err(e)
        }
    }
}

fn validate_message_id(message_id: &str) -> Result<(), FailureReason> {
    let invalid = |why: &str| -> Result<(), FailureReason> {
        Err(FailureReason::InvalidDestination(format!(
            "message id {:?} {}",
            message_id, why
        )))
    };

    if message_id.is_empty() {
        return invalid("is empty");
    }
    if message_id == "." || message_id == ".." {
        return invalid("is a relative path component");
    }
    if message_id.contains(['/', '\\']) {
        return invalid("contains a path separator");
    }
    if message_id.chars().any(char::is_control) {
        return invalid("contains control characters");
    }
    Ok(())
}

fn join_remote(directory: &str, name: &str) -> String {
    format!("{}/{}", directory.trim_end_matches('/'), name)
}

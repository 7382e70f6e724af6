//! Transfer Module
//!
//! This module owns everything that talks to the remote endpoint:
//! - Transport / Connection: the protocol seam (SFTP or in-memory)
//! - SessionManager: one scoped connection per batch
//! - Uploader: writes a single message to its destination path

mod memory;
mod session;
mod sftp;
mod uploader;

#[cfg(test)]
mod tests;

pub use memory::MemoryTransport;
pub use session::{Session, SessionGuard, SessionManager};
pub use sftp::SftpTransport;
pub use uploader::{Destination, Uploader};

use crate::{config::SftpConfig, error::TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

/// Hands out connections to the remote endpoint
pub trait Transport: Send + Sync {
    /// A connection that has not been established yet
    fn connection(&self) -> Box<dyn Connection>;
}

/// A connection owned by exactly one session
///
/// `close` is the teardown for every acquisition attempt, so it must accept
/// a connection whose `connect` failed or never finished.
#[async_trait]
pub trait Connection: Send {
    /// Establish and authenticate against `endpoint`
    async fn connect(&mut self, endpoint: &SftpConfig) -> Result<(), TransferError>;

    /// Create or truncate `path` and write `contents` to it
    async fn write_file(&mut self, path: &str, contents: Bytes) -> Result<(), TransferError>;

    /// Rename `from` to `to`. Fails if `to` already exists on servers that
    /// do not support overwriting renames.
    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError>;

    async fn remove(&mut self, path: &str) -> Result<(), TransferError>;

    async fn exists(&mut self, path: &str) -> Result<bool, TransferError>;

    /// Tear the connection down
    async fn close(self: Box<Self>) -> Result<(), TransferError>;
}

/// Runs `fut`, failing with `TransferError::Timeout` once `limit` elapses
pub(crate) async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransferError::Timeout(limit.as_millis() as u64))?,
        None => fut.await,
    }
}

//! Transfer Session Module
//!
//! A session wraps one connection for the lifetime of one batch. The
//! connection sits behind an async mutex which doubles as the per-session
//! execution lock: uploads sharing a session take turns on the wire.

use super::{with_timeout, Connection, Transport};
use crate::{
    config::SftpConfig,
    error::{RelayError, TransferError},
};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One live connection scoped to a batch
pub struct Session {
    id: Uuid,
    batch_id: u64,
    connection: Mutex<Option<Box<dyn Connection>>>,
    transfer_timeout: Option<Duration>,
}

impl Session {
    fn new(batch_id: u64, connection: Box<dyn Connection>, transfer_timeout: Option<Duration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            connection: Mutex::new(Some(connection)),
            transfer_timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Wait for exclusive use of the connection
    pub async fn exclusive(&self) -> SessionGuard<'_> {
        SessionGuard {
            connection: self.connection.lock().await,
            timeout: self.transfer_timeout,
        }
    }

    /// Take the connection out and close it.
    ///
    /// Returns `Ok(false)` when the session was already released.
    async fn release(&self) -> Result<bool, TransferError> {
        let connection = self.connection.lock().await.take();
        match connection {
            Some(connection) => connection.close().await.map(|_| true),
            None => Ok(false),
        }
    }
}

/// Exclusive access to a session's connection
///
/// Every operation is bounded by the session's transfer timeout, if any.
pub struct SessionGuard<'a> {
    connection: MutexGuard<'a, Option<Box<dyn Connection>>>,
    timeout: Option<Duration>,
}

impl SessionGuard<'_> {
    fn connection(&mut self) -> Result<&mut (dyn Connection + 'static), TransferError> {
        self.connection
            .as_deref_mut()
            .ok_or(TransferError::SessionClosed)
    }

    pub async fn write_file(&mut self, path: &str, contents: Bytes) -> Result<(), TransferError> {
        let timeout = self.timeout;
        let connection = self.connection()?;
        with_timeout(timeout, connection.write_file(path, contents)).await
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError> {
        let timeout = self.timeout;
        let connection = self.connection()?;
        with_timeout(timeout, connection.rename(from, to)).await
    }

    pub async fn remove(&mut self, path: &str) -> Result<(), TransferError> {
        let timeout = self.timeout;
        let connection = self.connection()?;
        with_timeout(timeout, connection.remove(path)).await
    }

    pub async fn exists(&mut self, path: &str) -> Result<bool, TransferError> {
        let timeout = self.timeout;
        let connection = self.connection()?;
        with_timeout(timeout, connection.exists(path)).await
    }
}

/// Opens and releases sessions against one configured endpoint
#[derive(Clone)]
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    endpoint: Arc<SftpConfig>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, endpoint: SftpConfig) -> Self {
        Self {
            transport,
            endpoint: Arc::new(endpoint),
        }
    }

    /// Establish a session for `batch_id`
    ///
    /// Bounded by the endpoint's connect timeout when one is configured. A
    /// failed attempt is still torn down before the error is returned.
    pub async fn open(&self, batch_id: u64) -> Result<Session, TransferError> {
        let mut connection = self.transport.connection();
        let connected = with_timeout(
            self.endpoint.connect_timeout(),
            connection.connect(&self.endpoint),
        )
        .await;
        if let Err(e) = connected {
            if let Err(close) = connection.close().await {
                debug!(batch_id, "Teardown after failed connect: {}", close);
            }
            return Err(e);
        }
        let session = Session::new(batch_id, connection, self.endpoint.transfer_timeout());

        info!(
            batch_id,
            session_id = %session.id,
            endpoint = %self.endpoint.endpoint(),
            "Session opened"
        );
        Ok(session)
    }

    /// Release the session's connection. Errors are logged, never returned.
    pub async fn close(&self, session: &Session) {
        match session.release().await {
            Ok(true) => debug!(batch_id = session.batch_id, session_id = %session.id, "Session closed"),
            Ok(false) => debug!(session_id = %session.id, "Session already closed"),
            Err(e) => warn!(
                batch_id = session.batch_id,
                session_id = %session.id,
                "Failed to close session cleanly: {}",
                e
            ),
        }
    }

    /// Run `body` with a freshly opened session and release it afterwards
    ///
    /// The session is closed exactly once whether `body` returns normally or
    /// panics. A panic in `body` is reported as `RelayError::Unexpected`;
    /// failing to open is reported as `RelayError::Connection`.
    pub async fn scoped<F, Fut, T>(&self, batch_id: u64, body: F) -> Result<T, RelayError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::new(self.open(batch_id).await?);

        let result = tokio::spawn(body(Arc::clone(&session))).await;
        self.close(&session).await;

        result.map_err(|e| RelayError::Unexpected(format!("batch {} aborted: {}", batch_id, e)))
    }
}

//! In-memory transport
//!
//! Keeps uploaded files in process memory. Used for dry runs and to
//! observe session behavior: it counts connects, closes, writes and
//! renames, tracks overlapping writes per connection, and can be told to
//! fail in the ways a real server does.

use super::{Connection, Transport};
use crate::{config::SftpConfig, error::TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    files: Mutex<BTreeMap<String, Bytes>>,
    failing_ids: Mutex<HashSet<String>>,
    write_delay: Mutex<Option<Duration>>,
    unreachable: AtomicBool,
    fail_close: AtomicBool,
    fail_renames: AtomicBool,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    writes: AtomicUsize,
    renames: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Transport whose remote filesystem is a map of path to contents
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every connection attempt
    pub fn unreachable(self) -> Self {
        self.state.unreachable.store(true, Ordering::SeqCst);
        self
    }

    /// Fail writes to the file named after `message_id`, and to its hidden
    /// staging siblings
    pub fn fail_writes_for(self, message_id: impl Into<String>) -> Self {
        self.state.failing_ids.lock().insert(message_id.into());
        self
    }

    /// Make `close` report an error (the connection is still counted as closed)
    pub fn fail_on_close(self) -> Self {
        self.state.fail_close.store(true, Ordering::SeqCst);
        self
    }

    /// Refuse every rename, as a server without rename permission would
    pub fn fail_renames(self) -> Self {
        self.state.fail_renames.store(true, Ordering::SeqCst);
        self
    }

    /// Hold every write for `delay` before it completes
    pub fn with_write_delay(self, delay: Duration) -> Self {
        *self.state.write_delay.lock() = Some(delay);
        self
    }

    /// Pre-populate a remote file
    pub fn insert_file(&self, path: impl Into<String>, contents: impl Into<Bytes>) {
        self.state.files.lock().insert(path.into(), contents.into());
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.state.files.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.files.lock().keys().cloned().collect()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn rename_count(&self) -> usize {
        self.state.renames.load(Ordering::SeqCst)
    }

    /// Highest number of writes ever in flight on a single connection
    pub fn max_in_flight_writes(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn connection(&self) -> Box<dyn Connection> {
        Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            in_flight: Arc::new(AtomicUsize::new(0)),
            connected: false,
        })
    }
}

struct MemoryConnection {
    state: Arc<MemoryState>,
    in_flight: Arc<AtomicUsize>,
    connected: bool,
}

impl MemoryConnection {
    fn ensure_connected(&self) -> Result<(), TransferError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransferError::SessionClosed)
        }
    }
}

/// True when the last path segment is the file for `message_id` or one of
/// its hidden `.{file}.*` siblings
fn names_message(path: &str, message_id: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    let name = name.strip_prefix('.').unwrap_or(name);
    name == message_id
        || name
            .strip_prefix(message_id)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Decrements the in-flight counter even if the write future is dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn connect(&mut self, endpoint: &SftpConfig) -> Result<(), TransferError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(TransferError::Unreachable {
                endpoint: endpoint.endpoint(),
                message: "connection refused".to_string(),
            });
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn write_file(&mut self, path: &str, contents: Bytes) -> Result<(), TransferError> {
        self.ensure_connected()?;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(Arc::clone(&self.in_flight));
        self.state.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.state.writes.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .state
            .failing_ids
            .lock()
            .iter()
            .any(|id| names_message(path, id));
        if failing {
            return Err(TransferError::remote(path, "write refused"));
        }

        self.state.files.lock().insert(path.to_string(), contents);
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError> {
        self.ensure_connected()?;
        self.state.renames.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_renames.load(Ordering::SeqCst) {
            return Err(TransferError::remote(from, "permission denied"));
        }

        let mut files = self.state.files.lock();
        if files.contains_key(to) {
            return Err(TransferError::remote(to, "file already exists"));
        }
        let contents = files
            .remove(from)
            .ok_or_else(|| TransferError::remote(from, "no such file"))?;
        files.insert(to.to_string(), contents);
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<(), TransferError> {
        self.ensure_connected()?;
        self.state
            .files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| TransferError::remote(path, "no such file"))
    }

    async fn exists(&mut self, path: &str) -> Result<bool, TransferError> {
        self.ensure_connected()?;
        Ok(self.state.files.lock().contains_key(path))
    }

    /// Counted for every connection handed out, connected or not
    async fn close(self: Box<Self>) -> Result<(), TransferError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(TransferError::remote("", "disconnect failed"));
        }
        Ok(())
    }
}

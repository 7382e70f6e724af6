//! Batcher Module
//!
//! Splits the messages of a run into fixed-size, order-preserving batches.
//! Each batch is assigned a sequential ID starting at 1.

use crate::{Batch, Message, error::RelayError};
use std::sync::Arc;

/// Batch partitioning engine
///
/// Holds the validated batch size; splitting itself has no side effects.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    /// Maximum messages per batch (always > 0)
    batch_size: usize,
}

impl Batcher {
    /// Creates a new batcher
    ///
    /// # Errors
    /// `InvalidConfiguration` if `batch_size` is zero
    pub fn new(batch_size: usize) -> Result<Self, RelayError> {
        if batch_size == 0 {
            return Err(RelayError::invalid_config("batch size must be a positive integer"));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazily partition `messages`
    ///
    /// The returned iterator knows its length up front and can be cloned or
    /// restarted to enumerate the same batches again.
    pub fn split(&self, messages: Vec<Message>) -> Batches {
        Batches {
            messages: messages.into(),
            batch_size: self.batch_size,
            offset: 0,
            next_batch_id: 1,
        }
    }
}

/// Lazy, restartable sequence of batches
#[derive(Debug, Clone)]
pub struct Batches {
    messages: Arc<[Message]>,
    batch_size: usize,
    offset: usize,
    next_batch_id: u64,
}

impl Batches {
    /// A fresh iterator over the same messages, positioned at the first batch
    pub fn restart(&self) -> Self {
        Self {
            messages: Arc::clone(&self.messages),
            batch_size: self.batch_size,
            offset: 0,
            next_batch_id: 1,
        }
    }

    pub fn total_messages(&self) -> usize {
        self.messages.len()
    }
}

impl Iterator for Batches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.offset >= self.messages.len() {
            return None;
        }

        let end = (self.offset + self.batch_size).min(self.messages.len());
        let batch = Batch {
            batch_id: self.next_batch_id,
            messages: self.messages[self.offset..end].to_vec(),
        };

        self.offset = end;
        self.next_batch_id += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.messages.len() - self.offset;
        let batches = remaining.div_ceil(self.batch_size);
        (batches, Some(batches))
    }
}

impl ExactSizeIterator for Batches {}

/// Convenience wrapper: validate `batch_size` and split in one call
pub fn split(messages: Vec<Message>, batch_size: usize) -> Result<Batches, RelayError> {
    Ok(Batcher::new(batch_size)?.split(messages))
}

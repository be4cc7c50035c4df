//! Chunk reconstruction buffer.
//!
//! Chunks of one inbound transfer may arrive in any order, while the output
//! sink must be written strictly in order. The buffer sits between the two:
//! the transport side calls [`ChunkReconstructionBuffer::deliver`] as chunks
//! arrive, and the consumer asks for index after index with
//! [`ChunkReconstructionBuffer::await_index`].
//!
//! Each index is in one of three states: empty, arrived (payload held until
//! consumed), or awaited (a consumer waits for it). A chunk that arrives
//! for an awaited index goes straight to the waiter and is never stored.
//! Once consumed, a payload is released, so the buffer only holds chunks
//! that arrived ahead of the consumer.
//!
//! Cancelling the buffer fails every pending and future wait with
//! [`Error::TransferCancelled`] and drops all held payloads.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};

enum Slot {
    Arrived(Vec<u8>),
    Awaited(oneshot::Sender<Vec<u8>>),
}

/// Reorders the chunks of one inbound transfer.
pub struct ChunkReconstructionBuffer {
    chunk_count: u64,
    slots: HashMap<u64, Slot>,
    /// Every index below this has been handed to a consumer.
    watermark: u64,
    cancelled: bool,
}

impl std::fmt::Debug for ChunkReconstructionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReconstructionBuffer")
            .field("chunk_count", &self.chunk_count)
            .field("buffered", &self.buffered_len())
            .field("waiting", &self.pending_waiters())
            .field("watermark", &self.watermark)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl ChunkReconstructionBuffer {
    /// Create a buffer for a transfer of `chunk_count` chunks.
    #[must_use]
    pub fn new(chunk_count: u64) -> Self {
        Self {
            chunk_count,
            slots: HashMap::new(),
            watermark: 0,
            cancelled: false,
        }
    }

    /// Number of chunks in the transfer.
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Whether the buffer was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of payloads held for indices not yet consumed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Arrived(_)))
            .count()
    }

    /// Number of indices a consumer is waiting on.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Awaited(_)))
            .count()
    }

    /// Wait for the payload of chunk `index`.
    ///
    /// Resolves immediately if the chunk already arrived. Indices are meant
    /// to be awaited in ascending order; a chunk delivered for an index
    /// below the highest awaited one is treated as already consumed.
    pub fn await_index(&mut self, index: u64) -> ChunkWait {
        let (tx, rx) = oneshot::channel();
        let wait = ChunkWait { rx };

        if self.cancelled {
            return wait;
        }
        if index >= self.chunk_count {
            tracing::warn!(
                "Awaiting chunk {} of a {}-chunk transfer",
                index,
                self.chunk_count
            );
            return wait;
        }

        self.watermark = self.watermark.max(index + 1);
        match self.slots.remove(&index) {
            Some(Slot::Arrived(data)) => {
                let _ = tx.send(data);
            }
            Some(Slot::Awaited(_)) => {
                tracing::warn!("Chunk {} awaited twice, replacing waiter", index);
                self.slots.insert(index, Slot::Awaited(tx));
            }
            None => {
                self.slots.insert(index, Slot::Awaited(tx));
            }
        }
        wait
    }

    /// Hand over the payload of chunk `index`.
    ///
    /// Returns `false` if the chunk was dropped: the buffer is cancelled,
    /// the index is out of range, or the index was already consumed.
    pub fn deliver(&mut self, index: u64, data: Vec<u8>) -> bool {
        if self.cancelled {
            tracing::debug!("Dropping chunk {} for cancelled transfer", index);
            return false;
        }
        if index >= self.chunk_count {
            tracing::warn!(
                "Dropping chunk {} of a {}-chunk transfer",
                index,
                self.chunk_count
            );
            return false;
        }

        match self.slots.remove(&index) {
            Some(Slot::Awaited(tx)) => {
                if tx.send(data).is_err() {
                    tracing::debug!("Consumer of chunk {} is gone", index);
                }
                true
            }
            Some(Slot::Arrived(_)) => {
                tracing::warn!("Duplicate chunk {}, keeping the latest", index);
                self.slots.insert(index, Slot::Arrived(data));
                true
            }
            None if index < self.watermark => {
                tracing::warn!("Dropping chunk {}, already consumed", index);
                false
            }
            None => {
                self.slots.insert(index, Slot::Arrived(data));
                true
            }
        }
    }

    /// Cancel the buffer, failing every wait and releasing held payloads.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.slots.clear();
    }
}

/// A pending wait for one chunk.
///
/// Resolves to the payload, or [`Error::TransferCancelled`] if the buffer
/// was cancelled (or dropped) first.
#[derive(Debug)]
#[must_use = "a chunk wait does nothing unless awaited"]
pub struct ChunkWait {
    rx: oneshot::Receiver<Vec<u8>>,
}

impl Future for ChunkWait {
    type Output = Result<Vec<u8>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| Error::TransferCancelled))
    }
}

//! Transport seam.
//!
//! WebDrop does not establish connections itself. It runs over a transport
//! that already knows which peers are reachable and offers two primitives:
//! addressed control messages and addressed binary chunks with delivery
//! progress.
//!
//! Outbound traffic goes through the [`Transport`] trait. Inbound traffic is
//! handed to the coordinator, either by calling its `on_*` methods directly
//! or by feeding it a stream of [`TransportEvent`]s.
//!
//! [`memory::MemoryNetwork`] connects peers within one process.

pub mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{Chunk, ControlMessage, PeerId};

/// Outbound primitives a transport must provide.
pub trait Transport: Send + Sync {
    /// Send a control message to `peer`.
    fn send_control<'a>(
        &'a self,
        peer: &'a PeerId,
        message: &'a ControlMessage,
    ) -> BoxFuture<'a, Result<()>>;

    /// Send a chunk to `peer`.
    ///
    /// The transport reports the fraction of the chunk physically
    /// transmitted through `progress` and resolves once the chunk is fully
    /// delivered, or with an error if delivery failed.
    fn send_chunk<'a>(
        &'a self,
        peer: &'a PeerId,
        chunk: Chunk,
        progress: DeliveryProgress,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Reporter for the delivery progress of one chunk.
///
/// Fractions are expected in `[0, 1]`, but the transfer engine clamps
/// whatever it receives.
#[derive(Debug, Clone)]
pub struct DeliveryProgress {
    tx: mpsc::UnboundedSender<f64>,
}

impl DeliveryProgress {
    /// Create a reporter and the receiver its fractions arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<f64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report that `fraction` of the chunk has been transmitted.
    pub fn report(&self, fraction: f64) {
        let _ = self.tx.send(fraction);
    }
}

/// Inbound notifications from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer became reachable
    PeerJoined(PeerId),
    /// A peer is gone
    PeerLeft(PeerId),
    /// A control message arrived
    Control {
        /// Sending peer
        from: PeerId,
        /// The message
        message: ControlMessage,
    },
    /// A chunk arrived
    Chunk {
        /// Sending peer
        from: PeerId,
        /// The chunk
        chunk: Chunk,
    },
}

//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub that peers join. Every joined peer gets a
//! [`MemoryTransport`] for outbound traffic and a receiver of
//! [`TransportEvent`]s for inbound traffic. Traffic goes through the same
//! encode/decode path a network transport would use, so the wire format is
//! exercised end to end.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};

use super::{DeliveryProgress, Transport, TransportEvent};
use crate::error::{Error, Result};
use crate::protocol::{self, Chunk, ControlMessage, PeerId};

/// Number of progress reports made while delivering one chunk.
const DEFAULT_PROGRESS_STEPS: u32 = 4;

type Inboxes = HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>;

/// A hub connecting peers within one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<Inboxes>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network as `peer_id`.
    ///
    /// Existing peers are told about the newcomer, and the newcomer is told
    /// about every existing peer. Joining twice with the same id replaces
    /// the previous inbox.
    pub async fn join(
        &self,
        peer_id: PeerId,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peers = self.peers.lock().await;

        for (existing, inbox) in peers.iter() {
            if *existing == peer_id {
                continue;
            }
            let _ = inbox.send(TransportEvent::PeerJoined(peer_id.clone()));
            let _ = tx.send(TransportEvent::PeerJoined(existing.clone()));
        }
        peers.insert(peer_id.clone(), tx);
        drop(peers);

        tracing::debug!("{} joined the memory network", peer_id);

        let transport = MemoryTransport {
            local: peer_id,
            network: self.clone(),
            progress_steps: DEFAULT_PROGRESS_STEPS,
        };
        (transport, rx)
    }

    /// Leave the network. Remaining peers are told the peer is gone.
    pub async fn leave(&self, peer_id: &PeerId) {
        let mut peers = self.peers.lock().await;
        if peers.remove(peer_id).is_none() {
            return;
        }
        for inbox in peers.values() {
            let _ = inbox.send(TransportEvent::PeerLeft(peer_id.clone()));
        }
        tracing::debug!("{} left the memory network", peer_id);
    }

    /// Ids of every joined peer.
    pub async fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn deliver(&self, to: &PeerId, event: TransportEvent) -> Result<()> {
        let peers = self.peers.lock().await;
        let inbox = peers
            .get(to)
            .ok_or_else(|| Error::PeerNotConnected(to.to_string()))?;
        inbox
            .send(event)
            .map_err(|_| Error::Transport(format!("inbox of '{to}' is closed")))
    }
}

/// Outbound half of a peer joined to a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
    progress_steps: u32,
}

impl MemoryTransport {
    /// Id of the local peer.
    #[must_use]
    pub const fn local_peer(&self) -> &PeerId {
        &self.local
    }

    /// Set how many progress reports are made per chunk (at least one).
    #[must_use]
    pub fn with_progress_steps(mut self, steps: u32) -> Self {
        self.progress_steps = steps.max(1);
        self
    }
}

impl Transport for MemoryTransport {
    fn send_control<'a>(
        &'a self,
        peer: &'a PeerId,
        message: &'a ControlMessage,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let wire = message.encode()?;
            let message = ControlMessage::decode(&wire)?;
            tracing::trace!("{} -> {}: {}", self.local, peer, message.kind());
            self.network
                .deliver(
                    peer,
                    TransportEvent::Control {
                        from: self.local.clone(),
                        message,
                    },
                )
                .await
        })
    }

    fn send_chunk<'a>(
        &'a self,
        peer: &'a PeerId,
        chunk: Chunk,
        progress: DeliveryProgress,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let frame = protocol::encode_chunk(&chunk)?;
            drop(chunk);

            for step in 1..=self.progress_steps {
                progress.report(f64::from(step) / f64::from(self.progress_steps));
                tokio::task::yield_now().await;
            }

            let chunk = protocol::decode_chunk(&frame)?;
            tracing::trace!(
                "{} -> {}: chunk {} of {}",
                self.local,
                peer,
                chunk.index(),
                chunk.transfer_id()
            );
            self.network
                .deliver(
                    peer,
                    TransportEvent::Chunk {
                        from: self.local.clone(),
                        chunk,
                    },
                )
                .await
        })
    }
}

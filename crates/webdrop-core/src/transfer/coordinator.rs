//! Transfer coordinator.
//!
//! The coordinator owns one [`PeerSession`] per reachable peer and is the
//! single entry point for everything the transport reports: peers joining
//! and leaving, control messages, and chunks.
//!
//! Incoming offers are handed to an [`OfferHandler`] as [`IncomingOffer`]s.
//! The handler decides when (and whether) to accept; the coordinator never
//! blocks on it, so one undecided offer does not hold up other peers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::events::{EventReceiver, TransferEvent};
use super::session::{PeerSession, SessionContext, TransferSettings};
use crate::error::{Error, Result};
use crate::file::{format_size, OutgoingFile};
use crate::identity::LocalIdentity;
use crate::protocol::{Chunk, ControlMessage, PeerId, PeerInfo, TransferMeta};
use crate::sink::SinkFactory;
use crate::transport::{Transport, TransportEvent};

/// Decides what to do with incoming offers.
pub trait OfferHandler: Send + Sync {
    /// Called once per announced transfer.
    ///
    /// Dropping the offer without answering leaves the sender waiting,
    /// which is a silent rejection.
    fn on_offer(&self, offer: IncomingOffer);
}

impl<F> OfferHandler for F
where
    F: Fn(IncomingOffer) + Send + Sync,
{
    fn on_offer(&self, offer: IncomingOffer) {
        self(offer);
    }
}

/// Accepts every offer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAccept;

impl OfferHandler for AutoAccept {
    fn on_offer(&self, offer: IncomingOffer) {
        tokio::spawn(async move {
            let name = offer.meta().name.clone();
            if let Err(e) = offer.accept().await {
                tracing::warn!("Failed to accept {}: {}", name, e);
            }
        });
    }
}

/// Forwards offers to a channel so another task can decide on them.
#[derive(Debug, Clone)]
pub struct OfferQueue {
    tx: mpsc::UnboundedSender<IncomingOffer>,
}

impl OfferQueue {
    /// Create a queue and the receiver offers arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IncomingOffer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OfferHandler for OfferQueue {
    fn on_offer(&self, offer: IncomingOffer) {
        if self.tx.send(offer).is_err() {
            tracing::debug!("Offer queue closed, offer dropped");
        }
    }
}

/// A transfer a peer offered to us.
#[derive(Debug)]
#[must_use = "an offer is silently rejected unless accepted"]
pub struct IncomingOffer {
    meta: TransferMeta,
    session: PeerSession,
}

impl IncomingOffer {
    /// The offered transfer.
    pub const fn meta(&self) -> &TransferMeta {
        &self.meta
    }

    /// The offering peer.
    pub fn peer_id(&self) -> &PeerId {
        self.session.peer_id()
    }

    /// Display metadata of the offering peer.
    pub async fn peer_info(&self) -> PeerInfo {
        self.session.info().await
    }

    /// Accept the offer: prepare storage, then tell the sender to stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the session closed in the meantime or the accept
    /// message could not be sent.
    pub async fn accept(self) -> Result<()> {
        self.session.init_storage_for_meta(self.meta.clone()).await?;
        let id = self.meta.id;
        let result = self
            .session
            .send_control(&ControlMessage::Accept { meta: self.meta })
            .await;
        if result.is_err() {
            self.session.abandon_inbound(id).await;
        }
        result
    }

    /// Decline the offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the decline message could not be sent.
    pub async fn decline(self) -> Result<()> {
        tracing::info!("Declining {} from {}", self.meta.name, self.peer_id());
        self.session
            .send_control(&ControlMessage::Decline { meta: self.meta })
            .await
    }
}

/// Owns every peer session and routes transport traffic to them.
pub struct TransferCoordinator {
    identity: LocalIdentity,
    ctx: SessionContext,
    offers: Arc<dyn OfferHandler>,
    sessions: Mutex<HashMap<PeerId, PeerSession>>,
}

impl std::fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("identity", &self.identity)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl TransferCoordinator {
    /// Create a coordinator and the stream of events it emits.
    pub fn new(
        identity: LocalIdentity,
        settings: TransferSettings,
        transport: Arc<dyn Transport>,
        sinks: Arc<dyn SinkFactory>,
        offers: Arc<dyn OfferHandler>,
    ) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            identity,
            ctx: SessionContext::new(transport, sinks, events_tx, settings),
            offers,
            sessions: Mutex::new(HashMap::new()),
        };
        (coordinator, events_rx)
    }

    /// The identity presented to peers.
    #[must_use]
    pub const fn local_identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Display metadata sent in introductions.
    #[must_use]
    pub const fn local_info(&self) -> &PeerInfo {
        &self.identity.info
    }

    /// The session with `peer_id`, if connected.
    pub async fn session(&self, peer_id: &PeerId) -> Option<PeerSession> {
        self.sessions.lock().await.get(peer_id).cloned()
    }

    /// Ids of every connected peer, sorted.
    pub async fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.sessions.lock().await.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// A peer became reachable: open a session and introduce ourselves.
    pub async fn on_peer_joined(&self, peer_id: PeerId) {
        let session = PeerSession::new(peer_id.clone(), self.ctx.clone());
        let stale = self
            .sessions
            .lock()
            .await
            .insert(peer_id.clone(), session.clone());
        if let Some(stale) = stale {
            tracing::debug!("{} rejoined, closing its previous session", peer_id);
            stale.close().await;
        }

        tracing::info!("Peer {} joined", peer_id);
        self.ctx.emit(TransferEvent::PeerJoined {
            peer_id: peer_id.clone(),
        });

        let intro = ControlMessage::Introduce(self.identity.info.clone());
        if let Err(e) = session.send_control(&intro).await {
            tracing::warn!("Failed to introduce ourselves to {}: {}", peer_id, e);
        }
    }

    /// A peer is gone: close and forget its session.
    pub async fn on_peer_left(&self, peer_id: &PeerId) {
        let Some(session) = self.sessions.lock().await.remove(peer_id) else {
            tracing::debug!("Unknown peer {} left", peer_id);
            return;
        };

        session.close().await;
        tracing::info!("Peer {} left", peer_id);
        self.ctx.emit(TransferEvent::PeerLeft {
            peer_id: peer_id.clone(),
        });
    }

    /// Route a control message from `peer_id`.
    pub async fn on_control_message(&self, peer_id: &PeerId, message: ControlMessage) {
        let Some(session) = self.session(peer_id).await else {
            tracing::debug!("{} from unknown peer {}", message.kind(), peer_id);
            return;
        };

        match message {
            ControlMessage::Introduce(info) => session.set_info(info).await,
            ControlMessage::Announce { meta } => {
                if let Err(e) = meta.validate() {
                    tracing::warn!("Ignoring offer from {}: {}", peer_id, e);
                    return;
                }
                if session.is_closed() {
                    return;
                }
                tracing::info!(
                    "{} offers {} ({})",
                    peer_id,
                    meta.name,
                    format_size(meta.size)
                );
                self.offers.on_offer(IncomingOffer { meta, session });
            }
            ControlMessage::Accept { meta } => session.on_accept_meta(&meta).await,
            ControlMessage::Decline { meta } => session.on_decline_meta(&meta).await,
        }
    }

    /// Route a chunk from `peer_id`.
    pub async fn on_chunk_received(&self, peer_id: &PeerId, chunk: Chunk) {
        match self.session(peer_id).await {
            Some(session) => session.on_receive_chunk(chunk).await,
            None => tracing::debug!(
                "Chunk {} of {} from unknown peer {}",
                chunk.index(),
                chunk.transfer_id(),
                peer_id
            ),
        }
    }

    /// Route one transport event.
    pub async fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerJoined(peer_id) => self.on_peer_joined(peer_id).await,
            TransportEvent::PeerLeft(peer_id) => self.on_peer_left(&peer_id).await,
            TransportEvent::Control { from, message } => {
                self.on_control_message(&from, message).await;
            }
            TransportEvent::Chunk { from, chunk } => self.on_chunk_received(&from, chunk).await,
        }
    }

    /// Route transport events until the stream ends.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        tracing::debug!("Transport event stream ended");
    }

    /// Offer files to a connected peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotConnected`] if there is no session with the peer.
    pub async fn send_files(
        &self,
        peer_id: &PeerId,
        files: Vec<OutgoingFile>,
    ) -> Result<Vec<TransferMeta>> {
        let session = self
            .session(peer_id)
            .await
            .ok_or_else(|| Error::PeerNotConnected(peer_id.to_string()))?;
        Ok(session.send_files(files).await)
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<PeerSession> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        for session in sessions {
            session.close().await;
            self.ctx.emit(TransferEvent::PeerLeft {
                peer_id: session.peer_id().clone(),
            });
        }
        tracing::debug!("Transfer coordinator shut down");
    }
}

//! Notifications emitted by the transfer engine.

use tokio::sync::mpsc;

use crate::protocol::{PeerId, PeerInfo, TransferId};

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Sending files
    Send,
    /// Receiving files
    Receive,
}

/// Something the embedding application may want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A peer became reachable; its metadata is still unknown
    PeerJoined {
        /// The peer
        peer_id: PeerId,
    },
    /// A peer introduced itself
    PeerUpdated {
        /// The peer
        peer_id: PeerId,
        /// Its display metadata
        info: PeerInfo,
    },
    /// A peer left and its session was closed
    PeerLeft {
        /// The peer
        peer_id: PeerId,
    },
    /// Aggregate progress of a session changed
    ProgressChanged {
        /// The peer the session belongs to
        peer_id: PeerId,
        /// Progress in `[0, 1]`
        progress: f64,
    },
    /// A transfer finished
    TransferCompleted {
        /// The peer on the other end
        peer_id: PeerId,
        /// The transfer
        transfer_id: TransferId,
        /// File name
        name: String,
        /// Whether the file was sent or received
        direction: TransferDirection,
    },
    /// A transfer was cut short because its session closed
    TransferCancelled {
        /// The peer on the other end
        peer_id: PeerId,
        /// The transfer
        transfer_id: TransferId,
        /// File name
        name: String,
        /// Whether the file was being sent or received
        direction: TransferDirection,
    },
}

impl TransferEvent {
    /// The peer this event concerns.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::PeerJoined { peer_id }
            | Self::PeerUpdated { peer_id, .. }
            | Self::PeerLeft { peer_id }
            | Self::ProgressChanged { peer_id, .. }
            | Self::TransferCompleted { peer_id, .. }
            | Self::TransferCancelled { peer_id, .. } => peer_id,
        }
    }

    /// User-facing notification text, for events that warrant one.
    #[must_use]
    pub fn notification(&self) -> Option<String> {
        match self {
            Self::TransferCompleted { name, .. } => Some(format!("{name} file transfer completed.")),
            Self::TransferCancelled { name, .. } => Some(format!("{name} file transfer cancelled.")),
            _ => None,
        }
    }
}

/// Sending half of the event stream.
pub type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Receiving half of the event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

//! File transfer engine for WebDrop.
//!
//! This module handles transfers between peers over an existing transport:
//!
//! - Offering files and streaming them once accepted
//! - Reassembling chunks that arrive out of order
//! - Aggregate progress per peer
//! - Cancellation when a peer leaves
//!
//! ## Transfer Flow
//!
//! ```text
//! Sender                                  Receiver
//!   |-------- announce {meta} ------------->|
//!   |                                       | offer handler decides
//!   |<------- accept {meta} ----------------| (storage ready first)
//!   |-------- chunk 0 --------------------->|
//!   |-------- chunk 1 --------------------->| reorder, write in order
//!   |-------- ...                           |
//! ```
//!
//! - Default chunk size: 1MB
//! - One chunk in flight per transfer; transfers run concurrently
//! - No retries and no resume: a failed transfer is abandoned

pub mod accounting;
pub mod buffer;
pub mod coordinator;
pub mod events;
pub mod session;

pub use accounting::{ByteAccounting, DeliveryTracker};
pub use buffer::{ChunkReconstructionBuffer, ChunkWait};
pub use coordinator::{AutoAccept, IncomingOffer, OfferHandler, OfferQueue, TransferCoordinator};
pub use events::{EventReceiver, EventSender, TransferDirection, TransferEvent};
pub use session::{PeerSession, SessionContext, TransferSettings};

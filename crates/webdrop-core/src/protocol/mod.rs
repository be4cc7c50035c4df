//! WebDrop transfer protocol.
//!
//! Peers exchange two kinds of traffic over an already-established channel:
//! small JSON control messages and binary chunks.
//!
//! ## Control Messages
//!
//! | kind        | payload                        | sent by      |
//! |-------------|--------------------------------|--------------|
//! | `introduce` | `{displayName, deviceName}`    | joining peer |
//! | `announce`  | `{meta}`                       | sender       |
//! | `accept`    | `{meta}`                       | receiver     |
//! | `decline`   | `{meta}`                       | receiver     |
//!
//! ## Chunk Frame
//!
//! ```text
//! ┌──────────────┬─────────────────────┬────────────┬──────────────────┐
//! │ Header len   │ Header (JSON)       │ Checksum   │ Data             │
//! │ 4 bytes (BE) │ {...meta,chunkIndex}│ 8 bytes BE │ variable length  │
//! └──────────────┴─────────────────────┴────────────┴──────────────────┘
//! ```
//!
//! The checksum is xxHash64 of the data. Transports that carry structured
//! metadata natively may skip the frame and pass [`ChunkHeader`] directly.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of a single transfer.
pub type TransferId = Uuid;

/// Placeholder for peer metadata that has not arrived yet.
pub const UNKNOWN: &str = "Unknown";

/// Maximum encoded chunk header size (64 KB)
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Size of the fixed part of a chunk frame (length prefix + checksum).
const FRAME_OVERHEAD: usize = 4 + 8;

/// Opaque identity of a remote peer, assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Display metadata a peer introduces itself with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Human-friendly name
    #[serde(default)]
    pub display_name: String,
    /// Device class, e.g. "MacOS" or "Android"
    #[serde(default)]
    pub device_name: String,
}

impl Default for PeerInfo {
    fn default() -> Self {
        Self {
            display_name: UNKNOWN.to_string(),
            device_name: UNKNOWN.to_string(),
        }
    }
}

impl PeerInfo {
    /// Create peer info from a display name and device class.
    pub fn new(display_name: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            device_name: device_name.into(),
        }
    }

    /// Classify the peer's device for presentation.
    #[must_use]
    pub fn device_kind(&self) -> DeviceKind {
        DeviceKind::from_device_name(&self.device_name)
    }
}

/// Coarse device form factor, derived from the device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Desktop or laptop
    Desktop,
    /// Tablet
    Tablet,
    /// Phone or anything unrecognized
    Phone,
}

impl DeviceKind {
    /// Classify a device class string.
    ///
    /// Unrecognized classes are treated as phones.
    #[must_use]
    pub fn from_device_name(device_name: &str) -> Self {
        match device_name {
            "IPad" => Self::Tablet,
            "Windows" | "Generic Linux" | "Chrome OS" | "MacOS" => Self::Desktop,
            _ => Self::Phone,
        }
    }
}

/// Metadata describing one file offered for transfer.
///
/// Immutable once announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMeta {
    /// Unique transfer identifier
    pub id: TransferId,
    /// File name
    pub name: String,
    /// MIME type
    #[serde(default)]
    pub mime_type: String,
    /// File size in bytes
    pub size: u64,
    /// Chunk size in bytes
    pub chunk_size: u64,
}

impl TransferMeta {
    /// Create metadata for a new transfer with a fresh id.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64, chunk_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            chunk_size,
        }
    }

    /// Check that metadata received from a peer is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::ProtocolError(format!(
                "transfer {} has zero chunk size",
                self.id
            )));
        }
        Ok(())
    }

    /// Number of chunks the file is split into.
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.size.div_ceil(self.chunk_size)
    }

    /// Byte range covered by chunk `index`, or `None` if out of range.
    #[must_use]
    pub fn chunk_range(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.size);
        Some(start..end)
    }

    /// Length in bytes of chunk `index` (0 if out of range).
    #[must_use]
    pub fn chunk_len(&self, index: u64) -> u64 {
        self.chunk_range(index).map_or(0, |r| r.end - r.start)
    }
}

/// Tag attached to every chunk on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    /// Metadata of the transfer this chunk belongs to
    #[serde(flatten)]
    pub meta: TransferMeta,
    /// Position of the chunk within the file
    pub chunk_index: u64,
}

/// A binary chunk of a file together with its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Transfer metadata and index
    pub header: ChunkHeader,
    /// Chunk payload
    pub data: Vec<u8>,
}

impl Chunk {
    /// Create a chunk for `meta` at `index`.
    #[must_use]
    pub fn new(meta: TransferMeta, index: u64, data: Vec<u8>) -> Self {
        Self {
            header: ChunkHeader {
                meta,
                chunk_index: index,
            },
            data,
        }
    }

    /// Id of the transfer this chunk belongs to.
    #[must_use]
    pub const fn transfer_id(&self) -> TransferId {
        self.header.meta.id
    }

    /// Index of the chunk within its transfer.
    #[must_use]
    pub const fn index(&self) -> u64 {
        self.header.chunk_index
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// A control message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Peer introduces its display metadata
    Introduce(PeerInfo),
    /// Sender offers a transfer
    Announce {
        /// Offered transfer
        meta: TransferMeta,
    },
    /// Receiver authorizes streaming
    Accept {
        /// Accepted transfer
        meta: TransferMeta,
    },
    /// Receiver refuses the offer
    Decline {
        /// Declined transfer
        meta: TransferMeta,
    },
}

impl ControlMessage {
    /// The wire `kind` tag of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Introduce(_) => "introduce",
            Self::Announce { .. } => "announce",
            Self::Accept { .. } => "accept",
            Self::Decline { .. } => "decline",
        }
    }

    /// Encode the message as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_payload(self)
    }

    /// Decode a message from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid control message.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_payload(data)
    }
}

/// Encode a message payload to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a message payload from JSON bytes.
///
/// # Errors
///
/// Returns an error if deserialization fails.
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a chunk into a single binary frame.
///
/// # Errors
///
/// Returns an error if the header cannot be serialized or is too large.
pub fn encode_chunk(chunk: &Chunk) -> Result<Vec<u8>> {
    let header = encode_payload(&chunk.header)?;
    if header.len() > MAX_HEADER_SIZE {
        return Err(Error::ProtocolError(format!(
            "chunk header too large: {} bytes",
            header.len()
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let header_len = header.len() as u32;
    let checksum = xxhash_rust::xxh64::xxh64(&chunk.data, 0);

    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + header.len() + chunk.data.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(&chunk.data);
    Ok(buf)
}

/// Decode a binary chunk frame.
///
/// # Errors
///
/// Returns an error if the frame is truncated, the header is invalid, or
/// the checksum does not match.
pub fn decode_chunk(frame: &[u8]) -> Result<Chunk> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(Error::ProtocolError("chunk frame too short".to_string()));
    }

    let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if header_len > MAX_HEADER_SIZE || frame.len() < FRAME_OVERHEAD + header_len {
        return Err(Error::ProtocolError(format!(
            "invalid chunk header length: {header_len}"
        )));
    }

    let header: ChunkHeader = decode_payload(&frame[4..4 + header_len])?;

    let checksum_start = 4 + header_len;
    let mut checksum_bytes = [0u8; 8];
    checksum_bytes.copy_from_slice(&frame[checksum_start..checksum_start + 8]);
    let checksum = u64::from_be_bytes(checksum_bytes);

    let data = frame[checksum_start + 8..].to_vec();
    if xxhash_rust::xxh64::xxh64(&data, 0) != checksum {
        return Err(Error::ProtocolError(format!(
            "checksum mismatch for chunk {} of transfer {}",
            header.chunk_index, header.meta.id
        )));
    }

    Ok(Chunk { header, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn meta(size: u64, chunk_size: u64) -> TransferMeta {
        TransferMeta::new("report.pdf", "application/pdf", size, chunk_size)
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(meta(0, MIB).chunk_count(), 0);
        assert_eq!(meta(1, MIB).chunk_count(), 1);
        assert_eq!(meta(MIB, MIB).chunk_count(), 1);
        assert_eq!(meta(MIB + 1, MIB).chunk_count(), 2);
        assert_eq!(meta(5 * MIB / 2, MIB).chunk_count(), 3);
        assert_eq!(meta(10, 0).chunk_count(), 0);
    }

    #[test]
    fn test_chunk_ranges_cover_file() {
        let m = meta(5 * MIB / 2, MIB);
        assert_eq!(m.chunk_range(0), Some(0..MIB));
        assert_eq!(m.chunk_range(1), Some(MIB..2 * MIB));
        assert_eq!(m.chunk_range(2), Some(2 * MIB..5 * MIB / 2));
        assert_eq!(m.chunk_range(3), None);
        assert_eq!(m.chunk_len(2), MIB / 2);
        assert_eq!(m.chunk_len(3), 0);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        assert!(meta(10, 0).validate().is_err());
        assert!(meta(10, 4).validate().is_ok());
    }

    #[test]
    fn test_transfer_ids_are_unique() {
        assert_ne!(meta(1, 1).id, meta(1, 1).id);
    }

    #[test]
    fn test_control_message_wire_format() {
        let msg = ControlMessage::Introduce(PeerInfo::new("Brave Otter", "MacOS"));
        let json: serde_json::Value =
            serde_json::from_slice(&msg.encode().expect("encode")).expect("json");

        assert_eq!(json["kind"], "introduce");
        assert_eq!(json["displayName"], "Brave Otter");
        assert_eq!(json["deviceName"], "MacOS");

        let m = meta(42, 16);
        let msg = ControlMessage::Announce { meta: m.clone() };
        let json: serde_json::Value =
            serde_json::from_slice(&msg.encode().expect("encode")).expect("json");
        assert_eq!(json["kind"], "announce");
        assert_eq!(json["meta"]["mimeType"], "application/pdf");
        assert_eq!(json["meta"]["chunkSize"], 16);

        let decoded = ControlMessage::decode(&msg.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, ControlMessage::Announce { meta: m });
    }

    #[test]
    fn test_decode_unknown_kind_fails() {
        let result = ControlMessage::decode(br#"{"kind":"teleport","meta":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_introduce_missing_fields_default_empty() {
        let msg = ControlMessage::decode(br#"{"kind":"introduce"}"#).expect("decode");
        assert_eq!(msg, ControlMessage::Introduce(PeerInfo::new("", "")));
    }

    #[test]
    fn test_chunk_header_flattens_meta() {
        let chunk = Chunk::new(meta(10, 4), 2, vec![9, 9]);
        let json = serde_json::to_value(&chunk.header).expect("json");
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["name"], "report.pdf");
        assert_eq!(json["size"], 10);
    }

    #[test]
    fn test_chunk_frame_encode_decode() {
        let chunk = Chunk::new(meta(10, 4), 1, vec![1, 2, 3, 4]);
        let frame = encode_chunk(&chunk).expect("encode");
        let decoded = decode_chunk(&frame).expect("decode");
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_chunk_frame_detects_corruption() {
        let chunk = Chunk::new(meta(10, 4), 1, vec![1, 2, 3, 4]);
        let mut frame = encode_chunk(&chunk).expect("encode");
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(decode_chunk(&frame).is_err());
        assert!(decode_chunk(&frame[..6]).is_err());
    }

    #[test]
    fn test_device_kind() {
        assert_eq!(DeviceKind::from_device_name("IPad"), DeviceKind::Tablet);
        assert_eq!(DeviceKind::from_device_name("Generic Linux"), DeviceKind::Desktop);
        assert_eq!(DeviceKind::from_device_name("Android"), DeviceKind::Phone);
        assert_eq!(PeerInfo::default().device_kind(), DeviceKind::Phone);
    }
}

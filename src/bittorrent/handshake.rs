//! The fixed 68-byte `BitTorrent` handshake.
//!
//! Layout: 1 length byte (19), the protocol string, 8 reserved bytes, the
//! 20-byte infohash and the 20-byte peer id. The reserved bytes advertise
//! optional capabilities; the crawler sets the extension-protocol bit
//! (BEP-10) because metadata exchange rides on it.
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

use crate::storage::models::PeerCapabilities;

pub const HANDSHAKE_LEN: usize = 68;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// Bit 5 of reserved byte 5, the extension protocol (BEP-10).
const EXTENSION_BIT: (usize, u8) = (5, 0x10);
/// Bit 0 of reserved byte 7, the DHT port message (BEP-5).
const DHT_BIT: (usize, u8) = (7, 0x01);
/// Bit 2 of reserved byte 7, the fast extension (BEP-6).
const FAST_BIT: (usize, u8) = (7, 0x04);

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: NodeId,
}

/// Error produced when a remote handshake cannot be accepted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("the handshake must be 68 bytes, got {len}")]
    WrongLength { len: usize },

    #[error("the handshake protocol string is not \"BitTorrent protocol\"")]
    WrongProtocol,
}

impl Handshake {
    /// The handshake the crawler sends: extension protocol and DHT bits set.
    #[must_use]
    pub fn outgoing(info_hash: InfoHash, peer_id: NodeId) -> Self {
        let mut reserved = [0u8; 8];
        reserved[EXTENSION_BIT.0] |= EXTENSION_BIT.1;
        reserved[DHT_BIT.0] |= DHT_BIT.1;

        Self {
            reserved,
            info_hash,
            peer_id,
        }
    }

    /// # Errors
    ///
    /// Will return `Err` when the buffer is not a 68-byte `BitTorrent`
    /// handshake.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() != HANDSHAKE_LEN {
            return Err(HandshakeError::WrongLength { len: bytes.len() });
        }
        if bytes[0] != 19 || &bytes[1..20] != PROTOCOL {
            return Err(HandshakeError::WrongProtocol);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&bytes[20..28]);

        Ok(Self {
            reserved,
            info_hash: InfoHash::try_from(&bytes[28..48]).expect("the slice is 20 bytes"),
            peer_id: NodeId::try_from(&bytes[48..68]).expect("the slice is 20 bytes"),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut bytes = [0u8; HANDSHAKE_LEN];
        bytes[0] = 19;
        bytes[1..20].copy_from_slice(PROTOCOL);
        bytes[20..28].copy_from_slice(&self.reserved);
        bytes[28..48].copy_from_slice(&self.info_hash.bytes());
        bytes[48..68].copy_from_slice(&self.peer_id.bytes());
        bytes
    }

    #[must_use]
    pub fn supports_extension_protocol(&self) -> bool {
        self.reserved[EXTENSION_BIT.0] & EXTENSION_BIT.1 != 0
    }

    /// The capabilities advertised in the reserved bytes, as persisted on
    /// the peer record.
    #[must_use]
    pub fn capabilities(&self) -> PeerCapabilities {
        PeerCapabilities {
            supports_dht: self.reserved[DHT_BIT.0] & DHT_BIT.1 != 0,
            supports_extension_protocol: self.supports_extension_protocol(),
            supports_fast_protocol: self.reserved[FAST_BIT.0] & FAST_BIT.1 != 0,
        }
    }
}

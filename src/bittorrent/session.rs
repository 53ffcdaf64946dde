//! A single outbound metadata download session.
//!
//! The session walks the fixed protocol sequence: TCP connect, `BitTorrent`
//! handshake, extension handshake, then piece requests until the whole info
//! dictionary is assembled and verified against the infohash. Any deviation
//! ends the session in a failure; there are no retries inside a session.
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

use super::extended::{
    piece_count, ExtendedError, ExtensionHandshake, UtMetadataMessage, EXTENDED_HANDSHAKE_ID, EXTENDED_MESSAGE_ID,
    MAX_METADATA_SIZE, METADATA_PIECE_LEN,
};
use super::handshake::{Handshake, HandshakeError, HANDSHAKE_LEN};
use super::metadata::{info_hash_of, MetadataError, MetadataInfo};
use super::BITTORRENT_LOG_TARGET;
use crate::storage::models::PeerCapabilities;

/// At most this many piece requests are outstanding at once.
const REQUEST_PIPELINE: u64 = 4;

/// Upper bound on a single wire message. Metadata pieces are 16 KiB plus a
/// small header; anything much larger is not a message we asked for.
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// The states a session moves through, in order. `Done` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    ExtHandshaking,
    Requesting,
    Receiving,
    Done,
    Failed,
}

/// Why a session failed.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("the operation timed out")]
    Timeout,

    #[error("the peer closed the connection")]
    PeerClosed,

    #[error("io error: {source}")]
    Io { source: std::io::Error },

    #[error("bad handshake: {source}")]
    Handshake {
        #[from]
        source: HandshakeError,
    },

    #[error("the peer answered the handshake with a different infohash")]
    InfoHashMismatch,

    #[error("the peer does not speak the extension protocol")]
    NoExtensionProtocol,

    #[error("the peer did not offer ut_metadata or a metadata size")]
    NoUtMetadata,

    #[error("the advertised metadata size {size} exceeds the cap")]
    MetadataTooLarge { size: u64 },

    #[error("the peer rejected the request for piece {piece}")]
    Rejected { piece: u64 },

    #[error("the peer sent data for piece {piece}, which was not requested")]
    UnexpectedPiece { piece: u64 },

    #[error("a metadata piece had the wrong length")]
    PieceSizeMismatch,

    #[error("a wire message of {len} bytes exceeds the message cap")]
    MessageTooLarge { len: usize },

    #[error("the assembled metadata does not hash to the infohash")]
    HashMismatch,

    #[error("bad extended message: {source}")]
    Extended {
        #[from]
        source: ExtendedError,
    },

    #[error("the downloaded info dictionary does not parse: {source}")]
    Metadata {
        #[from]
        source: MetadataError,
    },
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::PeerClosed,
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io { source: err },
        }
    }
}

/// The result of a successful session: the verified metadata and the
/// capabilities the peer advertised in its handshake.
#[derive(Debug)]
pub struct SessionOutcome {
    pub metadata: MetadataInfo,
    pub capabilities: PeerCapabilities,
    pub peer_id: NodeId,
}

/// An outbound metadata download against one peer.
pub struct Session {
    endpoint: Endpoint,
    info_hash: InfoHash,
    local_peer_id: NodeId,
    listen_port: u16,
    connect_timeout: Duration,
    state: SessionState,
}

impl Session {
    #[must_use]
    pub fn new(endpoint: Endpoint, info_hash: InfoHash, local_peer_id: NodeId, listen_port: u16, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            info_hash,
            local_peer_id,
            listen_port,
            connect_timeout,
            state: SessionState::Connecting,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion. The caller bounds the whole call with
    /// the session deadline.
    ///
    /// # Errors
    ///
    /// Will return `Err` when any protocol step fails; the session is then
    /// in the `Failed` state and the connection is dropped.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let result = self.download().await;

        self.state = match result {
            Ok(_) => SessionState::Done,
            Err(_) => SessionState::Failed,
        };

        result
    }

    async fn download(&mut self) -> Result<SessionOutcome, SessionError> {
        let addr = SocketAddr::from(self.endpoint);

        self.state = SessionState::Connecting;
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SessionError::Timeout)??;

        self.state = SessionState::Handshaking;
        let remote = self.exchange_handshakes(&mut stream).await?;

        if remote.info_hash != self.info_hash {
            return Err(SessionError::InfoHashMismatch);
        }
        if !remote.supports_extension_protocol() {
            return Err(SessionError::NoExtensionProtocol);
        }

        self.state = SessionState::ExtHandshaking;
        let (ut_metadata_id, metadata_size) = self.exchange_extension_handshakes(&mut stream).await?;

        let pieces = piece_count(metadata_size);
        let mut received: Vec<Option<Vec<u8>>> = vec![None; usize::try_from(pieces).expect("the size cap bounds the piece count")];
        let mut next_request = 0u64;
        let mut outstanding = 0u64;
        let mut received_count = 0u64;

        self.state = SessionState::Requesting;
        while received_count < pieces {
            while outstanding < REQUEST_PIPELINE && next_request < pieces {
                let payload = UtMetadataMessage::request_payload(next_request);
                write_extended(&mut stream, ut_metadata_id, &payload).await?;
                next_request += 1;
                outstanding += 1;
            }

            self.state = SessionState::Receiving;
            let (message_id, payload) = read_message(&mut stream).await?;

            // the remote also sends bitfield, have and friends; only
            // ut_metadata replies matter here
            if message_id != EXTENDED_MESSAGE_ID || payload.first() != Some(&super::extended::LOCAL_UT_METADATA_ID) {
                continue;
            }

            match UtMetadataMessage::from_bytes(&payload[1..])? {
                UtMetadataMessage::Data { piece, total_size, bytes } => {
                    if piece >= pieces {
                        return Err(SessionError::UnexpectedPiece { piece });
                    }
                    if total_size != metadata_size {
                        return Err(SessionError::PieceSizeMismatch);
                    }
                    if u64::try_from(bytes.len()).unwrap_or(u64::MAX) != expected_piece_len(piece, pieces, metadata_size) {
                        return Err(SessionError::PieceSizeMismatch);
                    }

                    let slot = &mut received[usize::try_from(piece).expect("checked against the piece count")];
                    if slot.is_none() {
                        *slot = Some(bytes);
                        received_count += 1;
                        outstanding = outstanding.saturating_sub(1);
                    }
                }
                UtMetadataMessage::Reject { piece } => {
                    return Err(SessionError::Rejected { piece });
                }
                UtMetadataMessage::Request { .. } => {
                    // the crawler holds no metadata to serve; ignore
                }
            }
        }

        let mut raw = Vec::with_capacity(usize::try_from(metadata_size).expect("bounded by the size cap"));
        for piece in received.into_iter().flatten() {
            raw.extend_from_slice(&piece);
        }

        if info_hash_of(&raw) != self.info_hash {
            return Err(SessionError::HashMismatch);
        }

        let metadata = MetadataInfo::from_bytes(&raw)?;

        debug!(target: BITTORRENT_LOG_TARGET, info_hash = %self.info_hash, name = %metadata.name, "metadata downloaded");

        Ok(SessionOutcome {
            metadata,
            capabilities: remote.capabilities(),
            peer_id: remote.peer_id,
        })
    }

    async fn exchange_handshakes(&self, stream: &mut TcpStream) -> Result<Handshake, SessionError> {
        let outgoing = Handshake::outgoing(self.info_hash, self.local_peer_id);
        stream.write_all(&outgoing.to_bytes()).await?;

        let mut buffer = [0u8; HANDSHAKE_LEN];
        tokio::time::timeout(self.connect_timeout, stream.read_exact(&mut buffer))
            .await
            .map_err(|_| SessionError::Timeout)??;

        Ok(Handshake::from_bytes(&buffer)?)
    }

    async fn exchange_extension_handshakes(&self, stream: &mut TcpStream) -> Result<(u8, u64), SessionError> {
        let payload = ExtensionHandshake::outgoing_payload(self.listen_port);
        write_extended(stream, EXTENDED_HANDSHAKE_ID, &payload).await?;

        // read until the remote's extension handshake shows up
        let handshake = loop {
            let (message_id, payload) = tokio::time::timeout(self.connect_timeout, read_message(stream))
                .await
                .map_err(|_| SessionError::Timeout)??;

            if message_id == EXTENDED_MESSAGE_ID && payload.first() == Some(&EXTENDED_HANDSHAKE_ID) {
                break ExtensionHandshake::from_bytes(&payload[1..])?;
            }
        };

        let Some(ut_metadata_id) = handshake.ut_metadata_id else {
            return Err(SessionError::NoUtMetadata);
        };
        let Some(metadata_size) = handshake.metadata_size else {
            return Err(SessionError::NoUtMetadata);
        };
        if metadata_size == 0 {
            return Err(SessionError::NoUtMetadata);
        }
        if metadata_size > MAX_METADATA_SIZE {
            return Err(SessionError::MetadataTooLarge { size: metadata_size });
        }

        Ok((ut_metadata_id, metadata_size))
    }
}

fn expected_piece_len(piece: u64, pieces: u64, metadata_size: u64) -> u64 {
    if piece + 1 == pieces {
        metadata_size - piece * METADATA_PIECE_LEN
    } else {
        METADATA_PIECE_LEN
    }
}

/// Writes a length-prefixed extended message: 4-byte big-endian length, the
/// message id 20, the extended id and the payload.
async fn write_extended(stream: &mut TcpStream, extended_id: u8, payload: &[u8]) -> Result<(), SessionError> {
    let len = u32::try_from(payload.len() + 2).expect("payloads are bounded by the message cap");

    let mut message = Vec::with_capacity(payload.len() + 6);
    message.extend_from_slice(&len.to_be_bytes());
    message.push(EXTENDED_MESSAGE_ID);
    message.push(extended_id);
    message.extend_from_slice(payload);

    stream.write_all(&message).await?;
    Ok(())
}

/// Reads one length-prefixed message, skipping keep-alives. Returns the
/// message id and the payload (including the extended id byte for extended
/// messages).
async fn read_message(stream: &mut TcpStream) -> Result<(u8, Vec<u8>), SessionError> {
    loop {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 {
            continue; // keep-alive
        }
        if len > MAX_MESSAGE_LEN {
            return Err(SessionError::MessageTooLarge { len });
        }

        let mut message_id = [0u8; 1];
        stream.read_exact(&mut message_id).await?;

        let mut payload = vec![0u8; len - 1];
        stream.read_exact(&mut payload).await?;

        return Ok((message_id[0], payload));
    }
}

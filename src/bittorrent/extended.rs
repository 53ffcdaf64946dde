//! The extension protocol (BEP-10) and the metadata exchange riding on it
//! (BEP-9).
//!
//! Extended messages are `BitTorrent` messages with id 20. The first payload
//! byte is the extended id: 0 for the extension handshake, otherwise the id
//! the remote assigned to a sub-protocol in its handshake `m` dictionary.
//!
//! A ut_metadata data message concatenates a bencoded header with the raw
//! piece bytes, without a delimiter; `decode_prefix` finds the boundary.
use swarmscan_bencode::{ben_int, ben_map, Value};

/// `BitTorrent` message id for extended messages.
pub const EXTENDED_MESSAGE_ID: u8 = 20;

/// Extended id of the extension handshake itself.
pub const EXTENDED_HANDSHAKE_ID: u8 = 0;

/// The id we assign to ut_metadata in our handshake `m` dictionary.
pub const LOCAL_UT_METADATA_ID: u8 = 1;

/// Metadata is transferred in 16 KiB pieces (BEP-9).
pub const METADATA_PIECE_LEN: u64 = 16 * 1024;

/// Cap on the advertised metadata size. Anything larger is a hostile or
/// broken peer.
pub const MAX_METADATA_SIZE: u64 = 10 * 1024 * 1024;

const MSG_TYPE_REQUEST: i64 = 0;
const MSG_TYPE_DATA: i64 = 1;
const MSG_TYPE_REJECT: i64 = 2;

/// Error produced when an extended payload cannot be understood.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtendedError {
    #[error("the extended payload is not valid bencode: {source}")]
    InvalidEncoding {
        #[from]
        source: swarmscan_bencode::Error,
    },

    #[error("the extended payload is missing the {field} field")]
    MissingField { field: &'static str },

    #[error("unknown ut_metadata message type {msg_type}")]
    UnknownMessageType { msg_type: i64 },
}

/// The decoded contents of an extension handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionHandshake {
    /// The remote's message id for ut_metadata, from the `m` dictionary.
    pub ut_metadata_id: Option<u8>,
    /// The size of the info dictionary in bytes.
    pub metadata_size: Option<u64>,
}

impl ExtensionHandshake {
    /// The handshake payload the crawler sends:
    /// `{ m: { ut_metadata: 1 }, p: listen_port }`.
    #[must_use]
    pub fn outgoing_payload(listen_port: u16) -> Vec<u8> {
        (ben_map! {
            "m" => ben_map! {
                "ut_metadata" => ben_int!(i64::from(LOCAL_UT_METADATA_ID))
            },
            "p" => ben_int!(i64::from(listen_port))
        })
        .encode()
    }

    /// Parses a remote extension handshake payload.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the payload is not a bencoded dictionary.
    /// Absent `m.ut_metadata` or `metadata_size` entries are not an error
    /// here; the session decides whether it can proceed without them.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, ExtendedError> {
        let value = Value::decode(payload)?;

        if value.as_dict().is_none() {
            return Err(ExtendedError::MissingField { field: "m" });
        }

        let ut_metadata_id = value
            .lookup(b"m")
            .and_then(|m| m.lookup(b"ut_metadata"))
            .and_then(Value::as_integer)
            .and_then(|id| u8::try_from(id).ok());

        let metadata_size = value
            .lookup(b"metadata_size")
            .and_then(Value::as_integer)
            .and_then(|size| u64::try_from(size).ok());

        Ok(Self {
            ut_metadata_id,
            metadata_size,
        })
    }
}

/// A ut_metadata message (BEP-9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtMetadataMessage {
    Request { piece: u64 },
    Data { piece: u64, total_size: u64, bytes: Vec<u8> },
    Reject { piece: u64 },
}

impl UtMetadataMessage {
    /// The payload of a piece request: `{ msg_type: 0, piece: i }`.
    #[must_use]
    pub fn request_payload(piece: u64) -> Vec<u8> {
        (ben_map! {
            "msg_type" => ben_int!(MSG_TYPE_REQUEST),
            "piece" => ben_int!(i64::try_from(piece).expect("piece indexes are small"))
        })
        .encode()
    }

    /// Parses a ut_metadata payload. For data messages the piece bytes are
    /// whatever follows the bencoded header.
    ///
    /// # Errors
    ///
    /// Will return `Err` for malformed headers and unknown message types.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, ExtendedError> {
        let (header, header_len) = Value::decode_prefix(payload)?;

        let msg_type = header
            .lookup(b"msg_type")
            .and_then(Value::as_integer)
            .ok_or(ExtendedError::MissingField { field: "msg_type" })?;

        let piece = header
            .lookup(b"piece")
            .and_then(Value::as_integer)
            .and_then(|piece| u64::try_from(piece).ok())
            .ok_or(ExtendedError::MissingField { field: "piece" })?;

        match msg_type {
            MSG_TYPE_REQUEST => Ok(Self::Request { piece }),
            MSG_TYPE_DATA => {
                let total_size = header
                    .lookup(b"total_size")
                    .and_then(Value::as_integer)
                    .and_then(|size| u64::try_from(size).ok())
                    .ok_or(ExtendedError::MissingField { field: "total_size" })?;

                Ok(Self::Data {
                    piece,
                    total_size,
                    bytes: payload[header_len..].to_vec(),
                })
            }
            MSG_TYPE_REJECT => Ok(Self::Reject { piece }),
            msg_type => Err(ExtendedError::UnknownMessageType { msg_type }),
        }
    }
}

/// How many pieces a metadata blob of `metadata_size` bytes spans.
#[must_use]
pub fn piece_count(metadata_size: u64) -> u64 {
    metadata_size.div_ceil(METADATA_PIECE_LEN)
}

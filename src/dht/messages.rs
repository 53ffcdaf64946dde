//! The KRPC wire format (BEP-5).
//!
//! Every DHT message is a bencoded dictionary with a transaction id `t`, a
//! kind marker `y` (`q`uery, `r`esponse or `e`rror) and a kind-specific
//! body. Node lists travel in compact form: 26 bytes per node (20-byte id,
//! 4-byte IPv4, 2-byte big-endian port); peer lists as 6-byte address
//! entries.
use std::net::{IpAddr, Ipv4Addr};

use swarmscan_bencode::{ben_bytes, ben_int, Value};
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

/// KRPC error code: generic error.
pub const ERROR_GENERIC: i64 = 201;
/// KRPC error code: server error.
pub const ERROR_SERVER: i64 = 202;
/// KRPC error code: protocol error, e.g. an invalid announce token.
pub const ERROR_PROTOCOL: i64 = 203;
/// KRPC error code: method unknown.
pub const ERROR_UNKNOWN_METHOD: i64 = 204;

const COMPACT_NODE_LEN: usize = 26;
const COMPACT_PEER_LEN: usize = 6;

/// Error produced when bytes do not form a KRPC message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("the message is not valid bencode: {source}")]
    InvalidEncoding {
        #[from]
        source: swarmscan_bencode::Error,
    },

    #[error("the message is missing the {field} field")]
    MissingField { field: &'static str },

    #[error("the message field {field} has the wrong type or value")]
    InvalidField { field: &'static str },

    #[error("unknown message kind {kind:?}")]
    UnknownKind { kind: Vec<u8> },

    #[error("unknown query method {method:?}")]
    UnknownMethod { method: Vec<u8> },
}

/// Contact information for one node, as carried in compact node lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub endpoint: Endpoint,
}

/// A KRPC query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        target: NodeId,
    },
    GetPeers {
        id: NodeId,
        info_hash: InfoHash,
    },
    AnnouncePeer {
        id: NodeId,
        info_hash: InfoHash,
        port: u16,
        token: Vec<u8>,
        /// When set, the port is taken from the UDP source address instead
        /// of the `port` argument (useful for peers behind NAT).
        implied_port: bool,
    },
}

impl Query {
    /// The id of the node that sent the query.
    #[must_use]
    pub fn sender_id(&self) -> NodeId {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => *id,
        }
    }
}

/// A KRPC response body. `nodes` and `values` are empty when the remote did
/// not include them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: NodeId,
    pub nodes: Vec<NodeInfo>,
    pub values: Vec<Endpoint>,
    pub token: Option<Vec<u8>>,
}

impl Response {
    /// A response carrying only the responder's id, the reply to `ping` and
    /// `announce_peer`.
    #[must_use]
    pub fn only_id(id: NodeId) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            values: Vec::new(),
            token: None,
        }
    }
}

/// The three message kinds of BEP-5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Query(Query),
    Response(Response),
    Error { code: i64, message: String },
}

/// A complete KRPC message: transaction id plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub transaction_id: Vec<u8>,
    pub body: MessageBody,
}

impl Message {
    #[must_use]
    pub fn query(transaction_id: Vec<u8>, query: Query) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Query(query),
        }
    }

    #[must_use]
    pub fn response(transaction_id: Vec<u8>, response: Response) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Response(response),
        }
    }

    #[must_use]
    pub fn error(transaction_id: Vec<u8>, code: i64, message: &str) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Error {
                code,
                message: message.to_string(),
            },
        }
    }

    /// Encodes the message into its bencoded wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut dict = std::collections::BTreeMap::new();
        dict.insert(b"t".to_vec(), Value::Bytes(self.transaction_id.clone()));

        match &self.body {
            MessageBody::Query(query) => {
                dict.insert(b"y".to_vec(), ben_bytes!("q"));
                let (method, args) = encode_query(query);
                dict.insert(b"q".to_vec(), ben_bytes!(method));
                dict.insert(b"a".to_vec(), args);
            }
            MessageBody::Response(response) => {
                dict.insert(b"y".to_vec(), ben_bytes!("r"));
                dict.insert(b"r".to_vec(), encode_response(response));
            }
            MessageBody::Error { code, message } => {
                dict.insert(b"y".to_vec(), ben_bytes!("e"));
                dict.insert(
                    b"e".to_vec(),
                    Value::List(vec![ben_int!(*code), Value::bytes(message.as_bytes())]),
                );
            }
        }

        Value::Dict(dict).encode()
    }

    /// Decodes a bencoded KRPC message.
    ///
    /// # Errors
    ///
    /// Will return `Err` for malformed bencode, missing mandatory fields and
    /// unknown kinds or methods. Unknown extra fields are ignored, the wild
    /// DHT is full of them.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let value = Value::decode(bytes)?;

        if value.as_dict().is_none() {
            return Err(MessageError::InvalidField { field: "message" });
        }

        let transaction_id = value
            .lookup(b"t")
            .and_then(Value::as_bytes)
            .ok_or(MessageError::MissingField { field: "t" })?
            .to_vec();

        let kind = value
            .lookup(b"y")
            .and_then(Value::as_bytes)
            .ok_or(MessageError::MissingField { field: "y" })?;

        let body = match kind {
            b"q" => MessageBody::Query(decode_query(&value)?),
            b"r" => MessageBody::Response(decode_response(
                value.lookup(b"r").ok_or(MessageError::MissingField { field: "r" })?,
            )?),
            b"e" => decode_error(&value)?,
            kind => return Err(MessageError::UnknownKind { kind: kind.to_vec() }),
        };

        Ok(Self { transaction_id, body })
    }
}

fn encode_query(query: &Query) -> (&'static str, Value) {
    let mut args = std::collections::BTreeMap::new();

    match query {
        Query::Ping { id } => {
            args.insert(b"id".to_vec(), Value::bytes(id.bytes()));
            ("ping", Value::Dict(args))
        }
        Query::FindNode { id, target } => {
            args.insert(b"id".to_vec(), Value::bytes(id.bytes()));
            args.insert(b"target".to_vec(), Value::bytes(target.bytes()));
            ("find_node", Value::Dict(args))
        }
        Query::GetPeers { id, info_hash } => {
            args.insert(b"id".to_vec(), Value::bytes(id.bytes()));
            args.insert(b"info_hash".to_vec(), Value::bytes(info_hash.bytes()));
            ("get_peers", Value::Dict(args))
        }
        Query::AnnouncePeer {
            id,
            info_hash,
            port,
            token,
            implied_port,
        } => {
            args.insert(b"id".to_vec(), Value::bytes(id.bytes()));
            if *implied_port {
                args.insert(b"implied_port".to_vec(), ben_int!(1));
            }
            args.insert(b"info_hash".to_vec(), Value::bytes(info_hash.bytes()));
            args.insert(b"port".to_vec(), ben_int!(i64::from(*port)));
            args.insert(b"token".to_vec(), Value::Bytes(token.clone()));
            ("announce_peer", Value::Dict(args))
        }
    }
}

fn decode_query(message: &Value) -> Result<Query, MessageError> {
    let method = message
        .lookup(b"q")
        .and_then(Value::as_bytes)
        .ok_or(MessageError::MissingField { field: "q" })?;

    let args = message.lookup(b"a").ok_or(MessageError::MissingField { field: "a" })?;

    let id = node_id_field(args, "id")?;

    match method {
        b"ping" => Ok(Query::Ping { id }),
        b"find_node" => Ok(Query::FindNode {
            id,
            target: node_id_field(args, "target")?,
        }),
        b"get_peers" => Ok(Query::GetPeers {
            id,
            info_hash: info_hash_field(args, "info_hash")?,
        }),
        b"announce_peer" => {
            let port = args
                .lookup(b"port")
                .and_then(Value::as_integer)
                .and_then(|port| u16::try_from(port).ok())
                .ok_or(MessageError::InvalidField { field: "port" })?;

            let token = args
                .lookup(b"token")
                .and_then(Value::as_bytes)
                .ok_or(MessageError::MissingField { field: "token" })?
                .to_vec();

            let implied_port = args
                .lookup(b"implied_port")
                .and_then(Value::as_integer)
                .is_some_and(|flag| flag != 0);

            Ok(Query::AnnouncePeer {
                id,
                info_hash: info_hash_field(args, "info_hash")?,
                port,
                token,
                implied_port,
            })
        }
        method => Err(MessageError::UnknownMethod {
            method: method.to_vec(),
        }),
    }
}

fn encode_response(response: &Response) -> Value {
    let mut dict = std::collections::BTreeMap::new();
    dict.insert(b"id".to_vec(), Value::bytes(response.id.bytes()));

    if !response.nodes.is_empty() {
        dict.insert(b"nodes".to_vec(), Value::Bytes(encode_compact_nodes(&response.nodes)));
    }

    if !response.values.is_empty() {
        let peers = response
            .values
            .iter()
            .filter_map(|endpoint| encode_compact_peer(endpoint).map(Value::Bytes))
            .collect();
        dict.insert(b"values".to_vec(), Value::List(peers));
    }

    if let Some(token) = &response.token {
        dict.insert(b"token".to_vec(), Value::Bytes(token.clone()));
    }

    Value::Dict(dict)
}

fn decode_response(body: &Value) -> Result<Response, MessageError> {
    let id = node_id_field(body, "id")?;

    let nodes = match body.lookup(b"nodes").and_then(Value::as_bytes) {
        Some(bytes) => decode_compact_nodes(bytes)?,
        None => Vec::new(),
    };

    let values = match body.lookup(b"values").and_then(Value::as_list) {
        Some(entries) => {
            let mut peers = Vec::with_capacity(entries.len());
            for entry in entries {
                let bytes = entry.as_bytes().ok_or(MessageError::InvalidField { field: "values" })?;
                peers.push(decode_compact_peer(bytes)?);
            }
            peers
        }
        None => Vec::new(),
    };

    let token = body.lookup(b"token").and_then(Value::as_bytes).map(<[u8]>::to_vec);

    Ok(Response { id, nodes, values, token })
}

fn decode_error(message: &Value) -> Result<MessageBody, MessageError> {
    let entries = message
        .lookup(b"e")
        .and_then(Value::as_list)
        .ok_or(MessageError::MissingField { field: "e" })?;

    let code = entries
        .first()
        .and_then(Value::as_integer)
        .ok_or(MessageError::InvalidField { field: "e" })?;

    let text = entries.get(1).and_then(Value::as_str).unwrap_or_default().to_string();

    Ok(MessageBody::Error { code, message: text })
}

fn node_id_field(dict: &Value, field: &'static str) -> Result<NodeId, MessageError> {
    dict.lookup(field.as_bytes())
        .and_then(Value::as_bytes)
        .ok_or(MessageError::MissingField { field })
        .and_then(|bytes| NodeId::try_from(bytes).map_err(|_| MessageError::InvalidField { field }))
}

fn info_hash_field(dict: &Value, field: &'static str) -> Result<InfoHash, MessageError> {
    dict.lookup(field.as_bytes())
        .and_then(Value::as_bytes)
        .ok_or(MessageError::MissingField { field })
        .and_then(|bytes| InfoHash::try_from(bytes).map_err(|_| MessageError::InvalidField { field }))
}

/// Encodes IPv4 nodes into the 26-byte compact form. Nodes with IPv6
/// addresses are skipped; BEP-5 compact lists are IPv4 only.
#[must_use]
pub fn encode_compact_nodes(nodes: &[NodeInfo]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * COMPACT_NODE_LEN);

    for node in nodes {
        if let IpAddr::V4(ip) = node.endpoint.ip {
            out.extend_from_slice(&node.id.bytes());
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&node.endpoint.port.to_be_bytes());
        }
    }

    out
}

/// Decodes a 26-byte-per-entry compact node list.
///
/// # Errors
///
/// Will return `Err` when the byte count is not a multiple of 26.
pub fn decode_compact_nodes(bytes: &[u8]) -> Result<Vec<NodeInfo>, MessageError> {
    if bytes.len() % COMPACT_NODE_LEN != 0 {
        return Err(MessageError::InvalidField { field: "nodes" });
    }

    let mut nodes = Vec::with_capacity(bytes.len() / COMPACT_NODE_LEN);

    for chunk in bytes.chunks_exact(COMPACT_NODE_LEN) {
        let id = NodeId::try_from(&chunk[..20]).expect("the chunk is 26 bytes");
        let ip = Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
        let port = u16::from_be_bytes([chunk[24], chunk[25]]);

        nodes.push(NodeInfo {
            id,
            endpoint: Endpoint::new(IpAddr::V4(ip), port),
        });
    }

    Ok(nodes)
}

/// Encodes an IPv4 endpoint into the 6-byte compact peer form.
#[must_use]
pub fn encode_compact_peer(endpoint: &Endpoint) -> Option<Vec<u8>> {
    match endpoint.ip {
        IpAddr::V4(ip) => {
            let mut out = Vec::with_capacity(COMPACT_PEER_LEN);
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&endpoint.port.to_be_bytes());
            Some(out)
        }
        IpAddr::V6(_) => None,
    }
}

/// Decodes a 6-byte compact peer entry.
///
/// # Errors
///
/// Will return `Err` when the entry is not 6 bytes.
pub fn decode_compact_peer(bytes: &[u8]) -> Result<Endpoint, MessageError> {
    if bytes.len() != COMPACT_PEER_LEN {
        return Err(MessageError::InvalidField { field: "values" });
    }

    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);

    Ok(Endpoint::new(IpAddr::V4(ip), port))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use swarmscan_primitives::endpoint::Endpoint;
    use swarmscan_primitives::info_hash::InfoHash;
    use swarmscan_primitives::node_id::NodeId;

    use super::{
        decode_compact_nodes, encode_compact_nodes, Message, MessageBody, MessageError, NodeInfo, Query, Response,
        ERROR_PROTOCOL,
    };

    fn node_id(byte: u8) -> NodeId {
        NodeId([byte; 20])
    }

    #[test]
    fn a_ping_query_should_match_the_bep5_wire_form() {
        let message = Message::query(
            b"aa".to_vec(),
            Query::Ping {
                id: NodeId(*b"abcdefghij0123456789"),
            },
        );

        assert_eq!(
            message.encode(),
            b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe".to_vec()
        );
    }

    #[test]
    fn every_query_kind_should_round_trip() {
        let queries = vec![
            Query::Ping { id: node_id(1) },
            Query::FindNode {
                id: node_id(1),
                target: node_id(2),
            },
            Query::GetPeers {
                id: node_id(1),
                info_hash: InfoHash([3u8; 20]),
            },
            Query::AnnouncePeer {
                id: node_id(1),
                info_hash: InfoHash([3u8; 20]),
                port: 6881,
                token: b"opaque".to_vec(),
                implied_port: true,
            },
        ];

        for query in queries {
            let message = Message::query(b"xy".to_vec(), query.clone());
            let decoded = Message::decode(&message.encode()).unwrap();

            assert_eq!(decoded.transaction_id, b"xy".to_vec());
            assert_eq!(decoded.body, MessageBody::Query(query));
        }
    }

    #[test]
    fn a_response_with_nodes_values_and_token_should_round_trip() {
        let response = Response {
            id: node_id(9),
            nodes: vec![NodeInfo {
                id: node_id(4),
                endpoint: Endpoint::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 6881),
            }],
            values: vec![Endpoint::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 5000)],
            token: Some(b"tok".to_vec()),
        };

        let message = Message::response(b"ab".to_vec(), response.clone());
        let decoded = Message::decode(&message.encode()).unwrap();

        assert_eq!(decoded.body, MessageBody::Response(response));
    }

    #[test]
    fn an_error_message_should_round_trip() {
        let message = Message::error(b"ee".to_vec(), ERROR_PROTOCOL, "Protocol Error");
        let decoded = Message::decode(&message.encode()).unwrap();

        assert_eq!(
            decoded.body,
            MessageBody::Error {
                code: ERROR_PROTOCOL,
                message: "Protocol Error".to_string(),
            }
        );
    }

    #[test]
    fn compact_nodes_should_round_trip_and_skip_ipv6_entries() {
        let v4 = NodeInfo {
            id: node_id(4),
            endpoint: Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234),
        };
        let v6 = NodeInfo {
            id: node_id(6),
            endpoint: Endpoint::new("::1".parse().unwrap(), 1234),
        };

        let bytes = encode_compact_nodes(&[v4, v6]);

        assert_eq!(bytes.len(), 26);
        assert_eq!(decode_compact_nodes(&bytes).unwrap(), vec![v4]);
    }

    #[test]
    fn a_truncated_compact_node_list_should_be_rejected() {
        assert_eq!(
            decode_compact_nodes(&[0u8; 25]),
            Err(MessageError::InvalidField { field: "nodes" })
        );
    }

    #[test]
    fn a_message_without_a_transaction_id_should_be_rejected() {
        assert_eq!(
            Message::decode(b"d1:y1:qe"),
            Err(MessageError::MissingField { field: "t" })
        );
    }

    #[test]
    fn an_unknown_method_should_be_rejected() {
        let raw = b"d1:ad2:id20:abcdefghij0123456789e1:q4:vote1:t2:aa1:y1:qe";

        assert_eq!(
            Message::decode(raw),
            Err(MessageError::UnknownMethod {
                method: b"vote".to_vec()
            })
        );
    }

    #[test]
    fn trailing_garbage_should_be_an_encoding_error() {
        let mut raw = Message::query(b"aa".to_vec(), Query::Ping { id: node_id(1) }).encode();
        raw.push(b'!');

        assert!(matches!(
            Message::decode(&raw),
            Err(MessageError::InvalidEncoding { .. })
        ));
    }
}

//! A `BitTorrent` `InfoHash`. It's a unique identifier for a `BitTorrent`
//! torrent.
//!
//! "The 20-byte sha1 hash of the bencoded form of the info value from the
//! metainfo file."
//!
//! See [BEP 3. The `BitTorrent` Protocol Specification](https://www.bittorrent.org/beps/bep_0003.html)
//! for the official specification.
//!
//! > **NOTICE**: It only supports Info Hash v1.
//!
//! Typically infohashes are represented as hex strings, but internally they
//! are a 20-byte array. Infohashes live in the same 160-bit key space as
//! [`NodeId`](crate::node_id::NodeId)s, which is what lets the crawler walk
//! the DHT towards the nodes responsible for a torrent.
use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::node_id::{Distance, NodeId};
use crate::ParseIdError;

pub const INFO_HASH_BYTES_LEN: usize = 20;

/// `BitTorrent` Info Hash v1
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; INFO_HASH_BYTES_LEN]);

impl InfoHash {
    /// Generates a random infohash-shaped value, used as the target of
    /// random discovery lookups.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; INFO_HASH_BYTES_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> [u8; INFO_HASH_BYTES_LEN] {
        self.0
    }

    /// The XOR distance between this infohash and a node id.
    #[must_use]
    pub fn distance_to(&self, node_id: &NodeId) -> Distance {
        NodeId(self.0).distance(node_id)
    }

    /// The infohash reinterpreted as a lookup target in the node id space.
    #[must_use]
    pub fn as_node_id(&self) -> NodeId {
        NodeId(self.0)
    }

    #[must_use]
    pub fn to_hex_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut chars = [0u8; INFO_HASH_BYTES_LEN * 2];
        binascii::bin2hex(&self.0, &mut chars).expect("it should fit in the output buffer");
        write!(f, "{}", std::str::from_utf8(&chars).unwrap())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InfoHash({self})")
    }
}

impl FromStr for InfoHash {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != INFO_HASH_BYTES_LEN * 2 {
            return Err(ParseIdError::InvalidLength { len: s.len() });
        }
        let mut hash = Self([0u8; INFO_HASH_BYTES_LEN]);
        binascii::hex2bin(s.as_bytes(), &mut hash.0).map_err(|_| ParseIdError::InvalidEncoding)?;
        Ok(hash)
    }
}

impl From<[u8; INFO_HASH_BYTES_LEN]> for InfoHash {
    fn from(bytes: [u8; INFO_HASH_BYTES_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for InfoHash {
    type Error = ParseIdError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; INFO_HASH_BYTES_LEN] = bytes
            .try_into()
            .map_err(|_| ParseIdError::InvalidLength { len: bytes.len() })?;
        Ok(Self(bytes))
    }
}

impl From<NodeId> for InfoHash {
    fn from(id: NodeId) -> Self {
        Self(id.0)
    }
}

impl serde::ser::Serialize for InfoHash {
    fn serialize<S: serde::ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> serde::de::Deserialize<'de> for InfoHash {
    fn deserialize<D: serde::de::Deserializer<'de>>(des: D) -> Result<Self, D::Error> {
        des.deserialize_str(InfoHashVisitor)
    }
}

struct InfoHashVisitor;

impl<'v> serde::de::Visitor<'v> for InfoHashVisitor {
    type Value = InfoHash;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a 40 character long hexadecimal string")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(|_| {
            serde::de::Error::invalid_value(serde::de::Unexpected::Str(v), &"a 40 character long hexadecimal string")
        })
    }
}

//! The identifier a node participates in the DHT under.
//!
//! A `NodeId` is an opaque 160-bit value. Kademlia orders the id space by the
//! XOR metric: the distance between two ids is their bytewise XOR read as a
//! 160-bit unsigned magnitude. [`Distance`] keeps that magnitude comparable
//! and exposes the prefix test the routing table buckets are built on.
use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::ParseIdError;

pub const NODE_ID_BYTES_LEN: usize = 20;

/// Number of bits in a `NodeId`.
pub const NODE_ID_BITS: usize = NODE_ID_BYTES_LEN * 8;

/// A 160-bit DHT node identifier.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct NodeId(pub [u8; NODE_ID_BYTES_LEN]);

impl NodeId {
    /// Generates a fresh identifier from the operating system RNG.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; NODE_ID_BYTES_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> [u8; NODE_ID_BYTES_LEN] {
        self.0
    }

    /// The XOR distance between `self` and `other`.
    #[must_use]
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; NODE_ID_BYTES_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    #[must_use]
    pub fn to_hex_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut chars = [0u8; NODE_ID_BYTES_LEN * 2];
        binascii::bin2hex(&self.0, &mut chars).expect("it should fit in the output buffer");
        write!(f, "{}", std::str::from_utf8(&chars).unwrap())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl FromStr for NodeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != NODE_ID_BYTES_LEN * 2 {
            return Err(ParseIdError::InvalidLength { len: s.len() });
        }
        let mut id = Self([0u8; NODE_ID_BYTES_LEN]);
        binascii::hex2bin(s.as_bytes(), &mut id.0).map_err(|_| ParseIdError::InvalidEncoding)?;
        Ok(id)
    }
}

impl From<[u8; NODE_ID_BYTES_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_BYTES_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = ParseIdError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; NODE_ID_BYTES_LEN] = bytes
            .try_into()
            .map_err(|_| ParseIdError::InvalidLength { len: bytes.len() })?;
        Ok(Self(bytes))
    }
}

impl serde::ser::Serialize for NodeId {
    fn serialize<S: serde::ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> serde::de::Deserialize<'de> for NodeId {
    fn deserialize<D: serde::de::Deserializer<'de>>(des: D) -> Result<Self, D::Error> {
        let s = String::deserialize(des)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The XOR distance between two identifiers, read as a 160-bit unsigned
/// magnitude. Comparing two distances compares the magnitudes.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Debug)]
pub struct Distance(pub [u8; NODE_ID_BYTES_LEN]);

impl Distance {
    /// Whether the first `n` bits of the distance are zero, i.e. whether the
    /// two ids the distance was taken between share an `n`-bit prefix.
    #[must_use]
    pub fn shares_prefix(&self, n: usize) -> bool {
        if n > NODE_ID_BITS {
            return false;
        }
        let full_bytes = n / 8;
        if self.0[..full_bytes].iter().any(|b| *b != 0) {
            return false;
        }
        let remaining_bits = n % 8;
        if remaining_bits == 0 {
            return true;
        }
        self.0[full_bytes] >> (8 - remaining_bits) == 0
    }

    /// Index of the first set bit, or `None` for the zero distance.
    #[must_use]
    pub fn leading_zeros(&self) -> Option<usize> {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return Some(i * 8 + byte.leading_zeros() as usize);
            }
        }
        None
    }
}

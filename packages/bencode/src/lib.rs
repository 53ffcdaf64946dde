//! Library for parsing and producing bencoded data.
//!
//! Bencode is the self-describing binary encoding `BitTorrent` uses for every
//! DHT message, extension-protocol payload and metainfo dictionary. It has
//! four node types: integers, byte strings, lists and dictionaries with
//! bytewise-ordered keys.
//!
//! The decoder is strict: trailing bytes after a complete value, duplicate
//! or out-of-order dictionary keys, zero-padded or negative-zero integers
//! and integers that do not fit an `i64` are all rejected.
//!
//! # Examples
//!
//! Decoding bencoded data:
//!
//! ```rust
//! use swarmscan_bencode::Value;
//!
//! let value = Value::decode(b"d12:lucky_numberi7ee").unwrap();
//!
//! assert_eq!(value.lookup(b"lucky_number").unwrap().as_integer(), Some(7));
//! ```
//!
//! Encoding bencoded data:
//!
//! ```rust
//! use swarmscan_bencode::{ben_bytes, ben_int, ben_map};
//!
//! let message = (ben_map! {
//!     "lucky_number" => ben_int!(7),
//!     "lucky_string" => ben_bytes!("7")
//! })
//! .encode();
//!
//! assert_eq!(&message[..], &b"d12:lucky_numberi7e12:lucky_string1:7e"[..]);
//! ```
mod decode;
mod error;
mod value;

pub use crate::decode::MAX_DECODE_DEPTH;
pub use crate::error::Error;
pub use crate::value::Value;

pub(crate) const BEN_END: u8 = b'e';
pub(crate) const DICT_START: u8 = b'd';
pub(crate) const LIST_START: u8 = b'l';
pub(crate) const INT_START: u8 = b'i';
pub(crate) const BYTE_LEN_END: u8 = b':';

/// Construct a [`Value`] dictionary by supplying keys and values.
#[macro_export]
macro_rules! ben_map {
    ( $($key:expr => $val:expr),* ) => {
        {
            let mut map = std::collections::BTreeMap::new();
            $(
                map.insert(Vec::<u8>::from($key), $val);
            )*
            $crate::Value::Dict(map)
        }
    }
}

/// Construct a [`Value`] list by supplying its items.
#[macro_export]
macro_rules! ben_list {
    ( $($ben:expr),* ) => {
        {
            let mut list = Vec::new();
            $(
                list.push($ben);
            )*
            $crate::Value::List(list)
        }
    }
}

/// Construct [`Value`] bytes by supplying a type convertible to `Vec<u8>`.
#[macro_export]
macro_rules! ben_bytes {
    ( $ben:expr ) => {
        $crate::Value::Bytes(Vec::<u8>::from($ben))
    };
}

/// Construct a [`Value`] integer by supplying an `i64`.
#[macro_export]
macro_rules! ben_int {
    ( $ben:expr ) => {
        $crate::Value::Integer($ben)
    };
}

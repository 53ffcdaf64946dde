//! The owned bencode value type.
use std::collections::BTreeMap;

use crate::decode::Decoder;
use crate::error::Error;

/// A bencoded value.
///
/// Dictionary keys are kept in a `BTreeMap`, so encoding always emits them in
/// the canonical bytewise order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Builds a byte-string value from anything convertible to bytes.
    #[must_use]
    pub fn bytes<T: Into<Vec<u8>>>(bytes: T) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Decodes a complete bencoded value.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed input and when bytes remain after a
    /// complete value.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let (value, consumed) = Self::decode_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(Error::TrailingBytes { pos: consumed });
        }
        Ok(value)
    }

    /// Decodes a bencoded value from the front of `bytes`, returning the
    /// value and the number of bytes consumed.
    ///
    /// ut_metadata data messages concatenate a bencoded header with raw
    /// piece bytes, so the caller needs to know where the header ends.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed input.
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), Error> {
        Decoder::new(bytes).decode_value()
    }

    /// Encodes the value into its canonical bencoded form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Integer(value) => {
                out.push(b'i');
                out.extend_from_slice(value.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Bytes(bytes) => {
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(bytes);
            }
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    out.extend_from_slice(key.len().to_string().as_bytes());
                    out.push(b':');
                    out.extend_from_slice(key);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The value as UTF-8 text, when it is a byte string holding valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks a key up when the value is a dictionary.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|entries| entries.get(key))
    }
}

#[cfg(test)]
mod tests {
    use crate::{ben_bytes, ben_int, ben_list, ben_map, Value};

    #[test]
    fn an_integer_should_encode_between_markers() {
        assert_eq!(ben_int!(42).encode(), b"i42e".to_vec());
        assert_eq!(ben_int!(-42).encode(), b"i-42e".to_vec());
        assert_eq!(ben_int!(0).encode(), b"i0e".to_vec());
    }

    #[test]
    fn a_byte_string_should_encode_with_a_length_prefix() {
        assert_eq!(ben_bytes!("spam").encode(), b"4:spam".to_vec());
        assert_eq!(ben_bytes!("").encode(), b"0:".to_vec());
    }

    #[test]
    fn a_list_should_encode_its_items_in_order() {
        let list = ben_list!(ben_bytes!("spam"), ben_int!(7));

        assert_eq!(list.encode(), b"l4:spami7ee".to_vec());
    }

    #[test]
    fn a_dict_should_encode_its_keys_in_bytewise_order() {
        // insertion order deliberately differs from the canonical order
        let dict = ben_map! {
            "zebra" => ben_int!(1),
            "apple" => ben_int!(2)
        };

        assert_eq!(dict.encode(), b"d5:applei2e5:zebrai1ee".to_vec());
    }

    #[test]
    fn a_canonical_input_should_round_trip_bytewise() {
        let canonical: &[u8] = b"d3:bar4:spam3:fooi42ee";

        let value = Value::decode(canonical).unwrap();

        assert_eq!(value.encode(), canonical.to_vec());
    }

    #[test]
    fn a_decoded_value_should_re_encode_to_the_same_bytes() {
        let inputs: Vec<&[u8]> = vec![
            b"i0e",
            b"i-7e",
            b"0:",
            b"4:spam",
            b"le",
            b"de",
            b"l4:spami7ee",
            b"d3:bar4:spam3:fooi42ee",
            b"d1:ad1:bl1:c1:deee",
        ];

        for input in inputs {
            let value = Value::decode(input).unwrap();
            assert_eq!(value.encode(), input.to_vec(), "input {input:?}");
        }
    }

    #[test]
    fn lookup_should_find_a_key_in_a_dictionary() {
        let dict = ben_map! {
            "lucky_number" => ben_int!(7)
        };

        assert_eq!(dict.lookup(b"lucky_number").unwrap().as_integer(), Some(7));
        assert!(dict.lookup(b"unlucky_number").is_none());
    }

    #[test]
    fn accessors_should_reject_other_node_types() {
        assert!(ben_int!(7).as_bytes().is_none());
        assert!(ben_bytes!("7").as_integer().is_none());
        assert!(ben_list!().as_dict().is_none());
    }
}

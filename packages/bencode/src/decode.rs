//! The strict bencode decoder.
use std::collections::BTreeMap;

use crate::error::Error;
use crate::value::Value;
use crate::{BEN_END, BYTE_LEN_END, DICT_START, INT_START, LIST_START};

/// Maximum nesting depth the decoder accepts. Remote input never legitimately
/// nests this deep; the limit bounds stack usage on hostile packets.
pub const MAX_DECODE_DEPTH: usize = 50;

pub(crate) struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn decode_value(mut self) -> Result<(Value, usize), Error> {
        let value = self.decode_any(0)?;
        Ok((value, self.pos))
    }

    fn decode_any(&mut self, depth: usize) -> Result<Value, Error> {
        if depth > MAX_DECODE_DEPTH {
            return Err(Error::RecursionLimitExceeded {
                pos: self.pos,
                max: MAX_DECODE_DEPTH,
            });
        }

        match self.peek()? {
            INT_START => self.decode_integer(),
            LIST_START => self.decode_list(depth),
            DICT_START => self.decode_dict(depth),
            b'0'..=b'9' => self.decode_bytes(),
            _ => Err(Error::InvalidByte { pos: self.pos }),
        }
    }

    fn decode_integer(&mut self) -> Result<Value, Error> {
        let start = self.pos;
        self.pos += 1; // consume 'i'

        let negative = self.peek()? == b'-';
        if negative {
            self.pos += 1;
        }

        let digits_start = self.pos;
        while self.peek()? != BEN_END {
            if !self.bytes[self.pos].is_ascii_digit() {
                return Err(Error::InvalidInteger { pos: self.pos });
            }
            self.pos += 1;
        }

        let digits = &self.bytes[digits_start..self.pos];
        if digits.is_empty() {
            return Err(Error::InvalidInteger { pos: start });
        }
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(Error::ZeroPaddedInteger { pos: start });
        }
        if negative && digits == b"0" {
            return Err(Error::NegativeZeroInteger { pos: start });
        }

        let text = std::str::from_utf8(&self.bytes[start + 1..self.pos]).expect("digits are ascii");
        let value: i64 = text.parse().map_err(|_| Error::IntegerOverflow { pos: start })?;

        self.pos += 1; // consume 'e'
        Ok(Value::Integer(value))
    }

    fn decode_bytes(&mut self) -> Result<Value, Error> {
        let start = self.pos;

        while self.peek()? != BYTE_LEN_END {
            if !self.bytes[self.pos].is_ascii_digit() {
                return Err(Error::InvalidByte { pos: self.pos });
            }
            self.pos += 1;
        }

        let text = std::str::from_utf8(&self.bytes[start..self.pos]).expect("digits are ascii");
        let len: usize = text.parse().map_err(|_| Error::LengthOverflow { pos: start })?;

        self.pos += 1; // consume ':'

        if self.bytes.len() - self.pos < len {
            return Err(Error::LengthOverflow { pos: start });
        }

        let bytes = self.bytes[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(Value::Bytes(bytes))
    }

    fn decode_list(&mut self, depth: usize) -> Result<Value, Error> {
        self.pos += 1; // consume 'l'

        let mut items = Vec::new();
        while self.peek()? != BEN_END {
            items.push(self.decode_any(depth + 1)?);
        }

        self.pos += 1; // consume 'e'
        Ok(Value::List(items))
    }

    fn decode_dict(&mut self, depth: usize) -> Result<Value, Error> {
        self.pos += 1; // consume 'd'

        let mut entries = BTreeMap::new();
        let mut last_key: Option<Vec<u8>> = None;

        while self.peek()? != BEN_END {
            let key_pos = self.pos;
            let key = match self.decode_bytes()? {
                Value::Bytes(key) => key,
                _ => unreachable!("decode_bytes only returns bytes"),
            };

            if let Some(previous) = &last_key {
                if key < *previous {
                    return Err(Error::UnorderedKey { pos: key_pos, key });
                }
                if key == *previous {
                    return Err(Error::DuplicateKey { pos: key_pos, key });
                }
            }

            let value = self.decode_any(depth + 1)?;
            last_key = Some(key.clone());
            entries.insert(key, value);
        }

        self.pos += 1; // consume 'e'
        Ok(Value::Dict(entries))
    }

    fn peek(&self) -> Result<u8, Error> {
        self.bytes.get(self.pos).copied().ok_or(Error::Truncated { pos: self.pos })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Value, MAX_DECODE_DEPTH};

    #[test]
    fn it_should_decode_the_four_node_types() {
        assert_eq!(Value::decode(b"i42e").unwrap(), Value::Integer(42));
        assert_eq!(Value::decode(b"4:spam").unwrap(), Value::Bytes(b"spam".to_vec()));
        assert_eq!(
            Value::decode(b"li1ei2ee").unwrap(),
            Value::List(vec![Value::Integer(1), Value::Integer(2)])
        );
        assert_eq!(
            Value::decode(b"d3:fooi1ee").unwrap().lookup(b"foo").unwrap().as_integer(),
            Some(1)
        );
    }

    #[test]
    fn it_should_reject_trailing_bytes_after_a_complete_value() {
        assert_eq!(Value::decode(b"i42eXX"), Err(Error::TrailingBytes { pos: 4 }));
    }

    #[test]
    fn decode_prefix_should_report_the_consumed_length() {
        let (value, consumed) = Value::decode_prefix(b"d1:xi1eeRAWBYTES").unwrap();

        assert_eq!(value.lookup(b"x").unwrap().as_integer(), Some(1));
        assert_eq!(consumed, 8);
    }

    #[test]
    fn it_should_reject_truncated_input() {
        assert!(matches!(Value::decode(b"i42"), Err(Error::Truncated { .. })));
        assert!(matches!(Value::decode(b"4:sp"), Err(Error::LengthOverflow { .. })));
        assert!(matches!(Value::decode(b"li1e"), Err(Error::Truncated { .. })));
        assert!(matches!(Value::decode(b"d3:foo"), Err(Error::Truncated { .. })));
    }

    #[test]
    fn it_should_reject_zero_padded_integers() {
        assert!(matches!(Value::decode(b"i05e"), Err(Error::ZeroPaddedInteger { .. })));
    }

    #[test]
    fn it_should_reject_negative_zero() {
        assert!(matches!(Value::decode(b"i-0e"), Err(Error::NegativeZeroInteger { .. })));
    }

    #[test]
    fn it_should_reject_integers_that_overflow_an_i64() {
        assert!(matches!(
            Value::decode(b"i9223372036854775808e"),
            Err(Error::IntegerOverflow { .. })
        ));
    }

    #[test]
    fn it_should_accept_the_i64_extremes() {
        assert_eq!(
            Value::decode(b"i9223372036854775807e").unwrap(),
            Value::Integer(i64::MAX)
        );
        assert_eq!(
            Value::decode(b"i-9223372036854775808e").unwrap(),
            Value::Integer(i64::MIN)
        );
    }

    #[test]
    fn it_should_reject_unordered_dictionary_keys() {
        assert!(matches!(
            Value::decode(b"d5:zebrai1e5:applei2ee"),
            Err(Error::UnorderedKey { .. })
        ));
    }

    #[test]
    fn it_should_reject_duplicate_dictionary_keys() {
        assert!(matches!(
            Value::decode(b"d3:fooi1e3:fooi2ee"),
            Err(Error::DuplicateKey { .. })
        ));
    }

    #[test]
    fn it_should_reject_a_byte_string_longer_than_the_input() {
        assert!(matches!(Value::decode(b"999:x"), Err(Error::LengthOverflow { .. })));
    }

    #[test]
    fn it_should_reject_unknown_leading_bytes() {
        assert!(matches!(Value::decode(b"x"), Err(Error::InvalidByte { pos: 0 })));
    }

    #[test]
    fn it_should_bound_the_nesting_depth() {
        let mut input = Vec::new();
        for _ in 0..=MAX_DECODE_DEPTH + 1 {
            input.push(b'l');
        }
        for _ in 0..=MAX_DECODE_DEPTH + 1 {
            input.push(b'e');
        }

        assert!(matches!(
            Value::decode(&input),
            Err(Error::RecursionLimitExceeded { .. })
        ));
    }

    #[test]
    fn an_empty_input_should_be_truncated() {
        assert_eq!(Value::decode(b""), Err(Error::Truncated { pos: 0 }));
    }
}

//! Decoder errors.
//!
//! Every variant carries the byte offset at which decoding failed, counted
//! from the start of the input.

/// Error produced while decoding bencoded bytes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input ended before a complete value was read.
    #[error("truncated input at byte {pos}")]
    Truncated { pos: usize },

    /// A byte that cannot start or continue a value at this position.
    #[error("invalid byte at {pos}")]
    InvalidByte { pos: usize },

    /// An integer with no digits or a stray sign.
    #[error("invalid integer at {pos}")]
    InvalidInteger { pos: usize },

    /// An integer that does not fit in a signed 64-bit value.
    #[error("integer overflow at {pos}")]
    IntegerOverflow { pos: usize },

    /// An integer with a leading zero, e.g. `i05e`.
    #[error("zero padded integer at {pos}")]
    ZeroPaddedInteger { pos: usize },

    /// The integer `i-0e`.
    #[error("negative zero integer at {pos}")]
    NegativeZeroInteger { pos: usize },

    /// A byte-string length that overflows the remaining input.
    #[error("byte string length overflows the input at {pos}")]
    LengthOverflow { pos: usize },

    /// A dictionary key smaller than or equal to its predecessor.
    #[error("unordered dictionary key {key:?} at {pos}")]
    UnorderedKey { pos: usize, key: Vec<u8> },

    /// A dictionary key that appeared twice.
    #[error("duplicate dictionary key {key:?} at {pos}")]
    DuplicateKey { pos: usize, key: Vec<u8> },

    /// Bytes left over after a complete value.
    #[error("trailing bytes after a complete value at {pos}")]
    TrailingBytes { pos: usize },

    /// Nesting deeper than the decoder allows.
    #[error("recursion limit {max} exceeded at {pos}")]
    RecursionLimitExceeded { pos: usize, max: usize },
}

//! The parsed info dictionary of a torrent.
//!
//! A completed ut_metadata download yields the raw bencoded bytes of the
//! torrent's `info` dictionary. [`MetadataInfo::from_bytes`] parses them, and
//! the SHA-1 of the raw bytes must equal the infohash the download was for,
//! which is what makes the exchange trustless.
use sha1::{Digest, Sha1};
use swarmscan_primitives::info_hash::InfoHash;

/// A single file in a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFile {
    /// Path inside the torrent, `/`-joined for multi-file torrents.
    pub path: String,
    pub size: u64,
}

/// A parsed torrent info dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataInfo {
    pub name: String,
    pub piece_length: u64,
    pub piece_count: u64,
    pub total_size: u64,
    pub files: Vec<MetadataFile>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<i64>,
    /// The bencoded bytes the fields were parsed from.
    pub raw: Vec<u8>,
}

/// Error produced when the downloaded bytes do not form a usable info
/// dictionary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("the metadata is not valid bencode: {source}")]
    InvalidEncoding {
        #[from]
        source: swarmscan_bencode::Error,
    },

    #[error("the metadata is not a dictionary")]
    NotADictionary,

    #[error("the info dictionary is missing the {field} field")]
    MissingField { field: &'static str },

    #[error("the info dictionary field {field} has the wrong type or value")]
    InvalidField { field: &'static str },
}

impl MetadataInfo {
    /// Parses a raw bencoded info dictionary.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the bytes are not a bencoded dictionary with
    /// the mandatory `name`, `piece length` and `pieces` fields.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MetadataError> {
        let value = swarmscan_bencode::Value::decode(raw)?;

        if value.as_dict().is_none() {
            return Err(MetadataError::NotADictionary);
        }

        let name = value
            .lookup(b"name")
            .ok_or(MetadataError::MissingField { field: "name" })?
            .as_str()
            .ok_or(MetadataError::InvalidField { field: "name" })?
            .to_string();

        let piece_length = value
            .lookup(b"piece length")
            .ok_or(MetadataError::MissingField { field: "piece length" })?
            .as_integer()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or(MetadataError::InvalidField { field: "piece length" })?;

        let pieces = value
            .lookup(b"pieces")
            .ok_or(MetadataError::MissingField { field: "pieces" })?
            .as_bytes()
            .ok_or(MetadataError::InvalidField { field: "pieces" })?;
        if pieces.len() % 20 != 0 {
            return Err(MetadataError::InvalidField { field: "pieces" });
        }
        let piece_count = (pieces.len() / 20) as u64;

        let files = parse_files(&value, &name)?;
        let total_size = files.iter().map(|file| file.size).sum();

        Ok(Self {
            name,
            piece_length,
            piece_count,
            total_size,
            files,
            comment: value.lookup(b"comment").and_then(|v| v.as_str()).map(str::to_string),
            created_by: value.lookup(b"created by").and_then(|v| v.as_str()).map(str::to_string),
            creation_date: value.lookup(b"creation date").and_then(swarmscan_bencode::Value::as_integer),
            raw: raw.to_vec(),
        })
    }

    /// Whether the SHA-1 of the raw bytes equals `info_hash`.
    #[must_use]
    pub fn matches(&self, info_hash: &InfoHash) -> bool {
        *info_hash == info_hash_of(&self.raw)
    }
}

/// The SHA-1 of a bencoded info dictionary, i.e. the torrent's infohash.
#[must_use]
pub fn info_hash_of(raw_info: &[u8]) -> InfoHash {
    let digest = Sha1::digest(raw_info);
    InfoHash(digest.into())
}

fn parse_files(info: &swarmscan_bencode::Value, name: &str) -> Result<Vec<MetadataFile>, MetadataError> {
    // single-file torrents carry a top level `length`, multi-file torrents a
    // `files` list of {length, path} dictionaries
    if let Some(length) = info.lookup(b"length") {
        let size = length
            .as_integer()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or(MetadataError::InvalidField { field: "length" })?;
        return Ok(vec![MetadataFile {
            path: name.to_string(),
            size,
        }]);
    }

    let entries = info
        .lookup(b"files")
        .ok_or(MetadataError::MissingField { field: "files" })?
        .as_list()
        .ok_or(MetadataError::InvalidField { field: "files" })?;

    let mut files = Vec::with_capacity(entries.len());

    for entry in entries {
        let size = entry
            .lookup(b"length")
            .and_then(swarmscan_bencode::Value::as_integer)
            .and_then(|len| u64::try_from(len).ok())
            .ok_or(MetadataError::InvalidField { field: "files" })?;

        let components = entry
            .lookup(b"path")
            .and_then(swarmscan_bencode::Value::as_list)
            .ok_or(MetadataError::InvalidField { field: "files" })?;

        let mut path_parts = Vec::with_capacity(components.len() + 1);
        path_parts.push(name.to_string());
        for component in components {
            path_parts.push(
                component
                    .as_str()
                    .ok_or(MetadataError::InvalidField { field: "files" })?
                    .to_string(),
            );
        }

        files.push(MetadataFile {
            path: path_parts.join("/"),
            size,
        });
    }

    if files.is_empty() {
        return Err(MetadataError::InvalidField { field: "files" });
    }

    Ok(files)
}

//! Errors crossing the controller boundary.
use thiserror::Error;

/// Error an event handler or controller verb can report.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A storage write or read failed.
    #[error("storage error: {source}")]
    Storage {
        #[from]
        source: crate::storage::error::Error,
    },

    /// A lifecycle verb was used in a state it is not valid in.
    #[error("invalid lifecycle transition: {message}")]
    InvalidState { message: String },

    /// The configured settings cannot produce a running crawler.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// An engine could not be started.
    #[error("failed to start an engine: {message}")]
    EngineStart { message: String },
}

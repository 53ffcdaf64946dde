//! Storage errors.
use std::panic::Location;
use std::sync::Arc;

/// Error raised by the storage engine.
///
/// Every variant carries the source location of the failing call, which is
/// what usually matters when a query goes wrong.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The store was used before the schema migrations ran.
    #[error("the storage engine is not initialized, {location}")]
    NotInitialized { location: &'static Location<'static> },

    /// A write violated a schema constraint.
    #[error("constraint violation: {source}, {location}")]
    ConstraintViolation {
        source: Arc<r2d2_sqlite::rusqlite::Error>,
        location: &'static Location<'static>,
    },

    /// The database was locked by a concurrent writer.
    #[error("transaction conflict: {source}, {location}")]
    TransactionConflict {
        source: Arc<r2d2_sqlite::rusqlite::Error>,
        location: &'static Location<'static>,
    },

    /// The query was malformed or failed to execute.
    #[error("query failed: {source}, {location}")]
    InvalidQuery {
        source: Arc<r2d2_sqlite::rusqlite::Error>,
        location: &'static Location<'static>,
    },

    /// Unable to get a connection from the pool.
    #[error("failed to get a connection from the r2d2 pool: {source}, {location}")]
    ConnectionPool {
        source: Arc<r2d2::Error>,
        location: &'static Location<'static>,
    },

    /// The database file could not be opened or written.
    #[error("database io error: {message}, {location}")]
    Io {
        message: String,
        location: &'static Location<'static>,
    },
}

impl From<r2d2_sqlite::rusqlite::Error> for Error {
    #[track_caller]
    fn from(err: r2d2_sqlite::rusqlite::Error) -> Self {
        use r2d2_sqlite::rusqlite::ErrorCode;

        match &err {
            r2d2_sqlite::rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::ConstraintViolation => Error::ConstraintViolation {
                    source: Arc::new(err),
                    location: Location::caller(),
                },
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Error::TransactionConflict {
                    source: Arc::new(err),
                    location: Location::caller(),
                },
                _ => Error::InvalidQuery {
                    source: Arc::new(err),
                    location: Location::caller(),
                },
            },
            _ => Error::InvalidQuery {
                source: Arc::new(err),
                location: Location::caller(),
            },
        }
    }
}

impl From<r2d2::Error> for Error {
    #[track_caller]
    fn from(err: r2d2::Error) -> Self {
        Self::ConnectionPool {
            source: Arc::new(err),
            location: Location::caller(),
        }
    }
}

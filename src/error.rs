use std::{array::TryFromSliceError, num::TryFromIntError};

use thiserror::Error as ThisError;

use crate::hash::Hash;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError, PartialEq, Clone)]
pub enum Error {
    #[error("failed to deserialize: {0}")]
    FailedDeserialization(String),

    /// The store returned no bytes for a hash the tree references. The tree
    /// and the store have diverged; the operation is aborted.
    #[error("no bytes stored under hash {0}")]
    MissingNode(Hash),

    /// The zero-length key is reserved for the sentinel entry of every node.
    #[error("the empty key is reserved for the sentinel entry")]
    EmptyKey,
}

impl From<hex::FromHexError> for Error {
    fn from(error: hex::FromHexError) -> Self {
        Error::FailedDeserialization(format!("{}", error))
    }
}

impl From<TryFromIntError> for Error {
    fn from(error: TryFromIntError) -> Self {
        Error::FailedDeserialization(format!("invalid number format: {}", error))
    }
}

impl From<TryFromSliceError> for Error {
    fn from(error: TryFromSliceError) -> Self {
        Error::FailedDeserialization(format!("invalid slice format: {}", error))
    }
}

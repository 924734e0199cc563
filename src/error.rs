// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur while iterating
#[derive(Debug)]
pub enum Error {
    /// The attached transaction was aborted while the iterator was running
    ///
    /// This happens when the transaction is forced below a prepared statement
    /// it has writes against, or is aborted by a concurrent schema change
    /// while the iterator was suspended in a disk read.
    TransactionConflict,

    /// Failure propagated from a source cursor
    Source(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LsmReadError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Source(value)
    }
}

/// Read iterator result
pub type Result<T> = std::result::Result<T, Error>;

// SPDX-License-Identifier: MIT
//
// Error type for buffer operations.
//
// Every failure leaves the buffer in its last valid state: allocation,
// capacity, and format errors never advance the length or touch stored
// bytes. The one exception is `SinkWrite`, which is reported after the
// buffer has already been released by `finalize`.

use std::io;

/// Errors produced by [`Fbuf`](crate::Fbuf) operations.
#[derive(Debug, thiserror::Error)]
pub enum FbufError {
    /// No backing memory could be obtained, at init or during growth.
    #[error("failed to allocate a {requested}-byte region")]
    Allocation {
        /// Region size that was being requested.
        requested: usize,
        /// The error reported by the last strategy tried.
        #[source]
        source: io::Error,
    },

    /// Doubling the capacity cannot make room without passing the ceiling.
    #[error("cannot reserve {requested} more bytes ({len}/{capacity} used) without overflowing")]
    CapacityExceeded {
        /// Additional bytes the caller asked for.
        requested: usize,
        /// Length at the time of the request.
        len: usize,
        /// Capacity at the time of the request.
        capacity: usize,
    },

    /// Formatting failed or did not fit the space reserved for it.
    #[error("formatted output did not fit the {reserved} bytes reserved for it")]
    Format {
        /// Bytes reserved for the formatting attempt.
        reserved: usize,
    },

    /// `finalize` could not write or flush everything to the sink.
    #[error("failed to hand buffer contents to the sink")]
    SinkWrite(#[source] io::Error),

    /// The buffer has no region: never initialized, or already released.
    #[error("buffer is not initialized")]
    Uninitialized,

    /// `init` was called on a buffer that already owns a region.
    #[error("buffer is already initialized")]
    AlreadyInitialized,

    /// An escape sequence was requested that the terminal does not provide.
    #[error("escape sequence is not available")]
    MissingEscape,
}

/// Shorthand for results of buffer operations.
pub type Result<T> = std::result::Result<T, FbufError>;

impl From<FbufError> for io::Error {
    fn from(err: FbufError) -> Self {
        let kind = match &err {
            FbufError::Allocation { .. } | FbufError::CapacityExceeded { .. } => {
                io::ErrorKind::OutOfMemory
            }
            FbufError::SinkWrite(source) => source.kind(),
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

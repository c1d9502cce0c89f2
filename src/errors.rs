use crate::format::Command;
use std::io;
use thiserror::Error;

/// Possible errors that arise from attempting to convert compressed data into its
/// decompressed form, or vise-versa.
#[derive(Error, Debug)]
pub enum SmlzError {
    #[error("corrupt stream: {0}")]
    Corrupt(#[from] CorruptStream),

    #[error("offset {offset:#x} is past the end of the {len:#x} byte source")]
    OffsetOutOfBounds { offset: usize, len: usize },

    #[error("compressed data is {size} bytes, but only {limit} bytes are available")]
    TooLarge { size: usize, limit: usize },

    #[error("{0}")]
    Io(#[source] io::Error),
}

/// Ways a compressed stream can be malformed.
///
/// Any of these means the input can't be trusted; the output decoded so far is discarded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptStream {
    #[error("stream ended after {0} bytes without a termination code")]
    BufferUnderrun(usize),

    #[error("{command} reads from output index {index}, but only {produced} bytes exist")]
    InvalidBackReference {
        command: Command,
        index: isize,
        produced: usize,
    },

    #[error("extended header {0:#04x} uses the reserved command 7")]
    ReservedCommand(u8),
}

impl From<io::Error> for SmlzError {
    fn from(error: io::Error) -> Self {
        SmlzError::Io(error)
    }
}

impl SmlzError {
    /// Convert an I/O error hit while reading compressed data. Running out of
    /// input is a corrupt stream rather than an I/O failure.
    pub(crate) fn reading(error: io::Error, bytes_read: usize) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            CorruptStream::BufferUnderrun(bytes_read).into()
        } else {
            SmlzError::Io(error)
        }
    }
}

use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors that abort a scan before any region is touched.
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot open {}: {source}", .path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed memory map at byte {offset}: expected {expected}")]
    MalformedMapSyntax {
        offset: usize,
        expected: &'static str,
    },
}

/// Errors reported by a [`MemoryChannel`](crate::channel::MemoryChannel).
///
/// These never abort the process; the scanner folds them into its
/// [`Outcome`](crate::scan::Outcome).
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("range {addr:#x}+{len:#x} lies outside the address space")]
    OutOfRange { addr: u64, len: usize },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("nothing was written at {addr:#x}")]
    ShortWrite { addr: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

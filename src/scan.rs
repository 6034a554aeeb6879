//! Scan one region for a marker and patch the first match in place.

use std::{convert::TryFrom, fmt};

use crate::{channel::MemoryChannel, error::ChannelError, maps::Region};

/// Byte sequence searched for by default.
pub const MARKER: &[u8] = b"abcd";
/// Trailing bytes of the region in which a match may not start.
pub const TAIL_MARGIN: usize = 26;
/// Bytes following a match that must lie within the region.
pub const WINDOW: usize = 1024;
/// Byte written over the first byte of the match.
pub const PATCH_BYTE: u8 = b'Z';

/// Tunables of a [`Scanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub marker: Vec<u8>,
    /// A match must start more than `tail_margin` bytes before the end of the
    /// region.
    pub tail_margin: usize,
    /// Size of the window reported after a match. The whole window must fit in
    /// the region for the patch to happen.
    pub window: usize,
    pub patch: u8,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            marker: MARKER.to_vec(),
            tail_margin: TAIL_MARGIN,
            window: WINDOW,
            patch: PATCH_BYTE,
        }
    }
}

/// Terminal result of one scan-and-patch attempt.
#[derive(Debug)]
pub enum Outcome {
    /// The region has no bytes; nothing was read.
    EmptyRegion,
    /// The region could not be read in full.
    ReadFailed(ChannelError),
    NotFound,
    /// A match was found at `offset` but the window after it leaves the region.
    MatchOutOfBounds { offset: usize },
    /// The patch byte was written at `offset` from the region start.
    Patched { offset: usize },
    /// A match was found at `offset` but writing the patch byte failed.
    WriteFailed { offset: usize, error: ChannelError },
}

impl Outcome {
    pub fn is_patched(&self) -> bool {
        matches!(self, Outcome::Patched { .. })
    }

    /// Offset of the match relative to the region start, if there was one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Outcome::MatchOutOfBounds { offset }
            | Outcome::Patched { offset }
            | Outcome::WriteFailed { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::EmptyRegion => write!(f, "region is empty"),
            Outcome::ReadFailed(err) => write!(f, "failed to read region: {}", err),
            Outcome::NotFound => write!(f, "marker not found"),
            Outcome::MatchOutOfBounds { offset } => {
                write!(f, "marker at offset {} runs out of the region", offset)
            }
            Outcome::Patched { offset } => write!(f, "patched marker at offset {}", offset),
            Outcome::WriteFailed { offset, error } => {
                write!(f, "failed to patch marker at offset {}: {}", offset, error)
            }
        }
    }
}

/// Reads a region through a [`MemoryChannel`], looks for the marker and
/// overwrites its first byte.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScanConfig,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Scanner { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Returns the offset of the first marker that starts more than
    /// `tail_margin` bytes before the end of `buf`.
    pub fn find_marker(&self, buf: &[u8]) -> Option<usize> {
        let limit = buf.len().saturating_sub(self.config.tail_margin);
        (0..limit).find(|&idx| buf[idx..].starts_with(&self.config.marker))
    }

    /// Runs one scan-and-patch attempt over `region`.
    ///
    /// Issues at most one read and one write on `channel`; neither is retried.
    pub fn scan_and_patch<C>(&self, channel: &mut C, region: &Region) -> Outcome
    where
        C: MemoryChannel + ?Sized,
    {
        let size = region.size();
        if size == 0 {
            log::debug!(
                "region {:#x} '{}' is empty",
                region.start,
                region.pathname.to_string_lossy()
            );
            return Outcome::EmptyRegion;
        }
        let size = match usize::try_from(size) {
            Ok(size) => size,
            Err(_) => {
                return Outcome::ReadFailed(ChannelError::OutOfRange {
                    addr: region.start,
                    len: usize::MAX,
                })
            }
        };

        log::debug!(
            "reading {} bytes of '{}' at {:#x}",
            size,
            region.pathname.to_string_lossy(),
            region.start
        );
        let buf = match channel.read_at(region.start, size) {
            Ok(buf) if buf.len() == size => buf,
            Ok(buf) => {
                let err = ChannelError::ShortRead {
                    expected: size,
                    actual: buf.len(),
                };
                log::warn!("failed to read region at {:#x}: {}", region.start, err);
                return Outcome::ReadFailed(err);
            }
            Err(err) => {
                log::warn!("failed to read region at {:#x}: {}", region.start, err);
                return Outcome::ReadFailed(err);
            }
        };

        let offset = match self.find_marker(&buf) {
            Some(offset) => offset,
            None => return Outcome::NotFound,
        };
        log::debug!("found marker at offset {}", offset);

        match offset.checked_add(self.config.window) {
            Some(window_end) if window_end <= size => {
                log::info!(
                    "window at offset {}:\n{}",
                    offset,
                    String::from_utf8_lossy(&buf[offset..window_end])
                );
            }
            _ => return Outcome::MatchOutOfBounds { offset },
        }

        let addr = region.start + offset as u64;
        match channel.write_at(addr, self.config.patch) {
            Ok(()) => {
                log::info!("patched {:#x}", addr);
                Outcome::Patched { offset }
            }
            Err(error) => {
                log::warn!("failed to patch {:#x}: {}", addr, error);
                Outcome::WriteFailed { offset, error }
            }
        }
    }
}

/// Scans `region` with the default [`ScanConfig`].
pub fn scan_and_patch<C>(channel: &mut C, region: &Region) -> Outcome
where
    C: MemoryChannel + ?Sized,
{
    Scanner::default().scan_and_patch(channel, region)
}

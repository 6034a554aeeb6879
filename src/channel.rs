//! Byte channels over an address space: positioned reads and single-byte writes.

use crate::error::ChannelError;

#[cfg(target_os = "linux")]
mod procmem;
#[cfg(target_os = "linux")]
pub use procmem::ProcMem;

#[cfg(target_os = "linux")]
mod process_vm;
#[cfg(target_os = "linux")]
pub use process_vm::{ProcessVm, PAGE_SIZE};

/// Positioned access to an address space.
///
/// Implementations perform every operation exactly once and report failure
/// instead of retrying.
pub trait MemoryChannel {
    /// Reads up to `len` bytes starting at `addr`.
    ///
    /// The returned buffer may be shorter than `len` if the range stops being
    /// readable part-way through.
    fn read_at(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, ChannelError>;

    /// Writes a single byte at `addr`.
    fn write_at(&mut self, addr: u64, byte: u8) -> Result<(), ChannelError>;
}

impl<C: MemoryChannel + ?Sized> MemoryChannel for &mut C {
    fn read_at(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, ChannelError> {
        (**self).read_at(addr, len)
    }

    fn write_at(&mut self, addr: u64, byte: u8) -> Result<(), ChannelError> {
        (**self).write_at(addr, byte)
    }
}

/// An in-memory address space starting at `base`.
///
/// Writes are applied to the backing bytes and also recorded, so callers can
/// check exactly which writes were issued.
#[derive(Debug, Clone, Default)]
pub struct SliceChannel {
    base: u64,
    bytes: Vec<u8>,
    reads: usize,
    writes: Vec<(u64, u8)>,
}

impl SliceChannel {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        SliceChannel {
            base,
            bytes,
            reads: 0,
            writes: Vec::new(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of `read_at` calls made so far, failed ones included.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Every `(address, byte)` pair written so far, in order.
    pub fn writes(&self) -> &[(u64, u8)] {
        &self.writes
    }

    fn index(&self, addr: u64) -> Option<usize> {
        let idx = addr.checked_sub(self.base)?;
        if idx < self.bytes.len() as u64 {
            Some(idx as usize)
        } else {
            None
        }
    }
}

impl MemoryChannel for SliceChannel {
    fn read_at(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, ChannelError> {
        self.reads += 1;
        let start = self
            .index(addr)
            .ok_or(ChannelError::OutOfRange { addr, len })?;
        let end = start.saturating_add(len).min(self.bytes.len());
        Ok(self.bytes[start..end].to_vec())
    }

    fn write_at(&mut self, addr: u64, byte: u8) -> Result<(), ChannelError> {
        let idx = self
            .index(addr)
            .ok_or(ChannelError::OutOfRange { addr, len: 1 })?;
        self.bytes[idx] = byte;
        self.writes.push((addr, byte));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryChannel, SliceChannel};
    use crate::ChannelError;

    #[test]
    fn slice_reads_are_clipped_to_the_end() {
        let mut channel = SliceChannel::new(0x1000, b"0123456789".to_vec());
        assert_eq!(channel.read_at(0x1002, 3).unwrap(), b"234");
        assert_eq!(channel.read_at(0x1008, 16).unwrap(), b"89");
        assert_eq!(channel.reads(), 2);
    }

    #[test]
    fn slice_reads_outside_fail() {
        let mut channel = SliceChannel::new(0x1000, vec![0; 16]);
        assert!(matches!(
            channel.read_at(0xfff, 1),
            Err(ChannelError::OutOfRange { addr: 0xfff, len: 1 })
        ));
        assert!(matches!(
            channel.read_at(0x1010, 1),
            Err(ChannelError::OutOfRange { .. })
        ));
    }

    #[test]
    fn slice_writes_are_recorded() {
        let mut channel = SliceChannel::new(0x1000, vec![b'x'; 4]);
        channel.write_at(0x1002, b'Z').unwrap();
        assert_eq!(channel.bytes(), b"xxZx");
        assert_eq!(channel.writes(), &[(0x1002, b'Z')]);
        assert!(channel.write_at(0x1004, b'Z').is_err());
        assert_eq!(channel.writes().len(), 1);
    }
}

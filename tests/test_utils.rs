#![allow(dead_code)]

#[cfg(target_os = "linux")]
use mapscan::maps::{MemoryMaps, Region};

/// `size` bytes of `x` with the marker at `offset`.
pub fn marked_buffer(size: usize, offset: usize) -> Vec<u8> {
    let mut buf = vec![b'x'; size];
    buf[offset..offset + 4].copy_from_slice(b"abcd");
    buf
}

/// A region covering exactly `buf`, with the attributes of the mapping it lives in.
#[cfg(target_os = "linux")]
pub fn region_of(buf: &[u8]) -> Region {
    let start = buf.as_ptr() as u64;
    let maps = MemoryMaps::read_self().expect("Failed to read own maps");
    let mapping = maps
        .find_containing(start)
        .expect("Buffer is not inside any mapping")
        .clone();
    Region {
        start,
        end: start + buf.len() as u64,
        ..mapping
    }
}

/// Reads a byte the compiler assumes nobody else writes.
pub fn byte_at(buf: &[u8], idx: usize) -> u8 {
    unsafe { std::ptr::read_volatile(&buf[idx]) }
}

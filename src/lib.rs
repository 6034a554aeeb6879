//! Mapscan parses a process's memory maps and patches a marker inside one of
//! its regions.
//!
//! ```no_run
//! # fn main() -> mapscan::Result<()> {
//! use mapscan::{channel::ProcMem, maps::MemoryMaps, scan};
//!
//! let mut mem = ProcMem::open_self()?;
//! let maps = MemoryMaps::read_self()?;
//! if let Some(heap) = maps.find(mapscan::maps::DEFAULT_REGION) {
//!     println!("{}", scan::scan_and_patch(&mut mem, heap));
//! }
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::{ChannelError, Error, Result};

/// Byte channels over a process's address space.
pub mod channel;

/// Parsing of `/proc/<pid>/maps`.
pub mod maps;

/// Marker search and in-place patching of a single region.
pub mod scan;

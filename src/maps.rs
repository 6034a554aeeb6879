//! Memory map records and the collection produced by parsing `/proc/<pid>/maps`.

use std::{
    ffi::{OsStr, OsString},
    fmt, slice, vec,
};

use crate::error::Result;

mod parser;

/// Pathname the kernel gives to the region backing `brk`-based allocations.
pub const DEFAULT_REGION: &str = "[heap]";

/// Whether a mapping is private (copy-on-write) or shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    Private,
    Shared,
    /// The fourth permission character was neither `p` nor `s`.
    Unspecified,
}

/// Access permissions of a mapped region, decoded from the 4-character block
/// (`rwxp`, `r--s`, ...) of a maps line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permissions {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub mode: MapMode,
}

impl Permissions {
    /// Decodes a permission block position by position. Characters other than
    /// the expected letter simply leave the corresponding flag unset.
    pub fn from_block(block: [u8; 4]) -> Self {
        Permissions {
            readable: block[0] == b'r',
            writable: block[1] == b'w',
            executable: block[2] == b'x',
            mode: match block[3] {
                b'p' => MapMode::Private,
                b's' => MapMode::Shared,
                _ => MapMode::Unspecified,
            },
        }
    }

    pub fn is_private(&self) -> bool {
        self.mode == MapMode::Private
    }

    pub fn is_shared(&self) -> bool {
        self.mode == MapMode::Shared
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        let mode = match self.mode {
            MapMode::Private => 'p',
            MapMode::Shared => 's',
            MapMode::Unspecified => '-',
        };
        write!(
            f,
            "{}{}{}{}",
            flag(self.readable, 'r'),
            flag(self.writable, 'w'),
            flag(self.executable, 'x'),
            mode
        )
    }
}

/// One line of a maps file: a contiguous range of the address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// First address of the range.
    pub start: u64,
    /// One past the last address of the range.
    pub end: u64,
    pub permissions: Permissions,
    /// Offset into the backing object, 0 for anonymous mappings.
    pub offset: u64,
    /// Device as `major:minor`, kept verbatim.
    pub device: String,
    /// Inode of the backing file, kept verbatim. `"0"` means no file.
    pub inode: String,
    /// Backing file, a bracketed label such as `[heap]`, or empty. Kept
    /// byte for byte, it need not be valid UTF-8.
    pub pathname: OsString,
}

impl Region {
    /// Number of bytes covered by the region. Records with `end < start` are
    /// kept as data but have size 0.
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    pub fn is_anonymous(&self) -> bool {
        self.pathname.is_empty()
    }
}

/// Writes the record back in maps syntax, so that parsing the output yields
/// an equal `Region` (leading spaces of the pathname aside). Pathnames that are
/// not valid UTF-8 are written lossily.
impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:08x} {} {:08x} {} {}",
            self.start, self.end, self.permissions, self.offset, self.device, self.inode
        )?;
        if !self.pathname.is_empty() {
            write!(f, " {}", self.pathname.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Regions of one maps snapshot, in the order they appeared in the text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMaps {
    regions: Vec<Region>,
}

impl MemoryMaps {
    /// Parses the textual maps description.
    ///
    /// The whole text must be well formed; on the first syntax violation the
    /// error reports its byte offset and no regions are returned.
    pub fn parse(text: &str) -> Result<MemoryMaps> {
        Self::parse_bytes(text.as_bytes())
    }

    /// Parses maps text as read from `/proc`. Error offsets index into `text`.
    pub fn parse_bytes(text: &[u8]) -> Result<MemoryMaps> {
        let regions = parser::parse(text)?;
        log::debug!("parsed {} memory regions", regions.len());
        Ok(MemoryMaps { regions })
    }

    /// Reads and parses the maps of the calling process.
    #[cfg(target_os = "linux")]
    pub fn read_self() -> Result<MemoryMaps> {
        Self::read_path(std::path::Path::new("/proc/self/maps"))
    }

    #[cfg(target_os = "linux")]
    fn read_path(path: &std::path::Path) -> Result<MemoryMaps> {
        let bytes =
            std::fs::read(path).map_err(|source| crate::Error::ResourceUnavailable {
                path: path.to_owned(),
                source,
            })?;
        Self::parse_bytes(&bytes)
    }

    /// Returns the first region whose pathname is exactly `pathname`.
    pub fn find<P: AsRef<OsStr>>(&self, pathname: P) -> Option<&Region> {
        let pathname = pathname.as_ref();
        self.regions
            .iter()
            .find(|region| region.pathname.as_os_str() == pathname)
    }

    /// Returns the first region that contains `addr`.
    pub fn find_containing(&self, addr: u64) -> Option<&Region> {
        self.regions.iter().find(|region| region.contains(addr))
    }

    pub fn iter(&self) -> slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn as_slice(&self) -> &[Region] {
        &self.regions
    }
}

impl IntoIterator for MemoryMaps {
    type Item = Region;
    type IntoIter = vec::IntoIter<Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.into_iter()
    }
}

impl<'a> IntoIterator for &'a MemoryMaps {
    type Item = &'a Region;
    type IntoIter = slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

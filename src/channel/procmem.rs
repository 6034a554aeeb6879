use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use super::MemoryChannel;
use crate::error::{ChannelError, Error, Result};

/// The `/proc/self/mem` file of the calling process, opened for reading and
/// writing.
///
/// File offsets are virtual addresses. The kernel accesses the pages on the
/// process's behalf, so even read-only mappings can be patched this way.
#[derive(Debug)]
pub struct ProcMem {
    file: File,
    path: PathBuf,
}

impl ProcMem {
    /// Opens the memory of the calling process.
    pub fn open_self() -> Result<ProcMem> {
        Self::open_path(Path::new("/proc/self/mem"))
    }

    fn open_path(path: &Path) -> Result<ProcMem> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::ResourceUnavailable {
                path: path.to_owned(),
                source,
            })?;
        log::debug!("opened {}", path.display());
        Ok(ProcMem {
            file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MemoryChannel for ProcMem {
    fn read_at(&mut self, addr: u64, len: usize) -> std::result::Result<Vec<u8>, ChannelError> {
        self.file.seek(SeekFrom::Start(addr))?;
        let mut buf = vec![0; len];
        // One read, no retry. The kernel copies up to the first unreadable page
        // and returns that prefix, or fails if the first page is unreadable.
        let bytes_read = self.file.read(&mut buf)?;
        buf.truncate(bytes_read);
        Ok(buf)
    }

    fn write_at(&mut self, addr: u64, byte: u8) -> std::result::Result<(), ChannelError> {
        self.file.seek(SeekFrom::Start(addr))?;
        if self.file.write(&[byte])? == 0 {
            return Err(ChannelError::ShortWrite { addr });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ProcMem;
    use crate::{channel::MemoryChannel, channel::PAGE_SIZE, Error};
    use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
    use std::path::Path;

    #[test]
    fn read_own_memory() {
        let var: u64 = 0x1122_3344_5566_7788;
        let mut mem = ProcMem::open_self().expect("Failed to open /proc/self/mem");

        let bytes = mem
            .read_at(&var as *const _ as u64, std::mem::size_of::<u64>())
            .expect("Failed to read");

        assert_eq!(bytes, var.to_ne_bytes());
    }

    #[test]
    fn write_own_memory() {
        let buf = vec![b'x'; 64];
        let mut mem = ProcMem::open_self().unwrap();

        mem.write_at(buf.as_ptr() as u64 + 10, b'Z').unwrap();

        assert_eq!(unsafe { std::ptr::read_volatile(&buf[10]) }, b'Z');
        assert_eq!(unsafe { std::ptr::read_volatile(&buf[9]) }, b'x');
    }

    #[test]
    fn unmapped_address_fails() {
        let mut mem = ProcMem::open_self().unwrap();
        assert!(mem.read_at(0, 16).is_err());
    }

    #[test]
    fn read_stops_at_unmapped_page() {
        let page = *PAGE_SIZE;
        let mut mem = ProcMem::open_self().unwrap();
        unsafe {
            let ptr = mmap(
                std::ptr::null_mut(),
                2 * page,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                -1,
                0,
            )
            .expect("Failed to mmap");
            std::ptr::write_bytes(ptr as *mut u8, b'q', 2 * page);
            munmap((ptr as usize + page) as *mut std::ffi::c_void, page)
                .expect("Failed to munmap");

            let read = mem.read_at(ptr as u64 + page as u64 - 4, 8).unwrap();
            assert_eq!(read, b"qqqq");

            munmap(ptr, page).unwrap();
        }
    }

    #[test]
    fn missing_mem_file() {
        match ProcMem::open_path(Path::new("/proc/self/no-such-mem")) {
            Err(Error::ResourceUnavailable { path, .. }) => {
                assert_eq!(path.to_str(), Some("/proc/self/no-such-mem"))
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}

use nix::unistd::{getpid, Pid};
use std::io;

use super::MemoryChannel;
use crate::error::ChannelError;

lazy_static::lazy_static! {
    /// Memory page size from system configuration.
    pub static ref PAGE_SIZE: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };

    /// Maximum number of iovecs accepted by a single `process_vm_readv` call.
    static ref IOV_MAX: usize = match unsafe { libc::sysconf(libc::_SC_IOV_MAX) } {
        n if n > 0 => n as usize,
        _ => 1024,
    };
}

/// Accesses the calling process's memory with `process_vm_readv(2)` / `process_vm_writev(2)`.
///
/// Unlike [`ProcMem`](super::ProcMem) this needs no file descriptor, but it
/// can only write to pages that are mapped writable.
#[derive(Debug, Clone, Copy)]
pub struct ProcessVm {
    pid: Pid,
}

impl ProcessVm {
    /// Uses this process's own address space.
    pub fn me() -> Self {
        ProcessVm { pid: getpid() }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
}

/// A piece of a remote range that resides in only one memory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageChunk {
    remote_base: u64,
    len: usize,
}

impl PageChunk {
    fn as_remote_iovec(&self) -> libc::iovec {
        libc::iovec {
            iov_base: self.remote_base as usize as *mut libc::c_void,
            iov_len: self.len,
        }
    }
}

/// Splits `addr..addr + len` on page boundaries.
///
/// Partial transfers happen at the granularity of remote iovecs, so one iovec
/// per page lets a read return everything before the first unreadable page.
fn split_on_page_boundary(addr: u64, len: usize, page_size: usize) -> Vec<PageChunk> {
    let page_size = page_size as u64;
    let mut out = Vec::new();
    let mut remote_base = addr;
    let mut left = len as u64;

    while left > 0 {
        let next_page_distance = page_size - ((page_size - 1) & remote_base);
        let chunk = left.min(next_page_distance);
        out.push(PageChunk {
            remote_base,
            len: chunk as usize,
        });
        remote_base = remote_base.wrapping_add(chunk);
        left -= chunk;
    }
    out
}

impl MemoryChannel for ProcessVm {
    fn read_at(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, ChannelError> {
        let mut buf = vec![0u8; len];
        let chunks = split_on_page_boundary(addr, len, *PAGE_SIZE);
        let mut filled = 0;

        for batch in chunks.chunks(*IOV_MAX) {
            let batch_len = batch.iter().map(|chunk| chunk.len).sum::<usize>();
            let remote_iov = batch
                .iter()
                .map(PageChunk::as_remote_iovec)
                .collect::<Vec<_>>();
            let local_iov = libc::iovec {
                iov_base: buf[filled..].as_mut_ptr() as *mut libc::c_void,
                iov_len: batch_len,
            };

            // `local_iov` covers `batch_len` bytes of `buf` past `filled`, which
            // never exceeds `len`; the remote side is only read.
            let bytes_read = unsafe {
                libc::process_vm_readv(
                    self.pid.as_raw(),
                    &local_iov,
                    1,
                    remote_iov.as_ptr(),
                    remote_iov.len() as libc::c_ulong,
                    0,
                )
            };

            if bytes_read == -1 {
                if filled == 0 {
                    return Err(io::Error::last_os_error().into());
                }
                break;
            }

            filled += bytes_read as usize;
            if (bytes_read as usize) < batch_len {
                break;
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }

    fn write_at(&mut self, addr: u64, byte: u8) -> Result<(), ChannelError> {
        let local_iov = libc::iovec {
            iov_base: &byte as *const u8 as *mut libc::c_void,
            iov_len: 1,
        };
        let remote_iov = PageChunk {
            remote_base: addr,
            len: 1,
        }
        .as_remote_iovec();

        // The kernel only reads from `local_iov`.
        let bytes_written = unsafe {
            libc::process_vm_writev(self.pid.as_raw(), &local_iov, 1, &remote_iov, 1, 0)
        };

        match bytes_written {
            -1 => Err(io::Error::last_os_error().into()),
            0 => Err(ChannelError::ShortWrite { addr }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{split_on_page_boundary, PageChunk, ProcessVm, PAGE_SIZE};
    use crate::channel::MemoryChannel;
    use nix::sys::mman::{mmap, mprotect, munmap, MapFlags, ProtFlags};

    fn chunk(remote_base: u64, len: usize) -> PageChunk {
        PageChunk { remote_base, len }
    }

    #[test]
    fn split_within_one_page() {
        assert_eq!(
            split_on_page_boundary(0x1010, 0x20, 0x1000),
            vec![chunk(0x1010, 0x20)]
        );
        assert!(split_on_page_boundary(0x1010, 0, 0x1000).is_empty());
    }

    #[test]
    fn split_across_pages() {
        assert_eq!(
            split_on_page_boundary(0x1ff0, 0x2020, 0x1000),
            vec![
                chunk(0x1ff0, 0x10),
                chunk(0x2000, 0x1000),
                chunk(0x3000, 0x1000),
                chunk(0x4000, 0x10),
            ]
        );
    }

    #[test]
    fn split_page_aligned() {
        assert_eq!(
            split_on_page_boundary(0x2000, 0x2000, 0x1000),
            vec![chunk(0x2000, 0x1000), chunk(0x3000, 0x1000)]
        );
    }

    #[test]
    fn read_and_write_memory() {
        let mut var: [u8; 8] = *b"abcdefgh";
        let addr = var.as_mut_ptr() as u64;
        let mut vm = ProcessVm::me();

        let read = vm.read_at(addr, var.len()).unwrap();
        assert_eq!(read, b"abcdefgh");

        vm.write_at(addr + 3, b'Z').unwrap();
        assert_eq!(unsafe { std::ptr::read_volatile(&var[3]) }, b'Z');
    }

    #[test]
    fn read_stops_at_protected_page() {
        let page = *PAGE_SIZE;
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
            mprotect(
                (ptr as usize + page) as *mut std::ffi::c_void,
                page,
                ProtFlags::PROT_NONE,
            )
            .expect("Failed to mprotect");

            let read = ProcessVm::me()
                .read_at(ptr as u64 + page as u64 - 4, 8)
                .unwrap();
            assert_eq!(read, b"qqqq");

            munmap(ptr, 2 * page).unwrap();
        }
    }
}

use std::cell::Cell;
use std::io;
use std::ptr;

use log::debug;

/// Default code buffer size: 16 MiB.
pub const DEFAULT_CODE_BUF_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    ReadExec,
}

/// Append-only arena for generated host code, backed by mmap'd memory.
///
/// The mapping is either writable or executable, never both. Bytes below
/// the write offset belong to committed blocks; only [`rewind`] (used by
/// a full cache flush) gives them back.
///
/// [`rewind`]: CodeBuffer::rewind
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    prot: Cell<Protection>,
}

// SAFETY: CodeBuffer owns its mapping exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Map a buffer of at least `size` bytes, rounded up to whole pages.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let size = size.max(1).div_ceil(page) * page;

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        debug!("code buffer: mapped {size} bytes at {ptr:p}");

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            prot: Cell::new(Protection::ReadWrite),
        })
    }

    pub fn with_default_size() -> io::Result<Self> {
        Self::new(DEFAULT_CODE_BUF_SIZE)
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: offset is within the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    /// Drop everything emitted at or after `offset`.
    pub fn rewind(&mut self, offset: usize) {
        assert!(offset <= self.offset, "rewind past the write offset");
        self.offset = offset;
    }

    #[inline]
    fn reserve(&mut self, len: usize) -> *mut u8 {
        assert!(self.prot.get() == Protection::ReadWrite, "code buffer is not writable");
        assert!(len <= self.remaining(), "code buffer overflow");
        // SAFETY: offset + len <= size.
        let at = unsafe { self.ptr.add(self.offset) };
        self.offset += len;
        at
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        let at = self.reserve(1);
        unsafe { at.write(val) };
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        let at = self.reserve(4);
        unsafe { (at as *mut u32).write_unaligned(val.to_le()) };
    }

    #[inline]
    pub fn emit_i32(&mut self, val: i32) {
        self.emit_u32(val as u32);
    }

    pub fn emit_bytes(&mut self, data: &[u8]) {
        let at = self.reserve(data.len());
        // SAFETY: reserve checked the destination range.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), at, data.len()) };
    }

    /// Patch a rel32 field at `offset`.
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.offset);
        assert!(self.prot.get() == Protection::ReadWrite, "code buffer is not writable");
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val.to_le()) };
    }

    pub fn protection(&self) -> Protection {
        self.prot.get()
    }

    fn protect(&self, prot: Protection) -> io::Result<()> {
        if self.prot.get() == prot {
            return Ok(());
        }
        let flags = match prot {
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::ReadExec => libc::PROT_READ | libc::PROT_EXEC,
        };
        // SAFETY: ptr/size describe our own mapping.
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, flags) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        self.prot.set(prot);
        Ok(())
    }

    /// Make the buffer executable and non-writable.
    pub fn set_executable(&self) -> io::Result<()> {
        self.protect(Protection::ReadExec)
    }

    /// Make the buffer writable and non-executable.
    pub fn set_writable(&self) -> io::Result<()> {
        self.protect(Protection::ReadWrite)
    }

    /// Everything emitted so far.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }

    /// Bytes emitted since `start`.
    pub fn since(&self, start: usize) -> &[u8] {
        &self.as_slice()[start..]
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

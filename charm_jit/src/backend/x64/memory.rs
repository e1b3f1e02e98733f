//! Executable memory for finalized blocks.

use thiserror::Error;

/// Failure to materialize executable memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// `mmap` refused the allocation.
    #[error("failed to allocate {size} bytes of code memory")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
    },
    /// `mprotect` refused to make the region executable.
    #[error("failed to make code memory executable")]
    ProtectFailed,
}

/// A page-aligned buffer holding finalized machine code, mapped
/// read-execute after construction.
pub struct ExecutableBuffer {
    ptr: *mut u8,
    len: usize,
    capacity: usize,
}

// The mapping is immutable after construction.
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Copy `code` into a fresh read-execute mapping.
    pub fn from_code(code: &[u8]) -> Result<ExecutableBuffer, MemoryError> {
        let page = 4096usize;
        let capacity = code.len().div_ceil(page).max(1) * page;

        // SAFETY: anonymous private mapping, no aliasing until we hand the
        // pointer out, and we only transition RW -> RX.
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(MemoryError::AllocationFailed { size: capacity });
            }
            let ptr = ptr.cast::<u8>();
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
            if libc::mprotect(ptr.cast(), capacity, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(ptr.cast(), capacity);
                return Err(MemoryError::ProtectFailed);
            }
            Ok(ExecutableBuffer {
                ptr,
                len: code.len(),
                capacity,
            })
        }
    }

    /// The code bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is live and readable for self's lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Entry point of the block.
    pub fn entry(&self) -> *const u8 {
        self.ptr
    }

    /// Code length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no bytes were emitted.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/capacity came from mmap above.
        unsafe {
            libc::munmap(self.ptr.cast(), self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_bytes() {
        let code = [0xC3u8]; // ret
        let buf = ExecutableBuffer::from_code(&code).unwrap();
        assert_eq!(buf.as_slice(), &code);
        assert_eq!(buf.len(), 1);
        assert!(!buf.is_empty());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_executes() {
        // mov eax, 42; ret
        let code = [0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3];
        let buf = ExecutableBuffer::from_code(&code).unwrap();
        // SAFETY: the buffer holds a complete function with the C ABI.
        let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(buf.entry()) };
        assert_eq!(f(), 42);
    }
}

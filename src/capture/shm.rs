//! SysV shared memory segments
//!
//! The X server reads and writes MIT-SHM images through a SysV segment id,
//! so these are plain `shmget`/`shmat` segments rather than POSIX shm files.

use std::io;
use std::ptr;

use log::error;

/// A private shared memory segment mapped into this process.
///
/// Dropping it unmaps the segment and marks it for removal. Both steps are
/// attempted even if the first one fails.
#[derive(Debug)]
pub struct ShmSegment {
    id: i32,
    addr: *mut u8,
    size: usize,
}

impl ShmSegment {
    /// Create and map a new segment of `size` bytes
    pub fn create(size: usize) -> io::Result<Self> {
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            return Err(io::Error::last_os_error());
        }

        let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
        if addr as isize == -1 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::shmctl(id, libc::IPC_RMID, ptr::null_mut());
            }
            return Err(err);
        }

        Ok(Self {
            id,
            addr: addr as *mut u8,
            size,
        })
    }

    /// Kernel segment id, as handed to the X server
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.addr as *const u8, self.size) }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if unsafe { libc::shmdt(self.addr as *const libc::c_void) } < 0 {
            error!("Error detaching shm: {}", io::Error::last_os_error());
        }
        if unsafe { libc::shmctl(self.id, libc::IPC_RMID, ptr::null_mut()) } < 0 {
            error!("Error destroying shm: {}", io::Error::last_os_error());
        }
    }
}

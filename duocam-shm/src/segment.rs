//! Named POSIX shared memory mapped as a single fixed-layout value.

use std::ffi::CString;
use std::marker::PhantomData;

use tracing::debug;

use crate::{Error, Result};

/// Marker for types that may live in a shared memory region.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, valid when all bytes are zero, contain
/// no pointers or references, and perform all mutation through interior
/// mutability (atomics / `UnsafeCell`) so that a `&T` handed out by
/// [ShmSegment::get] is sound while other processes access the same region.
pub unsafe trait ShmSafe: Sized {}

/// A named POSIX shared memory object mapped as one `T`.
///
/// The segment created by [ShmSegment::create] owns the name and unlinks it
/// on drop; segments from [ShmSegment::open] only unmap. The region must
/// outlive every reader and writer using it, which is the creator's
/// responsibility.
pub struct ShmSegment<T: ShmSafe> {
    ptr: std::ptr::NonNull<T>,
    name: CString,
    owner: bool,
    _marker: PhantomData<T>,
}

// The mapping is plain memory; the raw pointer does not tie it to a thread.
unsafe impl<T: ShmSafe> Send for ShmSegment<T> {}

/// `shm_open` requires a name of the form `/somename` with no further
/// slashes.
fn shm_name(name: &str) -> Result<CString> {
    let trimmed = name.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(Error::BadName(name.to_string()));
    }
    CString::new(format!("/{trimmed}")).map_err(|_| Error::BadName(name.to_string()))
}

fn map_fd<T>(fd: libc::c_int) -> Result<std::ptr::NonNull<T>> {
    let size = std::mem::size_of::<T>();
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Error::Map {
            source: std::io::Error::last_os_error(),
        });
    }
    std::ptr::NonNull::new(ptr as *mut T).ok_or_else(|| Error::Map {
        source: std::io::Error::other("mmap returned a null mapping"),
    })
}

impl<T: ShmSafe> ShmSegment<T> {
    /// Create a new shared memory object of exactly `size_of::<T>()` bytes,
    /// zero-initialized by the OS, and map it.
    ///
    /// Fails if an object of this name already exists.
    pub fn create(name: &str) -> Result<Self> {
        let cname = shm_name(name)?;
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(Error::Create {
                source: std::io::Error::last_os_error(),
            });
        }
        let size = std::mem::size_of::<T>();
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret != 0 {
            let source = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(Error::Resize { source });
        }
        let mapped = map_fd::<T>(fd);
        unsafe { libc::close(fd) };
        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                return Err(e);
            }
        };
        debug!("created shared memory object {:?} ({} bytes)", cname, size);
        Ok(Self {
            ptr,
            name: cname,
            owner: true,
            _marker: PhantomData,
        })
    }

    /// Map an existing shared memory object, validating its size.
    pub fn open(name: &str) -> Result<Self> {
        let cname = shm_name(name)?;
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(Error::Open {
                source: std::io::Error::last_os_error(),
            });
        }
        let expected = std::mem::size_of::<T>();
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::fstat(fd, &mut stat) };
        if ret != 0 {
            let source = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Open { source });
        }
        if (stat.st_size as usize) < expected {
            unsafe { libc::close(fd) };
            return Err(Error::TooSmall {
                expected,
                actual: stat.st_size as usize,
            });
        }
        let mapped = map_fd::<T>(fd);
        unsafe { libc::close(fd) };
        let ptr = mapped?;
        debug!("opened shared memory object {:?}", cname);
        Ok(Self {
            ptr,
            name: cname,
            owner: false,
            _marker: PhantomData,
        })
    }

    /// Access the mapped value. All mutation goes through the value's own
    /// interior mutability (see [ShmSafe]).
    pub fn get(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }

    pub fn name(&self) -> &str {
        // constructed from valid UTF-8 in shm_name
        self.name.to_str().unwrap_or("")
    }
}

impl<T: ShmSafe> Drop for ShmSegment<T> {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, std::mem::size_of::<T>());
            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
        if self.owner {
            debug!("unlinked shared memory object {:?}", self.name);
        }
    }
}

//! MappedObject - one POSIX shared memory object mapped into this process.
//!
//! Owns both the descriptor and the mapped view. Dropping it unmaps the view
//! and closes the descriptor; it never unlinks the name, that decision belongs
//! to whoever tracks the attachments.

use std::mem::MaybeUninit;
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::stat::Mode;

use crate::error::SegmentError;

/// Pause between polls while waiting for another process to size an object.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// How an object was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// This call created the object.
    Created,
    /// The object already existed and was opened.
    Existing,
}

/// A mapped shared memory object.
pub(crate) struct MappedObject {
    /// OS object name, including the leading '/'.
    name: String,
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: MappedObject owns its mapping; the pointer stays valid until drop.
unsafe impl Send for MappedObject {}

// SAFETY: MappedObject never hands out references on its own; callers
// synchronize access to the mapped bytes.
unsafe impl Sync for MappedObject {}

impl MappedObject {
    /// Create `name` with exactly `len` bytes, or open it if it already exists.
    ///
    /// A freshly created object is zero-filled by the kernel. An existing one is
    /// mapped at whatever size it has once it reaches `min_existing_len`,
    /// waiting up to `wait` for its creator to size it.
    pub(crate) fn create_or_open(
        name: &str,
        len: usize,
        mode: u32,
        min_existing_len: usize,
        wait: Duration,
    ) -> Result<(Self, Disposition), SegmentError> {
        let flags = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;
        let mode = Mode::from_bits_truncate(mode as libc::mode_t);

        match mman::shm_open(name, flags, mode) {
            Ok(fd) => {
                let object = Self::size_and_map(name, fd, len).inspect_err(|_| {
                    // Do not leave an unusable object behind for the next caller.
                    let _ = unlink(name);
                })?;
                tracing::debug!(name = %name, len = len, "Created shared memory object");
                Ok((object, Disposition::Created))
            }
            Err(Errno::EEXIST) => {
                let object = Self::open(name, min_existing_len, wait)?;
                Ok((object, Disposition::Existing))
            }
            Err(errno) => Err(SegmentError::CreateFailed {
                name: name.to_string(),
                errno,
            }),
        }
    }

    /// Open an existing object and map all of it.
    ///
    /// Fails with `OpenFailed` (`ENOENT`) when the object does not exist, and
    /// with `Truncated` when it is still smaller than `min_len` after `wait`.
    pub(crate) fn open(name: &str, min_len: usize, wait: Duration) -> Result<Self, SegmentError> {
        let fd = mman::shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|errno| {
            SegmentError::OpenFailed {
                name: name.to_string(),
                errno,
            }
        })?;

        let deadline = Instant::now() + wait;
        let len = loop {
            let len = object_len(&fd).map_err(|errno| SegmentError::OpenFailed {
                name: name.to_string(),
                errno,
            })?;
            if len >= min_len.max(1) {
                break len;
            }
            if Instant::now() >= deadline {
                return Err(SegmentError::Truncated {
                    name: name.to_string(),
                    actual: len,
                    expected: min_len,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let object = Self::map(name, fd, len)?;
        tracing::debug!(name = %name, len = len, "Opened shared memory object");
        Ok(object)
    }

    fn size_and_map(name: &str, fd: OwnedFd, len: usize) -> Result<Self, SegmentError> {
        let size = libc::off_t::try_from(len).map_err(|_| SegmentError::ResizeFailed {
            name: name.to_string(),
            errno: Errno::EFBIG,
        })?;
        nix::unistd::ftruncate(&fd, size).map_err(|errno| SegmentError::ResizeFailed {
            name: name.to_string(),
            errno,
        })?;
        Self::map(name, fd, len)
    }

    fn map(name: &str, fd: OwnedFd, len: usize) -> Result<Self, SegmentError> {
        let length = NonZeroUsize::new(len).ok_or_else(|| SegmentError::Truncated {
            name: name.to_string(),
            actual: 0,
            expected: 1,
        })?;

        // SAFETY: fd is a valid shared memory descriptor of at least `len` bytes,
        // and the kernel picks the address.
        let ptr = unsafe {
            mman::mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(|errno| SegmentError::MapFailed {
            name: name.to_string(),
            errno,
        })?;

        Ok(Self {
            name: name.to_string(),
            fd,
            ptr: ptr.cast::<u8>(),
            len,
        })
    }

    /// OS object name.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Start of the mapping.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Zero the whole mapping.
    pub(crate) fn zero_fill(&self) {
        // SAFETY: ptr is valid for `len` writable bytes while self is alive.
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), 0, self.len) };
    }
}

impl Drop for MappedObject {
    fn drop(&mut self) {
        // SAFETY: ptr and len describe the mapping created in `map`.
        let result = unsafe { mman::munmap(self.ptr.cast(), self.len) };
        if let Err(errno) = result {
            tracing::error!(
                name = %self.name,
                fd = self.fd.as_raw_fd(),
                error = %errno,
                "Failed to unmap shared memory object"
            );
        }
        // The descriptor closes when `fd` drops.
    }
}

/// Remove a shared memory object name. Existing mappings stay valid.
pub(crate) fn unlink(name: &str) -> nix::Result<()> {
    mman::shm_unlink(name)?;
    tracing::debug!(name = %name, "Unlinked shared memory object");
    Ok(())
}

/// Current size of the object behind `fd`.
fn object_len(fd: &OwnedFd) -> nix::Result<usize> {
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fd is open and stat points to writable storage for one `stat`.
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), stat.as_mut_ptr()) };
    Errno::result(rc)?;
    // SAFETY: fstat succeeded and filled the struct.
    let stat = unsafe { stat.assume_init() };
    Ok(usize::try_from(stat.st_size).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("/shmlock-mapping-{}-{}", tag, std::process::id())
    }

    #[test]
    fn test_create_then_open_existing() {
        let name = unique("existing");
        let (created, disposition) =
            MappedObject::create_or_open(&name, 4096, 0o600, 1, Duration::ZERO).unwrap();
        assert_eq!(disposition, Disposition::Created);
        assert_eq!(created.len(), 4096);

        unsafe { *created.as_ptr().add(10) = 0x5A };

        let (again, disposition) =
            MappedObject::create_or_open(&name, 64, 0o600, 1, Duration::ZERO).unwrap();
        assert_eq!(disposition, Disposition::Existing);
        // Existing objects keep their original size.
        assert_eq!(again.len(), 4096);
        assert_eq!(unsafe { *again.as_ptr().add(10) }, 0x5A);

        unlink(&name).unwrap();
    }

    #[test]
    fn test_open_missing() {
        let err = MappedObject::open(&unique("missing"), 1, Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SegmentError::OpenFailed {
                errno: Errno::ENOENT,
                ..
            }
        ));
    }

    #[test]
    fn test_open_too_small() {
        let name = unique("small");
        let (_created, _) =
            MappedObject::create_or_open(&name, 8, 0o600, 1, Duration::ZERO).unwrap();

        let err = MappedObject::open(&name, 64, Duration::from_millis(5))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SegmentError::Truncated {
                actual: 8,
                expected: 64,
                ..
            }
        ));

        unlink(&name).unwrap();
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! NamedMutex - a process-shared robust mutex living in its own named object.
//!
//! The mutex is a `pthread_mutex_t` placed in a small shared memory object
//! next to the segment. It is initialized with:
//!
//! - `PTHREAD_PROCESS_SHARED`: any process mapping the object can use it.
//! - `PTHREAD_MUTEX_ROBUST`: if the owner dies while holding it, the next
//!   locker acquires it with `EOWNERDEAD` and makes it consistent again.
//! - `PTHREAD_MUTEX_ERRORCHECK`: re-locking from the owning thread fails
//!   with `EDEADLK`, unlocking from any other thread fails with `EPERM`.
//!
//! The block also carries the host-wide attachment count used to decide who
//! removes the names.

use std::cell::UnsafeCell;
use std::mem::{size_of, MaybeUninit};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;

use crate::error::SegmentError;
use crate::shm::mapping::{Disposition, MappedObject};

/// `init_state` of a block whose mutex is usable. A fresh object reads 0.
const STATE_READY: u32 = 1;

/// Pause between polls while another process initializes the block.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Layout of the mutex object.
#[repr(C)]
struct MutexBlock {
    /// `STATE_READY` once `mutex` has been initialized.
    init_state: AtomicU32,
    /// Live attachments across all processes. Only changed while `mutex` is held.
    attached: AtomicU32,
    /// Set once the names were unlinked. Only changed while `mutex` is held.
    retired: AtomicU32,
    _reserved: u32,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
}

const BLOCK_SIZE: usize = size_of::<MutexBlock>();

/// Result of a successful acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Acquired normally.
    Acquired,
    /// Acquired after its previous owner died holding it. The payload may
    /// have been left half-updated.
    Recovered,
}

/// Handle to a named process-shared mutex.
pub(crate) struct NamedMutex {
    object: MappedObject,
}

impl NamedMutex {
    /// Create the mutex object, or attach to it if another process got there first.
    pub(crate) fn create_or_open(
        name: &str,
        mode: u32,
        wait: Duration,
    ) -> Result<Self, SegmentError> {
        let (object, disposition) =
            MappedObject::create_or_open(name, BLOCK_SIZE, mode, BLOCK_SIZE, wait)?;
        let mutex = Self { object };

        match disposition {
            Disposition::Created => mutex.initialize()?,
            Disposition::Existing => mutex.wait_ready(wait)?,
        }

        Ok(mutex)
    }

    /// Attach to an existing mutex object. Never creates it.
    pub(crate) fn open(name: &str, wait: Duration) -> Result<Self, SegmentError> {
        let object = MappedObject::open(name, BLOCK_SIZE, wait)?;
        let mutex = Self { object };
        mutex.wait_ready(wait)?;
        Ok(mutex)
    }

    fn block(&self) -> &MutexBlock {
        // SAFETY: the mapping is page aligned, at least BLOCK_SIZE long, and
        // lives as long as self. All mutable state is atomic or in UnsafeCell.
        unsafe { &*(self.object.as_ptr() as *const MutexBlock) }
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.block().mutex.get()
    }

    fn initialize(&self) -> Result<(), SegmentError> {
        // SAFETY: this process created the object, nobody uses the mutex
        // until init_state flips to READY.
        unsafe { init_robust(self.raw()) }.map_err(|errno| SegmentError::MutexInit {
            name: self.name().to_string(),
            errno,
        })?;

        self.block().init_state.store(STATE_READY, Ordering::Release);
        tracing::debug!(name = %self.name(), "Initialized process-shared mutex");
        Ok(())
    }

    fn wait_ready(&self, wait: Duration) -> Result<(), SegmentError> {
        let start = Instant::now();
        while self.block().init_state.load(Ordering::Acquire) != STATE_READY {
            if start.elapsed() >= wait {
                return Err(SegmentError::AttachTimeout {
                    name: self.name().to_string(),
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    /// OS object name.
    pub(crate) fn name(&self) -> &str {
        self.object.name()
    }

    /// Block until the mutex is held by the calling thread.
    pub(crate) fn lock(&self) -> Result<LockState, SegmentError> {
        // SAFETY: the mutex was initialized before init_state became READY.
        let rc = unsafe { libc::pthread_mutex_lock(self.raw()) };
        self.finish_acquire(rc)
            .map(|state| state.unwrap_or(LockState::Acquired))
    }

    /// Acquire the mutex if it is free. `None` when another thread holds it;
    /// the owning thread itself gets `EDEADLK`.
    pub(crate) fn try_lock(&self) -> Result<Option<LockState>, SegmentError> {
        // SAFETY: the mutex was initialized before init_state became READY.
        let rc = unsafe { libc::pthread_mutex_trylock(self.raw()) };
        if rc == libc::EBUSY {
            return Ok(None);
        }
        self.finish_acquire(rc)
            .map(|state| Some(state.unwrap_or(LockState::Acquired)))
    }

    fn finish_acquire(&self, rc: libc::c_int) -> Result<Option<LockState>, SegmentError> {
        match rc {
            0 => Ok(None),
            libc::EOWNERDEAD => {
                // SAFETY: EOWNERDEAD means this thread now holds the mutex.
                let rc = unsafe { libc::pthread_mutex_consistent(self.raw()) };
                if rc != 0 {
                    return Err(SegmentError::LockFailed {
                        name: self.name().to_string(),
                        errno: Errno::from_raw(rc),
                    });
                }
                tracing::warn!(
                    name = %self.name(),
                    "Recovered mutex abandoned by a terminated owner"
                );
                Ok(Some(LockState::Recovered))
            }
            rc => Err(SegmentError::LockFailed {
                name: self.name().to_string(),
                errno: Errno::from_raw(rc),
            }),
        }
    }

    /// Release the mutex. Fails with `EPERM` if the calling thread does not hold it.
    pub(crate) fn unlock(&self) -> Result<(), SegmentError> {
        // SAFETY: the mutex was initialized before init_state became READY.
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw()) };
        if rc != 0 {
            return Err(SegmentError::UnlockFailed {
                name: self.name().to_string(),
                errno: Errno::from_raw(rc),
            });
        }
        Ok(())
    }

    /// Lock and release again when the returned guard drops.
    pub(crate) fn hold(&self) -> Result<HeldLock<'_>, SegmentError> {
        self.lock()?;
        Ok(HeldLock { mutex: self })
    }

    /// Like [`hold`](Self::hold), but gives up with `None` once `wait` has
    /// passed while another holder keeps the lock.
    pub(crate) fn hold_within(
        &self,
        wait: Duration,
    ) -> Result<Option<HeldLock<'_>>, SegmentError> {
        let deadline = Instant::now() + wait;
        loop {
            if self.try_lock()?.is_some() {
                return Ok(Some(HeldLock { mutex: self }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Whether the last detacher already unlinked this object. Call with the lock held.
    pub(crate) fn is_retired(&self) -> bool {
        self.block().retired.load(Ordering::Acquire) != 0
    }

    /// Mark the names as unlinked. Call with the lock held.
    pub(crate) fn retire(&self) {
        self.block().retired.store(1, Ordering::Release);
    }

    /// Count one more attachment. Call with the lock held.
    pub(crate) fn attach(&self) -> u32 {
        self.block().attached.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count one attachment less and return how many remain. Call with the lock held.
    pub(crate) fn detach(&self) -> u32 {
        let block = self.block();
        let previous = block
            .attached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Attachments currently recorded.
    pub(crate) fn attachments(&self) -> u32 {
        self.block().attached.load(Ordering::Acquire)
    }
}

/// Internal lock scope used while setting up and tearing down attachments.
pub(crate) struct HeldLock<'a> {
    mutex: &'a NamedMutex,
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.unlock() {
            tracing::warn!(name = %self.mutex.name(), error = %e, "Failed to release mutex");
        }
    }
}

/// Initialize `mutex` as process-shared, robust and error-checking.
///
/// # Safety
/// `mutex` must point to writable storage for a `pthread_mutex_t` that no
/// thread is using.
unsafe fn init_robust(mutex: *mut libc::pthread_mutex_t) -> Result<(), Errno> {
    let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
    let attr = attr.as_mut_ptr();

    let result = (|| {
        check(libc::pthread_mutexattr_setpshared(
            attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_mutexattr_setrobust(
            attr,
            libc::PTHREAD_MUTEX_ROBUST,
        ))?;
        check(libc::pthread_mutexattr_settype(
            attr,
            libc::PTHREAD_MUTEX_ERRORCHECK,
        ))?;
        check(libc::pthread_mutex_init(mutex, attr))
    })();

    libc::pthread_mutexattr_destroy(attr);
    result
}

fn check(rc: libc::c_int) -> Result<(), Errno> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Errno::from_raw(rc))
    }
}

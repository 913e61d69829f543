// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedSegment - a named shared memory segment with its own mutex.
//!
//! A segment is backed by two POSIX shared memory objects:
//!
//! - `/<name>`: the 16-byte [`Header`] followed by the payload.
//! - `/<name>Mutex`: the process-shared robust mutex guarding the payload.
//!
//! Setup always takes the mutex before touching the region, so an attacher
//! never sees a region whose header is still being written.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;

use crate::config::{NamePolicy, SegmentOptions};
use crate::error::SegmentError;
use crate::shm::header::{Header, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::shm::mapping::{self, Disposition, MappedObject};
use crate::shm::mutex::{LockState, NamedMutex};
use crate::types::SegmentName;

/// Attempts made when racing against the last detacher of the same name.
const MAX_ATTACH_ATTEMPTS: usize = 8;

/// What `create` found under the segment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new segment was created, zero-filled and given its header.
    Created,
    /// A segment with this name already existed and was attached as-is.
    Attached,
}

mod sealed {
    pub trait Sealed {}
}

/// Operations on a named, lockable shared memory segment.
///
/// Every fallible operation resets [`Segment::error_code`] first and records
/// the errno of the failure before returning it.
///
/// The trait is sealed. [`ScopedAccess`](crate::ScopedAccess) turns the
/// pointers it returns into payload references, so [`SharedSegment`] is its
/// only implementation:
///
/// ```compile_fail
/// use shmlock_core::{CreateOutcome, LockState, Segment, SegmentError};
///
/// struct Unlocked;
///
/// impl Segment for Unlocked {
///     fn name(&self) -> Option<&str> { None }
///     fn mutex_name(&self) -> Option<&str> { None }
///     fn set_name(&mut self, _: &str) -> Result<(), SegmentError> { Ok(()) }
///     fn create(&mut self, _: usize) -> Result<CreateOutcome, SegmentError> {
///         Ok(CreateOutcome::Created)
///     }
///     fn open(&mut self) -> Result<(), SegmentError> { Ok(()) }
///     fn is_attached(&self) -> bool { true }
///     fn size(&self) -> Result<usize, SegmentError> { Ok(8) }
///     fn as_ptr(&self) -> Result<*const u8, SegmentError> { Ok(std::ptr::null()) }
///     fn as_mut_ptr(&self) -> Result<*mut u8, SegmentError> { Ok(std::ptr::null_mut()) }
///     fn lock(&self) -> Result<LockState, SegmentError> { Ok(LockState::Acquired) }
///     fn try_lock(&self) -> Result<Option<LockState>, SegmentError> {
///         Ok(Some(LockState::Acquired))
///     }
///     fn unlock(&self) -> Result<(), SegmentError> { Ok(()) }
///     fn error_code(&self) -> i32 { 0 }
/// }
/// ```
pub trait Segment: sealed::Sealed + Send + Sync {
    /// Stored segment name, if one was set.
    fn name(&self) -> Option<&str>;

    /// Derived mutex name, if a segment name was set.
    fn mutex_name(&self) -> Option<&str>;

    /// Store the segment name. Must happen before `create`/`open`.
    fn set_name(&mut self, name: &str) -> Result<(), SegmentError>;

    /// Create the segment with `size` payload bytes, or attach if it exists.
    fn create(&mut self, size: usize) -> Result<CreateOutcome, SegmentError>;

    /// Attach to an existing segment. Never creates anything.
    fn open(&mut self) -> Result<(), SegmentError>;

    /// Whether `create` or `open` succeeded on this object.
    fn is_attached(&self) -> bool;

    /// Payload size recorded in the header.
    fn size(&self) -> Result<usize, SegmentError>;

    /// First payload byte. Hold the lock while reading through it.
    fn as_ptr(&self) -> Result<*const u8, SegmentError>;

    /// First payload byte. Hold the lock while writing through it.
    fn as_mut_ptr(&self) -> Result<*mut u8, SegmentError>;

    /// Block until the mutex is held by the calling thread.
    fn lock(&self) -> Result<LockState, SegmentError>;

    /// Acquire the mutex if it is free; `None` if another thread holds it.
    fn try_lock(&self) -> Result<Option<LockState>, SegmentError>;

    /// Release the mutex held by the calling thread.
    fn unlock(&self) -> Result<(), SegmentError>;

    /// Errno recorded by the most recent fallible operation, `0` on success.
    fn error_code(&self) -> i32;
}

/// Both mapped objects of an attached segment.
struct Attachment {
    region: MappedObject,
    mutex: NamedMutex,
    payload_len: usize,
    unlink_on_last_detach: bool,
    /// How long teardown waits for the lock before detaching without it.
    teardown_wait: Duration,
}

impl Attachment {
    fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: the region is at least HEADER_SIZE + payload_len bytes long.
        unsafe { self.region.as_ptr().add(HEADER_SIZE) }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let held = match self.mutex.hold_within(self.teardown_wait) {
            Ok(Some(held)) => held,
            Ok(None) => {
                tracing::warn!(
                    name = %self.region.name(),
                    waited_ms = self.teardown_wait.as_millis() as u64,
                    "Segment lock still held elsewhere, detaching without it, names are kept"
                );
                self.mutex.detach();
                return;
            }
            Err(e) => {
                tracing::warn!(
                    name = %self.region.name(),
                    error = %e,
                    "Detaching without the segment lock, names are kept"
                );
                self.mutex.detach();
                return;
            }
        };

        let remaining = self.mutex.detach();
        if remaining == 0 && self.unlink_on_last_detach && !self.mutex.is_retired() {
            self.mutex.retire();
            for name in [self.region.name(), self.mutex.name()] {
                match mapping::unlink(name) {
                    Ok(()) | Err(Errno::ENOENT) => {}
                    Err(errno) => tracing::warn!(
                        name = %name,
                        error = %errno,
                        "Failed to unlink shared memory object"
                    ),
                }
            }
        }

        drop(held);
        tracing::debug!(
            name = %self.region.name(),
            remaining = remaining,
            "Detached shared memory segment"
        );
    }
}

/// What setup was asked to do.
#[derive(Debug, Clone, Copy)]
enum Request {
    Create(usize),
    Open,
}

/// A named shared memory segment guarded by a process-shared mutex.
///
/// The object goes through `Uninitialized -> Created | Opened -> dropped`.
/// `create` or `open` may succeed only once; dropping the object unmaps both
/// objects and closes both descriptors whether or not the lock is held.
pub struct SharedSegment {
    name: Option<SegmentName>,
    options: SegmentOptions,
    attachment: Option<Attachment>,
    error_code: AtomicI32,
}

impl SharedSegment {
    /// An unnamed, unattached segment with default options.
    pub fn new() -> Self {
        Self::with_options(SegmentOptions::default())
    }

    /// An unnamed, unattached segment.
    pub fn with_options(options: SegmentOptions) -> Self {
        Self {
            name: None,
            options,
            attachment: None,
            error_code: AtomicI32::new(0),
        }
    }

    /// A boxed segment behind the [`Segment`] interface.
    pub fn boxed(options: SegmentOptions) -> Box<dyn Segment> {
        Box::new(Self::with_options(options))
    }

    /// Options this segment was built with.
    pub fn options(&self) -> &SegmentOptions {
        &self.options
    }

    /// Validated name, if set.
    pub fn segment_name(&self) -> Option<&SegmentName> {
        self.name.as_ref()
    }

    /// Copy of the header of the attached segment.
    pub fn header(&self) -> Result<Header, SegmentError> {
        let attachment = self.attached()?;
        // SAFETY: the region holds at least HEADER_SIZE mapped bytes.
        Ok(unsafe { Header::read(attachment.region.as_ptr()) })
    }

    /// Attachments to this segment currently recorded across all processes.
    pub fn attachments(&self) -> Result<u32, SegmentError> {
        Ok(self.attached()?.mutex.attachments())
    }

    /// Unlink the objects behind `name`, e.g. after a process crashed during setup.
    ///
    /// Processes still attached keep their mappings. Returns whether anything
    /// was removed.
    pub fn remove(name: &str) -> Result<bool, SegmentError> {
        let name = SegmentName::new(name, NamePolicy::Truncate)?;
        let mut removed = false;

        for object in [name.region_object(), name.mutex_object()] {
            match mapping::unlink(&object) {
                Ok(()) => removed = true,
                Err(Errno::ENOENT) => {}
                Err(errno) => {
                    return Err(SegmentError::UnlinkFailed {
                        name: object,
                        errno,
                    })
                }
            }
        }

        Ok(removed)
    }

    fn attached(&self) -> Result<&Attachment, SegmentError> {
        self.attachment
            .as_ref()
            .ok_or_else(|| SegmentError::NotAttached {
                name: self.display_name(),
            })
    }

    fn display_name(&self) -> String {
        self.name
            .as_ref()
            .map(|name| name.as_str().to_string())
            .unwrap_or_default()
    }

    fn reset_error(&self) {
        self.error_code.store(0, Ordering::Relaxed);
    }

    fn set_error(&self, code: i32) {
        self.error_code.store(code, Ordering::Relaxed);
    }

    fn record<T>(&self, result: Result<T, SegmentError>) -> Result<T, SegmentError> {
        if let Err(e) = &result {
            self.set_error(e.raw_os_error());
        }
        result
    }

    fn ready_to_attach(&self) -> Result<SegmentName, SegmentError> {
        if self.attachment.is_some() {
            return Err(SegmentError::AlreadyAttached {
                name: self.display_name(),
            });
        }
        self.name.clone().ok_or(SegmentError::NameNotSet)
    }

    fn attach(
        &self,
        name: &SegmentName,
        request: Request,
    ) -> Result<(Attachment, CreateOutcome), SegmentError> {
        if let Request::Create(size) = request {
            if size > MAX_PAYLOAD_SIZE {
                return Err(SegmentError::SizeTooLarge {
                    size,
                    max: MAX_PAYLOAD_SIZE,
                });
            }
        }

        let mutex_object = name.mutex_object();
        let region_object = name.region_object();
        let wait = self.options.init_timeout;
        let start = Instant::now();

        for attempt in 0..MAX_ATTACH_ATTEMPTS {
            let mutex = match request {
                Request::Create(_) => {
                    NamedMutex::create_or_open(&mutex_object, self.options.mode, wait)?
                }
                Request::Open => NamedMutex::open(&mutex_object, wait)?,
            };

            let held = mutex.hold()?;
            if mutex.is_retired() {
                // The last detacher unlinked these names after we opened them.
                drop(held);
                tracing::debug!(name = %name, attempt = attempt, "Mutex retired, retrying attach");
                continue;
            }

            let (region, outcome) = match request {
                Request::Create(size) => {
                    let (region, disposition) = MappedObject::create_or_open(
                        &region_object,
                        HEADER_SIZE + size,
                        self.options.mode,
                        HEADER_SIZE,
                        Duration::ZERO,
                    )?;
                    match disposition {
                        Disposition::Created => {
                            region.zero_fill();
                            // SAFETY: the region is HEADER_SIZE + size writable bytes.
                            unsafe { Header::new(size as u32).write(region.as_ptr()) };
                            (region, CreateOutcome::Created)
                        }
                        Disposition::Existing => (region, CreateOutcome::Attached),
                    }
                }
                Request::Open => (
                    MappedObject::open(&region_object, HEADER_SIZE, Duration::ZERO)?,
                    CreateOutcome::Attached,
                ),
            };

            // SAFETY: MappedObject guarantees at least HEADER_SIZE mapped bytes.
            let header = unsafe { Header::read(region.as_ptr()) };
            if header.total_len() > region.len() {
                return Err(SegmentError::Truncated {
                    name: region_object.clone(),
                    actual: region.len(),
                    expected: header.total_len(),
                });
            }

            let attachments = mutex.attach();
            drop(held);

            tracing::debug!(
                name = %name,
                size = header.payload_len(),
                attachments = attachments,
                outcome = ?outcome,
                "Attached shared memory segment"
            );

            let attachment = Attachment {
                region,
                mutex,
                payload_len: header.payload_len(),
                unlink_on_last_detach: self.options.unlink_on_last_detach,
                teardown_wait: wait,
            };
            return Ok((attachment, outcome));
        }

        Err(SegmentError::AttachRetriesExhausted {
            name: name.to_string(),
            attempts: MAX_ATTACH_ATTEMPTS,
            waited_ms: start.elapsed().as_millis() as u64,
        })
    }
}

impl Default for SharedSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name.as_ref().map(|n| n.as_str()))
            .field("attached", &self.attachment.is_some())
            .field(
                "size",
                &self.attachment.as_ref().map(|a| a.payload_len),
            )
            .field("error_code", &self.error_code())
            .finish()
    }
}

impl sealed::Sealed for SharedSegment {}

impl Segment for SharedSegment {
    fn name(&self) -> Option<&str> {
        self.name.as_ref().map(|name| name.as_str())
    }

    fn mutex_name(&self) -> Option<&str> {
        self.name.as_ref().map(|name| name.mutex_name())
    }

    fn set_name(&mut self, name: &str) -> Result<(), SegmentError> {
        self.reset_error();
        let result = if self.attachment.is_some() {
            Err(SegmentError::AlreadyAttached {
                name: self.display_name(),
            })
        } else {
            SegmentName::new(name, self.options.name_policy)
        };

        let name = self.record(result)?;
        if name.was_truncated() {
            tracing::debug!(name = %name, "Segment name truncated");
        }
        self.name = Some(name);
        Ok(())
    }

    fn create(&mut self, size: usize) -> Result<CreateOutcome, SegmentError> {
        self.reset_error();
        let result = self
            .ready_to_attach()
            .and_then(|name| self.attach(&name, Request::Create(size)));

        let (attachment, outcome) = self.record(result)?;
        self.attachment = Some(attachment);
        if outcome == CreateOutcome::Attached {
            self.set_error(Errno::EEXIST as i32);
        }
        Ok(outcome)
    }

    fn open(&mut self) -> Result<(), SegmentError> {
        self.reset_error();
        let result = self
            .ready_to_attach()
            .and_then(|name| self.attach(&name, Request::Open));

        let (attachment, _) = self.record(result)?;
        self.attachment = Some(attachment);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    fn size(&self) -> Result<usize, SegmentError> {
        self.reset_error();
        self.record(self.attached().map(|a| a.payload_len))
    }

    fn as_ptr(&self) -> Result<*const u8, SegmentError> {
        self.reset_error();
        self.record(self.attached().map(|a| a.payload_ptr() as *const u8))
    }

    fn as_mut_ptr(&self) -> Result<*mut u8, SegmentError> {
        self.reset_error();
        self.record(self.attached().map(|a| a.payload_ptr()))
    }

    fn lock(&self) -> Result<LockState, SegmentError> {
        self.reset_error();
        let state = self.record(self.attached().and_then(|a| a.mutex.lock()))?;
        if state == LockState::Recovered {
            self.set_error(Errno::EOWNERDEAD as i32);
        }
        Ok(state)
    }

    fn try_lock(&self) -> Result<Option<LockState>, SegmentError> {
        self.reset_error();
        let state = self.record(self.attached().and_then(|a| a.mutex.try_lock()))?;
        match state {
            None => self.set_error(Errno::EBUSY as i32),
            Some(LockState::Recovered) => self.set_error(Errno::EOWNERDEAD as i32),
            Some(LockState::Acquired) => {}
        }
        Ok(state)
    }

    fn unlock(&self) -> Result<(), SegmentError> {
        self.reset_error();
        self.record(self.attached().and_then(|a| a.mutex.unlock()))
    }

    fn error_code(&self) -> i32 {
        self.error_code.load(Ordering::Relaxed)
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ScopedAccess - typed payload access tied to holding the segment lock.
//!
//! A guard is the only way to reach a [`TypedSegment`](crate::shm::TypedSegment)
//! payload. It locks on construction and unlocks on drop, so the payload
//! cannot be touched without the lock and the lock cannot be forgotten.
//!
//! Exactly one guard owns the release of a given acquisition. Moving a guard
//! moves that obligation; [`ScopedAccess::transfer`] does the same while
//! leaving an empty guard behind. Guards are neither `Clone` nor `Send`: the
//! mutex must be released by the thread that acquired it.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::error::SegmentError;
use crate::shm::header::HEADER_SIZE;
use crate::shm::mutex::LockState;
use crate::shm::segment::Segment;
use crate::shm::typed::Payload;

/// Lock-holding view of a segment payload as a `T`.
pub struct ScopedAccess<'a, T> {
    segment: Option<&'a dyn Segment>,
    ptr: Option<NonNull<T>>,
    state: LockState,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: Payload> ScopedAccess<'a, T> {
    const ALIGNED: () = assert!(
        align_of::<T>() <= HEADER_SIZE,
        "payload types must not need more than 16-byte alignment"
    );

    /// Lock `segment` and view its payload as a `T`, blocking until the lock is free.
    pub fn acquire(segment: &'a dyn Segment) -> Result<Self, SegmentError> {
        Self::check_fits(segment)?;
        let state = segment.lock()?;
        Self::holding(segment, state)
    }

    /// Like [`acquire`](Self::acquire), but returns `None` instead of waiting.
    pub fn try_acquire(segment: &'a dyn Segment) -> Result<Option<Self>, SegmentError> {
        Self::check_fits(segment)?;
        match segment.try_lock()? {
            Some(state) => Self::holding(segment, state).map(Some),
            None => Ok(None),
        }
    }

    fn check_fits(segment: &dyn Segment) -> Result<(), SegmentError> {
        #[allow(clippy::let_unit_value)]
        let () = Self::ALIGNED;

        let available = segment.size()?;
        if available < size_of::<T>() {
            return Err(SegmentError::PayloadTooSmall {
                name: segment.name().unwrap_or_default().to_string(),
                required: size_of::<T>(),
                available,
            });
        }
        Ok(())
    }

    fn holding(segment: &'a dyn Segment, state: LockState) -> Result<Self, SegmentError> {
        match segment.as_mut_ptr() {
            Ok(ptr) => Ok(Self {
                segment: Some(segment),
                ptr: NonNull::new(ptr.cast::<T>()),
                state,
                _marker: PhantomData,
            }),
            Err(e) => {
                let _ = segment.unlock();
                Err(e)
            }
        }
    }
}

impl<'a, T> ScopedAccess<'a, T> {
    /// Move the release obligation into a new guard, leaving this one empty.
    ///
    /// Dropping the emptied guard no longer unlocks anything; dropping the
    /// returned guard does.
    pub fn transfer(&mut self) -> ScopedAccess<'a, T> {
        ScopedAccess {
            segment: self.segment.take(),
            ptr: self.ptr.take(),
            state: self.state,
            _marker: PhantomData,
        }
    }

    /// Whether this guard was emptied by [`transfer`](Self::transfer).
    pub fn is_empty(&self) -> bool {
        self.segment.is_none()
    }

    /// How the lock was obtained, `None` for an emptied guard.
    pub fn lock_state(&self) -> Option<LockState> {
        self.segment.map(|_| self.state)
    }

    pub fn get(&self) -> Option<&T> {
        // SAFETY: the pointer is into a live mapping, aligned and large enough
        // for T, and this guard holds the lock.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: as in `get`; `&mut self` makes the borrow exclusive.
        self.ptr.map(|mut ptr| unsafe { ptr.as_mut() })
    }

    /// Unlock now and report whether the release succeeded.
    pub fn release(mut self) -> Result<(), SegmentError> {
        self.ptr = None;
        match self.segment.take() {
            Some(segment) => segment.unlock(),
            None => Ok(()),
        }
    }
}

impl<T> Deref for ScopedAccess<'_, T> {
    type Target = T;

    /// # Panics
    /// Panics if the guard was emptied by [`ScopedAccess::transfer`].
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("payload accessed through an emptied ScopedAccess"),
        }
    }
}

impl<T> DerefMut for ScopedAccess<'_, T> {
    /// # Panics
    /// Panics if the guard was emptied by [`ScopedAccess::transfer`].
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => panic!("payload accessed through an emptied ScopedAccess"),
        }
    }
}

impl<T> Drop for ScopedAccess<'_, T> {
    fn drop(&mut self) {
        self.ptr = None;
        if let Some(segment) = self.segment.take() {
            if let Err(e) = segment.unlock() {
                tracing::warn!(
                    name = segment.name().unwrap_or_default(),
                    error = %e,
                    "Failed to release segment lock"
                );
            }
        }
    }
}

impl<T> fmt::Debug for ScopedAccess<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedAccess")
            .field("segment", &self.segment.and_then(|s| s.name()))
            .field("state", &self.lock_state())
            .finish()
    }
}

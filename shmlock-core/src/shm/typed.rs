// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! TypedSegment - a shared segment bound to one payload type.

use std::marker::PhantomData;
use std::mem::size_of;

use crate::config::SegmentOptions;
use crate::error::SegmentError;
use crate::shm::guard::ScopedAccess;
use crate::shm::segment::{CreateOutcome, Segment, SharedSegment};

/// Types that can live in a segment payload.
///
/// # Safety
///
/// Implementers must guarantee:
/// - `#[repr(C)]` or `#[repr(transparent)]` layout, since processes may be
///   built separately.
/// - The all-zero bit pattern is a valid value (payloads start zeroed).
/// - Every bit pattern another process may write is a valid value.
/// - No pointers or references; addresses do not carry across processes.
/// - No meaningful `Drop`; the payload is never dropped.
/// - Alignment of at most 16 bytes.
pub unsafe trait Payload: Sized + 'static {}

macro_rules! impl_payload {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl Payload for $t {}
        )*
    };
}

impl_payload! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
}

unsafe impl<T: Payload, const N: usize> Payload for [T; N] {}

/// A [`SharedSegment`] whose payload is exactly one `T`.
///
/// Payload access only goes through [`TypedSegment::lock`], which hands out
/// a [`ScopedAccess`] guard holding the segment mutex.
pub struct TypedSegment<T> {
    inner: SharedSegment,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Payload> TypedSegment<T> {
    /// Bind `name` with default options. Nothing is created or opened yet.
    pub fn new(name: &str) -> Result<Self, SegmentError> {
        Self::with_options(name, SegmentOptions::default())
    }

    pub fn with_options(name: &str, options: SegmentOptions) -> Result<Self, SegmentError> {
        let mut inner = SharedSegment::with_options(options);
        inner.set_name(name)?;
        Ok(Self {
            inner,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), SegmentError> {
        self.inner.set_name(name)
    }

    /// Create the segment sized for one `T`, or attach to an existing one.
    pub fn create(&mut self) -> Result<CreateOutcome, SegmentError> {
        self.inner.create(size_of::<T>())
    }

    /// Attach to an existing segment.
    pub fn open(&mut self) -> Result<(), SegmentError> {
        self.inner.open()
    }

    /// Lock the segment and return a guard over the payload.
    ///
    /// Blocks until the lock is free. Taking a second guard on the same
    /// segment from the thread that holds the first fails with `EDEADLK`.
    pub fn lock(&self) -> Result<ScopedAccess<'_, T>, SegmentError> {
        ScopedAccess::acquire(&self.inner)
    }

    /// Like [`lock`](Self::lock), but `None` when another holder has it.
    pub fn try_lock(&self) -> Result<Option<ScopedAccess<'_, T>>, SegmentError> {
        ScopedAccess::try_acquire(&self.inner)
    }

    /// Payload size recorded in the header.
    pub fn size(&self) -> Result<usize, SegmentError> {
        self.inner.size()
    }

    pub fn error_code(&self) -> i32 {
        self.inner.error_code()
    }

    /// The untyped segment underneath.
    pub fn segment(&self) -> &SharedSegment {
        &self.inner
    }
}

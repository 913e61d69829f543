//! Segment header.
//!
//! Every segment starts with a 16-byte header; the payload follows it.
//!
//! ```text
//! offset 0  : size      (u32, payload size in bytes)
//! offset 4  : reserved  (12 bytes, zero)
//! offset 16 : payload   (exactly `size` bytes)
//! ```

use std::mem::size_of;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest payload the `u32` size field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize - HEADER_SIZE;

/// Header stored at the start of every segment.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Payload size requested at creation.
    pub size: u32,
    /// Reserved for future use. Always zero.
    pub reserved: [u8; HEADER_SIZE - size_of::<u32>()],
}

const _: () = assert!(size_of::<Header>() == HEADER_SIZE);

impl Header {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            reserved: [0; HEADER_SIZE - size_of::<u32>()],
        }
    }

    /// Payload size in bytes.
    pub fn payload_len(&self) -> usize {
        self.size as usize
    }

    /// Bytes needed to back a segment with this header.
    pub fn total_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// Read the header at the start of a mapped segment.
    ///
    /// # Safety
    /// `base` must point to at least `HEADER_SIZE` mapped bytes.
    pub(crate) unsafe fn read(base: *const u8) -> Self {
        std::ptr::read_volatile(base as *const Header)
    }

    /// Write this header at the start of a mapped segment.
    ///
    /// # Safety
    /// `base` must point to at least `HEADER_SIZE` writable mapped bytes.
    pub(crate) unsafe fn write(&self, base: *mut u8) {
        std::ptr::write_volatile(base as *mut Header, *self);
    }
}

//! Nibble-addressed memory spaces.
//!
//! The atomic addressable unit is a 4-bit nibble stored in the low half of a
//! byte. Multi-nibble accessors compose wider values high nibble first, so
//! `get12` over the nibbles `[0x1, 0x2, 0x3]` yields `0x123`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::EngineError;

/// Mask applied to every nibble on write.
pub const NIBBLE_MASK: u8 = 0x0F;
/// Mask applied to 12-bit composed values.
pub const MASK_12BIT: u16 = 0x0FFF;

/// Conventional id of the read-only ROM space.
pub const ROM_SPACE_ID: u32 = 0;
/// Conventional id of the general-purpose RAM space.
pub const RAM_SPACE_ID: u32 = 1;

/// Inclusive nibble-address range touched by successful writes.
///
/// Drained by presentation layers for modified-cell highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirtyRange {
    /// First dirty nibble address.
    pub start: u32,
    /// Last dirty nibble address, inclusive.
    pub end: u32,
}

/// A fixed-length, nibble-addressed backing store.
///
/// Spaces never grow or shrink after creation. The read-only flag is policy
/// consumed by the dispatch layer; the explicit [`MemorySpace::load`] path
/// ignores it so ROM images and snapshot restores can populate any space.
#[derive(Debug)]
pub struct MemorySpace {
    nibbles: Box<[u8]>,
    read_only: bool,
    // Behind its own lock so presentation callers can drain it while holding
    // only a shared borrow of the machine state.
    dirty: Mutex<Vec<DirtyRange>>,
}

impl Clone for MemorySpace {
    fn clone(&self) -> Self {
        Self {
            nibbles: self.nibbles.clone(),
            read_only: self.read_only,
            dirty: Mutex::new(self.lock_dirty().clone()),
        }
    }
}

// Dirty ranges are presentation metadata, not machine state; two spaces with
// equal contents and policy are observationally equal.
impl PartialEq for MemorySpace {
    fn eq(&self, other: &Self) -> bool {
        self.nibbles == other.nibbles && self.read_only == other.read_only
    }
}

impl Eq for MemorySpace {}

impl MemorySpace {
    /// Allocates a zeroed space of `len` nibbles.
    #[must_use]
    pub fn new(len: u32, read_only: bool) -> Self {
        Self {
            nibbles: vec![0; len as usize].into_boxed_slice(),
            read_only,
            dirty: Mutex::new(Vec::new()),
        }
    }

    /// Number of addressable nibbles.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.nibbles.len() as u32
    }

    /// Returns `true` for a zero-length space.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nibbles.is_empty()
    }

    /// Returns `true` when normal writes are rejected for this space.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Raw nibble contents, one nibble per byte.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.nibbles
    }

    fn check(&self, addr: u32, width: u32) -> Result<(), EngineError> {
        if u64::from(addr) + u64::from(width) > u64::from(self.len()) {
            return Err(EngineError::OutOfRange {
                offset: addr,
                len: width,
                limit: self.len(),
            });
        }
        Ok(())
    }

    /// Reads the nibble at `addr`.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when `addr` is past the end of the space.
    pub fn nibble(&self, addr: u32) -> Result<u8, EngineError> {
        self.check(addr, 1)?;
        Ok(self.nibbles[addr as usize])
    }

    /// Writes one nibble, masking `value` to four bits.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when `addr` is past the end of the space.
    pub fn set_nibble(&mut self, addr: u32, value: u8) -> Result<(), EngineError> {
        self.check(addr, 1)?;
        self.nibbles[addr as usize] = value & NIBBLE_MASK;
        self.mark_dirty(addr, addr);
        Ok(())
    }

    /// Reads two consecutive nibbles as one 8-bit value, high nibble first.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when `addr + 1` is past the end.
    pub fn get8(&self, addr: u32) -> Result<u8, EngineError> {
        self.check(addr, 2)?;
        let at = addr as usize;
        Ok((self.nibbles[at] << 4) | self.nibbles[at + 1])
    }

    /// Writes one 8-bit value across two consecutive nibbles.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when `addr + 1` is past the end; nothing is
    /// written on a rejected access.
    pub fn set8(&mut self, addr: u32, value: u8) -> Result<(), EngineError> {
        self.check(addr, 2)?;
        let at = addr as usize;
        self.nibbles[at] = (value >> 4) & NIBBLE_MASK;
        self.nibbles[at + 1] = value & NIBBLE_MASK;
        self.mark_dirty(addr, addr + 1);
        Ok(())
    }

    /// Reads three consecutive nibbles as one 12-bit value, high nibble first.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when `addr + 2` is past the end.
    pub fn get12(&self, addr: u32) -> Result<u16, EngineError> {
        self.check(addr, 3)?;
        let at = addr as usize;
        Ok((u16::from(self.nibbles[at]) << 8)
            | (u16::from(self.nibbles[at + 1]) << 4)
            | u16::from(self.nibbles[at + 2]))
    }

    /// Writes one 12-bit value across three consecutive nibbles, masking
    /// `value` to twelve bits.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when `addr + 2` is past the end; nothing is
    /// written on a rejected access.
    pub fn set12(&mut self, addr: u32, value: u16) -> Result<(), EngineError> {
        self.check(addr, 3)?;
        let value = value & MASK_12BIT;
        let at = addr as usize;
        self.nibbles[at] = (value >> 8) as u8 & NIBBLE_MASK;
        self.nibbles[at + 1] = (value >> 4) as u8 & NIBBLE_MASK;
        self.nibbles[at + 2] = value as u8 & NIBBLE_MASK;
        self.mark_dirty(addr, addr + 2);
        Ok(())
    }

    /// Populates the space starting at `offset`, masking each value to a
    /// nibble. This is the explicit load path used for ROM images and
    /// snapshot restores; it bypasses the read-only policy and records no
    /// dirty ranges.
    ///
    /// # Errors
    ///
    /// [`EngineError::OutOfRange`] when the image does not fit; nothing is
    /// written on a rejected load.
    pub fn load(&mut self, offset: u32, image: &[u8]) -> Result<(), EngineError> {
        let len = u32::try_from(image.len()).map_err(|_| EngineError::OutOfRange {
            offset,
            len: u32::MAX,
            limit: self.len(),
        })?;
        self.check(offset, len)?;
        for (at, value) in (offset..).zip(image) {
            self.nibbles[at as usize] = value & NIBBLE_MASK;
        }
        Ok(())
    }

    /// Drains the dirty ranges recorded since the previous call.
    #[must_use]
    pub fn take_dirty(&self) -> Vec<DirtyRange> {
        std::mem::take(&mut *self.lock_dirty())
    }

    fn lock_dirty(&self) -> MutexGuard<'_, Vec<DirtyRange>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_dirty(&mut self, start: u32, end: u32) {
        let dirty = self.dirty.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = dirty.last_mut() {
            if start <= last.end.saturating_add(1) && start >= last.start {
                last.end = last.end.max(end);
                return;
            }
        }
        dirty.push(DirtyRange { start, end });
    }
}

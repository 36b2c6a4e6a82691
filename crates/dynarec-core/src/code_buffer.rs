//! Linear byte arena compiled units are carved from.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Entry reference of a compiled unit inside a [`CodeBuffer`].
///
/// The offset doubles as the unit's addressable identity for registry
/// lookups. The generation ties the entry to one buffer lifetime: a reset
/// invalidates every entry handed out before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPoint {
    offset: u32,
    generation: u32,
}

impl EntryPoint {
    /// Byte offset of the entry from the start of the buffer.
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Buffer generation the entry was allocated in.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Error returned when an allocation cannot be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CodeBufferError {
    /// Fewer free bytes remain than were requested.
    #[error("code buffer exhausted: requested {requested} bytes, {available} available")]
    InsufficientSpace {
        /// Bytes requested.
        requested: u32,
        /// Bytes still free.
        available: u32,
    },
}

/// Append-only code arena with a cursor and remaining-capacity counter.
///
/// Invariant: `cursor() + free_space() == capacity()`. Allocation never
/// wraps and never partially succeeds. Each buffer carries a process-unique
/// id that backends latch at `initialize`.
#[derive(Debug)]
pub struct CodeBuffer {
    id: u64,
    bytes: Box<[u8]>,
    cursor: u32,
    generation: u32,
}

impl CodeBuffer {
    /// Allocates a zeroed arena of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            bytes: vec![0; capacity as usize].into_boxed_slice(),
            cursor: 0,
            generation: 0,
        }
    }

    /// Process-unique identity, stable across resets.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        u32::try_from(self.bytes.len()).unwrap_or(u32::MAX)
    }

    /// Number of bytes already handed out.
    #[must_use]
    pub const fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Number of bytes still available.
    #[must_use]
    pub fn free_space(&self) -> u32 {
        self.capacity() - self.cursor
    }

    /// Current buffer generation, bumped by every [`CodeBuffer::reset`].
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Entry reference the next allocation would receive.
    #[must_use]
    pub const fn current(&self) -> EntryPoint {
        EntryPoint {
            offset: self.cursor,
            generation: self.generation,
        }
    }

    /// Reserves `len` bytes and returns the entry of the reserved region.
    ///
    /// # Errors
    ///
    /// Returns [`CodeBufferError::InsufficientSpace`] without moving the
    /// cursor when fewer than `len` bytes are free.
    pub fn allocate(&mut self, len: u32) -> Result<EntryPoint, CodeBufferError> {
        let available = self.free_space();
        if len > available {
            return Err(CodeBufferError::InsufficientSpace {
                requested: len,
                available,
            });
        }

        let entry = self.current();
        self.cursor += len;
        Ok(entry)
    }

    /// Returns the bytes of a live region, or `None` for stale or
    /// out-of-range entries.
    #[must_use]
    pub fn region(&self, entry: EntryPoint, len: u32) -> Option<&[u8]> {
        if !self.is_live(entry) {
            return None;
        }
        let start = entry.offset as usize;
        let end = start.checked_add(len as usize)?;
        if end > self.cursor as usize {
            return None;
        }
        self.bytes.get(start..end)
    }

    /// Returns a mutable view of a live region, for strategies that emit code.
    #[must_use]
    pub fn region_mut(&mut self, entry: EntryPoint, len: u32) -> Option<&mut [u8]> {
        if !self.is_live(entry) {
            return None;
        }
        let start = entry.offset as usize;
        let end = start.checked_add(len as usize)?;
        if end > self.cursor as usize {
            return None;
        }
        self.bytes.get_mut(start..end)
    }

    /// Returns `true` when `entry` was allocated since the last reset.
    #[must_use]
    pub const fn is_live(&self, entry: EntryPoint) -> bool {
        entry.generation == self.generation && entry.offset < self.cursor
    }

    /// Clears the arena: rewinds the cursor, zeroes the used bytes and
    /// invalidates every previously returned entry.
    pub fn reset(&mut self) {
        let used = self.cursor as usize;
        self.bytes[..used].fill(0);
        self.cursor = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

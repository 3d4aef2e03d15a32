//! Segmented memory.
//!
//! Memory is an arena of word segments addressed by small integer handles.
//! Segment 0 always holds the running program. Unmapped handles go onto a
//! LIFO free stack and are handed out again before any new handle is minted.
//! The payload of an unmapped segment is only dropped when its handle is
//! recycled (or the memory is released), so unmapping stays O(1).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// A machine word.
pub type Word = u32;

/// Handle naming a segment in the table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(u32);

impl SegmentId {
    /// The program segment.
    pub const PROGRAM: SegmentId = SegmentId(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for SegmentId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg#{}", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One slot of the segment table.
///
/// `live` is false while the handle sits in the free stack; `words` keeps
/// the stale payload until the handle is recycled.
#[derive(Clone)]
struct Slot {
    words: Vec<Word>,
    live: bool,
}

/// The segment table plus its free stack.
#[derive(Clone)]
pub struct Memory {
    slots: Vec<Slot>,
    free: Vec<SegmentId>,
    released: bool,
}

impl Memory {
    /// Fresh memory holding an empty program segment.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot { words: Vec::new(), live: true }],
            free: Vec::new(),
            released: false,
        }
    }

    /// Fresh memory whose program segment holds `program`.
    pub fn with_program(program: Vec<Word>) -> Self {
        Self {
            slots: vec![Slot { words: program, live: true }],
            free: Vec::new(),
            released: false,
        }
    }

    /// Allocate a zero-filled segment of `word_count` words.
    ///
    /// Reuses the most recently unmapped handle if there is one, dropping
    /// whatever payload it still carried.
    ///
    /// `SegmentError::Allocation` is only reported when the allocator refuses
    /// the reservation. On hosts that overcommit memory a huge request can be
    /// granted and the process killed later, once the zero fill touches the
    /// pages.
    pub fn map(&mut self, word_count: u32) -> Result<SegmentId, SegmentError> {
        if self.released {
            return Err(SegmentError::Released);
        }

        let words = zeroed(word_count)?;

        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[id.index()];
            debug!(segment = id.raw(), words = word_count, stale = slot.words.len(), "map (recycled)");
            // Replacing the vector drops the stale payload here.
            *slot = Slot { words, live: true };
            return Ok(id);
        }

        let raw = u32::try_from(self.slots.len())
            .map_err(|_| SegmentError::Allocation { words: word_count })?;
        self.slots
            .try_reserve(1)
            .map_err(|_| SegmentError::Allocation { words: word_count })?;
        self.slots.push(Slot { words, live: true });
        debug!(segment = raw, words = word_count, "map (new)");
        Ok(SegmentId(raw))
    }

    /// Return `id` to the free stack.
    ///
    /// The payload stays in place until `map` recycles the handle. The
    /// program segment cannot be unmapped, and neither can a handle that is
    /// already free.
    pub fn unmap(&mut self, id: SegmentId) -> Result<(), SegmentError> {
        if self.released {
            return Err(SegmentError::Released);
        }
        if id == SegmentId::PROGRAM {
            return Err(SegmentError::UnmapProgram);
        }
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or(SegmentError::NoSuchSegment(id))?;
        if !slot.live {
            return Err(SegmentError::NotMapped(id));
        }
        slot.live = false;
        self.free.push(id);
        debug!(segment = id.raw(), "unmap");
        Ok(())
    }

    /// Read the word at `index` of segment `id`.
    #[inline]
    pub fn read(&self, id: SegmentId, index: u32) -> Result<Word, SegmentError> {
        let words = self.live_words(id)?;
        words
            .get(index as usize)
            .copied()
            .ok_or(SegmentError::IndexOutOfBounds { segment: id, index, len: words.len() })
    }

    /// Write `value` at `index` of segment `id`.
    #[inline]
    pub fn write(&mut self, id: SegmentId, index: u32, value: Word) -> Result<(), SegmentError> {
        let words = self.live_words_mut(id)?;
        let len = words.len();
        let cell = words
            .get_mut(index as usize)
            .ok_or(SegmentError::IndexOutOfBounds { segment: id, index, len })?;
        *cell = value;
        Ok(())
    }

    /// Replace the program segment with a copy of segment `id`.
    ///
    /// Installing segment 0 over itself leaves it untouched.
    pub fn install_as_program(&mut self, id: SegmentId) -> Result<(), SegmentError> {
        if id == SegmentId::PROGRAM {
            // Fails once released.
            self.live_words(id)?;
            return Ok(());
        }

        let source = self.live_words(id)?;
        let mut copy = Vec::new();
        copy.try_reserve_exact(source.len())
            .map_err(|_| SegmentError::Allocation { words: source.len() as u32 })?;
        copy.extend_from_slice(source);

        debug!(segment = id.raw(), words = copy.len(), "install as program");
        self.slots[SegmentId::PROGRAM.index()].words = copy;
        Ok(())
    }

    /// The words of segment `id`.
    pub fn segment(&self, id: SegmentId) -> Result<&[Word], SegmentError> {
        self.live_words(id).map(Vec::as_slice)
    }

    /// The current program.
    pub fn program(&self) -> &[Word] {
        self.slots
            .first()
            .map(|slot| slot.words.as_slice())
            .unwrap_or(&[])
    }

    /// Drop every segment and the free stack. Calling it again does nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        debug!(segments = self.slots.len(), free = self.free.len(), "release memory");
        self.slots = Vec::new();
        self.free = Vec::new();
        self.released = true;
    }

    /// Whether [`Memory::release`] has run.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Number of handles ever minted (live or free).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True once released.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of live segments, program included.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of handles waiting in the free stack.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Whether `id` currently names a live segment.
    pub fn is_mapped(&self, id: SegmentId) -> bool {
        self.slots.get(id.index()).is_some_and(|slot| slot.live)
    }

    fn live_words(&self, id: SegmentId) -> Result<&Vec<Word>, SegmentError> {
        if self.released {
            return Err(SegmentError::Released);
        }
        match self.slots.get(id.index()) {
            Some(slot) if slot.live => Ok(&slot.words),
            Some(_) => Err(SegmentError::NotMapped(id)),
            None => Err(SegmentError::NoSuchSegment(id)),
        }
    }

    fn live_words_mut(&mut self, id: SegmentId) -> Result<&mut Vec<Word>, SegmentError> {
        if self.released {
            return Err(SegmentError::Released);
        }
        match self.slots.get_mut(id.index()) {
            Some(slot) if slot.live => Ok(&mut slot.words),
            Some(_) => Err(SegmentError::NotMapped(id)),
            None => Err(SegmentError::NoSuchSegment(id)),
        }
    }
}

/// Allocate `count` zero words without aborting on exhaustion.
///
/// Only the reservation is checked. Under overcommit the `resize` below is
/// where an oversized request actually fails, and that is not recoverable.
fn zeroed(count: u32) -> Result<Vec<Word>, SegmentError> {
    let mut words = Vec::new();
    words
        .try_reserve_exact(count as usize)
        .map_err(|_| SegmentError::Allocation { words: count })?;
    words.resize(count as usize, 0);
    Ok(words)
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("program_words", &self.program().len())
            .field("live_segments", &self.live_count())
            .field("free_handles", &self.free.len())
            .field("released", &self.released)
            .finish()
    }
}

/// Errors raised by the segment table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("cannot allocate a segment of {words} words")]
    Allocation { words: u32 },

    #[error("segment {0} was never mapped")]
    NoSuchSegment(SegmentId),

    #[error("segment {0} is not mapped")]
    NotMapped(SegmentId),

    #[error("the program segment cannot be unmapped")]
    UnmapProgram,

    #[error("index {index} out of bounds for segment {segment} of {len} words")]
    IndexOutOfBounds { segment: SegmentId, index: u32, len: usize },

    #[error("memory has been released")]
    Released,
}

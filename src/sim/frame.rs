//! Physical frame table
//!
//! Frames are reference counted: every page table entry naming a frame
//! holds one reference, and a frame returns to the free pool when the last
//! one is dropped.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::{KernError, KernResult};
use crate::memlayout::PGSIZE;
use crate::mmu::FrameNumber;

struct Frame {
    data: Box<[u8; PGSIZE]>,
    refs: u32,
}

/// Fixed-capacity pool of physical frames
pub struct FrameTable {
    frames: Vec<Option<Frame>>,
    capacity: usize,
    in_use: usize,
}

impl FrameTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::new(),
            capacity,
            in_use: 0,
        }
    }

    /// Allocate a zeroed frame with no references
    pub fn alloc(&mut self) -> KernResult<FrameNumber> {
        let frame = Frame {
            data: Box::new([0u8; PGSIZE]),
            refs: 0,
        };
        let index = match self.frames.iter().position(Option::is_none) {
            Some(index) => {
                self.frames[index] = Some(frame);
                index
            }
            None if self.frames.len() < self.capacity => {
                self.frames.push(Some(frame));
                self.frames.len() - 1
            }
            None => return Err(KernError::NoMem),
        };
        self.in_use += 1;
        Ok(index as FrameNumber)
    }

    pub fn incref(&mut self, frame: FrameNumber) {
        if let Some(Some(f)) = self.frames.get_mut(frame as usize) {
            f.refs += 1;
        }
    }

    /// Drop one reference, freeing the frame at zero
    pub fn decref(&mut self, frame: FrameNumber) {
        let slot = match self.frames.get_mut(frame as usize) {
            Some(slot) => slot,
            None => return,
        };
        let free = match slot {
            Some(f) => {
                f.refs = f.refs.saturating_sub(1);
                f.refs == 0
            }
            None => false,
        };
        if free {
            *slot = None;
            self.in_use -= 1;
        }
    }

    pub fn refs(&self, frame: FrameNumber) -> u32 {
        match self.frames.get(frame as usize) {
            Some(Some(f)) => f.refs,
            _ => 0,
        }
    }

    pub fn data(&self, frame: FrameNumber) -> Option<&[u8; PGSIZE]> {
        match self.frames.get(frame as usize) {
            Some(Some(f)) => Some(&f.data),
            _ => None,
        }
    }

    pub fn data_mut(&mut self, frame: FrameNumber) -> Option<&mut [u8; PGSIZE]> {
        match self.frames.get_mut(frame as usize) {
            Some(Some(f)) => Some(&mut f.data),
            _ => None,
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

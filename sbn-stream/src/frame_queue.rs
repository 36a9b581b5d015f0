#![forbid(unsafe_code)]
//! Bounded ring of variable-length frames.
//!
//! One producer thread reserves space, writes a frame, and releases it; one
//! consumer thread peeks at the oldest unread frame and removes it. The ring
//! is a byte arena divided into fixed-size cells; a frame occupies a run of
//! contiguous cells and is tracked by the state of its first cell. When a
//! frame does not fit before the physical end of the arena the writer leaves
//! a wrap marker and continues from cell 0, which is how variable-length
//! records survive wraparound without per-lap length bookkeeping.
//!
//! Multiple concurrent producers or consumers are not supported; cursor
//! bookkeeping assumes one of each.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::errors::QueueError;

/// Stride of one cell in bytes.
///
/// Frames are rounded up to whole cells, so a smaller stride wastes less
/// space per frame while a larger one shrinks the state table.
pub const CELL_SIZE: usize = 16;

/// State of a cell that starts a frame run (interior cells are untracked).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellState {
    /// Free, or claimed by the outstanding reservation.
    Writable,
    /// First cell of a published frame of this many payload bytes.
    Readable(usize),
    /// No frame here: the next frame starts back at cell 0.
    Wrap,
}

#[derive(Debug)]
struct Inner {
    /// Payload arena, `cells.len() * CELL_SIZE` bytes.
    arena: Vec<u8>,
    /// Per-cell state; only cells that start a frame run are meaningful.
    cells: Vec<CellState>,
    /// Cell index of the next frame to write.
    write: usize,
    /// Cell index of the next frame to read.
    read: usize,
    /// Bytes reserved at `write` by an uncompleted reserve.
    reserved: Option<usize>,
    /// Whether the queue is shut down for input.
    shutdown: bool,
}

impl Inner {
    fn ncells(&self) -> usize {
        self.cells.len()
    }

    /// Number of whole cells needed to hold `nbytes` of payload.
    fn span(nbytes: usize) -> usize {
        nbytes.div_ceil(CELL_SIZE)
    }

    /// Follows a wrap marker left at the read cursor, freeing the marker
    /// cell. Both sides normalize before deciding: the reader before the
    /// emptiness test, the writer before computing available space — a
    /// writer bounded by a read cursor parked on a marker would otherwise
    /// wait for a jump only the next peek performs.
    fn follow_wrap(&mut self) {
        if self.read != self.write && self.cells[self.read] == CellState::Wrap {
            self.cells[self.read] = CellState::Writable;
            self.read = 0;
        }
    }

    /// Indicates if a frame of `nbytes` can be written at the current write
    /// cursor, wrapping the cursor (and leaving a wrap marker) if the frame
    /// cannot fit before the physical end of the arena.
    fn is_writable(&mut self, nbytes: usize) -> bool {
        loop {
            self.follow_wrap();

            if self.write < self.read {
                // Bounded by the read cursor.
                return nbytes <= (self.read - self.write) * CELL_SIZE;
            }

            if self.write == self.read && self.cells[self.read] != CellState::Writable {
                // Either an unread frame or a pending wrap marker is here.
                return false;
            }

            if nbytes <= (self.ncells() - self.write) * CELL_SIZE {
                return true;
            }

            // Insufficient room at the tail: leave a marker and start over.
            trace!(cell = self.write, "frame queue wraps to cell 0");
            self.cells[self.write] = CellState::Wrap;
            self.write = 0;
        }
    }

    /// Indicates if the queue holds no readable frame, following a wrap
    /// marker left by the writer first.
    fn is_empty(&mut self) -> bool {
        self.follow_wrap();
        self.read == self.write && !matches!(self.cells[self.read], CellState::Readable(_))
    }

    fn payload(&self, cell: usize, nbytes: usize) -> &[u8] {
        let start = cell * CELL_SIZE;
        &self.arena[start..start + nbytes]
    }
}

/// Bounded producer/consumer queue of variable-length frames.
///
/// Designed for exactly one producer thread and one consumer thread; wrap it
/// in an `Arc` to share across the two.
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl FrameQueue {
    /// Creates a queue able to hold at least `capacity` payload bytes.
    ///
    /// The capacity is rounded up to a whole number of cells; the rounded
    /// value bounds the largest single frame the queue will ever accept.
    pub fn new(capacity: usize) -> Self {
        let ncells = Inner::span(capacity).max(1);
        Self {
            inner: Mutex::new(Inner {
                arena: vec![0; ncells * CELL_SIZE],
                cells: vec![CellState::Writable; ncells],
                write: 0,
                read: 0,
                reserved: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Creates a queue sized from an [`sbn_core::IngestConfig`].
    pub fn with_config(config: &sbn_core::IngestConfig) -> Self {
        Self::new(config.queue_capacity_bytes)
    }

    /// Usable capacity in payload bytes, after rounding up to whole cells.
    pub fn capacity(&self) -> usize {
        self.lock().arena.len()
    }

    /// Largest single frame the queue will ever accept, in bytes; reserving
    /// more fails with [`QueueError::TooBig`]. A frame must fit in the arena
    /// whole, so this equals [`capacity`](Self::capacity).
    pub fn max_frame_size(&self) -> usize {
        self.capacity()
    }

    /// Reserves space for a frame of `nbytes`, blocking until space is
    /// available. Returns a scratch buffer of `nbytes` to fill in; publish it
    /// with [`release`](Self::release).
    ///
    /// Reserving zero bytes returns immediately with an empty buffer and no
    /// reservation.
    pub fn reserve(&self, nbytes: usize) -> Result<BytesMut, QueueError> {
        self.do_reserve(nbytes, true)
    }

    /// Non-blocking [`reserve`](Self::reserve): fails with
    /// [`QueueError::NoSpace`] instead of waiting.
    pub fn try_reserve(&self, nbytes: usize) -> Result<BytesMut, QueueError> {
        self.do_reserve(nbytes, false)
    }

    fn do_reserve(&self, nbytes: usize, block: bool) -> Result<BytesMut, QueueError> {
        if nbytes == 0 {
            return Ok(BytesMut::new());
        }
        let mut inner = self.lock();
        if nbytes > inner.arena.len() {
            // Independent of occupancy; checked before any wait.
            return Err(QueueError::TooBig(nbytes));
        }
        loop {
            if inner.shutdown {
                return Err(QueueError::Shutdown);
            }
            if inner.is_writable(nbytes) {
                break;
            }
            if !block {
                return Err(QueueError::NoSpace);
            }
            inner = self.wait(inner);
        }
        // Clear any stale state at the claimed cell so the consumer cannot
        // read a frame that is still being written.
        let cell = inner.write;
        inner.cells[cell] = CellState::Writable;
        inner.reserved = Some(nbytes);
        Ok(BytesMut::zeroed(nbytes))
    }

    /// Completes the reservation begun by the most recent
    /// [`reserve`](Self::reserve), publishing `frame.len()` bytes. An empty
    /// `frame` cancels the reservation without publishing anything.
    pub fn release(&self, frame: &[u8]) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let nbytes = frame.len();
        if nbytes == 0 {
            inner.reserved = None;
            return Ok(());
        }
        let reserved = inner.reserved.unwrap_or(0);
        if nbytes > reserved {
            // If this much data was written elsewhere the producer has
            // already corrupted something; surface it rather than publish.
            return Err(QueueError::Unreserved { released: nbytes, reserved });
        }

        let cell = inner.write;
        let start = cell * CELL_SIZE;
        inner.arena[start..start + nbytes].copy_from_slice(frame);
        inner.cells[cell] = CellState::Readable(nbytes);

        let mut next = cell + Inner::span(nbytes);
        if next >= inner.ncells() {
            next = 0;
        }
        if next != inner.read {
            // The landing cell's state may be stale from an earlier lap.
            inner.cells[next] = CellState::Writable;
        }
        inner.write = next;
        inner.reserved = None;
        self.cond.notify_all();
        Ok(())
    }

    /// Returns (but does not remove) the oldest unread frame, blocking while
    /// the queue is empty. Fails with [`QueueError::Shutdown`] only once the
    /// queue is both empty and shut down.
    pub fn peek(&self) -> Result<Bytes, QueueError> {
        let mut inner = self.lock();
        while !inner.shutdown && inner.is_empty() {
            inner = self.wait(inner);
        }
        if inner.is_empty() {
            return Err(QueueError::Shutdown);
        }
        let cell = inner.read;
        match inner.cells[cell] {
            CellState::Readable(nbytes) => Ok(Bytes::copy_from_slice(inner.payload(cell, nbytes))),
            // is_empty() returned false, so the read cell holds a frame.
            _ => Err(QueueError::Shutdown),
        }
    }

    /// Removes the frame returned by the most recent [`peek`](Self::peek)
    /// and wakes a blocked producer. Without a preceding `peek` this is a
    /// no-op.
    pub fn remove(&self) {
        let mut inner = self.lock();
        let cell = inner.read;
        if let CellState::Readable(nbytes) = inner.cells[cell] {
            inner.cells[cell] = CellState::Writable;
            let mut next = cell + Inner::span(nbytes);
            if next >= inner.ncells() {
                next = 0;
            }
            inner.read = next;
            self.cond.notify_all();
        }
    }

    /// Shuts the queue down for input. Idempotent. Buffered frames remain
    /// consumable; blocked and future producers, and a future empty-queue
    /// [`peek`](Self::peek), observe [`QueueError::Shutdown`].
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if !inner.shutdown {
            debug!("frame queue shut down for input");
            inner.shutdown = true;
        }
        self.cond.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

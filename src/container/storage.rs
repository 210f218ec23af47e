//! Per-block particle storage and the shared overflow staging buffer.
//!
//! Each block owns two parallel arrays: particle IDs and packed
//! coordinates with stride `PS` (2 for point particles, 3 when a radius
//! is carried). The live count is atomic so that concurrent insertion
//! can reserve slots with a single fetch-add; the arrays themselves are
//! written lock-free at disjoint reserved indices. Buffers only ever
//! grow (by doubling) and are replaced exclusively under `&mut`, during
//! serial insertion or overflow reconciliation.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

/// Hard upper bound on the per-block slot capacity. Growing a block past
/// this is treated as resource exhaustion and panics.
pub const MAX_PARTICLE_MEMORY: usize = 1 << 24;

pub(crate) struct Block<const PS: usize> {
    ids: Box<[UnsafeCell<i32>]>,
    points: Box<[UnsafeCell<f64>]>,
    co: AtomicUsize,
}

// Shared access only ever writes through `UnsafeCell` at slot indices
// that were uniquely reserved via `reserve`; readers and buffer growth
// require `&mut` exclusivity at the container level.
unsafe impl<const PS: usize> Sync for Block<PS> {}

impl<const PS: usize> Block<PS> {
    pub fn new(init_mem: usize) -> Self {
        Self {
            ids: (0..init_mem).map(|_| UnsafeCell::new(0)).collect(),
            points: (0..PS * init_mem).map(|_| UnsafeCell::new(0.0)).collect(),
            co: AtomicUsize::new(0),
        }
    }

    /// Number of reserved slots. During a parallel batch this may exceed
    /// [`Block::capacity`]; reconciliation restores `len <= capacity`.
    #[inline]
    pub fn len(&self) -> usize {
        self.co.load(Ordering::Relaxed)
    }

    /// Number of slots that are both reserved and backed by storage.
    #[inline]
    pub fn live(&self) -> usize {
        self.len().min(self.capacity())
    }

    /// Current slot capacity (`mem` in the container invariants).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    /// The ID array, first [`Block::live`] entries valid.
    ///
    /// Sound because slot writes only happen through an exclusive
    /// insertion batch, which cannot coexist with a shared borrow.
    #[inline]
    pub fn ids(&self) -> &[i32] {
        unsafe { std::slice::from_raw_parts(self.ids.as_ptr().cast::<i32>(), self.ids.len()) }
    }

    /// The packed coordinate array, stride `PS` per particle.
    #[inline]
    pub fn points(&self) -> &[f64] {
        unsafe { std::slice::from_raw_parts(self.points.as_ptr().cast::<f64>(), self.points.len()) }
    }

    /// Packed coordinates of the particle in slot `q`.
    #[inline]
    pub fn point(&self, q: usize) -> [f64; PS] {
        let mut out = [0.0; PS];
        out.copy_from_slice(&self.points()[PS * q..PS * q + PS]);
        out
    }

    /// Atomically reserve the next slot index. This is the only
    /// cross-thread synchronization on the insertion fast path; the
    /// surrounding fork-join provides the ordering for the slot writes.
    #[inline]
    pub fn reserve(&self) -> usize {
        self.co.fetch_add(1, Ordering::Relaxed)
    }

    /// Lock-free write of a reserved slot.
    ///
    /// # Safety
    ///
    /// `q` must be below [`Block::capacity`] and must have been reserved
    /// by exactly one caller through [`Block::reserve`]; no shared reads
    /// of the arrays may overlap the batch this write belongs to.
    #[inline]
    pub unsafe fn write_slot(&self, q: usize, id: i32, point: &[f64; PS]) {
        *self.ids[q].get() = id;
        for (k, &v) in point.iter().enumerate() {
            *self.points[PS * q + k].get() = v;
        }
    }

    /// Append a particle under exclusive access (serial insertion). The
    /// caller has ensured spare capacity. Returns the slot used.
    pub fn push(&mut self, id: i32, point: &[f64; PS]) -> usize {
        let q = *self.co.get_mut();
        *self.ids[q].get_mut() = id;
        for (k, &v) in point.iter().enumerate() {
            *self.points[PS * q + k].get_mut() = v;
        }
        *self.co.get_mut() = q + 1;
        q
    }

    /// Write a previously reserved slot under exclusive access
    /// (overflow reconciliation).
    pub fn write_reserved(&mut self, q: usize, id: i32, point: &[f64; PS]) {
        *self.ids[q].get_mut() = id;
        for (k, &v) in point.iter().enumerate() {
            *self.points[PS * q + k].get_mut() = v;
        }
    }

    /// Double the capacity until `slot` fits, copying the first `copy`
    /// entries into the new buffers. Panics once the doubled capacity
    /// exceeds [`MAX_PARTICLE_MEMORY`].
    pub fn grow_to(&mut self, slot: usize, index: usize, copy: usize) {
        let mut nmem = 2 * self.capacity();
        while slot >= nmem {
            nmem *= 2;
        }
        assert!(
            nmem <= MAX_PARTICLE_MEMORY,
            "maximum particle memory ({MAX_PARTICLE_MEMORY}) exceeded in block {index}"
        );
        debug!("particle memory in block {index} scaled up to {nmem}");

        let mut ids: Box<[UnsafeCell<i32>]> = (0..nmem).map(|_| UnsafeCell::new(0)).collect();
        for l in 0..copy {
            *ids[l].get_mut() = *self.ids[l].get_mut();
        }
        self.ids = ids;

        let mut points: Box<[UnsafeCell<f64>]> =
            (0..PS * nmem).map(|_| UnsafeCell::new(0.0)).collect();
        for l in 0..PS * copy {
            *points[l].get_mut() = *self.points[l].get_mut();
        }
        self.points = points;
    }

    /// Forget all particles; capacity is retained.
    pub fn clear(&mut self) {
        *self.co.get_mut() = 0;
    }
}

/// One staged insertion whose reserved slot fell past its block's
/// capacity at reservation time. Replayed by reconciliation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OverflowRecord<const PS: usize> {
    pub block: usize,
    pub slot: usize,
    pub id: i32,
    pub point: [f64; PS],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read() {
        let mut block = Block::<2>::new(2);
        assert_eq!(block.push(7, &[0.5, 0.5]), 0);
        assert_eq!(block.push(8, &[0.1, 0.9]), 1);
        assert_eq!(block.len(), 2);
        assert_eq!(block.ids()[..2], [7, 8]);
        assert_eq!(block.point(1), [0.1, 0.9]);
    }

    #[test]
    fn test_grow_preserves_contents() {
        let mut block = Block::<3>::new(1);
        block.push(3, &[0.2, 0.4, 0.05]);
        block.grow_to(5, 0, 1);
        assert_eq!(block.capacity(), 8);
        assert_eq!(block.point(0), [0.2, 0.4, 0.05]);
        assert_eq!(block.ids()[0], 3);
    }

    #[test]
    fn test_reserve_past_capacity() {
        let block = Block::<2>::new(1);
        assert_eq!(block.reserve(), 0);
        assert_eq!(block.reserve(), 1);
        assert_eq!(block.len(), 2);
        assert_eq!(block.live(), 1);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut block = Block::<2>::new(2);
        block.push(1, &[0.0, 0.0]);
        block.grow_to(2, 0, 1);
        block.clear();
        assert_eq!(block.len(), 0);
        assert_eq!(block.capacity(), 4);
    }
}

//! The block-partitioned particle container.
//!
//! A [`Container`] divides a rectangular domain into a uniform grid of
//! blocks, each owning growable arrays of particle IDs and packed
//! coordinates. The stride `PS` selects the flavor: [`MonoContainer`]
//! (`PS = 2`) stores bare points, [`PolyContainer`] (`PS = 3`) carries a
//! per-particle radius and serves radical (power) Voronoi diagrams.
//!
//! Serial insertion goes through [`Container::put`]. Concurrent bulk
//! insertion reserves slots with one atomic fetch-add per particle and
//! stages anything past a block's current capacity in a shared overflow
//! buffer; [`Container::put_reconcile_overflow`] replays that buffer
//! single-threaded and must run before any read. The borrow checker
//! enforces the ordering: batches run through a [`ParallelInserter`]
//! created from `&mut self`, so no query or iterator can overlap one.

pub mod geometry;
pub mod io;
pub mod iters;
pub(crate) mod storage;

use log::debug;
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::compute::{self, ComputeScratch};
use geometry::{step_div, Grid};
use storage::{Block, OverflowRecord};

/// A boundary predicate restricting the domain beyond its rectangular
/// bounds. Walls only participate in [`Container::point_inside`]; they
/// do not affect insertion or cell computation.
pub trait Wall {
    /// Whether the point lies on the inside of this wall.
    fn point_inside(&self, x: f64, y: f64) -> bool;
}

/// Container for point particles without radii (stride 2).
pub type MonoContainer = Container<2>;

/// Container for radius-carrying particles (stride 3), for radical
/// (power) Voronoi diagrams.
pub type PolyContainer = Container<3>;

pub struct Container<const PS: usize> {
    grid: Grid,
    blocks: Vec<Block<PS>>,
    overflow: Mutex<Vec<OverflowRecord<PS>>>,
    walls: Vec<Box<dyn Wall + Send + Sync>>,
    pool: ThreadPool,
    scratch: Vec<Mutex<ComputeScratch>>,
    nt: usize,
    /// Largest radius of any live particle; may overestimate after
    /// `clear`-free sessions, never underestimates. Only maintained for
    /// `PS == 3`.
    max_radius: f64,
    /// Per-worker radius maxima (f64 bits), folded into `max_radius` by
    /// reconciliation. Pool workers each use their own entry; threads
    /// outside the pool share entry 0, so updates fold in atomically.
    max_r: Vec<AtomicU64>,
}

impl<const PS: usize> Container<PS> {
    /// Creates a container over the domain `[ax,bx] × [ay,by]` (passed
    /// as `[ax, bx, ay, by]`), split into `nx × ny` blocks with the
    /// given per-axis periodicity, `init_mem` slots pre-allocated per
    /// block, and a worker pool of `number_thread` threads.
    pub fn new(
        bounds: [f64; 4],
        blocks: (usize, usize),
        periodic: (bool, bool),
        init_mem: usize,
        number_thread: usize,
    ) -> Self {
        assert!(PS == 2 || PS == 3, "unsupported coordinate stride {PS}");
        assert!(init_mem >= 1, "initial block capacity must be positive");
        assert!(number_thread >= 1, "worker count must be positive");
        let grid = Grid::new(bounds, blocks, periodic);
        let blocks = (0..grid.block_count()).map(|_| Block::new(init_mem)).collect();
        let pool = ThreadPoolBuilder::new()
            .num_threads(number_thread)
            .build()
            .expect("failed to build worker thread pool");
        // every worker constructs its own scratch context
        let scratch = pool.broadcast(|_| Mutex::new(ComputeScratch::new(&grid)));
        Self {
            grid,
            blocks,
            overflow: Mutex::new(Vec::with_capacity(64)),
            walls: Vec::new(),
            pool,
            scratch,
            nt: number_thread,
            max_radius: 0.0,
            max_r: (0..number_thread).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// The domain geometry.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Current worker count.
    pub fn threads(&self) -> usize {
        self.nt
    }

    /// Number of live particles in one block.
    pub fn block_len(&self, block: usize) -> usize {
        self.blocks[block].live()
    }

    /// Current slot capacity of one block.
    pub fn block_capacity(&self, block: usize) -> usize {
        self.blocks[block].capacity()
    }

    /// Total number of stored particles.
    pub fn total_particles(&self) -> usize {
        self.blocks.iter().map(Block::live).sum()
    }

    /// Largest radius among all particles inserted since construction
    /// or the last [`Container::clear`]. Always zero for stride 2.
    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    #[inline]
    pub(crate) fn block(&self, b: usize) -> &Block<PS> {
        &self.blocks[b]
    }

    /// Upper bound on particle radii used by the search kernels.
    #[inline]
    pub(crate) fn radius_bound(&self) -> f64 {
        if PS > 2 {
            self.max_radius
        } else {
            0.0
        }
    }

    /// Index of the calling worker's per-thread scratch.
    fn thread_index(&self) -> usize {
        rayon::current_thread_index().map_or(0, |t| t % self.nt)
    }

    fn fold_radius_serial(&mut self, point: &[f64; PS]) {
        if PS > 2 {
            let r = point[PS - 1];
            if self.max_radius < r {
                self.max_radius = r;
            }
        }
    }

    fn fold_radius_worker(&self, point: &[f64; PS]) {
        if PS > 2 {
            let r = point[PS - 1];
            let slot = &self.max_r[self.thread_index()];
            // threads outside the pool all map to the same entry, so
            // the maximum must be folded in with a CAS loop
            let mut current = slot.load(Ordering::Relaxed);
            while f64::from_bits(current) < r {
                match slot.compare_exchange_weak(
                    current,
                    r.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(seen) => current = seen,
                }
            }
        }
    }

    /// Remaps a particle position and ensures its block has a free slot,
    /// growing it by doubling if full.
    fn put_locate_block(&mut self, point: [f64; PS]) -> Option<(usize, [f64; PS])> {
        let Some((b, x, y)) = self.grid.put_remap(point[0], point[1]) else {
            debug!("out of bounds: ({}, {})", point[0], point[1]);
            return None;
        };
        let block = &mut self.blocks[b];
        if block.len() == block.capacity() {
            let live = block.len();
            block.grow_to(live, b, live);
        }
        let mut point = point;
        point[0] = x;
        point[1] = y;
        Some((b, point))
    }

    /// Inserts a particle serially. The position is remapped into the
    /// primary domain; non-periodic out-of-bounds positions are silently
    /// dropped. `point` is `[x, y]` for stride 2 and `[x, y, r]` for
    /// stride 3.
    ///
    /// # Examples
    /// ```
    /// # use voro2d::PolyContainer;
    /// let mut con = PolyContainer::new([0.0, 1.0, 0.0, 1.0], (2, 2), (false, false), 8, 1);
    /// con.put(12, [0.3, 0.7, 0.05]);
    /// assert_eq!(con.total_particles(), 1);
    /// assert_eq!(con.max_radius(), 0.05);
    /// ```
    pub fn put(&mut self, id: i32, point: [f64; PS]) {
        if let Some((b, point)) = self.put_locate_block(point) {
            self.blocks[b].push(id, &point);
            self.fold_radius_serial(&point);
        }
    }

    /// Like [`Container::put`], also recording the `(block, slot)` the
    /// particle landed in into the ordering sink.
    pub fn put_with_order(&mut self, order: &mut io::ParticleOrder, id: i32, point: [f64; PS]) {
        if let Some((b, point)) = self.put_locate_block(point) {
            let slot = self.blocks[b].push(id, &point);
            order.add(b, slot);
            self.fold_radius_serial(&point);
        }
    }

    /// Begins a concurrent insertion batch.
    ///
    /// The inserter borrows the container exclusively for the batch's
    /// lifetime, so no query or iterator can observe partially written
    /// blocks; [`ParallelInserter::put`] itself takes `&self` and may be
    /// called from any number of threads. After the batch, call
    /// [`Container::put_reconcile_overflow`] before reading.
    pub fn parallel_inserter(&mut self) -> ParallelInserter<'_, PS> {
        ParallelInserter { con: self }
    }

    /// Inserts a batch of particles concurrently on the container's own
    /// worker pool; the particle at index `i` receives ID `i`. Callers
    /// must still run [`Container::put_reconcile_overflow`] afterwards.
    pub fn put_parallel(&mut self, points: &[[f64; PS]]) {
        let inserter = ParallelInserter { con: self };
        inserter.con.pool.install(|| {
            points
                .par_iter()
                .enumerate()
                .for_each(|(i, point)| inserter.put(i as i32, *point));
        });
    }

    /// Drains the overflow buffer accumulated by parallel insertion,
    /// growing blocks as needed, and folds per-worker radius maxima into
    /// [`Container::max_radius`]. Must be called after every batch of
    /// parallel insertions before any read operation. Idempotent when no
    /// overflow is pending.
    pub fn put_reconcile_overflow(&mut self) {
        if PS > 2 {
            let mut max_radius = self.max_radius;
            for slot in &mut self.max_r {
                let r = f64::from_bits(*slot.get_mut());
                if max_radius < r {
                    max_radius = r;
                }
                *slot.get_mut() = 0.0f64.to_bits();
            }
            self.max_radius = max_radius;
        }

        let mut records = std::mem::take(self.overflow.get_mut());
        for rec in records.drain(..) {
            let block = &mut self.blocks[rec.block];
            if rec.slot >= block.capacity() {
                let copy = block.capacity();
                block.grow_to(rec.slot, rec.block, copy);
            }
            block.write_reserved(rec.slot, rec.id, &rec.point);
        }
        // hand the buffer's capacity back for the next batch
        *self.overflow.get_mut() = records;
    }

    /// Removes all particles, keeping block capacities. Resets
    /// [`Container::max_radius`] to zero. Any overflow still pending
    /// from an unreconciled batch is left untouched; reconcile before
    /// clearing.
    pub fn clear(&mut self) {
        for block in &mut self.blocks {
            block.clear();
        }
        if PS > 2 {
            self.max_radius = 0.0;
        }
    }

    /// Rebuilds the worker pool, the per-worker compute contexts, and
    /// the per-worker radius maxima for a new thread count.
    pub fn change_number_thread(&mut self, number_thread: usize) {
        assert!(number_thread >= 1, "worker count must be positive");
        self.nt = number_thread;
        self.pool = ThreadPoolBuilder::new()
            .num_threads(number_thread)
            .build()
            .expect("failed to build worker thread pool");
        let grid = self.grid;
        self.scratch = self.pool.broadcast(|_| Mutex::new(ComputeScratch::new(&grid)));
        self.max_r = (0..number_thread).map(|_| AtomicU64::new(0)).collect();
    }

    /// Registers a wall predicate consulted by
    /// [`Container::point_inside`].
    pub fn add_wall<W: Wall + Send + Sync + 'static>(&mut self, wall: W) {
        self.walls.push(Box::new(wall));
    }

    /// Whether a point lies within the closed domain bounds and on the
    /// inside of every registered wall.
    pub fn point_inside(&self, x: f64, y: f64) -> bool {
        self.grid.inside_bounds(x, y) && self.walls.iter().all(|w| w.point_inside(x, y))
    }

    /// Finds the particle whose Voronoi cell contains `(x, y)`, that is,
    /// the nearest particle, under the power metric when radii are
    /// carried.
    /// Returns the particle's world position (which may lie in a
    /// periodic image of the domain) and its ID, or `None` if the point
    /// is outside a non-periodic domain or the container is empty.
    ///
    /// # Examples
    /// ```
    /// # use voro2d::MonoContainer;
    /// let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (4, 4), (false, false), 8, 2);
    /// con.put(0, [0.25, 0.75]);
    /// let ([rx, ry], id) = con.find_voronoi_cell(0.5, 0.5).unwrap();
    /// assert_eq!((rx, ry, id), (0.25, 0.75, 0));
    /// ```
    pub fn find_voronoi_cell(&self, x: f64, y: f64) -> Option<([f64; 2], i32)> {
        let m = self.grid.remap(x, y)?;
        let mut scratch = self.scratch[self.thread_index()].lock();
        let rec = compute::find_cell(&mut scratch, self, m.x, m.y, m.ci, m.cj, m.ij)?;
        drop(scratch);

        // fold block offsets walked across a periodic boundary during
        // the search into the image displacement
        let (mut ai, mut aj) = (m.ai, m.aj);
        if self.grid.x_prd {
            let ci = m.ci + rec.di;
            if ci < 0 || ci >= self.grid.nx {
                ai += step_div(ci, self.grid.nx);
            }
        }
        if self.grid.y_prd {
            let cj = m.cj + rec.dj;
            if cj < 0 || cj >= self.grid.ny {
                aj += step_div(cj, self.grid.ny);
            }
        }
        let block = self.block(rec.ij);
        let point = block.point(rec.l);
        let rx = point[0] + ai as f64 * (self.grid.bx - self.grid.ax);
        let ry = point[1] + aj as f64 * (self.grid.by - self.grid.ay);
        Some(([rx, ry], block.ids()[rec.l]))
    }

    /// Computes the Voronoi cell of the particle at `(block, slot)`.
    /// `None` when the handle is vacant or the cell is empty (a power
    /// cell can be swallowed entirely by its neighbors).
    pub fn compute_cell(&self, block: usize, slot: usize) -> Option<crate::cell::VoronoiCell> {
        let mut scratch = self.scratch[self.thread_index()].lock();
        compute::compute_cell(&mut scratch, self, block, slot)
    }
}

/// Exclusive handle for one concurrent insertion batch; see
/// [`Container::parallel_inserter`].
pub struct ParallelInserter<'c, const PS: usize> {
    con: &'c Container<PS>,
}

impl<const PS: usize> ParallelInserter<'_, PS> {
    /// Inserts one particle from any thread.
    ///
    /// Fast path: one atomic slot reservation plus a lock-free write.
    /// Slow path (the reserved slot lies past the block's current
    /// capacity): the particle is staged in the shared overflow buffer
    /// under its mutex, to be placed by
    /// [`Container::put_reconcile_overflow`]. Out-of-bounds positions on
    /// non-periodic axes are silently dropped.
    pub fn put(&self, id: i32, point: [f64; PS]) {
        let con = self.con;
        let Some((b, x, y)) = con.grid.put_remap(point[0], point[1]) else {
            debug!("out of bounds: ({}, {})", point[0], point[1]);
            return;
        };
        let mut point = point;
        point[0] = x;
        point[1] = y;

        let block = &con.blocks[b];
        let m = block.reserve();
        if m < block.capacity() {
            // Safety: `m` was reserved by this call alone and lies
            // within the current buffers; the batch holds the container
            // exclusively, so no reads overlap.
            unsafe { block.write_slot(m, id, &point) };
            con.fold_radius_worker(&point);
        } else {
            let mut overflow = con.overflow.lock();
            overflow.push(OverflowRecord {
                block: b,
                slot: m,
                id,
                point,
            });
            con.fold_radius_worker(&point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_put_grows_block() {
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (1, 1), (false, false), 2, 1);
        con.put(7, [0.5, 0.5]);
        con.put(8, [0.1, 0.9]);
        con.put(9, [0.9, 0.1]);
        assert_eq!(con.block_len(0), 3);
        assert_eq!(con.block_capacity(0), 4);
        let ids: Vec<i32> = con.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[test]
    fn test_out_of_bounds_dropped() {
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (1, 1), (false, false), 4, 1);
        con.put(1, [2.0, 0.5]);
        con.put_reconcile_overflow();
        assert_eq!(con.total_particles(), 0);
    }

    #[test]
    fn test_periodic_put_wraps() {
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (2, 2), (true, true), 4, 1);
        con.put(1, [1.25, 0.25]);
        con.put_reconcile_overflow();
        let p = con.iter().next().unwrap();
        assert_eq!(p.block, 0);
        assert!((p.x() - 0.25).abs() < 1e-14);
        assert_eq!(p.y(), 0.25);
    }

    #[test]
    fn test_parallel_overflow_reconcile() {
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (1, 1), (false, false), 1, 2);
        let points: Vec<[f64; 2]> = (0..100)
            .map(|i| [(i as f64 + 0.5) / 100.0, 0.5])
            .collect();
        con.put_parallel(&points);
        con.put_reconcile_overflow();
        assert_eq!(con.block_len(0), 100);
        assert_eq!(con.block_capacity(0), 128);
        let mut ids: Vec<i32> = con.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..100).collect::<Vec<i32>>());
    }

    #[test]
    fn test_reconcile_idempotent_when_empty() {
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (2, 2), (false, false), 2, 1);
        con.put(1, [0.5, 0.5]);
        con.put_reconcile_overflow();
        con.put_reconcile_overflow();
        assert_eq!(con.total_particles(), 1);
    }

    #[test]
    fn test_clear_resets_counts_and_radius() {
        let mut con = PolyContainer::new([0.0, 1.0, 0.0, 1.0], (2, 2), (false, false), 2, 1);
        con.put(1, [0.5, 0.5, 0.3]);
        assert_eq!(con.max_radius(), 0.3);
        let cap = con.block_capacity(0);
        con.clear();
        assert_eq!(con.total_particles(), 0);
        assert_eq!(con.max_radius(), 0.0);
        assert_eq!(con.block_capacity(0), cap);
    }

    #[test]
    fn test_parallel_radius_folded_on_reconcile() {
        let mut con = PolyContainer::new([0.0, 1.0, 0.0, 1.0], (1, 1), (false, false), 8, 2);
        let points = vec![[0.5, 0.5, 0.1], [0.3, 0.3, 0.4], [0.7, 0.7, 0.2]];
        con.put_parallel(&points);
        assert_eq!(con.max_radius(), 0.0);
        con.put_reconcile_overflow();
        assert_eq!(con.max_radius(), 0.4);
    }

    #[test]
    fn test_point_inside_with_wall() {
        struct HalfPlane;
        impl Wall for HalfPlane {
            fn point_inside(&self, x: f64, _y: f64) -> bool {
                x < 0.5
            }
        }
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (2, 2), (false, false), 2, 1);
        assert!(con.point_inside(0.75, 0.5));
        assert!(!con.point_inside(1.25, 0.5));
        con.add_wall(HalfPlane);
        assert!(con.point_inside(0.25, 0.5));
        assert!(!con.point_inside(0.75, 0.5));
    }

    #[test]
    fn test_find_voronoi_cell_periodic_image() {
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (2, 2), (true, true), 4, 1);
        con.put(5, [0.05, 0.5]);
        con.put_reconcile_overflow();
        // the nearest image of the particle lies one domain width to
        // the right, outside the primary domain
        let ([rx, ry], id) = con.find_voronoi_cell(0.95, 0.5).unwrap();
        assert_eq!(id, 5);
        assert!((rx - 1.05).abs() < 1e-12);
        assert_eq!(ry, 0.5);

        // a remapped query and a wrap during the search cancel out
        let ([rx, _], id) = con.find_voronoi_cell(-0.05, 0.5).unwrap();
        assert_eq!(id, 5);
        assert!((rx - 0.05).abs() < 1e-12);
    }
}

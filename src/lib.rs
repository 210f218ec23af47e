//! Block-partitioned 2D particle container for Voronoi and radical
//! (power) Voronoi tessellations.
//!
//! A [`Container`] splits an axis-aligned rectangular domain into a
//! uniform grid of blocks, each holding growable arrays of particle IDs
//! and packed coordinates. Either axis may be periodic, in which case
//! insertions are folded into the primary domain. On top of the store
//! sit nearest-particle lookup (equivalent to locating the Voronoi cell
//! containing a query point), per-particle cell construction, and
//! block-major iteration.
//!
//! Bulk insertion can run concurrently: slot reservation is a single
//! atomic fetch-add per particle, with reservations past a block's
//! capacity staged in a mutex-guarded overflow buffer that
//! [`Container::put_reconcile_overflow`] replays single-threaded.
//!
//! ```
//! use voro2d::MonoContainer;
//!
//! let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (4, 4), (true, true), 8, 2);
//! con.put(0, [0.25, 0.75]);
//! con.put(1, [0.75, 0.25]);
//!
//! let ([rx, ry], id) = con.find_voronoi_cell(0.2, 0.8).unwrap();
//! assert_eq!((rx, ry, id), (0.25, 0.75, 0));
//! assert!((con.sum_cell_areas() - 1.0).abs() < 1e-9);
//! ```

pub mod cell;
mod compute;
pub mod container;
pub mod error;

pub use cell::VoronoiCell;
pub use container::geometry::Grid;
pub use container::io::ParticleOrder;
pub use container::iters::{ParticleView, Particles};
pub use container::storage::MAX_PARTICLE_MEMORY;
pub use container::{Container, MonoContainer, ParallelInserter, PolyContainer, Wall};
pub use error::Error;

//! Per-worker scratch contexts and the two search kernels built on the
//! block grid: locating the particle whose (power) Voronoi cell contains
//! a query point, and constructing a cell polygon by half-plane cuts.
//!
//! Both kernels walk image blocks ring by ring outward from a center
//! block, in Chebyshev distance order, pruning by the exact distance
//! from the query to each block rectangle and stopping as soon as no
//! remaining ring can influence the result. On a periodic axis the walk
//! covers `2·n + 1` image columns/rows, enough to reach every distinct
//! periodic image once.

use nalgebra::Vector2;

use crate::container::geometry::{step_div, step_mod, Grid};
use crate::container::Container;

/// A particle found by the cell search: owning block, slot, and the
/// image offsets (in blocks) walked from the search center.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ParticleRecord {
    pub ij: usize,
    pub l: usize,
    pub di: i32,
    pub dj: i32,
}

/// Reusable per-worker search state. One instance exists per pool
/// worker; [`crate::container::Container::change_number_thread`]
/// rebuilds them. The container itself is passed into every query by
/// shared reference, so contexts hold no back-pointers.
pub(crate) struct ComputeScratch {
    /// Search extent: number of image columns and rows reachable from
    /// any center block (`2·n + 1` on a periodic axis, `n` otherwise).
    hx: i32,
    hy: i32,
    /// Candidate blocks of the ring currently being scanned.
    ring: Vec<(i32, i32)>,
}

impl ComputeScratch {
    pub fn new(grid: &Grid) -> Self {
        let hx = if grid.x_prd { 2 * grid.nx + 1 } else { grid.nx };
        let hy = if grid.y_prd { 2 * grid.ny + 1 } else { grid.ny };
        Self {
            hx,
            hy,
            ring: Vec::with_capacity((2 * (hx + hy)) as usize),
        }
    }

    /// Image-block bounds of a search centered on block `(ci, cj)`.
    fn extent(&self, grid: &Grid, ci: i32, cj: i32) -> (i32, i32, i32, i32) {
        let (xlo, xhi) = if grid.x_prd {
            (ci - grid.nx, ci + grid.nx)
        } else {
            (0, grid.nx - 1)
        };
        let (ylo, yhi) = if grid.y_prd {
            (cj - grid.ny, cj + grid.ny)
        } else {
            (0, grid.ny - 1)
        };
        debug_assert!(xhi - xlo < self.hx && yhi - ylo < self.hy);
        (xlo, xhi, ylo, yhi)
    }

    /// Collect all image blocks at Chebyshev distance `k` from
    /// `(ci, cj)`, clipped to the extent.
    fn collect_ring(&mut self, center: (i32, i32), k: i32, extent: (i32, i32, i32, i32)) {
        let (ci, cj) = center;
        let (xlo, xhi, ylo, yhi) = extent;
        self.ring.clear();
        if k == 0 {
            if ci >= xlo && ci <= xhi && cj >= ylo && cj <= yhi {
                self.ring.push((ci, cj));
            }
            return;
        }
        for vi in (ci - k).max(xlo)..=(ci + k).min(xhi) {
            for vj in [cj - k, cj + k] {
                if vj >= ylo && vj <= yhi {
                    self.ring.push((vi, vj));
                }
            }
        }
        for vj in (cj - k + 1).max(ylo)..=(cj + k - 1).min(yhi) {
            for vi in [ci - k, ci + k] {
                if vi >= xlo && vi <= xhi {
                    self.ring.push((vi, vj));
                }
            }
        }
    }
}

/// Squared distance from `(x, y)` to the rectangle of image block
/// `(vi, vj)` (which may lie in a periodic image of the domain).
fn block_distance_squared(grid: &Grid, vi: i32, vj: i32, x: f64, y: f64) -> f64 {
    let xlo = grid.ax + vi as f64 * grid.boxx;
    let ylo = grid.ay + vj as f64 * grid.boxy;
    let dx = (xlo - x).max(x - (xlo + grid.boxx)).max(0.0);
    let dy = (ylo - y).max(y - (ylo + grid.boxy)).max(0.0);
    dx * dx + dy * dy
}

/// World-space shift of image block `(vi, vj)` and the linear index of
/// the real block backing it.
fn resolve_image(grid: &Grid, vi: i32, vj: i32) -> (usize, f64, f64) {
    let divx = step_div(vi, grid.nx);
    let divy = step_div(vj, grid.ny);
    let b = grid.block_index(step_mod(vi, grid.nx), step_mod(vj, grid.ny));
    (
        b,
        divx as f64 * (grid.bx - grid.ax),
        divy as f64 * (grid.by - grid.ay),
    )
}

/// Locate the particle whose Voronoi cell contains `(x, y)`: the
/// nearest particle under the Euclidean metric, or under the power
/// metric `d² − r²` when radii are carried. `(ci, cj)` and `ij` identify
/// the primary-domain block holding the query point. Returns `None` iff
/// the container holds no particles.
pub(crate) fn find_cell<const PS: usize>(
    scratch: &mut ComputeScratch,
    con: &Container<PS>,
    x: f64,
    y: f64,
    ci: i32,
    cj: i32,
    _ij: usize,
) -> Option<ParticleRecord> {
    let grid = con.grid();
    let extent = scratch.extent(grid, ci, cj);
    let (xlo, xhi, ylo, yhi) = extent;
    let kmax = (ci - xlo).max(xhi - ci).max(cj - ylo).max(yhi - cj);
    let minbox = grid.boxx.min(grid.boxy);
    let rbound2 = con.radius_bound() * con.radius_bound();

    let mut best: Option<(f64, ParticleRecord)> = None;
    for k in 0..=kmax {
        if let Some((pw, _)) = best {
            // blocks at ring k are at least (k-1) whole blocks away
            let ring_min = ((k - 1).max(0)) as f64 * minbox;
            if ring_min * ring_min - rbound2 > pw {
                break;
            }
        }
        scratch.collect_ring((ci, cj), k, extent);
        for &(vi, vj) in &scratch.ring {
            let (b, sx, sy) = resolve_image(grid, vi, vj);
            let block = con.block(b);
            let live = block.live();
            if live == 0 {
                continue;
            }
            let d2 = block_distance_squared(grid, vi, vj, x, y);
            if let Some((pw, _)) = best {
                if d2 - rbound2 >= pw {
                    continue;
                }
            }
            let points = block.points();
            for l in 0..live {
                let dx = points[PS * l] + sx - x;
                let dy = points[PS * l + 1] + sy - y;
                let mut pw = dx * dx + dy * dy;
                if PS > 2 {
                    let r = points[PS * l + PS - 1];
                    pw -= r * r;
                }
                if best.map_or(true, |(bw, _)| pw < bw) {
                    best = Some((
                        pw,
                        ParticleRecord {
                            ij: b,
                            l,
                            di: vi - ci,
                            dj: vj - cj,
                        },
                    ));
                }
            }
        }
    }
    best.map(|(_, rec)| rec)
}

/// Construct the Voronoi cell of the particle in slot `q` of block `b`
/// by half-plane clipping against every neighbor that can reach it.
/// Returns `None` when the cell is empty, which only happens in the
/// radius-carrying container (a power cell can be swallowed entirely).
pub(crate) fn compute_cell<const PS: usize>(
    scratch: &mut ComputeScratch,
    con: &Container<PS>,
    b: usize,
    q: usize,
) -> Option<crate::cell::VoronoiCell> {
    let grid = con.grid();
    let home = con.block(b);
    if q >= home.live() {
        return None;
    }
    let gen = home.point(q);
    let (gx, gy) = (gen[0], gen[1]);
    let gr2 = if PS > 2 {
        gen[PS - 1] * gen[PS - 1]
    } else {
        0.0
    };

    // A cell in a periodic direction always fits inside a domain-sized
    // box centered on its generator; otherwise the domain itself bounds
    // the cell.
    let (cxlo, cxhi) = if grid.x_prd {
        (-0.5 * (grid.bx - grid.ax), 0.5 * (grid.bx - grid.ax))
    } else {
        (grid.ax - gx, grid.bx - gx)
    };
    let (cylo, cyhi) = if grid.y_prd {
        (-0.5 * (grid.by - grid.ay), 0.5 * (grid.by - grid.ay))
    } else {
        (grid.ay - gy, grid.by - gy)
    };
    let mut cell = crate::cell::VoronoiCell::rectangle(cxlo, cxhi, cylo, cyhi);

    let ci = b as i32 % grid.nx;
    let cj = b as i32 / grid.nx;
    let extent = scratch.extent(grid, ci, cj);
    let (xlo, xhi, ylo, yhi) = extent;
    let kmax = (ci - xlo).max(xhi - ci).max(cj - ylo).max(yhi - cj);
    let minbox = grid.boxx.min(grid.boxy);
    let rbound = con.radius_bound();

    for k in 0..=kmax {
        // a neighbor at distance d cuts the cell only if its bisector
        // reaches inside the farthest vertex: d < 2·R_max + r_bound
        let reach = 2.0 * cell.max_radius_squared().sqrt() + rbound;
        if k > 0 && ((k - 1) as f64) * minbox > reach {
            break;
        }
        scratch.collect_ring((ci, cj), k, extent);
        for &(vi, vj) in &scratch.ring {
            let (nb, sx, sy) = resolve_image(grid, vi, vj);
            let block = con.block(nb);
            let live = block.live();
            if live == 0 {
                continue;
            }
            if block_distance_squared(grid, vi, vj, gx, gy).sqrt() > reach {
                continue;
            }
            let home_image = nb == b && vi == ci && vj == cj;
            let points = block.points();
            for l in 0..live {
                if home_image && l == q {
                    continue;
                }
                let dx = points[PS * l] + sx - gx;
                let dy = points[PS * l + 1] + sy - gy;
                let d2 = dx * dx + dy * dy;
                if d2 == 0.0 {
                    continue;
                }
                let nr2 = if PS > 2 {
                    let r = points[PS * l + PS - 1];
                    r * r
                } else {
                    0.0
                };
                if !cell.plane(Vector2::new(dx, dy), 0.5 * (d2 + gr2 - nr2)) {
                    return None;
                }
            }
        }
    }
    Some(cell)
}

//! Text import and iteration-driven emission.
//!
//! Import reads whitespace-separated decimal records `id x y` (stride 2)
//! or `id x y r` (stride 3); records may span line breaks and the stream
//! carries no comments or headers. Emission walks the stored particles
//! (and, for the cell outputs, computes each particle's Voronoi cell)
//! and writes to a caller-supplied stream.

use std::io::{self, BufRead, Write};

use itertools::iproduct;

use super::Container;
use crate::error::Error;

/// Radius reported by [`Container::print_custom`] for point particles,
/// which carry none of their own.
const DEFAULT_RADIUS: f64 = 0.5;

/// An append-only record of where successive insertions landed, for
/// callers that need to revisit particles in insertion order.
#[derive(Clone, Debug, Default)]
pub struct ParticleOrder {
    entries: Vec<(usize, usize)>,
}

impl ParticleOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, block: usize, slot: usize) {
        self.entries.push((block, slot));
    }

    /// `(block, slot)` handles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<const PS: usize> Container<PS> {
    /// Imports particles from a text stream, one `id x y` (stride 2) or
    /// `id x y r` (stride 3) record at a time, feeding each through
    /// [`Container::put`], and reconciles afterwards. A truncated final
    /// record or an unparsable token is an [`Error::Import`].
    pub fn import<R: BufRead>(&mut self, reader: R) -> Result<(), Error> {
        self.import_records(reader, |con, id, point| con.put(id, point))?;
        self.put_reconcile_overflow();
        Ok(())
    }

    /// Like [`Container::import`], also recording insertion order into
    /// the sink.
    pub fn import_with_order<R: BufRead>(
        &mut self,
        order: &mut ParticleOrder,
        reader: R,
    ) -> Result<(), Error> {
        self.import_records(reader, |con, id, point| con.put_with_order(order, id, point))
    }

    fn import_records<R: BufRead>(
        &mut self,
        reader: R,
        mut sink: impl FnMut(&mut Self, i32, [f64; PS]),
    ) -> Result<(), Error> {
        // records are whitespace-delimited and free to span lines
        let mut pending: Vec<String> = Vec::with_capacity(1 + PS);
        for line in reader.lines() {
            let line = line?;
            for token in line.split_whitespace() {
                pending.push(token.to_owned());
                if pending.len() == 1 + PS {
                    let id: i32 = pending[0]
                        .parse()
                        .map_err(|_| Error::Import(format!("invalid particle id {:?}", pending[0])))?;
                    let mut point = [0.0; PS];
                    for (value, token) in point.iter_mut().zip(&pending[1..]) {
                        *value = token
                            .parse()
                            .map_err(|_| Error::Import(format!("invalid coordinate {token:?}")))?;
                    }
                    sink(self, id, point);
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            return Err(Error::Import(format!(
                "truncated record: got {} of {} fields",
                pending.len(),
                1 + PS
            )));
        }
        Ok(())
    }

    /// Writes the per-block particle counts, one block per line in
    /// row-major order.
    pub fn region_count<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let (nx, ny) = self.grid().blocks();
        for (j, i) in iproduct!(0..ny, 0..nx) {
            let b = self.grid().block_index(i as i32, j as i32);
            writeln!(w, "Region ({i},{j}): {} particles", self.block_len(b))?;
        }
        Ok(())
    }

    /// Dumps particle IDs and positions, one particle per line.
    pub fn draw_particles<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for p in self.iter() {
            write!(w, "{}", p.id)?;
            for c in p.position {
                write!(w, " {c}")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Dumps particle positions in POV-Ray format. Point particles use
    /// the declared radius symbol `s`; radius-carrying particles use
    /// their own radius.
    pub fn draw_particles_pov<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for p in self.iter() {
            writeln!(w, "// id {}", p.id)?;
            if PS > 2 {
                writeln!(w, "sphere{{<{},{},0>,{}}}", p.x(), p.y(), p.radius())?;
            } else {
                writeln!(w, "sphere{{<{},{},0>,s}}", p.x(), p.y())?;
            }
        }
        Ok(())
    }

    /// Computes all Voronoi cells and writes their outlines in Gnuplot
    /// format.
    pub fn draw_cells_gnuplot<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for p in self.iter() {
            if let Some(cell) = self.compute_cell(p.block, p.slot) {
                cell.draw_gnuplot(p.x(), p.y(), w)?;
            }
        }
        Ok(())
    }

    /// Computes all Voronoi cells and writes them in POV-Ray format.
    pub fn draw_cells_pov<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for p in self.iter() {
            if let Some(cell) = self.compute_cell(p.block, p.slot) {
                writeln!(w, "// cell {}", p.id)?;
                cell.draw_pov(p.x(), p.y(), w)?;
            }
        }
        Ok(())
    }

    /// Writes the domain outline in Gnuplot format.
    pub fn draw_domain_gnuplot<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let [ax, bx, ay, by] = self.grid().bounds();
        writeln!(w, "{ax} {ay}\n{bx} {ay}\n{bx} {by}\n{ax} {by}\n{ax} {ay}")
    }

    /// Writes the domain outline in POV-Ray format, as four cylinders
    /// along the edges and spheres at the corners.
    pub fn draw_domain_pov<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let [ax, bx, ay, by] = self.grid().bounds();
        writeln!(w, "cylinder{{<{ax},{ay},0>,<{bx},{ay},0>,rr}}")?;
        writeln!(w, "cylinder{{<{ax},{by},0>,<{bx},{by},0>,rr}}")?;
        writeln!(w, "cylinder{{<{ax},{ay},0>,<{ax},{by},0>,rr}}")?;
        writeln!(w, "cylinder{{<{bx},{ay},0>,<{bx},{by},0>,rr}}")?;
        writeln!(w, "sphere{{<{ax},{ay},0>,rr}}\nsphere{{<{bx},{ay},0>,rr}}")?;
        writeln!(w, "sphere{{<{ax},{by},0>,rr}}\nsphere{{<{bx},{by},0>,rr}}")
    }

    /// Computes every cell and writes one line per particle following a
    /// custom format string. Directives: `%i` ID, `%x`/`%y` position,
    /// `%r` radius, `%a` cell area, `%w` vertex count, `%p` vertex
    /// list, `%%` a literal percent sign. Unknown directives pass
    /// through unchanged.
    pub fn print_custom<W: Write>(&self, format: &str, w: &mut W) -> io::Result<()> {
        for p in self.iter() {
            let Some(cell) = self.compute_cell(p.block, p.slot) else {
                continue;
            };
            let mut chars = format.chars();
            while let Some(c) = chars.next() {
                if c != '%' {
                    write!(w, "{c}")?;
                    continue;
                }
                match chars.next() {
                    Some('i') => write!(w, "{}", p.id)?,
                    Some('x') => write!(w, "{}", p.x())?,
                    Some('y') => write!(w, "{}", p.y())?,
                    Some('r') => {
                        let r = if PS > 2 { p.radius() } else { DEFAULT_RADIUS };
                        write!(w, "{r}")?;
                    }
                    Some('a') => write!(w, "{}", cell.area())?,
                    Some('w') => write!(w, "{}", cell.vertex_count())?,
                    Some('p') => cell.write_vertices(p.x(), p.y(), w)?,
                    Some('%') => write!(w, "%")?,
                    Some(other) => write!(w, "%{other}")?,
                    None => write!(w, "%")?,
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Computes every Voronoi cell and discards the results. Useful for
    /// timing the pure cell computation.
    pub fn compute_all_cells(&self) {
        for p in self.iter() {
            let _ = self.compute_cell(p.block, p.slot);
        }
    }

    /// Sums the areas of all Voronoi cells. Without walls this equals
    /// the domain area to numerical precision.
    pub fn sum_cell_areas(&self) -> f64 {
        self.iter()
            .filter_map(|p| self.compute_cell(p.block, p.slot))
            .map(|cell| cell.area())
            .sum()
    }
}

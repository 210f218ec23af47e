//! Convex Voronoi cell polygons.
//!
//! A [`VoronoiCell`] starts as the rectangle a generator could possibly
//! own and is whittled down by half-plane cuts, one per candidate
//! neighbor. Vertices are stored counterclockwise, relative to the
//! generator, so cells translate freely between periodic images.

use std::io::{self, Write};

use nalgebra::Vector2;

#[derive(Clone, Debug, Default)]
pub struct VoronoiCell {
    vertices: Vec<Vector2<f64>>,
}

impl VoronoiCell {
    /// An axis-aligned rectangle in generator-relative coordinates.
    pub(crate) fn rectangle(xlo: f64, xhi: f64, ylo: f64, yhi: f64) -> Self {
        Self {
            vertices: vec![
                Vector2::new(xlo, ylo),
                Vector2::new(xhi, ylo),
                Vector2::new(xhi, yhi),
                Vector2::new(xlo, yhi),
            ],
        }
    }

    /// Cut the cell by the half-plane `v · d <= c`, where `d` points from
    /// the generator toward the neighbor. Returns `false` once the cell
    /// has been cut away entirely.
    pub(crate) fn plane(&mut self, d: Vector2<f64>, c: f64) -> bool {
        if self.vertices.is_empty() {
            return false;
        }
        let side: Vec<f64> = self.vertices.iter().map(|v| v.dot(&d) - c).collect();
        if side.iter().all(|&s| s <= 0.0) {
            return true;
        }

        let n = self.vertices.len();
        let mut kept = Vec::with_capacity(n + 1);
        for i in 0..n {
            let j = (i + 1) % n;
            let (vi, vj) = (self.vertices[i], self.vertices[j]);
            let (si, sj) = (side[i], side[j]);
            if si <= 0.0 {
                kept.push(vi);
                if sj > 0.0 {
                    kept.push(vi + (vj - vi) * (si / (si - sj)));
                }
            } else if sj <= 0.0 {
                kept.push(vi + (vj - vi) * (si / (si - sj)));
            }
        }
        // A convex cut never leaves a degenerate sliver of fewer than
        // three vertices unless the cell is gone.
        if kept.len() < 3 {
            kept.clear();
        }
        self.vertices = kept;
        !self.vertices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Vertices in counterclockwise order, relative to the generator.
    pub fn vertices(&self) -> &[Vector2<f64>] {
        &self.vertices
    }

    /// Cell area by the shoelace formula.
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice = 0.0;
        for i in 0..n {
            let j = (i + 1) % n;
            twice += self.vertices[i].perp(&self.vertices[j]);
        }
        0.5 * twice
    }

    /// Cell centroid, relative to the generator. Zero for an empty cell.
    pub fn centroid(&self) -> Vector2<f64> {
        let n = self.vertices.len();
        if n < 3 {
            return Vector2::zeros();
        }
        let mut twice = 0.0;
        let mut acc = Vector2::zeros();
        for i in 0..n {
            let j = (i + 1) % n;
            let cross = self.vertices[i].perp(&self.vertices[j]);
            twice += cross;
            acc += (self.vertices[i] + self.vertices[j]) * cross;
        }
        acc / (3.0 * twice)
    }

    /// Squared distance from the generator to the farthest vertex. This
    /// bounds how far away a neighbor can sit and still cut the cell.
    pub(crate) fn max_radius_squared(&self) -> f64 {
        self.vertices
            .iter()
            .map(|v| v.norm_squared())
            .fold(0.0, f64::max)
    }

    /// Emit the cell outline in Gnuplot format: one vertex per line,
    /// closed by repeating the first vertex, terminated by a blank line.
    /// `(x, y)` is the generator's world position.
    pub fn draw_gnuplot<W: Write>(&self, x: f64, y: f64, w: &mut W) -> io::Result<()> {
        if self.vertices.is_empty() {
            return Ok(());
        }
        for v in self.vertices.iter().chain(self.vertices.first()) {
            writeln!(w, "{} {}", x + v.x, y + v.y)?;
        }
        writeln!(w)
    }

    /// Emit the cell outline in POV-Ray format as cylinders along the
    /// edges and spheres at the vertices.
    pub fn draw_pov<W: Write>(&self, x: f64, y: f64, w: &mut W) -> io::Result<()> {
        let n = self.vertices.len();
        for i in 0..n {
            let v = self.vertices[i];
            let u = self.vertices[(i + 1) % n];
            writeln!(w, "sphere{{<{},{},0>,r}}", x + v.x, y + v.y)?;
            writeln!(
                w,
                "cylinder{{<{},{},0>,<{},{},0>,r}}",
                x + v.x,
                y + v.y,
                x + u.x,
                y + u.y
            )?;
        }
        Ok(())
    }

    /// Emit vertices as bracketed pairs, `(x,y) (x,y) …`.
    pub(crate) fn write_vertices<W: Write>(&self, x: f64, y: f64, w: &mut W) -> io::Result<()> {
        for (i, v) in self.vertices.iter().enumerate() {
            if i > 0 {
                write!(w, " ")?;
            }
            write!(w, "({},{})", x + v.x, y + v.y)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_area() {
        let cell = VoronoiCell::rectangle(-0.5, 0.5, -0.25, 0.25);
        assert!((cell.area() - 0.5).abs() < 1e-14);
        assert_eq!(cell.vertex_count(), 4);
        assert!(cell.centroid().norm() < 1e-14);
    }

    #[test]
    fn test_halving_cut() {
        let mut cell = VoronoiCell::rectangle(0.0, 1.0, 0.0, 1.0);
        // neighbor one unit to the right: bisector at x = 0.5
        assert!(cell.plane(Vector2::new(1.0, 0.0), 0.5));
        assert!((cell.area() - 0.5).abs() < 1e-14);
        assert!(cell
            .vertices()
            .iter()
            .all(|v| v.x <= 0.5 + 1e-14));
    }

    #[test]
    fn test_cut_misses_cell() {
        let mut cell = VoronoiCell::rectangle(-0.5, 0.5, -0.5, 0.5);
        let before = cell.area();
        assert!(cell.plane(Vector2::new(1.0, 0.0), 10.0));
        assert!((cell.area() - before).abs() < 1e-14);
    }

    #[test]
    fn test_cell_cut_away() {
        let mut cell = VoronoiCell::rectangle(-0.5, 0.5, -0.5, 0.5);
        assert!(!cell.plane(Vector2::new(1.0, 0.0), -1.0));
        assert_eq!(cell.vertex_count(), 0);
        assert_eq!(cell.area(), 0.0);
    }

    #[test]
    fn test_diagonal_cut_area() {
        let mut cell = VoronoiCell::rectangle(0.0, 1.0, 0.0, 1.0);
        // bisector of a neighbor at (1, 1): the line x + y = 1
        assert!(cell.plane(Vector2::new(1.0, 1.0), 1.0));
        assert!((cell.area() - 0.5).abs() < 1e-14);
    }

    #[test]
    fn test_draw_gnuplot_format() {
        let cell = VoronoiCell::rectangle(-0.5, 0.5, -0.5, 0.5);
        let mut out = Vec::new();
        cell.draw_gnuplot(0.5, 0.5, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "0 0");
        assert_eq!(lines[4], "0 0");
        assert_eq!(lines[5], "");
    }
}

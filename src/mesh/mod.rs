//! Node lattice over a rectangular domain.
//!
//! The lattice is the storage layout for nodal fields and the geometric
//! reference for particle positions: it provides node coordinates at a
//! given polynomial degree, bilinear interpolation stencils, and the
//! boundary-correction callback that returns stray particles to the
//! domain.
//!
//! A lattice of `nx × ny` cells at degree `d` stores
//! `(nx·d + 1) × (ny·d + 1)` nodes, row-major from the lower-left
//! corner. Degree refinement subdivides each cell uniformly.

use crate::error::HistoryError;
use crate::types::{Bounds2D, NodeIndex};

/// Structured rectangular node lattice.
///
/// # Example
///
/// ```
/// use ddt_rs::mesh::NodeLattice;
/// use ddt_rs::types::Bounds2D;
///
/// let lattice = NodeLattice::new(Bounds2D::unit_square(), 4, 4).unwrap();
/// assert_eq!(lattice.node_count(1), 25);
/// assert_eq!(lattice.node_count(2), 81);
/// ```
#[derive(Clone, Debug)]
pub struct NodeLattice {
    bounds: Bounds2D,
    nx: usize,
    ny: usize,
}

impl NodeLattice {
    /// Create a lattice of `nx × ny` cells over `bounds`.
    pub fn new(bounds: Bounds2D, nx: usize, ny: usize) -> Result<Self, HistoryError> {
        if nx == 0 || ny == 0 {
            return Err(HistoryError::InvalidConfig(format!(
                "lattice must have at least one cell per side, got {}x{}",
                nx, ny
            )));
        }
        Ok(Self { bounds, nx, ny })
    }

    /// Domain bounds.
    #[inline]
    pub fn bounds(&self) -> Bounds2D {
        self.bounds
    }

    /// Cell counts `(nx, ny)`.
    #[inline]
    pub fn cells(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    /// Node counts per side `(nx·d + 1, ny·d + 1)` at degree `d`.
    #[inline]
    pub fn nodes_per_side(&self, degree: usize) -> (usize, usize) {
        debug_assert!(degree >= 1, "degree must be at least 1");
        (self.nx * degree + 1, self.ny * degree + 1)
    }

    /// Total node count at degree `d`.
    #[inline]
    pub fn node_count(&self, degree: usize) -> usize {
        let (sx, sy) = self.nodes_per_side(degree);
        sx * sy
    }

    /// Node spacing `(hx, hy)` at degree `d`.
    #[inline]
    pub fn spacing(&self, degree: usize) -> (f64, f64) {
        let (sx, sy) = self.nodes_per_side(degree);
        (
            self.bounds.width() / (sx - 1) as f64,
            self.bounds.height() / (sy - 1) as f64,
        )
    }

    /// Position of a node, row-major from the lower-left corner.
    pub fn node_position(&self, degree: usize, node: NodeIndex) -> [f64; 2] {
        let (sx, _) = self.nodes_per_side(degree);
        let (hx, hy) = self.spacing(degree);
        let i = node.get() % sx;
        let j = node.get() / sx;
        [
            self.bounds.x_min + i as f64 * hx,
            self.bounds.y_min + j as f64 * hy,
        ]
    }

    /// All node positions at degree `d`, row-major.
    pub fn node_positions(&self, degree: usize) -> Vec<[f64; 2]> {
        let n = self.node_count(degree);
        NodeIndex::iter(n)
            .map(|idx| self.node_position(degree, idx))
            .collect()
    }

    /// Whether a node lies on the domain boundary.
    pub fn is_boundary_node(&self, degree: usize, node: NodeIndex) -> bool {
        let (sx, sy) = self.nodes_per_side(degree);
        let i = node.get() % sx;
        let j = node.get() / sx;
        i == 0 || j == 0 || i == sx - 1 || j == sy - 1
    }

    /// Clamp a point onto the domain.
    ///
    /// This is the boundary-correction callback handed to particle
    /// advection: positions integrated past the domain edge are moved
    /// to the nearest boundary point.
    #[inline]
    pub fn clamp_to_bounds(&self, p: &mut [f64; 2]) {
        self.bounds.clamp_point(p);
    }

    /// Bilinear interpolation stencil for a point.
    ///
    /// Returns the four surrounding node indices (row-major raw
    /// indices) and their weights. Points outside the domain use the
    /// nearest cell; weights at a node position are exactly
    /// `[1, 0, 0, 0]` up to floating-point rounding.
    pub fn interp_stencil(&self, degree: usize, p: [f64; 2]) -> ([usize; 4], [f64; 4]) {
        let (sx, sy) = self.nodes_per_side(degree);
        let (hx, hy) = self.spacing(degree);

        let fx = (p[0] - self.bounds.x_min) / hx;
        let fy = (p[1] - self.bounds.y_min) / hy;

        let ix = (fx.floor() as isize).clamp(0, sx as isize - 2) as usize;
        let iy = (fy.floor() as isize).clamp(0, sy as isize - 2) as usize;

        let tx = (fx - ix as f64).clamp(0.0, 1.0);
        let ty = (fy - iy as f64).clamp(0.0, 1.0);

        let i00 = iy * sx + ix;
        let i10 = i00 + 1;
        let i01 = i00 + sx;
        let i11 = i01 + 1;

        (
            [i00, i10, i01, i11],
            [
                (1.0 - tx) * (1.0 - ty),
                tx * (1.0 - ty),
                (1.0 - tx) * ty,
                tx * ty,
            ],
        )
    }

    /// Lattice neighbors of a node (4-connectivity).
    ///
    /// Returns the neighbor raw indices and how many are valid. Used to
    /// assemble the graph Laplacian for projection smoothing.
    pub fn node_neighbors(&self, degree: usize, node: usize) -> ([usize; 4], usize) {
        let (sx, sy) = self.nodes_per_side(degree);
        let i = node % sx;
        let j = node / sx;

        let mut out = [0usize; 4];
        let mut count = 0;
        if i > 0 {
            out[count] = node - 1;
            count += 1;
        }
        if i + 1 < sx {
            out[count] = node + 1;
            count += 1;
        }
        if j > 0 {
            out[count] = node - sx;
            count += 1;
        }
        if j + 1 < sy {
            out[count] = node + sx;
            count += 1;
        }
        (out, count)
    }
}

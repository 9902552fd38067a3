//! Field storage.
//!
//! Fields are named, shaped quantities stored either at lattice nodes
//! ([`NodalField`]) or on a particle population ([`ParticleField`]).
//! Both hand out their symbolic identity as a [`FieldExpr`] handle
//! (`sym()`), and both funnel every mutation through a scoped write
//! guard whose drop performs the commit: a revision bump for nodal
//! storage, a nodal-proxy rebuild for particle storage. No mutable view
//! of field data exists outside a guard's lifetime.
//!
//! [`FieldExpr`]: crate::expr::FieldExpr

mod nodal;
mod particle;

pub use nodal::{NodalField, NodalWriteGuard};
pub use particle::{ParticleField, ParticleWriteGuard};

use std::rc::Rc;

use crate::error::HistoryError;
use crate::mesh::NodeLattice;
use crate::types::FieldShape;

/// Shared field metadata.
#[derive(Clone, Debug)]
pub struct FieldMeta {
    name: Rc<str>,
    shape: FieldShape,
    degree: usize,
    continuous: bool,
}

impl FieldMeta {
    /// Validate and build field metadata.
    pub fn new(
        name: &str,
        shape: FieldShape,
        degree: usize,
        continuous: bool,
    ) -> Result<Self, HistoryError> {
        if name.is_empty() {
            return Err(HistoryError::InvalidConfig(
                "field name must not be empty".to_string(),
            ));
        }
        if degree == 0 {
            return Err(HistoryError::InvalidConfig(format!(
                "field '{}' needs polynomial degree >= 1",
                name
            )));
        }
        Ok(Self {
            name: Rc::from(name),
            shape,
            degree,
            continuous,
        })
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field shape.
    pub fn shape(&self) -> FieldShape {
        self.shape
    }

    /// Storage polynomial degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Whether the representation is continuous across cells.
    pub fn continuous(&self) -> bool {
        self.continuous
    }

    /// Components per storage point.
    pub fn n_components(&self) -> usize {
        self.shape.n_components()
    }
}

/// Scatter particle-held values onto lattice nodes.
///
/// Each particle distributes its value over the four surrounding nodes
/// with bilinear weights; nodes then normalize by accumulated weight.
/// Nodes no particle reaches keep their previous values.
pub(crate) fn scatter_to_nodes(
    lattice: &NodeLattice,
    degree: usize,
    positions: &[[f64; 2]],
    values: &[f64],
    n_comp: usize,
    node_data: &mut [f64],
) {
    let n_nodes = lattice.node_count(degree);
    debug_assert_eq!(values.len(), positions.len() * n_comp);
    debug_assert_eq!(node_data.len(), n_nodes * n_comp);

    let mut acc = vec![0.0; n_nodes * n_comp];
    let mut weight_sum = vec![0.0; n_nodes];

    for (p, value) in positions.iter().zip(values.chunks_exact(n_comp)) {
        let (nodes, weights) = lattice.interp_stencil(degree, *p);
        for (&node, &w) in nodes.iter().zip(weights.iter()) {
            weight_sum[node] += w;
            for c in 0..n_comp {
                acc[node * n_comp + c] += w * value[c];
            }
        }
    }

    for node in 0..n_nodes {
        if weight_sum[node] > f64::EPSILON {
            for c in 0..n_comp {
                node_data[node * n_comp + c] = acc[node * n_comp + c] / weight_sum[node];
            }
        }
    }
}

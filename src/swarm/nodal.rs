//! Node-anchored auxiliary particle set.

use std::cell::RefCell;

use crate::error::HistoryError;
use crate::evaluate::{EvalMode, Evaluator};
use crate::expr::FieldExpr;
use crate::field::{NodalField, ParticleField};

use super::{Swarm, TraceScheme};

/// Disposable particle set pinned one-to-one to the nodes of a nodal
/// field.
///
/// Used purely as a scratch device for backward characteristic tracing:
/// save the node positions as origin, advect backward, sample the
/// upstream values into the working channel, restore the origin (which
/// commits through the swarm's migration hook), then hand the working
/// channel to a projection solve.
pub struct NodalSwarm {
    swarm: Swarm,
    origin: RefCell<Vec<[f64; 2]>>,
    working: ParticleField,
}

impl NodalSwarm {
    /// Build an auxiliary swarm anchored at `anchor`'s node layout,
    /// with a working channel matching the anchor's shape.
    pub fn anchored_to(anchor: &NodalField, label: &str) -> Result<Self, HistoryError> {
        let positions = anchor.lattice().node_positions(anchor.degree());
        let swarm = Swarm::from_positions(anchor.lattice().clone(), label, positions);
        let working = swarm.add_field(
            &format!("{}.sample", label),
            anchor.shape(),
            anchor.degree(),
            anchor.continuous(),
        )?;
        Ok(Self {
            swarm,
            origin: RefCell::new(Vec::new()),
            working,
        })
    }

    /// The underlying swarm.
    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// The working sample channel.
    pub fn working(&self) -> &ParticleField {
        &self.working
    }

    /// Particle count (equals the anchor's node count).
    pub fn len(&self) -> usize {
        self.swarm.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.swarm.is_empty()
    }

    /// Copy of the current particle positions.
    pub fn positions_snapshot(&self) -> Vec<[f64; 2]> {
        self.swarm.positions_snapshot()
    }

    /// Record the current positions as the trace origin.
    pub fn save_origin(&self) {
        *self.origin.borrow_mut() = self.swarm.positions_snapshot();
    }

    /// Move every particle back to its saved origin.
    ///
    /// The restore goes through the position write guard, so the commit
    /// re-synchronizes the working channel's proxy, the same hook a
    /// domain migration would use.
    pub fn restore_origin(&self) {
        let saved = self.origin.borrow();
        let mut guard = self.swarm.write_positions();
        guard.copy_from_slice(&saved);
    }

    /// Displace the set along a velocity field (negative `dt` traces
    /// backward).
    pub fn advect(
        &self,
        velocity: &FieldExpr,
        dt: f64,
        scheme: TraceScheme,
        evaluator: &Evaluator,
        mode: EvalMode,
        correct: impl Fn(&mut [f64; 2]),
    ) -> Result<(), HistoryError> {
        self.swarm
            .advect(velocity, dt, scheme, evaluator, mode, correct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::NodeLattice;
    use crate::types::{Bounds2D, FieldShape};
    use std::rc::Rc;

    fn anchor() -> NodalField {
        let lattice = Rc::new(NodeLattice::new(Bounds2D::unit_square(), 2, 2).unwrap());
        NodalField::new("psi", FieldShape::Scalar, 1, true, lattice).unwrap()
    }

    #[test]
    fn test_anchored_at_nodes() {
        let field = anchor();
        let nswarm = NodalSwarm::anchored_to(&field, "aux").unwrap();
        assert_eq!(nswarm.len(), field.n_nodes());

        let positions = nswarm.positions_snapshot();
        let expected = field.lattice().node_positions(field.degree());
        assert_eq!(positions, expected);
    }

    #[test]
    fn test_save_and_restore_origin() {
        let field = anchor();
        let nswarm = NodalSwarm::anchored_to(&field, "aux").unwrap();
        let lattice = field.lattice().clone();
        let ev = Evaluator::new(lattice.clone(), 1).unwrap();
        let v = FieldExpr::constant(&[1.0, 0.0]);

        nswarm.save_origin();
        nswarm
            .advect(&v, -0.1, TraceScheme::Midpoint, &ev, EvalMode::General, |p| {
                lattice.clamp_to_bounds(p)
            })
            .unwrap();

        // Interior particles moved upstream.
        let moved = nswarm.positions_snapshot();
        let origin = field.lattice().node_positions(1);
        assert!((moved[4][0] - (origin[4][0] - 0.1)).abs() < 1e-12);

        nswarm.restore_origin();
        assert_eq!(nswarm.positions_snapshot(), origin);
    }
}

//! Tracer particle populations.
//!
//! A [`Swarm`] is a particle population bound to a lattice: positions,
//! plus any number of [`ParticleField`]s registered on it. Positions
//! move only inside a scoped write (or through [`Swarm::advect`]);
//! committing a position write re-synchronizes the nodal proxies of
//! every registered field, the single-process analogue of particle
//! migration after a move.
//!
//! [`NodalSwarm`] is the disposable auxiliary population used for
//! backward characteristic tracing: particles pinned one-to-one to the
//! nodes of a nodal field, with a saved-origin buffer to undo the
//! trace displacement.

mod nodal;

pub use nodal::NodalSwarm;

use std::cell::{Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use tracing::trace;

use crate::error::HistoryError;
use crate::evaluate::{EvalMode, Evaluator};
use crate::expr::FieldExpr;
use crate::field::ParticleField;
use crate::mesh::NodeLattice;
use crate::types::FieldShape;

/// Characteristic integration scheme for particle advection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceScheme {
    /// Single forward-Euler stage.
    Euler,
    /// Second-order midpoint rule, predictor stage only (no corrector).
    #[default]
    Midpoint,
}

/// Tracer particle population.
///
/// Handles are cheap to clone; clones share positions and field
/// registry.
#[derive(Clone)]
pub struct Swarm {
    label: Rc<str>,
    lattice: Rc<NodeLattice>,
    positions: Rc<RefCell<Vec<[f64; 2]>>>,
    fields: Rc<RefCell<Vec<ParticleField>>>,
}

impl Swarm {
    /// Create an empty swarm on a lattice.
    pub fn new(lattice: Rc<NodeLattice>, label: &str) -> Self {
        Self::from_positions(lattice, label, Vec::new())
    }

    /// Create a swarm with explicit initial particle positions.
    pub fn from_positions(
        lattice: Rc<NodeLattice>,
        label: &str,
        positions: Vec<[f64; 2]>,
    ) -> Self {
        Self {
            label: Rc::from(label),
            lattice,
            positions: Rc::new(RefCell::new(positions)),
            fields: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Swarm label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The lattice this swarm lives on.
    pub fn lattice(&self) -> &Rc<NodeLattice> {
        &self.lattice
    }

    /// Particle count.
    pub fn len(&self) -> usize {
        self.positions.borrow().len()
    }

    /// Whether the population is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed `fill × fill` uniformly spaced particles into every lattice
    /// cell, replacing any existing population. Registered fields are
    /// resized (zero-filled) to the new population.
    pub fn populate(&self, fill: usize) -> Result<(), HistoryError> {
        if fill == 0 {
            return Err(HistoryError::InvalidConfig(
                "population fill must be at least 1 per cell side".to_string(),
            ));
        }

        let (nx, ny) = self.lattice.cells();
        let bounds = self.lattice.bounds();
        let cell_w = bounds.width() / nx as f64;
        let cell_h = bounds.height() / ny as f64;

        let mut positions = Vec::with_capacity(nx * ny * fill * fill);
        for j in 0..ny {
            for i in 0..nx {
                let x0 = bounds.x_min + i as f64 * cell_w;
                let y0 = bounds.y_min + j as f64 * cell_h;
                for pj in 0..fill {
                    for pi in 0..fill {
                        positions.push([
                            x0 + (pi as f64 + 0.5) / fill as f64 * cell_w,
                            y0 + (pj as f64 + 0.5) / fill as f64 * cell_h,
                        ]);
                    }
                }
            }
        }

        let n = positions.len();
        *self.positions.borrow_mut() = positions;
        for field in self.fields.borrow().iter() {
            field.resize(n);
        }
        trace!(swarm = %self.label, particles = n, "populated swarm");
        Ok(())
    }

    /// Register a new particle field on this swarm, zero-initialized
    /// over the current population.
    pub fn add_field(
        &self,
        name: &str,
        shape: FieldShape,
        proxy_degree: usize,
        continuous: bool,
    ) -> Result<ParticleField, HistoryError> {
        let field = ParticleField::new(
            name,
            shape,
            proxy_degree,
            continuous,
            self.lattice.clone(),
            self.positions.clone(),
        )?;
        self.fields.borrow_mut().push(field.clone());
        Ok(field)
    }

    /// Shared read access to particle positions.
    pub fn positions(&self) -> Ref<'_, Vec<[f64; 2]>> {
        self.positions.borrow()
    }

    /// Copy of the particle positions.
    pub fn positions_snapshot(&self) -> Vec<[f64; 2]> {
        self.positions.borrow().clone()
    }

    /// Open a scoped write over particle positions.
    ///
    /// Dropping the guard commits the move: the nodal proxies of every
    /// registered field are re-synchronized to the new positions.
    pub fn write_positions(&self) -> SwarmPositionsGuard<'_> {
        SwarmPositionsGuard {
            data: self.positions.borrow_mut(),
            swarm: self,
        }
    }

    /// Displace every particle along a velocity field by `dt`
    /// (negative `dt` traces backward along characteristics).
    ///
    /// `correct` is the boundary-correction callback, applied after
    /// every integration stage so that intermediate and final positions
    /// stay on the domain.
    pub fn advect(
        &self,
        velocity: &FieldExpr,
        dt: f64,
        scheme: TraceScheme,
        evaluator: &Evaluator,
        mode: EvalMode,
        correct: impl Fn(&mut [f64; 2]),
    ) -> Result<(), HistoryError> {
        if velocity.n_components() != 2 {
            return Err(HistoryError::ComponentMismatch {
                expected: 2,
                got: velocity.n_components(),
            });
        }
        if self.is_empty() {
            return Ok(());
        }

        let start = self.positions_snapshot();
        trace!(
            swarm = %self.label,
            particles = start.len(),
            dt,
            scheme = ?scheme,
            "advecting swarm"
        );

        let v1 = evaluator.evaluate(velocity, &start, mode)?;
        let moved: Vec<[f64; 2]> = match scheme {
            TraceScheme::Euler => start
                .iter()
                .zip(v1.chunks_exact(2))
                .map(|(p, v)| {
                    let mut q = [p[0] + dt * v[0], p[1] + dt * v[1]];
                    correct(&mut q);
                    q
                })
                .collect(),
            TraceScheme::Midpoint => {
                let midpoints: Vec<[f64; 2]> = start
                    .iter()
                    .zip(v1.chunks_exact(2))
                    .map(|(p, v)| {
                        let mut q = [p[0] + 0.5 * dt * v[0], p[1] + 0.5 * dt * v[1]];
                        correct(&mut q);
                        q
                    })
                    .collect();
                let v2 = evaluator.evaluate(velocity, &midpoints, mode)?;
                start
                    .iter()
                    .zip(v2.chunks_exact(2))
                    .map(|(p, v)| {
                        let mut q = [p[0] + dt * v[0], p[1] + dt * v[1]];
                        correct(&mut q);
                        q
                    })
                    .collect()
            }
        };

        let mut guard = self.write_positions();
        guard.copy_from_slice(&moved);
        Ok(())
    }
}

/// Scoped write access to a swarm's particle positions.
///
/// Dropping the guard commits the move and re-synchronizes every
/// registered field's nodal proxy.
pub struct SwarmPositionsGuard<'a> {
    data: RefMut<'a, Vec<[f64; 2]>>,
    swarm: &'a Swarm,
}

impl Deref for SwarmPositionsGuard<'_> {
    type Target = [[f64; 2]];

    fn deref(&self) -> &[[f64; 2]] {
        &self.data
    }
}

impl DerefMut for SwarmPositionsGuard<'_> {
    fn deref_mut(&mut self) -> &mut [[f64; 2]] {
        &mut self.data
    }
}

impl Drop for SwarmPositionsGuard<'_> {
    fn drop(&mut self) {
        for field in self.swarm.fields.borrow().iter() {
            field.rebuild_proxy_at(&self.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bounds2D;

    fn lattice(nx: usize) -> Rc<NodeLattice> {
        Rc::new(NodeLattice::new(Bounds2D::unit_square(), nx, nx).unwrap())
    }

    fn evaluator(l: &Rc<NodeLattice>) -> Evaluator {
        Evaluator::new(l.clone(), 1).unwrap()
    }

    #[test]
    fn test_populate_counts() {
        let l = lattice(3);
        let swarm = Swarm::new(l, "tracers");
        swarm.populate(2).unwrap();
        assert_eq!(swarm.len(), 3 * 3 * 4);

        for p in swarm.positions().iter() {
            assert!(swarm.lattice().bounds().contains(p[0], p[1]));
        }
    }

    #[test]
    fn test_populate_resizes_fields() {
        let l = lattice(2);
        let swarm = Swarm::new(l, "tracers");
        let field = swarm
            .add_field("psi", FieldShape::Scalar, 1, true)
            .unwrap();
        assert_eq!(field.len(), 0);

        swarm.populate(3).unwrap();
        assert_eq!(field.len(), 36);
        assert_eq!(field.read().len(), 36);
    }

    #[test]
    fn test_populate_zero_fill_rejected() {
        let swarm = Swarm::new(lattice(2), "tracers");
        assert!(matches!(
            swarm.populate(0),
            Err(HistoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_advect_uniform_velocity() {
        let l = lattice(4);
        let swarm = Swarm::from_positions(l.clone(), "tracers", vec![[0.25, 0.25]]);
        let v = FieldExpr::constant(&[1.0, 0.5]);
        let ev = evaluator(&l);
        let bounds = l.bounds();

        swarm
            .advect(&v, 0.1, TraceScheme::Midpoint, &ev, EvalMode::General, |p| {
                bounds.clamp_point(p)
            })
            .unwrap();

        let p = swarm.positions()[0];
        assert!((p[0] - 0.35).abs() < 1e-12);
        assert!((p[1] - 0.30).abs() < 1e-12);
    }

    #[test]
    fn test_advect_backward_undoes_forward_for_uniform_flow() {
        let l = lattice(4);
        let swarm = Swarm::from_positions(l.clone(), "tracers", vec![[0.5, 0.5]]);
        let v = FieldExpr::constant(&[0.3, -0.2]);
        let ev = evaluator(&l);
        let bounds = l.bounds();
        let clamp = |p: &mut [f64; 2]| bounds.clamp_point(p);

        swarm
            .advect(&v, 0.25, TraceScheme::Midpoint, &ev, EvalMode::General, clamp)
            .unwrap();
        swarm
            .advect(&v, -0.25, TraceScheme::Midpoint, &ev, EvalMode::General, clamp)
            .unwrap();

        let p = swarm.positions()[0];
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert!((p[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_advect_clamps_to_boundary() {
        let l = lattice(2);
        let swarm = Swarm::from_positions(l.clone(), "tracers", vec![[0.9, 0.5]]);
        let v = FieldExpr::constant(&[10.0, 0.0]);
        let ev = evaluator(&l);
        let bounds = l.bounds();

        swarm
            .advect(&v, 1.0, TraceScheme::Euler, &ev, EvalMode::General, |p| {
                bounds.clamp_point(p)
            })
            .unwrap();

        let p = swarm.positions()[0];
        assert!((p[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_advect_rejects_non_vector_velocity() {
        let l = lattice(2);
        let swarm = Swarm::from_positions(l.clone(), "tracers", vec![[0.5, 0.5]]);
        let ev = evaluator(&l);
        let scalar_v = FieldExpr::scalar(1.0);

        let result = swarm.advect(
            &scalar_v,
            0.1,
            TraceScheme::Euler,
            &ev,
            EvalMode::General,
            |_| {},
        );
        assert!(matches!(
            result,
            Err(HistoryError::ComponentMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_position_commit_resyncs_proxies() {
        let l = lattice(2);
        // One particle per node carrying its node's value.
        let swarm = Swarm::from_positions(l.clone(), "tracers", l.node_positions(1));
        let field = swarm
            .add_field("psi", FieldShape::Scalar, 1, true)
            .unwrap();
        {
            let mut guard = field.write();
            for (i, v) in guard.iter_mut().enumerate() {
                *v = i as f64;
            }
        }

        // Collapse all particles onto one node: the proxy around that
        // node must change on commit.
        {
            let mut guard = swarm.write_positions();
            for p in guard.iter_mut() {
                *p = [0.0, 0.0];
            }
        }
        let proxy = field.proxy().read();
        let mean = (0..9).sum::<usize>() as f64 / 9.0;
        assert!((proxy[0] - mean).abs() < 1e-12);
    }
}

//! Particle-owned Lagrangian history manager.

use std::rc::Rc;

use tracing::debug;

use crate::error::HistoryError;
use crate::evaluate::{EvalMode, Evaluator};
use crate::expr::FieldExpr;
use crate::field::ParticleField;
use crate::mesh::NodeLattice;
use crate::swarm::{Swarm, TraceScheme};
use crate::types::{FieldShape, HistoryLevel};

use super::{clamp_order, coefficients, HistoryOps, MAX_ORDER};

/// Construction options for [`LagrangianHistory`].
#[derive(Clone, Debug)]
pub struct LagrangianConfig {
    /// History depth (0..=3; 0 keeps no history).
    pub order: usize,
    /// Polynomial degree of the nodal proxies.
    pub proxy_degree: usize,
    /// Whether the proxy representation is continuous across cells.
    pub continuous: bool,
    /// Particles seeded per cell side at construction.
    pub fill: usize,
}

impl Default for LagrangianConfig {
    fn default() -> Self {
        Self {
            order: 1,
            proxy_degree: 1,
            continuous: true,
            fill: 3,
        }
    }
}

/// History manager whose chain is carried by an owned tracer swarm.
///
/// The swarm is created and populated at construction and advected
/// forward after every solve; particles move with the flow and carry
/// the history with them, so no characteristic tracing or projection
/// is needed. The chain shift is a plain copy (no sub-cycling).
pub struct LagrangianHistory {
    label: String,
    psi_fn: FieldExpr,
    v_fn: FieldExpr,
    order: usize,
    swarm: Swarm,
    psi_star: Vec<ParticleField>,
    evaluator: Evaluator,
}

impl LagrangianHistory {
    /// Build a manager with its own tracer population.
    pub fn new(
        lattice: Rc<NodeLattice>,
        label: &str,
        psi_fn: FieldExpr,
        v_fn: FieldExpr,
        shape: FieldShape,
        config: LagrangianConfig,
    ) -> Result<Self, HistoryError> {
        if label.is_empty() {
            return Err(HistoryError::InvalidConfig(
                "manager label must not be empty".to_string(),
            ));
        }
        if config.order > MAX_ORDER {
            return Err(HistoryError::InvalidConfig(format!(
                "history order must be in 0..={}, got {}",
                MAX_ORDER, config.order
            )));
        }
        if psi_fn.n_components() != shape.n_components() {
            return Err(HistoryError::ComponentMismatch {
                expected: shape.n_components(),
                got: psi_fn.n_components(),
            });
        }
        if v_fn.n_components() != 2 {
            return Err(HistoryError::ComponentMismatch {
                expected: 2,
                got: v_fn.n_components(),
            });
        }

        let swarm = Swarm::new(lattice.clone(), &format!("{}.tracers", label));
        let mut psi_star = Vec::with_capacity(config.order);
        for i in 0..config.order {
            psi_star.push(swarm.add_field(
                &format!("{}.psi_star[{}]", label, i),
                shape,
                config.proxy_degree,
                config.continuous,
            )?);
        }
        swarm.populate(config.fill)?;

        let evaluator = Evaluator::new(lattice, config.proxy_degree)?;

        Ok(Self {
            label: label.to_string(),
            psi_fn,
            v_fn,
            order: config.order,
            swarm,
            psi_star,
            evaluator,
        })
    }

    /// Manager label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The owned tracer population.
    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// A stored history level (level k = value from k+1 steps back).
    pub fn psi_star(&self, level: HistoryLevel) -> Option<&ParticleField> {
        self.psi_star.get(level.get())
    }

    /// The velocity expression the population is advected along.
    pub fn v_fn(&self) -> &FieldExpr {
        &self.v_fn
    }
}

impl HistoryOps for LagrangianHistory {
    fn order(&self) -> usize {
        self.order
    }

    fn history_expr(&self, level: HistoryLevel) -> Option<FieldExpr> {
        self.psi_star.get(level.get()).map(ParticleField::sym)
    }

    fn psi_fn(&self) -> FieldExpr {
        self.psi_fn.clone()
    }

    fn set_psi_fn(&mut self, psi_fn: FieldExpr) -> Result<(), HistoryError> {
        if psi_fn.n_components() != self.psi_fn.n_components() {
            return Err(HistoryError::ComponentMismatch {
                expected: self.psi_fn.n_components(),
                got: psi_fn.n_components(),
            });
        }
        self.psi_fn = psi_fn;
        Ok(())
    }

    fn update(
        &mut self,
        dt: f64,
        mode: EvalMode,
        _dt_physical: Option<f64>,
    ) -> Result<(), HistoryError> {
        self.update_post_solve(dt, mode)
    }

    fn update_pre_solve(
        &mut self,
        _dt: f64,
        _mode: EvalMode,
        _dt_physical: Option<f64>,
    ) -> Result<(), HistoryError> {
        // All work happens after the solve for this variant.
        Ok(())
    }

    fn update_post_solve(&mut self, dt: f64, mode: EvalMode) -> Result<(), HistoryError> {
        debug!(
            manager = %self.label,
            order = self.order,
            particles = self.swarm.len(),
            dt,
            "Lagrangian history update"
        );

        // 1. Copy the chain down from the oldest level.
        for i in (1..self.order).rev() {
            let newer = self.psi_star[i - 1].snapshot();
            let mut guard = self.psi_star[i].write();
            guard.copy_from_slice(&newer);
        }

        // 2. Refresh the newest level from ψ at the current particle
        //    positions, before the particles move.
        if self.order > 0 {
            let positions = self.swarm.positions_snapshot();
            let sampled = self.evaluator.evaluate(&self.psi_fn, &positions, mode)?;
            let mut guard = self.psi_star[0].write();
            guard.copy_from_slice(&sampled);
        }

        // 3. Carry the population forward with the flow.
        let lattice = self.swarm.lattice().clone();
        self.swarm.advect(
            &self.v_fn,
            dt,
            TraceScheme::Midpoint,
            &self.evaluator,
            mode,
            |p| lattice.clamp_to_bounds(p),
        )?;
        Ok(())
    }

    fn bdf(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError> {
        let k = clamp_order(self.order, order);
        if k == 0 {
            // No stored history: a backward difference is undefined.
            return Err(HistoryError::NoHistory);
        }
        let history: Vec<FieldExpr> =
            self.psi_star[..k].iter().map(ParticleField::sym).collect();
        coefficients::bdf_expr(&self.psi_fn, &history, k)
    }

    fn adams_moulton_flux(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError> {
        let k = clamp_order(self.order, order);
        if k == 0 {
            // Degenerate no-history case: the flux reduces to ψ itself.
            return Ok(self.psi_fn.clone());
        }
        let history: Vec<FieldExpr> =
            self.psi_star[..k].iter().map(ParticleField::sym).collect();
        coefficients::adams_moulton_expr(&self.psi_fn, &history, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bounds2D;

    fn lattice(nx: usize) -> Rc<NodeLattice> {
        Rc::new(NodeLattice::new(Bounds2D::unit_square(), nx, nx).unwrap())
    }

    fn manager(order: usize) -> LagrangianHistory {
        LagrangianHistory::new(
            lattice(3),
            "hist",
            FieldExpr::scalar(5.0),
            FieldExpr::constant(&[0.0, 0.0]),
            FieldShape::Scalar,
            LagrangianConfig {
                order,
                fill: 2,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_construction_populates_swarm() {
        let m = manager(2);
        assert_eq!(m.swarm().len(), 3 * 3 * 4);
        assert_eq!(m.psi_star(HistoryLevel::ZERO).unwrap().len(), m.swarm().len());
    }

    #[test]
    fn test_order_above_max_rejected() {
        let result = LagrangianHistory::new(
            lattice(2),
            "hist",
            FieldExpr::scalar(1.0),
            FieldExpr::constant(&[0.0, 0.0]),
            FieldShape::Scalar,
            LagrangianConfig {
                order: 4,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(HistoryError::InvalidConfig(_))));
    }

    #[test]
    fn test_update_samples_before_advection() {
        // ψ depends on position; particles in a uniform flow must carry
        // the value sampled at their pre-advection position.
        let l = lattice(4);
        let mut m = LagrangianHistory::new(
            l,
            "hist",
            FieldExpr::analytic("psi", 1, |p, out| {
                out[0] = p[0];
            }),
            FieldExpr::constant(&[0.25, 0.0]),
            FieldShape::Scalar,
            LagrangianConfig {
                order: 1,
                fill: 2,
                ..Default::default()
            },
        )
        .unwrap();

        let before = m.swarm().positions_snapshot();
        m.update(0.1, EvalMode::General, None).unwrap();

        let values = m.psi_star(HistoryLevel::ZERO).unwrap().snapshot();
        let after = m.swarm().positions_snapshot();
        for ((v, b), a) in values.iter().zip(before.iter()).zip(after.iter()) {
            assert!((v - b[0]).abs() < 1e-12, "value {} from position {:?}", v, b);
            // Interior particles actually moved.
            if b[0] + 0.025 <= 1.0 {
                assert!((a[0] - (b[0] + 0.025)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_order_zero_degenerate_forms() {
        let m = manager(0);
        assert!(matches!(m.bdf(None), Err(HistoryError::NoHistory)));
        assert!(matches!(m.bdf(Some(2)), Err(HistoryError::NoHistory)));

        // The flux reduces to ψ itself, unchanged.
        let flux = m.adams_moulton_flux(None).unwrap();
        assert_eq!(format!("{:?}", flux), format!("{:?}", m.psi_fn()));
    }

    #[test]
    fn test_pre_solve_phase_is_noop() {
        let mut m = manager(1);
        let before = m.psi_star(HistoryLevel::ZERO).unwrap().snapshot();
        m.update_pre_solve(0.1, EvalMode::General, None).unwrap();
        let after = m.psi_star(HistoryLevel::ZERO).unwrap().snapshot();
        assert_eq!(before, after);
    }
}

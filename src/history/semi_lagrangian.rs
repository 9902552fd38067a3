//! Node-anchored semi-Lagrangian history manager.

use std::rc::Rc;

use tracing::debug;

use crate::error::HistoryError;
use crate::evaluate::{EvalMode, Evaluator};
use crate::expr::FieldExpr;
use crate::field::NodalField;
use crate::mesh::NodeLattice;
use crate::projection::{DirichletBc, Projection, ProjectionConfig};
use crate::swarm::{NodalSwarm, TraceScheme};
use crate::types::{FieldShape, HistoryLevel};

use super::{clamp_order, coefficients, HistoryOps, MAX_ORDER};

/// Construction options for [`SemiLagrangianHistory`].
#[derive(Clone, Debug)]
pub struct SemiLagrangianConfig {
    /// History depth (1..=3).
    pub order: usize,
    /// Polynomial degree of the history storage.
    pub degree: usize,
    /// Whether the storage is continuous across cells.
    pub continuous: bool,
    /// Projection smoothing coefficient.
    pub smoothing: f64,
    /// Blend factor pulling a freshly projected newest level back
    /// toward its previous contents (0 = hard overwrite).
    pub under_relaxation: f64,
    /// Dirichlet conditions forwarded to the projection.
    pub bcs: Vec<DirichletBc>,
    /// Optional scalar mask forwarded to the projection.
    pub bc_mask: Option<FieldExpr>,
}

impl Default for SemiLagrangianConfig {
    fn default() -> Self {
        Self {
            order: 1,
            degree: 1,
            continuous: true,
            smoothing: 0.0,
            under_relaxation: 0.0,
            bcs: Vec::new(),
            bc_mask: None,
        }
    }
}

/// History manager with nodal storage and backward characteristic
/// tracing.
///
/// The history chain lives in lattice-nodal fields. Each step, before
/// the external solve, the chain is shifted (blended when sub-cycling)
/// and the newest level is recomputed: an auxiliary particle set pinned
/// to the nodes is traced backward along the velocity field, the traced
/// positions sample the level being rebuilt, the particles return to
/// their origin, and a projection solve scatters the samples back onto
/// the nodes. Each history level re-traces from the node positions,
/// innermost level first, so that consecutive levels see independently
/// traced characteristics.
pub struct SemiLagrangianHistory {
    label: String,
    lattice: Rc<NodeLattice>,
    psi_fn: FieldExpr,
    v_fn: FieldExpr,
    order: usize,
    under_relaxation: f64,
    psi_star: Vec<NodalField>,
    nswarm: NodalSwarm,
    projection: Projection,
    evaluator: Evaluator,
}

impl SemiLagrangianHistory {
    /// Build a manager for a field of the given shape.
    ///
    /// `label` must be unique among managers sharing a context; it
    /// prefixes the names of the allocated history fields.
    pub fn new(
        lattice: Rc<NodeLattice>,
        label: &str,
        psi_fn: FieldExpr,
        v_fn: FieldExpr,
        shape: FieldShape,
        config: SemiLagrangianConfig,
    ) -> Result<Self, HistoryError> {
        if label.is_empty() {
            return Err(HistoryError::InvalidConfig(
                "manager label must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_ORDER).contains(&config.order) {
            return Err(HistoryError::InvalidConfig(format!(
                "history order must be in 1..={}, got {}",
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

        let mut psi_star = Vec::with_capacity(config.order);
        for i in 0..config.order {
            psi_star.push(NodalField::new(
                &format!("{}.psi_star[{}]", label, i),
                shape,
                config.degree,
                config.continuous,
                lattice.clone(),
            )?);
        }

        // One auxiliary set serves the whole chain: levels are traced
        // sequentially, each from the same node anchoring.
        let nswarm = NodalSwarm::anchored_to(&psi_star[0], &format!("{}.trace", label))?;

        let projection = Projection::for_field(
            &psi_star[0],
            ProjectionConfig {
                smoothing: config.smoothing,
                bcs: config.bcs,
                bc_mask: config.bc_mask,
            },
            label,
        )?;
        let evaluator = Evaluator::new(lattice.clone(), config.degree)?;

        Ok(Self {
            label: label.to_string(),
            lattice,
            psi_fn,
            v_fn,
            order: config.order,
            under_relaxation: config.under_relaxation,
            psi_star,
            nswarm,
            projection,
            evaluator,
        })
    }

    /// Manager label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// A stored history level (level k = value from k+1 steps back).
    pub fn psi_star(&self, level: HistoryLevel) -> Option<&NodalField> {
        self.psi_star.get(level.get())
    }

    /// The velocity expression characteristics are traced along.
    pub fn v_fn(&self) -> &FieldExpr {
        &self.v_fn
    }
}

impl HistoryOps for SemiLagrangianHistory {
    fn order(&self) -> usize {
        self.order
    }

    fn history_expr(&self, level: HistoryLevel) -> Option<FieldExpr> {
        self.psi_star.get(level.get()).map(NodalField::sym)
    }

    fn psi_fn(&self) -> FieldExpr {
        self.psi_fn.clone()
    }

    fn set_psi_fn(&mut self, psi_fn: FieldExpr) -> Result<(), HistoryError> {
        if psi_fn.n_components() != self.psi_star[0].n_components() {
            return Err(HistoryError::ComponentMismatch {
                expected: self.psi_star[0].n_components(),
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
        dt_physical: Option<f64>,
    ) -> Result<(), HistoryError> {
        self.update_pre_solve(dt, mode, dt_physical)
    }

    fn update_pre_solve(
        &mut self,
        dt: f64,
        mode: EvalMode,
        dt_physical: Option<f64>,
    ) -> Result<(), HistoryError> {
        let phi = match dt_physical {
            Some(dtp) if dtp > 0.0 => (dt / dtp).min(1.0),
            Some(dtp) => {
                return Err(HistoryError::InvalidConfig(format!(
                    "dt_physical must be positive, got {}",
                    dtp
                )))
            }
            None => 1.0,
        };
        debug!(
            manager = %self.label,
            order = self.order,
            dt,
            phi,
            "semi-Lagrangian history update"
        );

        // 1. Blend the chain down from the oldest level. With phi = 1
        //    this is a pure shift; sub-cycled steps fold only a phi
        //    fraction of the newer level into the older one.
        for i in (1..self.order).rev() {
            let newer = self.psi_star[i - 1].snapshot();
            let mut guard = self.psi_star[i].write();
            for (value, &incoming) in guard.iter_mut().zip(newer.iter()) {
                *value = phi * incoming + (1.0 - phi) * *value;
            }
        }

        // 2. Rebuild the newest level by backward tracing, one pass per
        //    history level, innermost (deepest) first. Every pass
        //    re-traces from the node anchoring; level i's upstream
        //    point is i+1 steps back, and composing traces would
        //    compound interpolation error.
        let lattice = self.lattice.clone();
        let clamp = |p: &mut [f64; 2]| lattice.clamp_to_bounds(p);

        for i in (0..self.order).rev() {
            self.nswarm.save_origin();
            self.nswarm.advect(
                &self.v_fn,
                -dt,
                TraceScheme::Midpoint,
                &self.evaluator,
                mode,
                &clamp,
            )?;

            if i == 0 {
                // Seed the innermost pass from the live field, not the
                // stored history.
                self.projection.solve(&self.psi_fn, mode)?;
            }

            // Sample the level being rebuilt at the upstream points.
            let upstream = self.nswarm.positions_snapshot();
            let sampled = self
                .evaluator
                .evaluate(&self.psi_star[i].sym(), &upstream, mode)?;
            {
                let mut guard = self.nswarm.working().write();
                guard.copy_from_slice(&sampled);
            }

            // Undo the trace displacement; the commit runs the
            // migration hook.
            self.nswarm.restore_origin();

            let previous = if i == 0 && self.under_relaxation > 0.0 {
                Some(self.psi_star[0].snapshot())
            } else {
                None
            };

            self.projection
                .solve(&self.nswarm.working().sym(), mode)?;

            if let Some(previous) = previous {
                let alpha = self.under_relaxation;
                let mut guard = self.psi_star[0].write();
                for (value, &old) in guard.iter_mut().zip(previous.iter()) {
                    *value = (1.0 - alpha) * *value + alpha * old;
                }
            }

            // Inner passes feed their result straight into their slot;
            // the projection always writes level 0.
            if i != 0 {
                let newest = self.psi_star[0].snapshot();
                let mut guard = self.psi_star[i].write();
                guard.copy_from_slice(&newest);
            }
        }

        Ok(())
    }

    fn update_post_solve(&mut self, _dt: f64, _mode: EvalMode) -> Result<(), HistoryError> {
        // All work happens before the solve for this variant.
        Ok(())
    }

    fn bdf(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError> {
        let k = clamp_order(self.order, order);
        let history: Vec<FieldExpr> = self.psi_star[..k].iter().map(NodalField::sym).collect();
        coefficients::bdf_expr(&self.psi_fn, &history, k)
    }

    fn adams_moulton_flux(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError> {
        let k = clamp_order(self.order, order);
        let history: Vec<FieldExpr> = self.psi_star[..k].iter().map(NodalField::sym).collect();
        coefficients::adams_moulton_expr(&self.psi_fn, &history, k)
    }
}

//! Relaxed history manager over an externally owned swarm.

use tracing::debug;

use crate::error::HistoryError;
use crate::evaluate::{EvalMode, Evaluator};
use crate::expr::FieldExpr;
use crate::field::ParticleField;
use crate::swarm::Swarm;
use crate::types::{FieldShape, HistoryLevel};

use super::{clamp_order, coefficients, HistoryOps, MAX_ORDER};

/// Construction options for [`SwarmHistory`].
#[derive(Clone, Debug)]
pub struct SwarmHistoryConfig {
    /// History depth (1..=3).
    pub order: usize,
    /// Polynomial degree of the nodal proxies.
    pub proxy_degree: usize,
    /// Whether the proxy representation is continuous across cells.
    pub continuous: bool,
    /// Sub-step count for the exponential moving average (>= 1).
    pub step_averaging: usize,
}

impl Default for SwarmHistoryConfig {
    fn default() -> Self {
        Self {
            order: 1,
            proxy_degree: 1,
            continuous: true,
            step_averaging: 2,
        }
    }
}

/// History manager bound to a shared tracer population.
///
/// Unlike [`LagrangianHistory`](super::LagrangianHistory), this variant
/// does not own particle lifecycle: it registers its history fields on
/// an existing swarm and never advects it (moving the population is
/// the owner's responsibility). Newest-level refreshes blend with the
/// previous value, `phi·sampled + (1−phi)·previous` with
/// `phi = 1/step_averaging`, accumulating each sample over
/// `step_averaging` sub-steps; [`HistoryOps::bdf`] divides its result
/// by the same factor to keep the derivative consistent with the
/// fractional accumulation.
pub struct SwarmHistory {
    label: String,
    psi_fn: FieldExpr,
    order: usize,
    step_averaging: usize,
    swarm: Swarm,
    psi_star: Vec<ParticleField>,
    evaluator: Evaluator,
}

impl SwarmHistory {
    /// Bind a manager to an existing swarm.
    pub fn new(
        swarm: &Swarm,
        label: &str,
        psi_fn: FieldExpr,
        shape: FieldShape,
        config: SwarmHistoryConfig,
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
        if config.step_averaging == 0 {
            return Err(HistoryError::InvalidConfig(
                "step_averaging must be at least 1".to_string(),
            ));
        }
        if psi_fn.n_components() != shape.n_components() {
            return Err(HistoryError::ComponentMismatch {
                expected: shape.n_components(),
                got: psi_fn.n_components(),
            });
        }

        let mut psi_star = Vec::with_capacity(config.order);
        for i in 0..config.order {
            psi_star.push(swarm.add_field(
                &format!("{}.psi_star[{}]", label, i),
                shape,
                config.proxy_degree,
                config.continuous,
            )?);
        }

        let evaluator = Evaluator::new(swarm.lattice().clone(), config.proxy_degree)?;

        Ok(Self {
            label: label.to_string(),
            psi_fn,
            order: config.order,
            step_averaging: config.step_averaging,
            swarm: swarm.clone(),
            psi_star,
            evaluator,
        })
    }

    /// Manager label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Sub-step count of the moving average.
    pub fn step_averaging(&self) -> usize {
        self.step_averaging
    }

    /// The shared swarm the history fields live on.
    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// A stored history level (level k = value from k+1 steps back).
    pub fn psi_star(&self, level: HistoryLevel) -> Option<&ParticleField> {
        self.psi_star.get(level.get())
    }
}

impl HistoryOps for SwarmHistory {
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
        Ok(())
    }

    fn update_post_solve(&mut self, dt: f64, mode: EvalMode) -> Result<(), HistoryError> {
        debug!(
            manager = %self.label,
            order = self.order,
            step_averaging = self.step_averaging,
            dt,
            "relaxed swarm history update"
        );

        // 1. Copy the chain down from the oldest level.
        for i in (1..self.order).rev() {
            let newer = self.psi_star[i - 1].snapshot();
            let mut guard = self.psi_star[i].write();
            guard.copy_from_slice(&newer);
        }

        // 2. Fold the current sample into the newest level as a moving
        //    average. No advection here: the swarm's owner moves it.
        let phi = 1.0 / self.step_averaging as f64;
        let positions = self.swarm.positions_snapshot();
        let sampled = self.evaluator.evaluate(&self.psi_fn, &positions, mode)?;
        let mut guard = self.psi_star[0].write();
        for (value, &s) in guard.iter_mut().zip(sampled.iter()) {
            *value = phi * s + (1.0 - phi) * *value;
        }
        Ok(())
    }

    fn bdf(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError> {
        let k = clamp_order(self.order, order);
        let history: Vec<FieldExpr> =
            self.psi_star[..k].iter().map(ParticleField::sym).collect();
        let form = coefficients::bdf_expr(&self.psi_fn, &history, k)?;
        // The difference accumulates over step_averaging sub-steps, so
        // the form needs the matching rescale.
        Ok(form.scaled(1.0 / self.step_averaging as f64))
    }

    fn adams_moulton_flux(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError> {
        let k = clamp_order(self.order, order);
        let history: Vec<FieldExpr> =
            self.psi_star[..k].iter().map(ParticleField::sym).collect();
        coefficients::adams_moulton_expr(&self.psi_fn, &history, k)
    }
}

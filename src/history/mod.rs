//! Lagrangian history managers.
//!
//! A history manager maintains a bounded chain of past values of an
//! advected field ψ, `psi_star[0..order-1]`, where level k holds the
//! value from k+1 steps back, and exposes the chain as closed-form
//! backward-difference and flux expressions for an external solver.
//!
//! Three interchangeable variants share the update protocol:
//!
//! - [`SemiLagrangianHistory`]: history at fixed lattice nodes,
//!   refreshed before each solve by backward characteristic tracing
//!   and a particle-to-mesh projection.
//! - [`LagrangianHistory`]: history carried by an owned tracer swarm
//!   that is advected forward after each solve.
//! - [`SwarmHistory`]: binds to an externally owned swarm, blends new
//!   samples as an exponential moving average over `step_averaging`
//!   sub-steps, and leaves advection to the swarm's owner.
//!
//! The caller contract is exactly one `update` per timestep: the chain
//! shift always runs before the newest level is refreshed, and calling
//! `update` twice double-shifts the history.

mod coefficients;
mod lagrangian;
mod semi_lagrangian;
mod swarm_lagrangian;

pub use coefficients::{
    adams_moulton_expr, adams_moulton_weights, bdf_expr, bdf_weights, MAX_ORDER,
};
pub use lagrangian::{LagrangianConfig, LagrangianHistory};
pub use semi_lagrangian::{SemiLagrangianConfig, SemiLagrangianHistory};
pub use swarm_lagrangian::{SwarmHistory, SwarmHistoryConfig};

use crate::error::HistoryError;
use crate::evaluate::EvalMode;
use crate::expr::FieldExpr;
use crate::types::HistoryLevel;

/// Common surface of the three history-manager variants.
///
/// `update` dispatches to the variant's active phase; the inactive
/// phase is a no-op, so a solver loop may call both phases
/// unconditionally around its solve.
pub trait HistoryOps {
    /// Configured history depth.
    fn order(&self) -> usize;

    /// Symbolic identity of a stored history level, for diagnostics.
    fn history_expr(&self, level: HistoryLevel) -> Option<FieldExpr>;

    /// The current defining expression of ψ.
    fn psi_fn(&self) -> FieldExpr;

    /// Swap the defining expression of ψ.
    fn set_psi_fn(&mut self, psi_fn: FieldExpr) -> Result<(), HistoryError>;

    /// Advance the history by one step.
    fn update(
        &mut self,
        dt: f64,
        mode: EvalMode,
        dt_physical: Option<f64>,
    ) -> Result<(), HistoryError>;

    /// Pre-solve phase of the update.
    fn update_pre_solve(
        &mut self,
        dt: f64,
        mode: EvalMode,
        dt_physical: Option<f64>,
    ) -> Result<(), HistoryError>;

    /// Post-solve phase of the update.
    fn update_post_solve(&mut self, dt: f64, mode: EvalMode) -> Result<(), HistoryError>;

    /// Backward-difference form at the given order (clamped to the
    /// configured order; `None` uses the configured order).
    fn bdf(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError>;

    /// Adams-Moulton flux form at the given order (clamped like
    /// [`HistoryOps::bdf`]).
    fn adams_moulton_flux(&self, order: Option<usize>) -> Result<FieldExpr, HistoryError>;
}

/// Clamp a requested blending order into `[1, configured]`.
///
/// A configured order of zero (degenerate no-history manager) is
/// sticky: every request resolves to zero.
pub(crate) fn clamp_order(configured: usize, requested: Option<usize>) -> usize {
    if configured == 0 {
        return 0;
    }
    match requested {
        None => configured,
        Some(r) => r.min(configured).max(1),
    }
}

//! # ddt-rs
//!
//! Lagrangian and semi-Lagrangian history tracking for advected fields.
//!
//! Given a field ψ advected by a velocity field V, this crate maintains
//! a bounded-depth chain of past ψ values (at fixed lattice nodes or on
//! freely moving tracer particles) and exposes the chain as closed-form
//! backward-difference and Adams-Moulton flux expressions for an
//! external solver. Building blocks:
//!
//! - Field expressions and evaluation (fast lattice path / general path)
//! - Nodal and particle field storage with scoped, committing writes
//! - Tracer swarms and backward characteristic tracing
//! - Particle-to-mesh projection (scalar / vector / tensor variants)
//! - BDF and Adams-Moulton stencils for orders 1–3
//! - Three interchangeable history managers behind one trait
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use ddt_rs::{
//!     EvalMode, FieldExpr, FieldShape, HistoryOps, NodeLattice,
//!     SemiLagrangianConfig, SemiLagrangianHistory,
//! };
//! use ddt_rs::types::Bounds2D;
//!
//! let lattice = Rc::new(NodeLattice::new(Bounds2D::unit_square(), 4, 4).unwrap());
//! let psi = FieldExpr::analytic("psi", 1, |p, out| out[0] = p[0] * p[1]);
//! let v = FieldExpr::constant(&[0.1, 0.0]);
//!
//! let mut history = SemiLagrangianHistory::new(
//!     lattice,
//!     "example",
//!     psi,
//!     v,
//!     FieldShape::Scalar,
//!     SemiLagrangianConfig::default(),
//! )
//! .unwrap();
//!
//! history.update(0.05, EvalMode::General, None).unwrap();
//! let dudt_form = history.bdf(None).unwrap();   // divide by dt for ∂ψ/∂t
//! let flux_form = history.adams_moulton_flux(None).unwrap();
//! # let _ = (dudt_form, flux_form);
//! ```

pub mod error;
pub mod evaluate;
pub mod expr;
pub mod field;
pub mod history;
pub mod mesh;
pub mod projection;
pub mod swarm;
pub mod types;

// Re-export main types for convenience
pub use error::HistoryError;
pub use evaluate::{EvalMode, Evaluator};
pub use expr::{AnalyticFn, FieldExpr};
pub use field::{NodalField, ParticleField};
pub use history::{
    adams_moulton_expr, adams_moulton_weights, bdf_expr, bdf_weights, HistoryOps,
    LagrangianConfig, LagrangianHistory, SemiLagrangianConfig, SemiLagrangianHistory,
    SwarmHistory, SwarmHistoryConfig, MAX_ORDER,
};
pub use mesh::NodeLattice;
pub use projection::{BoundaryRegion, DirichletBc, Projection, ProjectionConfig};
pub use swarm::{NodalSwarm, Swarm, TraceScheme};
pub use types::{Bounds2D, FieldShape, HistoryLevel, NodeIndex, ParticleIndex};

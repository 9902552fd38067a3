//! Field expressions.
//!
//! A [`FieldExpr`] is the symbolic identity of a field quantity: an
//! opaque, cheaply clonable handle that can be sampled at arbitrary
//! points by the evaluator, handed to the projection solve as a source,
//! or combined into the closed-form blends produced by the
//! backward-difference and flux stencils.
//!
//! Expressions referencing stored fields ([`FieldExpr::Nodal`],
//! [`FieldExpr::Particle`]) are live: they observe every committed write
//! to the underlying storage, so a blend built once can be re-evaluated
//! each timestep without rebuilding.

use std::fmt;
use std::rc::Rc;

use crate::error::HistoryError;
use crate::field::{NodalField, ParticleField};

/// Pointwise analytic function: position in, components out.
///
/// The output slice length equals the expression's component count.
pub type AnalyticFn = dyn Fn([f64; 2], &mut [f64]);

/// Symbolic identity of a field quantity.
#[derive(Clone)]
pub enum FieldExpr {
    /// Uniform value, one entry per component.
    Constant(Rc<[f64]>),
    /// Analytic closure of position.
    Analytic {
        /// Human-readable tag for diagnostics.
        name: Rc<str>,
        /// Components produced per point.
        n_components: usize,
        /// The closure itself.
        f: Rc<AnalyticFn>,
    },
    /// Live reference to a mesh-nodal field.
    Nodal(NodalField),
    /// Live reference to a particle-held field (sampled through its
    /// nodal proxy away from the particles).
    Particle(ParticleField),
    /// Weighted linear combination; weights apply per component.
    LinComb(Rc<[(f64, FieldExpr)]>),
}

impl FieldExpr {
    /// Uniform scalar expression.
    pub fn scalar(value: f64) -> Self {
        FieldExpr::Constant(Rc::from([value].as_slice()))
    }

    /// Uniform expression with the given component values.
    pub fn constant(values: &[f64]) -> Self {
        FieldExpr::Constant(Rc::from(values))
    }

    /// Zero expression with `n` components.
    pub fn zeros(n: usize) -> Self {
        FieldExpr::Constant(Rc::from(vec![0.0; n].as_slice()))
    }

    /// Analytic expression from a closure of position.
    pub fn analytic(
        name: &str,
        n_components: usize,
        f: impl Fn([f64; 2], &mut [f64]) + 'static,
    ) -> Self {
        FieldExpr::Analytic {
            name: Rc::from(name),
            n_components,
            f: Rc::new(f),
        }
    }

    /// Weighted linear combination of expressions.
    ///
    /// All terms must agree on component count.
    pub fn lin_comb(terms: Vec<(f64, FieldExpr)>) -> Result<Self, HistoryError> {
        let mut iter = terms.iter();
        let first = match iter.next() {
            Some((_, expr)) => expr.n_components(),
            None => return Ok(FieldExpr::zeros(1)),
        };
        for (_, expr) in iter {
            if expr.n_components() != first {
                return Err(HistoryError::ComponentMismatch {
                    expected: first,
                    got: expr.n_components(),
                });
            }
        }
        Ok(FieldExpr::LinComb(Rc::from(terms)))
    }

    /// This expression scaled by a constant.
    pub fn scaled(&self, c: f64) -> Self {
        FieldExpr::LinComb(Rc::from([(c, self.clone())].as_slice()))
    }

    /// Components produced per point.
    pub fn n_components(&self) -> usize {
        match self {
            FieldExpr::Constant(values) => values.len(),
            FieldExpr::Analytic { n_components, .. } => *n_components,
            FieldExpr::Nodal(field) => field.n_components(),
            FieldExpr::Particle(field) => field.n_components(),
            FieldExpr::LinComb(terms) => {
                terms.first().map_or(1, |(_, expr)| expr.n_components())
            }
        }
    }
}

impl fmt::Debug for FieldExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldExpr::Constant(values) => write!(f, "Constant({:?})", values),
            FieldExpr::Analytic { name, n_components, .. } => {
                write!(f, "Analytic({}, n={})", name, n_components)
            }
            FieldExpr::Nodal(field) => write!(f, "Nodal({})", field.name()),
            FieldExpr::Particle(field) => write!(f, "Particle({})", field.name()),
            FieldExpr::LinComb(terms) => {
                write!(f, "LinComb[")?;
                for (i, (w, expr)) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{} * {:?}", w, expr)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_components() {
        assert_eq!(FieldExpr::scalar(2.0).n_components(), 1);
        assert_eq!(FieldExpr::constant(&[1.0, 2.0]).n_components(), 2);
        assert_eq!(FieldExpr::zeros(4).n_components(), 4);
    }

    #[test]
    fn test_analytic_components() {
        let v = FieldExpr::analytic("rotation", 2, |p, out| {
            out[0] = -p[1];
            out[1] = p[0];
        });
        assert_eq!(v.n_components(), 2);
    }

    #[test]
    fn test_lin_comb_rejects_mismatch() {
        let a = FieldExpr::scalar(1.0);
        let b = FieldExpr::constant(&[1.0, 2.0]);
        let result = FieldExpr::lin_comb(vec![(1.0, a), (2.0, b)]);
        assert!(matches!(
            result,
            Err(HistoryError::ComponentMismatch { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_scaled_wraps() {
        let expr = FieldExpr::scalar(3.0).scaled(0.5);
        assert_eq!(expr.n_components(), 1);
        match expr {
            FieldExpr::LinComb(terms) => {
                assert_eq!(terms.len(), 1);
                assert!((terms[0].0 - 0.5).abs() < 1e-14);
            }
            other => panic!("expected LinComb, got {:?}", other),
        }
    }
}

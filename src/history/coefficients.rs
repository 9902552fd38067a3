//! Backward-differentiation and Adams-Moulton stencils.
//!
//! Weight tables for orders 1–3 and the expression builders that
//! combine the current value with stored history levels. Callers divide
//! the backward-difference form by the step size to obtain a time
//! derivative; the flux form is already a time-averaged blend.
//!
//! Order k stencils (ψ = current, ψ*ᵢ = value i+1 steps back):
//!
//! ```text
//! bdf(1) = ψ − ψ*₀                         am(1) = (ψ + ψ*₀) / 2
//! bdf(2) = 3/2·ψ − 2·ψ*₀ + 1/2·ψ*₁         am(2) = (5ψ + 8ψ*₀ − ψ*₁) / 12
//! bdf(3) = 11/6·ψ − 3·ψ*₀ + 3/2·ψ*₁ − 1/3·ψ*₂
//!                                          am(3) = (9ψ + 19ψ*₀ − 5ψ*₁ + ψ*₂) / 24
//! ```

use crate::error::HistoryError;
use crate::expr::FieldExpr;

/// Largest order with a defined stencil.
pub const MAX_ORDER: usize = 3;

const BDF1_HISTORY: &[f64] = &[-1.0];
const BDF2_HISTORY: &[f64] = &[-2.0, 0.5];
const BDF3_HISTORY: &[f64] = &[-3.0, 1.5, -1.0 / 3.0];

const AM1_HISTORY: &[f64] = &[1.0 / 2.0];
const AM2_HISTORY: &[f64] = &[8.0 / 12.0, -1.0 / 12.0];
const AM3_HISTORY: &[f64] = &[19.0 / 24.0, -5.0 / 24.0, 1.0 / 24.0];

/// Backward-differentiation weights: `(current, history[..order])`.
pub fn bdf_weights(order: usize) -> Result<(f64, &'static [f64]), HistoryError> {
    match order {
        1 => Ok((1.0, BDF1_HISTORY)),
        2 => Ok((3.0 / 2.0, BDF2_HISTORY)),
        3 => Ok((11.0 / 6.0, BDF3_HISTORY)),
        _ => Err(HistoryError::OrderOutOfRange {
            requested: order,
            max: MAX_ORDER,
        }),
    }
}

/// Adams-Moulton flux weights: `(current, history[..order])`.
pub fn adams_moulton_weights(order: usize) -> Result<(f64, &'static [f64]), HistoryError> {
    match order {
        1 => Ok((1.0 / 2.0, AM1_HISTORY)),
        2 => Ok((5.0 / 12.0, AM2_HISTORY)),
        3 => Ok((9.0 / 24.0, AM3_HISTORY)),
        _ => Err(HistoryError::OrderOutOfRange {
            requested: order,
            max: MAX_ORDER,
        }),
    }
}

/// Backward-difference expression over the current value and `order`
/// history levels.
pub fn bdf_expr(
    psi_now: &FieldExpr,
    history: &[FieldExpr],
    order: usize,
) -> Result<FieldExpr, HistoryError> {
    let (w_now, w_history) = bdf_weights(order)?;
    combine(psi_now, history, w_now, w_history)
}

/// Adams-Moulton flux expression over the current value and `order`
/// history levels.
pub fn adams_moulton_expr(
    psi_now: &FieldExpr,
    history: &[FieldExpr],
    order: usize,
) -> Result<FieldExpr, HistoryError> {
    let (w_now, w_history) = adams_moulton_weights(order)?;
    combine(psi_now, history, w_now, w_history)
}

fn combine(
    psi_now: &FieldExpr,
    history: &[FieldExpr],
    w_now: f64,
    w_history: &[f64],
) -> Result<FieldExpr, HistoryError> {
    // An order-k stencil needs k stored levels; a shallower buffer is
    // an under-populated history, not an unsupported order.
    if history.len() < w_history.len() {
        return Err(HistoryError::NoHistory);
    }
    let mut terms = Vec::with_capacity(1 + w_history.len());
    terms.push((w_now, psi_now.clone()));
    for (&w, level) in w_history.iter().zip(history) {
        terms.push((w, level.clone()));
    }
    FieldExpr::lin_comb(terms)
}

//! Crate-wide error taxonomy.
//!
//! Failures are reported synchronously at the call that triggered them.
//! A failed `update` may leave a history buffer partially shifted; the
//! manager instance must be treated as unusable after such a failure.

use thiserror::Error;

/// Error type for history management operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Invalid configuration detected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A blending order outside the supported stencil range was requested.
    #[error("order {requested} outside supported range 1..={max}")]
    OrderOutOfRange {
        /// The order that was asked for.
        requested: usize,
        /// Largest order with a defined stencil.
        max: usize,
    },

    /// A form was requested that needs more stored history than is
    /// available (an order-0 manager, or an under-populated buffer).
    #[error("no stored history for the requested form")]
    NoHistory,

    /// An expression's component count does not match its consumer.
    #[error("component mismatch: expected {expected}, got {got}")]
    ComponentMismatch {
        /// Components the consumer requires.
        expected: usize,
        /// Components the expression provides.
        got: usize,
    },

    /// The particle-to-mesh projection solve failed.
    #[error("projection solve failed: {0}")]
    Projection(String),

    /// Expression evaluation at sample points failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Particle advection along the velocity field failed.
    #[error("advection failed: {0}")]
    Advection(String),
}

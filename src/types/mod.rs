//! Strongly-typed domain types for safer APIs.
//!
//! This module provides newtypes and structured types to make APIs
//! self-documenting and prevent parameter mix-ups.
//!
//! - **Newtypes prevent mix-ups**: a `ParticleIndex` cannot be passed
//!   where a `NodeIndex` is expected
//! - **Closed tag sets**: [`FieldShape`] enumerates every storable field
//!   shape, so shape dispatch is exhaustive at compile time
//! - **Zero-cost**: all index newtypes are `#[repr(transparent)]`

mod bounds;
mod indices;
mod shape;

pub use bounds::Bounds2D;
pub use indices::{HistoryLevel, NodeIndex, ParticleIndex};
pub use shape::FieldShape;

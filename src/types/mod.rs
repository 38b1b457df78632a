//! Core types for type-safe vector spaces, transformations and observation kinds

pub mod kind;
pub mod spaces;
pub mod transforms;

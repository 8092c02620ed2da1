//! Service discovery (naming) API models

pub mod model;

pub use model::*;

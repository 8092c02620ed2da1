//! Remote protocol: payload envelope, base models and the transport boundary.

pub mod model;
pub mod transport;

pub use model::*;
pub use transport::*;

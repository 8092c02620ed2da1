//! Batata SDK API - protocol models and transport boundary
//!
//! This crate provides:
//! - Common protocol constants
//! - The payload envelope and request/response traits
//! - Config and naming request/response models
//! - The `Transport` / `Connection` traits implemented by wire layers

#[macro_use]
mod macros;

pub mod config;
pub mod model;
pub mod naming;
pub mod remote;

pub use model::*;

//! Shared types and workflow rules for the PESCO dispatch core
//!
//! This crate holds the domain models and every rule that decides how orders,
//! lines, shipment units and the stock ledger move. It performs no I/O; the
//! backend loads and persists the data these functions reason about.

pub mod error;
pub mod intake;
pub mod models;
pub mod types;
pub mod validation;
pub mod workflow;

pub use error::*;
pub use intake::*;
pub use models::*;
pub use types::*;
pub use validation::*;
pub use workflow::*;

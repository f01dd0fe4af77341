//! HTTP handlers for the dispatch API

pub mod catalogs;
pub mod health;
pub mod intake;
pub mod lines;
pub mod orders;
pub mod stock;
pub mod units;

pub use health::health_check;

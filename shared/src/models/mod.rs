//! Domain models for the PESCO dispatch core

mod actor;
mod catalog;
mod line_item;
mod order;
mod reservation;
mod shipment;
mod stock;

pub use actor::*;
pub use catalog::*;
pub use line_item::*;
pub use order::*;
pub use reservation::*;
pub use shipment::*;
pub use stock::*;

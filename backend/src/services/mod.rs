//! Services of the dispatch core
//!
//! Each service owns the I/O for one component and delegates every decision
//! to the rules in `shared::workflow`.

pub mod catalog;
pub mod order;
pub mod reservation;
pub mod shipment;
pub mod stock_ledger;

pub use catalog::{CatalogCache, CatalogService};
pub use order::OrderService;
pub use reservation::ReservationService;
pub use shipment::ShipmentService;
pub use stock_ledger::StockLedgerService;

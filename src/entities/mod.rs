//! Record-store entities queried by the reporting engine.

pub mod product;
pub mod sales_transaction;

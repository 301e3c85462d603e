//! StateSet Sales Reports
//!
//! Turns raw sales transactions into windowed summaries, per-product breakdowns and
//! CSV exports, retrying transient record-store faults with bounded backoff.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod reports;
pub mod retry;

use std::sync::Arc;

pub use errors::{FaultClass, ReportError, StoreFault};
pub use reports::{
    to_text, EntityBreakdown, ReportKind, ReportWindow, SalesReport, SalesReportService,
    SalesSummary, SeaOrmLedger,
};
pub use retry::{RetryPolicy, RetryingExecutor};

/// Report service backed by a sea-orm pool.
pub type PooledReportService = SalesReportService<db::PooledSource, SeaOrmLedger>;

/// Wires a pooled report service with the given retry policy.
pub fn pooled_report_service(pool: db::DbPool, policy: RetryPolicy) -> PooledReportService {
    let executor = RetryingExecutor::new(Arc::new(db::PooledSource::new(pool)), policy);
    SalesReportService::new(executor, Arc::new(SeaOrmLedger))
}

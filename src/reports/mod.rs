//! Sales reporting: window resolution, aggregation and export.

pub mod aggregator;
pub mod export;
pub mod ledger;
pub mod window;

pub use aggregator::SalesReportService;
pub use export::to_text;
pub use ledger::{BreakdownRow, SalesLedger, SeaOrmLedger, SummaryRow};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Granularity of a report window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportKind {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReportKind::Daily => "Daily",
            ReportKind::Weekly => "Weekly",
            ReportKind::Monthly => "Monthly",
            ReportKind::Custom => "Custom",
        };
        f.write_str(label)
    }
}

/// Inclusive date range a report aggregates over. Always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    start: NaiveDate,
    end: NaiveDate,
    kind: ReportKind,
}

impl ReportWindow {
    /// Callers outside this module go through the resolver in [`window`].
    pub(crate) fn new_unchecked(start: NaiveDate, end: NaiveDate, kind: ReportKind) -> Self {
        debug_assert!(start <= end);
        Self { start, end, kind }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Kind chosen by the resolver entry point that built this window.
    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// Label of a report over this window.
    ///
    /// A custom range covering a single day is reported as `Daily`; every other window
    /// keeps the kind it was resolved with.
    pub fn label(&self) -> ReportKind {
        match self.kind {
            ReportKind::Custom if self.start == self.end => ReportKind::Daily,
            kind => kind,
        }
    }

    /// Number of calendar days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// First instant inside the window: midnight of `start`.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// First instant after the window: midnight of the day following `end`.
    pub fn ends_before(&self) -> NaiveDateTime {
        self.end
            .succ_opt()
            .map(|next| next.and_time(NaiveTime::MIN))
            .unwrap_or(NaiveDateTime::MAX)
    }
}

/// Window totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub total_transaction_count: u64,
    pub total_units: u64,
    pub total_revenue: Decimal,
}

/// One entity's contribution to a window. Only entities with units sold appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityBreakdown {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub units_sold: u64,
    pub revenue: Decimal,
    /// Share of the window's revenue, 0..=100 with 2 decimal places
    pub percentage_of_total: Decimal,
}

/// Aggregated report for one window; built once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesReport {
    /// Effective report type, see [`ReportWindow::label`]
    pub kind: ReportKind,
    pub window: ReportWindow,
    pub summary: SalesSummary,
    pub average_sale_amount: Decimal,
    /// Sorted by revenue, highest first
    pub breakdown: Vec<EntityBreakdown>,
    pub generated_at: NaiveDateTime,
}

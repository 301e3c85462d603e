//! Comma-delimited text rendering of a [`SalesReport`].
//!
//! Layout, one record per line:
//!
//! ```text
//! Report,<label>
//! Start,<YYYY-MM-DD>
//! End,<YYYY-MM-DD>
//! Generated,<YYYY-MM-DDTHH:MM:SS>
//! Transactions,Units Sold,Revenue,Average Sale
//! <count>,<units>,<revenue>,<average>
//! Entity,Units Sold,Revenue,Percentage
//! <name>,<units>,<revenue>,<percentage>
//! ```
//!
//! Other tools parse this output, so field order and header lines must not change.

use csv::{QuoteStyle, Terminator, WriterBuilder};
use rust_decimal::{Decimal, RoundingStrategy};

use super::SalesReport;
use crate::errors::ReportError;

const SUMMARY_HEADER: [&str; 4] = ["Transactions", "Units Sold", "Revenue", "Average Sale"];
const BREAKDOWN_HEADER: [&str; 4] = ["Entity", "Units Sold", "Revenue", "Percentage"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn money(value: Decimal) -> String {
    format!(
        "{:.2}",
        value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

/// Renders `report` as UTF-8 text. Deterministic: the timestamp comes from the report.
pub fn to_text(report: &SalesReport) -> Result<String, ReportError> {
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let label = report.kind.to_string();
    let start = report.window.start().format(DATE_FORMAT).to_string();
    let end = report.window.end().format(DATE_FORMAT).to_string();
    let generated = report.generated_at.format(TIMESTAMP_FORMAT).to_string();

    writer.write_record(["Report", label.as_str()])?;
    writer.write_record(["Start", start.as_str()])?;
    writer.write_record(["End", end.as_str()])?;
    writer.write_record(["Generated", generated.as_str()])?;

    let summary = &report.summary;
    writer.write_record(SUMMARY_HEADER)?;
    writer.write_record([
        summary.total_transaction_count.to_string(),
        summary.total_units.to_string(),
        money(summary.total_revenue),
        money(report.average_sale_amount),
    ])?;

    writer.write_record(BREAKDOWN_HEADER)?;
    for entry in &report.breakdown {
        writer.write_record([
            entry.entity_name.clone(),
            entry.units_sold.to_string(),
            money(entry.revenue),
            money(entry.percentage_of_total),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ReportError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ReportError::Export(e.to_string()))
}

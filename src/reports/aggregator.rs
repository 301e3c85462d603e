use chrono::{Local, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::ledger::{BreakdownRow, SalesLedger, SummaryRow};
use super::{window, EntityBreakdown, ReportWindow, SalesReport, SalesSummary};
use crate::db::ConnectionSource;
use crate::errors::ReportError;
use crate::retry::RetryingExecutor;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;
const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rounds a derived metric to 2 decimal places, half away from zero.
fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Each revenue's share of `total_revenue` in percent, to 2 decimal places.
///
/// Shares are apportioned by largest remainder: every share is first truncated to the
/// cent, then the cents still missing from the rounded exact total go to the shares with
/// the largest truncated remainders, earlier entries first on ties. The result sums to
/// 100.00 whenever the revenues add up to the total, and each share stays within 0.01 of
/// its exact value. All shares are zero when there was no revenue.
pub fn apportion_percentages(revenues: &[Decimal], total_revenue: Decimal) -> Vec<Decimal> {
    if total_revenue.is_zero() {
        return vec![Decimal::ZERO; revenues.len()];
    }

    let exact: Vec<Decimal> = revenues
        .iter()
        .map(|revenue| revenue * HUNDRED / total_revenue)
        .collect();
    let mut shares: Vec<Decimal> = exact
        .iter()
        .map(|pct| pct.round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity))
        .collect();

    let target = round2(exact.iter().copied().sum());
    let mut missing = target - shares.iter().copied().sum::<Decimal>();

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| (exact[b] - shares[b]).cmp(&(exact[a] - shares[a])));
    for idx in order {
        if missing < CENT {
            break;
        }
        shares[idx] += CENT;
        missing -= CENT;
    }
    shares
}

/// Mean revenue per transaction; zero when there were no transactions.
pub fn average_sale_amount(total_revenue: Decimal, transaction_count: u64) -> Decimal {
    if transaction_count == 0 {
        return Decimal::ZERO;
    }
    round2(total_revenue / Decimal::from(transaction_count))
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Builds the report from the two query results. Pure; no data access.
pub fn assemble_report(
    window: ReportWindow,
    summary: SummaryRow,
    rows: Vec<BreakdownRow>,
    generated_at: chrono::NaiveDateTime,
) -> SalesReport {
    let summary = SalesSummary {
        total_transaction_count: non_negative(summary.transaction_count),
        total_units: non_negative(summary.total_units),
        total_revenue: summary.total_revenue,
    };

    let mut rows: Vec<BreakdownRow> = rows.into_iter().filter(|row| row.units_sold > 0).collect();
    // Stable, so ties keep the store's order.
    rows.sort_by(|a, b| b.revenue.cmp(&a.revenue));

    let revenues: Vec<Decimal> = rows.iter().map(|row| row.revenue).collect();
    let percentages = apportion_percentages(&revenues, summary.total_revenue);

    let breakdown = rows
        .into_iter()
        .zip(percentages)
        .map(|(row, percentage_of_total)| EntityBreakdown {
            percentage_of_total,
            entity_id: row.entity_id,
            entity_name: row.entity_name,
            units_sold: non_negative(row.units_sold),
            revenue: row.revenue,
        })
        .collect();

    SalesReport {
        kind: window.label(),
        window,
        average_sale_amount: average_sale_amount(
            summary.total_revenue,
            summary.total_transaction_count,
        ),
        summary,
        breakdown,
        generated_at,
    }
}

/// Generates sales reports through a [`RetryingExecutor`].
///
/// The summary and breakdown queries run as two independent executor calls, each with
/// its own retry budget. They are not read from one snapshot, so concurrent writes can
/// make the two disagree slightly.
pub struct SalesReportService<S, L> {
    executor: RetryingExecutor<S>,
    ledger: Arc<L>,
}

impl<S, L> Clone for SalesReportService<S, L> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, L> SalesReportService<S, L>
where
    S: ConnectionSource,
    L: SalesLedger<S::Connection>,
{
    pub fn new(executor: RetryingExecutor<S>, ledger: Arc<L>) -> Self {
        Self { executor, ledger }
    }

    pub fn executor(&self) -> &RetryingExecutor<S> {
        &self.executor
    }

    /// Report for a single day
    pub async fn daily(&self, date: NaiveDate) -> Result<SalesReport, ReportError> {
        self.aggregate(window::daily(date)).await
    }

    /// Report for the seven days starting on `week_start`
    pub async fn weekly(&self, week_start: NaiveDate) -> Result<SalesReport, ReportError> {
        self.aggregate(window::weekly(week_start)?).await
    }

    /// Report for a calendar month
    pub async fn monthly(&self, year: i32, month: u32) -> Result<SalesReport, ReportError> {
        self.aggregate(window::monthly(year, month)?).await
    }

    /// Report for an inclusive custom range
    pub async fn custom(&self, start: NaiveDate, end: NaiveDate) -> Result<SalesReport, ReportError> {
        self.aggregate(window::custom(start, end)?).await
    }

    pub async fn aggregate(&self, window: ReportWindow) -> Result<SalesReport, ReportError> {
        self.aggregate_with_cancel(window, &CancellationToken::new())
            .await
    }

    /// Aggregates `window`, abandoning the request once `cancel` fires.
    #[instrument(skip(self, cancel), fields(kind = %window.kind(), start = %window.start(), end = %window.end()))]
    pub async fn aggregate_with_cancel(
        &self,
        window: ReportWindow,
        cancel: &CancellationToken,
    ) -> Result<SalesReport, ReportError> {
        let summary_ledger = self.ledger.clone();
        let summary = self
            .executor
            .execute_with_cancel("sales_summary", cancel, move |conn| {
                let ledger = summary_ledger.clone();
                Box::pin(async move { ledger.fetch_summary(conn, &window).await })
            });

        let breakdown_ledger = self.ledger.clone();
        let breakdown = self
            .executor
            .execute_with_cancel("sales_breakdown", cancel, move |conn| {
                let ledger = breakdown_ledger.clone();
                Box::pin(async move { ledger.fetch_breakdown(conn, &window).await })
            });

        let (summary, rows) = futures::try_join!(summary, breakdown)?;

        let report = assemble_report(window, summary, rows, Local::now().naive_local());
        info!(
            label = %report.kind,
            days = window.days(),
            transactions = report.summary.total_transaction_count,
            revenue = %report.summary.total_revenue,
            entities = report.breakdown.len(),
            "Sales report generated"
        );
        Ok(report)
    }
}

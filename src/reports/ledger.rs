//! Read-only queries the aggregator issues against the record store.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, JoinType, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::ReportWindow;
use crate::entities::{product, sales_transaction};
use crate::errors::StoreFault;

/// Window totals as returned by the store. Absent rows aggregate to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromQueryResult)]
pub struct SummaryRow {
    pub transaction_count: i64,
    pub total_units: i64,
    pub total_revenue: Decimal,
}

/// Per-entity totals as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct BreakdownRow {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub units_sold: i64,
    pub revenue: Decimal,
}

/// Outbound query contract, generic over the connection type of the source it runs on.
#[async_trait]
pub trait SalesLedger<C>: Send + Sync + 'static
where
    C: Send + Sync,
{
    /// Count, unit sum and revenue sum over the window.
    async fn fetch_summary(&self, conn: &C, window: &ReportWindow) -> Result<SummaryRow, StoreFault>;

    /// Totals per entity that sold at least one unit in the window, highest revenue first.
    async fn fetch_breakdown(
        &self,
        conn: &C,
        window: &ReportWindow,
    ) -> Result<Vec<BreakdownRow>, StoreFault>;
}

/// [`SalesLedger`] over the `sales_transactions` and `products` tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeaOrmLedger;

fn in_window(window: &ReportWindow) -> sea_orm::Condition {
    sea_orm::Condition::all()
        .add(sales_transaction::Column::OccurredAt.gte(window.starts_at()))
        .add(sales_transaction::Column::OccurredAt.lt(window.ends_before()))
}

fn summed(column: sales_transaction::Column) -> SimpleExpr {
    Expr::col((sales_transaction::Entity, column)).sum()
}

#[async_trait]
impl<C> SalesLedger<C> for SeaOrmLedger
where
    C: ConnectionTrait + Send + Sync,
{
    #[instrument(skip(self, conn), fields(start = %window.start(), end = %window.end()))]
    async fn fetch_summary(&self, conn: &C, window: &ReportWindow) -> Result<SummaryRow, StoreFault> {
        let row = sales_transaction::Entity::find()
            .select_only()
            .column_as(
                Expr::col((sales_transaction::Entity, sales_transaction::Column::Id)).count(),
                "transaction_count",
            )
            .column_as(
                SimpleExpr::from(Func::coalesce([
                    summed(sales_transaction::Column::Quantity),
                    Expr::value(0i64),
                ])),
                "total_units",
            )
            .column_as(
                SimpleExpr::from(Func::coalesce([
                    summed(sales_transaction::Column::Amount),
                    Expr::value(Decimal::ZERO),
                ])),
                "total_revenue",
            )
            .filter(in_window(window))
            .into_model::<SummaryRow>()
            .one(conn)
            .await?;

        debug!(found = row.is_some(), "Fetched sales summary");
        Ok(row.unwrap_or_default())
    }

    #[instrument(skip(self, conn), fields(start = %window.start(), end = %window.end()))]
    async fn fetch_breakdown(
        &self,
        conn: &C,
        window: &ReportWindow,
    ) -> Result<Vec<BreakdownRow>, StoreFault> {
        let rows = sales_transaction::Entity::find()
            .select_only()
            .column_as(product::Column::Id, "entity_id")
            .column_as(product::Column::Name, "entity_name")
            .column_as(summed(sales_transaction::Column::Quantity), "units_sold")
            .column_as(summed(sales_transaction::Column::Amount), "revenue")
            .join(JoinType::InnerJoin, sales_transaction::Relation::Product.def())
            .filter(in_window(window))
            .group_by(product::Column::Id)
            .group_by(product::Column::Name)
            .having(Expr::expr(summed(sales_transaction::Column::Quantity)).gt(0))
            .order_by_desc(summed(sales_transaction::Column::Amount))
            .order_by_asc(product::Column::Name)
            .into_model::<BreakdownRow>()
            .all(conn)
            .await?;

        debug!(entities = rows.len(), "Fetched sales breakdown");
        Ok(rows)
    }
}

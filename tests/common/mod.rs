//! In-memory record store with scriptable faults for exercising the report service.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use stateset_sales_reports::db::ConnectionSource;
use stateset_sales_reports::reports::{BreakdownRow, SalesLedger, SalesReportService, SummaryRow};
use stateset_sales_reports::{ReportWindow, RetryPolicy, RetryingExecutor, StoreFault};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Sale {
    pub product_id: Uuid,
    pub quantity: i32,
    pub amount: Decimal,
    pub occurred_at: NaiveDateTime,
}

/// Connection handed out by [`MemoryStore`]; `serial` identifies the acquisition.
#[derive(Debug)]
pub struct MemoryConn {
    pub serial: u32,
}

/// Which of the two report queries a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Summary,
    Breakdown,
}

/// Record store kept in memory. Each query first pops a scripted fault, if any.
#[derive(Default)]
pub struct MemoryStore {
    products: Mutex<Vec<Product>>,
    sales: Mutex<Vec<Sale>>,
    summary_faults: Mutex<VecDeque<StoreFault>>,
    breakdown_faults: Mutex<VecDeque<StoreFault>>,
    acquired: AtomicU32,
    released: Mutex<Vec<u32>>,
    summary_queries: AtomicU32,
    breakdown_queries: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_product(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.products.lock().unwrap().push(Product {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn record_sale(&self, product_id: Uuid, quantity: i32, amount: Decimal, at: NaiveDateTime) {
        self.sales.lock().unwrap().push(Sale {
            product_id,
            quantity,
            amount,
            occurred_at: at,
        });
    }

    /// The next runs of `query` fail with these faults, in order.
    pub fn fail_with(&self, query: Query, faults: impl IntoIterator<Item = StoreFault>) {
        match query {
            Query::Summary => self.summary_faults.lock().unwrap().extend(faults),
            Query::Breakdown => self.breakdown_faults.lock().unwrap().extend(faults),
        }
    }

    pub fn acquired(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<u32> {
        self.released.lock().unwrap().clone()
    }

    pub fn queries(&self, query: Query) -> u32 {
        match query {
            Query::Summary => self.summary_queries.load(Ordering::SeqCst),
            Query::Breakdown => self.breakdown_queries.load(Ordering::SeqCst),
        }
    }

    fn next_fault(&self, query: Query) -> Option<StoreFault> {
        let (counter, faults) = match query {
            Query::Summary => (&self.summary_queries, &self.summary_faults),
            Query::Breakdown => (&self.breakdown_queries, &self.breakdown_faults),
        };
        counter.fetch_add(1, Ordering::SeqCst);
        faults.lock().unwrap().pop_front()
    }

    fn sales_in(&self, window: &ReportWindow) -> Vec<Sale> {
        self.sales
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.occurred_at >= window.starts_at() && s.occurred_at < window.ends_before())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConnectionSource for MemoryStore {
    type Connection = MemoryConn;

    async fn acquire(&self) -> Result<MemoryConn, StoreFault> {
        let serial = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryConn { serial })
    }

    async fn release(&self, conn: MemoryConn) {
        self.released.lock().unwrap().push(conn.serial);
    }
}

/// Ledger answering from the [`MemoryStore`] it is given.
pub struct MemoryLedger {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl SalesLedger<MemoryConn> for MemoryLedger {
    async fn fetch_summary(
        &self,
        _conn: &MemoryConn,
        window: &ReportWindow,
    ) -> Result<SummaryRow, StoreFault> {
        if let Some(fault) = self.store.next_fault(Query::Summary) {
            return Err(fault);
        }
        let sales = self.store.sales_in(window);
        Ok(SummaryRow {
            transaction_count: sales.len() as i64,
            total_units: sales.iter().map(|s| i64::from(s.quantity)).sum(),
            total_revenue: sales.iter().map(|s| s.amount).sum(),
        })
    }

    async fn fetch_breakdown(
        &self,
        _conn: &MemoryConn,
        window: &ReportWindow,
    ) -> Result<Vec<BreakdownRow>, StoreFault> {
        if let Some(fault) = self.store.next_fault(Query::Breakdown) {
            return Err(fault);
        }
        let mut totals: HashMap<Uuid, (i64, Decimal)> = HashMap::new();
        for sale in self.store.sales_in(window) {
            let entry = totals.entry(sale.product_id).or_insert((0, Decimal::ZERO));
            entry.0 += i64::from(sale.quantity);
            entry.1 += sale.amount;
        }

        let products = self.store.products.lock().unwrap().clone();
        let mut rows: Vec<BreakdownRow> = products
            .into_iter()
            .filter_map(|p| {
                totals.get(&p.id).map(|(units, revenue)| BreakdownRow {
                    entity_id: p.id,
                    entity_name: p.name,
                    units_sold: *units,
                    revenue: *revenue,
                })
            })
            .filter(|row| row.units_sold > 0)
            .collect();
        rows.sort_by(|a, b| b.revenue.cmp(&a.revenue).then(a.entity_name.cmp(&b.entity_name)));
        Ok(rows)
    }
}

pub type MemoryService = SalesReportService<MemoryStore, MemoryLedger>;

pub fn service(store: &Arc<MemoryStore>) -> MemoryService {
    let executor = RetryingExecutor::new(
        store.clone(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        },
    );
    SalesReportService::new(
        executor,
        Arc::new(MemoryLedger {
            store: store.clone(),
        }),
    )
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

pub fn transient() -> StoreFault {
    StoreFault::new("08006", "server closed the connection unexpectedly")
}

pub fn permanent() -> StoreFault {
    StoreFault::new("42703", "column \"amount\" does not exist")
}

//! Table source interfaces.
//!
//! Ownership model:
//! - `TableSource` is the aggregator-facing interface over a remote table API
//!   that caps every response at `max_page_size` rows.
//! - `RestSource` talks to the hosted REST endpoint.
//! - `InMemoryTable` serves the same contract from memory for tests and
//!   offline use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use crate::constants::upstream::MAX_PAGE_SIZE;
use crate::data::Row;
use crate::errors::FloodError;
use crate::query::Query;
use crate::types::{SourceId, TableName};

/// REST transport for the hosted table API.
pub mod rest;

pub use rest::RestSource;

/// Remote tabular data source with a per-response row ceiling.
///
/// `fetch` must never return more than `max_page_size` rows, even when the
/// query asks for more; callers page with `Query::page` to see everything.
pub trait TableSource: Send + Sync {
    /// Stable identifier used in errors and logs.
    fn id(&self) -> &str;
    /// Maximum rows a single `fetch` may return.
    fn max_page_size(&self) -> usize;
    /// Run a projected, filtered, paginated read.
    fn fetch(&self, query: &Query) -> Result<Vec<Row>, FloodError>;
    /// Exact number of rows matching the query's predicates (pagination ignored).
    fn count(&self, query: &Query) -> Result<u64, FloodError>;
    /// Append rows to `table`.
    fn insert(&self, table: &str, rows: &[Row]) -> Result<(), FloodError>;
}

/// In-memory table source for tests and small datasets.
///
/// Enforces the page ceiling like the hosted API and counts every fetch so
/// tests can observe network round-trips.
pub struct InMemoryTable {
    id: SourceId,
    tables: RwLock<HashMap<TableName, Vec<Row>>>,
    max_page_size: usize,
    fetch_calls: AtomicUsize,
    fail_on_fetch: Mutex<Option<usize>>,
}

impl InMemoryTable {
    /// Create a source holding `rows` in `table`, capped at the upstream ceiling.
    pub fn new(id: impl Into<SourceId>, table: impl Into<TableName>, rows: Vec<Row>) -> Self {
        let mut tables = HashMap::new();
        tables.insert(table.into(), rows);
        Self {
            id: id.into(),
            tables: RwLock::new(tables),
            max_page_size: MAX_PAGE_SIZE,
            fetch_calls: AtomicUsize::new(0),
            fail_on_fetch: Mutex::new(None),
        }
    }

    /// Override the per-response ceiling.
    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Make the `nth` fetch from now (1-based) fail with a connectivity error.
    pub fn fail_on_fetch(&self, nth: usize) {
        let calls = self.fetch_calls.load(Ordering::SeqCst);
        *self.fail_on_fetch.lock().expect("failure slot poisoned") = Some(calls + nth.max(1));
    }

    /// Number of `fetch` calls served (including failed ones).
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of all rows in `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .expect("table store poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn unknown_table(&self, table: &str) -> FloodError {
        FloodError::Query {
            table: table.to_string(),
            status: 404,
            message: format!("relation '{table}' does not exist in source '{}'", self.id),
        }
    }
}

impl TableSource for InMemoryTable {
    fn id(&self) -> &str {
        &self.id
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Row>, FloodError> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut slot = self.fail_on_fetch.lock().expect("failure slot poisoned");
            if *slot == Some(call) {
                *slot = None;
                return Err(FloodError::SourceUnavailable {
                    source_id: self.id.clone(),
                    reason: format!("injected failure on fetch {call}"),
                });
            }
        }
        let tables = self.tables.read().expect("table store poisoned");
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| self.unknown_table(&query.table))?;
        let mut matching: Vec<&Row> = rows.iter().filter(|row| query.matches(row)).collect();
        if !query.order.is_empty() {
            matching.sort_by(|a, b| query.compare_rows(a, b));
        }
        let take = query
            .limit
            .unwrap_or(self.max_page_size)
            .min(self.max_page_size);
        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(take)
            .map(|row| query.project(row))
            .collect())
    }

    fn count(&self, query: &Query) -> Result<u64, FloodError> {
        let tables = self.tables.read().expect("table store poisoned");
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| self.unknown_table(&query.table))?;
        Ok(rows.iter().filter(|row| query.matches(row)).count() as u64)
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<(), FloodError> {
        let mut tables = self.tables.write().expect("table store poisoned");
        tables
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Predicate;
    use serde_json::{Value, json};

    fn numbered_rows(count: usize) -> Vec<Row> {
        (0..count)
            .map(|idx| match json!({"id": idx, "year": (1950 + idx % 70).to_string()}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn fetch_caps_every_response_at_the_page_ceiling() {
        let table = InMemoryTable::new("memory", "floods", numbered_rows(25)).with_max_page_size(10);
        let unbounded = table.fetch(&Query::new("floods")).unwrap();
        assert_eq!(unbounded.len(), 10);
        let oversized = table.fetch(&Query::new("floods").page(0, 100)).unwrap();
        assert_eq!(oversized.len(), 10);
        let tail = table.fetch(&Query::new("floods").page(20, 10)).unwrap();
        assert_eq!(tail.len(), 5);
        assert_eq!(table.fetch_calls(), 3);
    }

    #[test]
    fn fetch_applies_filters_order_and_projection() {
        let table = InMemoryTable::new("memory", "floods", numbered_rows(5));
        let rows = table
            .fetch(
                &Query::new("floods")
                    .select(["id"])
                    .filter(Predicate::NotEmpty("year".into()))
                    .order_by("id", true)
                    .page(1, 2),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(3));
        assert_eq!(rows[1]["id"], json!(2));
        assert!(rows[0].get("year").is_none());
    }

    #[test]
    fn injected_failure_hits_only_the_requested_call() {
        let table = InMemoryTable::new("memory", "floods", numbered_rows(3));
        table.fail_on_fetch(2);
        assert!(table.fetch(&Query::new("floods")).is_ok());
        let err = table.fetch(&Query::new("floods")).unwrap_err();
        assert!(matches!(err, FloodError::SourceUnavailable { .. }));
        assert!(table.fetch(&Query::new("floods")).is_ok());
    }

    #[test]
    fn unknown_tables_are_query_errors() {
        let table = InMemoryTable::new("memory", "floods", Vec::new());
        let err = table.fetch(&Query::new("missing")).unwrap_err();
        assert!(matches!(err, FloodError::Query { status: 404, .. }));
    }

    #[test]
    fn count_ignores_pagination_and_insert_appends() {
        let table = InMemoryTable::new("memory", "floods", numbered_rows(12)).with_max_page_size(5);
        assert_eq!(table.count(&Query::new("floods").page(0, 5)).unwrap(), 12);
        table.insert("floods", &numbered_rows(2)).unwrap();
        assert_eq!(table.count(&Query::new("floods")).unwrap(), 14);
        table.insert("flood_submissions", &numbered_rows(1)).unwrap();
        assert_eq!(table.rows("flood_submissions").len(), 1);
    }
}

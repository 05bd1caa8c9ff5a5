//! Bounded-result aggregation.
//!
//! The table API returns at most `max_page_size` rows per response, so every
//! read here walks offset pages until a short page signals exhaustion. Pages
//! are fetched strictly in increasing offset order and any failure discards
//! everything gathered by that call.

use std::cmp::Ordering;

use indexmap::IndexSet;
use serde_json::Value;
use tracing::debug;

use crate::constants::upstream::ID_COLUMN;
use crate::data::{FilterValue, Row, ValueKind};
use crate::errors::FloodError;
use crate::query::{Predicate, Query};
use crate::source::TableSource;
use crate::utils::collate;

/// Complete, sorted set of distinct non-blank values of `column` among rows
/// matching `predicates`.
///
/// Only `column` is projected. `page_size` is clamped to the source ceiling.
pub fn fetch_all_distinct(
    source: &dyn TableSource,
    table: &str,
    column: &str,
    kind: ValueKind,
    predicates: &[Predicate],
    page_size: usize,
) -> Result<Vec<FilterValue>, FloodError> {
    let base = Query::new(table)
        .select([column])
        .filters(predicates.iter().cloned())
        .filter(Predicate::NotEmpty(column.to_string()));
    let mut raw = Vec::new();
    let pages = for_each_page(source, &base, page_size, |rows| {
        raw.extend(rows.into_iter().filter_map(|mut row| row.remove(column)));
    })?;
    let raw_count = raw.len();
    let values = distinct_values(raw, kind);
    debug!(
        source_id = %source.id(),
        table,
        column,
        pages,
        raw = raw_count,
        distinct = values.len(),
        "distinct values aggregated"
    );
    Ok(values)
}

/// Every row matching `query`'s predicates, in its order, ignoring its own
/// offset/limit.
pub fn fetch_all_rows(
    source: &dyn TableSource,
    query: &Query,
    page_size: usize,
) -> Result<Vec<Row>, FloodError> {
    let mut rows = Vec::new();
    let pages = for_each_page(source, query, page_size, |page| rows.extend(page))?;
    debug!(
        source_id = %source.id(),
        table = %query.table,
        pages,
        rows = rows.len(),
        "rows aggregated"
    );
    Ok(rows)
}

/// Walk offset pages of `base`, handing each page to `sink`. Returns the page count.
fn for_each_page(
    source: &dyn TableSource,
    base: &Query,
    page_size: usize,
    mut sink: impl FnMut(Vec<Row>),
) -> Result<usize, FloodError> {
    let page_size = page_size.clamp(1, source.max_page_size().max(1));
    let mut query = base.clone();
    if !query.order.iter().any(|key| key.column == ID_COLUMN) {
        query = query.order_by(ID_COLUMN, false);
    }
    let mut offset = 0usize;
    let mut pages = 0usize;
    loop {
        let rows = source.fetch(&query.clone().page(offset, page_size))?;
        pages += 1;
        let returned = rows.len();
        sink(rows);
        if returned < page_size {
            return Ok(pages);
        }
        offset += page_size;
    }
}

#[derive(Hash, PartialEq, Eq)]
enum DistinctKey {
    Number(u64),
    Text(String),
}

/// Normalize raw cells and keep the first occurrence of each distinct value.
///
/// Strings are trimmed before comparison; comparison is exact and
/// case-sensitive. Null and blank cells are dropped. Numbers compare by value.
pub fn distinct_values(raw: impl IntoIterator<Item = Value>, kind: ValueKind) -> Vec<FilterValue> {
    let mut seen = IndexSet::new();
    let mut values = Vec::new();
    for cell in raw {
        let Some(value) = FilterValue::from_raw(&cell, kind) else {
            continue;
        };
        let key = match &value {
            FilterValue::Number(number) => DistinctKey::Number((number + 0.0).to_bits()),
            FilterValue::Text(text) => DistinctKey::Text(text.clone()),
        };
        if seen.insert(key) {
            values.push(value);
        }
    }
    sort_values(&mut values, kind);
    values
}

/// Order values for display.
///
/// Numeric kinds put numbers first (descending or ascending as configured)
/// followed by any non-numeric text; text kinds use [`collate`].
pub fn sort_values(values: &mut [FilterValue], kind: ValueKind) {
    values.sort_by(|a, b| compare_values(a, b, kind));
}

fn compare_values(a: &FilterValue, b: &FilterValue, kind: ValueKind) -> Ordering {
    match kind {
        ValueKind::Numeric { descending } => match (a, b) {
            (FilterValue::Number(x), FilterValue::Number(y)) => {
                if descending {
                    y.total_cmp(x)
                } else {
                    x.total_cmp(y)
                }
            }
            (FilterValue::Number(_), FilterValue::Text(_)) => Ordering::Less,
            (FilterValue::Text(_), FilterValue::Number(_)) => Ordering::Greater,
            (FilterValue::Text(x), FilterValue::Text(y)) => collate(x, y),
        },
        ValueKind::Text => collate(&a.to_string(), &b.to_string()),
    }
}

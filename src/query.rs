//! Table query model shared by the REST transport and the in-memory table.
//!
//! A [`Query`] is encoded into PostgREST query parameters by
//! [`Query::to_params`] and evaluated locally by [`Query::matches`]; both
//! paths must agree on null handling and comparison semantics.

use std::cmp::Ordering;

use serde_json::Value;

use crate::data::{FilterValue, Row};
use crate::types::{ColumnName, TableName};

/// Binary comparison operators understood by the table API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl CompareOp {
    fn token(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Neq => "neq",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Neq => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Row filter. Null column values never satisfy a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `column <op> value`, numeric when both sides parse as numbers.
    Compare {
        /// Column compared.
        column: ColumnName,
        /// Comparison.
        op: CompareOp,
        /// Literal operand.
        value: String,
    },
    /// Case-insensitive match where `*` matches any run of characters.
    ILike {
        /// Column matched.
        column: ColumnName,
        /// Pattern with `*` wildcards.
        pattern: String,
    },
    /// Column is null.
    IsNull(ColumnName),
    /// Column is not null.
    NotNull(ColumnName),
    /// Not null and not the empty string.
    NotEmpty(ColumnName),
    /// Null or the empty string.
    IsEmpty(ColumnName),
    /// At least one member matches.
    Any(Vec<Predicate>),
    /// Every member matches.
    All(Vec<Predicate>),
}

impl Predicate {
    /// Equality predicate against a filter value.
    pub fn eq(column: impl Into<ColumnName>, value: &FilterValue) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value: value.to_query_literal(),
        }
    }

    /// Evaluate the predicate against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::Compare { column, op, value } => match row.get(column.as_str()) {
                None | Some(Value::Null) => false,
                Some(cell) => op.accepts(compare_cell(cell, value)),
            },
            Predicate::ILike { column, pattern } => match row.get(column.as_str()) {
                None | Some(Value::Null) => false,
                Some(cell) => glob_matches_ci(&cell_text(cell), pattern),
            },
            Predicate::IsNull(column) => is_null(row, column),
            Predicate::NotNull(column) => !is_null(row, column),
            Predicate::NotEmpty(column) => !is_null(row, column) && !is_empty_text(row, column),
            Predicate::IsEmpty(column) => is_null(row, column) || is_empty_text(row, column),
            Predicate::Any(items) => items.iter().any(|item| item.matches(row)),
            Predicate::All(items) => items.iter().all(|item| item.matches(row)),
        }
    }

    fn push_params(&self, params: &mut Vec<(String, String)>) {
        match self {
            Predicate::Compare { column, op, value } => {
                params.push((column.clone(), format!("{}.{value}", op.token())))
            }
            Predicate::ILike { column, pattern } => {
                params.push((column.clone(), format!("ilike.{pattern}")))
            }
            Predicate::IsNull(column) => params.push((column.clone(), "is.null".into())),
            Predicate::NotNull(column) => params.push((column.clone(), "not.is.null".into())),
            Predicate::NotEmpty(column) => {
                params.push((column.clone(), "not.is.null".into()));
                params.push((column.clone(), "neq.".into()));
            }
            Predicate::IsEmpty(column) => params.push((
                "or".into(),
                format!("({column}.is.null,{column}.eq.\"\")"),
            )),
            Predicate::Any(items) => params.push(("or".into(), format!("({})", join_nested(items)))),
            Predicate::All(items) => {
                for item in items {
                    item.push_params(params);
                }
            }
        }
    }

    /// Encoding used inside `or=(...)` / `and(...)` logic trees.
    fn nested(&self) -> String {
        match self {
            Predicate::Compare { column, op, value } => {
                format!("{column}.{}.{}", op.token(), quote_nested(value))
            }
            Predicate::ILike { column, pattern } => {
                format!("{column}.ilike.{}", quote_nested(pattern))
            }
            Predicate::IsNull(column) => format!("{column}.is.null"),
            Predicate::NotNull(column) => format!("{column}.not.is.null"),
            Predicate::NotEmpty(column) => format!("and({column}.not.is.null,{column}.neq.\"\")"),
            Predicate::IsEmpty(column) => format!("or({column}.is.null,{column}.eq.\"\")"),
            Predicate::Any(items) => format!("or({})", join_nested(items)),
            Predicate::All(items) => format!("and({})", join_nested(items)),
        }
    }
}

fn join_nested(items: &[Predicate]) -> String {
    items
        .iter()
        .map(Predicate::nested)
        .collect::<Vec<_>>()
        .join(",")
}

fn quote_nested(value: &str) -> String {
    let reserved = value.is_empty()
        || value != value.trim()
        || value
            .chars()
            .any(|ch| matches!(ch, ',' | '.' | ':' | '(' | ')' | '"' | '\\'));
    if !reserved {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn is_null(row: &Row, column: &str) -> bool {
    matches!(row.get(column), None | Some(Value::Null))
}

fn is_empty_text(row: &Row, column: &str) -> bool {
    matches!(row.get(column), Some(Value::String(text)) if text.is_empty())
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn cell_number(cell: &Value) -> Option<f64> {
    match cell {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn compare_cell(cell: &Value, literal: &str) -> Ordering {
    if let (Some(left), Ok(right)) = (cell_number(cell), literal.trim().parse::<f64>()) {
        return left.partial_cmp(&right).unwrap_or(Ordering::Equal);
    }
    cell_text(cell).as_str().cmp(literal)
}

/// Null-aware ordering of two cells: numbers numerically, otherwise text.
/// Nulls sort after every value, matching the upstream ascending default
/// (and therefore first under a descending key).
pub fn compare_cells(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let left = left.filter(|value| !value.is_null());
    let right = right.filter(|value| !value.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (cell_number(a), cell_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => cell_text(a).cmp(&cell_text(b)),
        },
    }
}

fn glob_matches_ci(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();
    let pattern: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            p += 1;
            resume = t;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|ch| *ch == '*')
}

/// Sort key for query results.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    /// Sort column.
    pub column: ColumnName,
    /// Sort largest first.
    pub descending: bool,
}

/// A projected, filtered, ordered, paginated read of one table.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Target table.
    pub table: TableName,
    /// Projected columns; empty selects every column.
    pub columns: Vec<ColumnName>,
    /// Filters, all of which must match.
    pub predicates: Vec<Predicate>,
    /// Sort keys, most significant first.
    pub order: Vec<OrderBy>,
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return.
    pub limit: Option<usize>,
}

impl Query {
    /// Start a query over `table` selecting every column.
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            predicates: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Restrict the projection to `columns`.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ColumnName>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a predicate (all predicates are combined with AND).
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Add several predicates.
    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    /// Add an equality predicate.
    pub fn eq(self, column: impl Into<ColumnName>, value: &FilterValue) -> Self {
        self.filter(Predicate::eq(column, value))
    }

    /// Append a sort key.
    pub fn order_by(mut self, column: impl Into<ColumnName>, descending: bool) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    /// Set offset/limit pagination.
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Whether a row satisfies every predicate.
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(row))
    }

    /// Copy only the projected columns of `row`.
    pub fn project(&self, row: &Row) -> Row {
        if self.columns.is_empty() {
            return row.clone();
        }
        self.columns
            .iter()
            .map(|column| {
                (
                    column.clone(),
                    row.get(column.as_str()).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    /// Compare two rows by the query's sort keys.
    pub fn compare_rows(&self, left: &Row, right: &Row) -> Ordering {
        for key in &self.order {
            let left_cell = left.get(key.column.as_str());
            let right_cell = right.get(key.column.as_str());
            let ordering = if key.descending {
                compare_cells(right_cell, left_cell)
            } else {
                compare_cells(left_cell, right_cell)
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Encode as table-API query parameters, in a stable order.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let select = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(",")
        };
        params.push(("select".to_string(), select));
        for predicate in &self.predicates {
            predicate.push_params(&mut params);
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|key| {
                    format!(
                        "{}.{}",
                        key.column,
                        if key.descending { "desc" } else { "asc" }
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if self.offset > 0 || self.limit.is_some() {
            params.push(("offset".to_string(), self.offset.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

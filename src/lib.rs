#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Paged aggregation over row-capped table sources.
pub mod aggregate;
/// Time source and TTL cache for unfiltered filter options.
pub mod cache;
/// Command-line front end.
pub mod cli;
/// Connection, paging, retry, and rate-limit configuration.
pub mod config;
/// Centralized constants used across sources, filters, and submissions.
pub mod constants;
/// Cross-filter orchestration and stale-result supersession.
pub mod controller;
/// Flood record and filter value types.
pub mod data;
/// Filter dimensions, selections, and option sets.
pub mod filters;
/// Greek Grid conversion and bounds checks.
pub mod geo;
/// Batched bulk import into the flood table.
pub mod import;
/// User-facing notices with per-level lifetimes.
pub mod notices;
/// Backend-neutral query model and its wire encoding.
pub mod query;
/// Free-form conditions and nested condition groups.
pub mod query_builder;
/// Table source trait, REST transport, and in-memory table.
pub mod source;
/// Summary figures over flood records.
pub mod stats;
/// Community corrections, validation, and rate limiting.
pub mod submissions;
/// Shared type aliases.
pub mod types;
/// Text normalization and collation helpers.
pub mod utils;
/// Background worker that serializes filter intents.
pub mod worker;

mod errors;

pub use aggregate::{distinct_values, fetch_all_distinct, fetch_all_rows, sort_values};
pub use cache::{Clock, ManualClock, OptionCache, SystemClock};
pub use config::{ClientConfig, RateLimitPolicy, RetryPolicy};
pub use controller::{FilterController, OptionBoard, RefreshOutcome, SelectionChange, Ticket};
pub use data::{FilterValue, FloodRecord, Row, ValueKind};
pub use errors::FloodError;
pub use filters::{DimensionOptions, FilterDimension, FilterOptionSet, FilterSelection};
pub use geo::{GREECE_BOUNDS, GeoBounds, greek_grid_to_wgs84, within_greece};
pub use import::{BatchImporter, ImportSummary};
pub use notices::{Notice, NoticeBoard, NoticeLevel};
pub use query::{CompareOp, OrderBy, Predicate, Query};
pub use query_builder::{Combinator, Condition, ConditionGroup, ConditionItem, Operator};
pub use source::{InMemoryTable, RestSource, TableSource};
pub use stats::FloodStats;
pub use submissions::{RateLimiter, SubmissionDraft, SubmissionReceipt, SubmissionService};
pub use types::{ColumnName, ContributorId, FloodId, NoticeId, Sequence, SourceId, TableName};
pub use worker::{FilterEvent, FilterIntent, FilterWorker};

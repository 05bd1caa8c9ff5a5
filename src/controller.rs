//! Cross-filter orchestration.
//!
//! Ownership model:
//! - `FilterController` owns the selection, the option cache, the option
//!   board, and the notice board; it is built explicitly and shared by `Arc`.
//! - `OptionBoard` is the published view of every filter control. Each
//!   aggregation run takes a `Ticket` first and may only publish a dimension
//!   while its ticket is still the latest issued for that dimension.
//! - `refresh_options` is guarded by a single "updating" flag: an overlapping
//!   call is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::aggregate::{fetch_all_distinct, fetch_all_rows};
use crate::cache::{Clock, OptionCache, SystemClock};
use crate::config::ClientConfig;
use crate::constants::upstream::ID_COLUMN;
use crate::data::{FilterValue, FloodRecord};
use crate::errors::FloodError;
use crate::filters::{DimensionOptions, FilterDimension, FilterOptionSet, FilterSelection};
use crate::notices::{Notice, NoticeBoard, NoticeLevel};
use crate::query::Query;
use crate::query_builder::ConditionGroup;
use crate::source::TableSource;
use crate::types::{NoticeId, Sequence};

/// Claim on the right to publish options for a set of dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    seq: Sequence,
    dims: Vec<FilterDimension>,
}

impl Ticket {
    /// Sequence number of the run that took the ticket.
    pub fn seq(&self) -> Sequence {
        self.seq
    }

    /// Dimensions the ticket covers.
    pub fn dims(&self) -> &[FilterDimension] {
        &self.dims
    }
}

#[derive(Debug, Default)]
struct BoardSlot {
    latest: Sequence,
    published: Option<DimensionOptions>,
}

#[derive(Debug, Default)]
struct BoardInner {
    next_seq: Sequence,
    slots: IndexMap<FilterDimension, BoardSlot>,
}

/// Latest published options per dimension, guarded by sequence numbers.
#[derive(Debug, Default)]
pub struct OptionBoard {
    inner: Mutex<BoardInner>,
}

impl OptionBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run over `dims`, superseding every earlier run on them.
    pub fn issue(&self, dims: &[FilterDimension]) -> Ticket {
        let mut inner = self.inner.lock().expect("option board poisoned");
        inner.next_seq += 1;
        let seq = inner.next_seq;
        for dim in dims {
            inner.slots.entry(*dim).or_default().latest = seq;
        }
        Ticket {
            seq,
            dims: dims.to_vec(),
        }
    }

    /// Publish `options` for `dim` unless a newer ticket covers it.
    pub fn publish(&self, ticket: &Ticket, dim: FilterDimension, options: DimensionOptions) -> bool {
        let mut inner = self.inner.lock().expect("option board poisoned");
        let slot = inner.slots.entry(dim).or_default();
        if slot.latest != ticket.seq || !ticket.dims.contains(&dim) {
            debug!(
                dimension = %dim,
                ticket = ticket.seq,
                latest = slot.latest,
                "superseded options discarded"
            );
            return false;
        }
        slot.published = Some(options);
        true
    }

    /// Latest sequence issued for `dim` (0 when never issued).
    pub fn latest(&self, dim: FilterDimension) -> Sequence {
        self.inner
            .lock()
            .expect("option board poisoned")
            .slots
            .get(&dim)
            .map(|slot| slot.latest)
            .unwrap_or(0)
    }

    /// Published options of every dimension, in `FilterDimension::ALL` order.
    pub fn snapshot(&self) -> FilterOptionSet {
        let inner = self.inner.lock().expect("option board poisoned");
        let mut set = FilterOptionSet::new();
        for dim in FilterDimension::ALL {
            if let Some(options) = inner.slots.get(&dim).and_then(|slot| slot.published.clone()) {
                set.insert(dim, options);
            }
        }
        set
    }
}

/// Result of a guarded option refresh.
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshOutcome {
    /// Options were aggregated from the source; carries the published view.
    Fetched(FilterOptionSet),
    /// The unfiltered options came from the cache without a network call.
    Cached(FilterOptionSet),
    /// Another refresh was in flight, so this one did nothing.
    Dropped,
}

impl RefreshOutcome {
    /// Published view after the refresh, if it ran.
    pub fn options(&self) -> Option<&FilterOptionSet> {
        match self {
            RefreshOutcome::Fetched(options) | RefreshOutcome::Cached(options) => Some(options),
            RefreshOutcome::Dropped => None,
        }
    }
}

/// A change to the filter selection.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionChange {
    /// Choose a value for a dimension.
    Select(FilterDimension, FilterValue),
    /// Clear one dimension.
    Clear(FilterDimension),
    /// Clear everything and invalidate the option cache.
    ClearAll,
}

/// Resets the "updating" flag when a refresh ends, even on panic.
struct UpdatingGuard<'a>(&'a AtomicBool);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of filter state and the only entry point for option loading.
pub struct FilterController {
    source: Arc<dyn TableSource>,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    selection: Mutex<FilterSelection>,
    cache: Mutex<OptionCache>,
    board: OptionBoard,
    notices: Mutex<NoticeBoard>,
    updating: AtomicBool,
}

impl FilterController {
    /// Controller over `source` using the wall clock.
    pub fn new(source: Arc<dyn TableSource>, config: ClientConfig) -> Self {
        Self::with_clock(source, config, Arc::new(SystemClock))
    }

    /// Controller with an injected clock.
    pub fn with_clock(
        source: Arc<dyn TableSource>,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = OptionCache::new(config.option_cache_ttl);
        Self {
            source,
            config,
            clock,
            selection: Mutex::new(FilterSelection::new()),
            cache: Mutex::new(cache),
            board: OptionBoard::new(),
            notices: Mutex::new(NoticeBoard::new()),
            updating: AtomicBool::new(false),
        }
    }

    /// Client settings in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Copy of the current selection.
    pub fn selection(&self) -> FilterSelection {
        self.selection.lock().expect("selection poisoned").clone()
    }

    /// Published options of every control.
    pub fn options(&self) -> FilterOptionSet {
        self.board.snapshot()
    }

    /// The sequence-guarded option board.
    pub fn board(&self) -> &OptionBoard {
        &self.board
    }

    /// Whether a guarded refresh is running.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Record a selection change without refreshing options.
    pub fn stage(&self, change: SelectionChange) {
        let mut selection = self.selection.lock().expect("selection poisoned");
        match change {
            SelectionChange::Select(dim, value) => {
                debug!(dimension = %dim, value = %value, "filter selected");
                selection.set(dim, value);
            }
            SelectionChange::Clear(dim) => {
                if selection.clear(dim) {
                    debug!(dimension = %dim, "filter cleared");
                }
            }
            SelectionChange::ClearAll => {
                selection.clear_all();
                drop(selection);
                self.invalidate_cache();
            }
        }
    }

    /// Select `value` for `dim` and refresh every control.
    pub fn select(&self, dim: FilterDimension, value: FilterValue) -> RefreshOutcome {
        self.stage(SelectionChange::Select(dim, value));
        self.refresh_options()
    }

    /// Clear `dim` and refresh every control.
    pub fn clear(&self, dim: FilterDimension) -> RefreshOutcome {
        self.stage(SelectionChange::Clear(dim));
        self.refresh_options()
    }

    /// Clear every filter, drop the cached options, and reload from the source.
    pub fn clear_all(&self) -> RefreshOutcome {
        self.stage(SelectionChange::ClearAll);
        self.refresh_options()
    }

    /// Drop the cached unfiltered options.
    pub fn invalidate_cache(&self) {
        self.cache.lock().expect("option cache poisoned").invalidate();
    }

    /// Recompute every control under the current selection.
    ///
    /// Each dimension is aggregated with the predicates of the other selected
    /// dimensions, all dimensions concurrently. A failing dimension becomes
    /// [`DimensionOptions::Unavailable`] and raises a notice; the others are
    /// unaffected. Returns [`RefreshOutcome::Dropped`] if a refresh is
    /// already running.
    pub fn refresh_options(&self) -> RefreshOutcome {
        if self
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("option refresh already in flight; dropped");
            return RefreshOutcome::Dropped;
        }
        let _guard = UpdatingGuard(&self.updating);

        let selection = self.selection();
        let now = self.clock.now();
        let ticket = self.board.issue(&FilterDimension::ALL);

        if selection.is_empty() {
            let cached = self
                .cache
                .lock()
                .expect("option cache poisoned")
                .get(now)
                .cloned();
            if let Some(cached) = cached {
                debug!(ticket = ticket.seq, "unfiltered options served from cache");
                for (dim, options) in cached.iter() {
                    self.board.publish(&ticket, dim, options.clone());
                }
                return RefreshOutcome::Cached(self.board.snapshot());
            }
        }

        let started = Instant::now();
        let computed = self.compute_options(&selection, &FilterDimension::ALL);
        for (dim, options) in computed.iter() {
            self.board.publish(&ticket, dim, options.clone());
        }
        info!(
            ticket = ticket.seq,
            filters = selection.iter().count(),
            complete = computed.is_complete(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "filter options refreshed"
        );
        if selection.is_empty() && computed.is_complete() {
            self.cache
                .lock()
                .expect("option cache poisoned")
                .store(computed, now);
        }
        RefreshOutcome::Fetched(self.board.snapshot())
    }

    /// Recompute one control. Not guarded; a newer run on `dim` supersedes it.
    ///
    /// Returns the computed options if they were published, `None` if a newer
    /// run claimed the dimension first.
    pub fn reload_dimension(&self, dim: FilterDimension) -> Option<DimensionOptions> {
        let ticket = self.board.issue(&[dim]);
        let selection = self.selection();
        let options = self
            .compute_options(&selection, &[dim])
            .get(dim)
            .cloned()?;
        self.board
            .publish(&ticket, dim, options.clone())
            .then_some(options)
    }

    /// Every record matching the selection and optional condition group.
    pub fn load_records(
        &self,
        conditions: Option<&ConditionGroup>,
    ) -> Result<Vec<FloodRecord>, FloodError> {
        let result = self.records_query(conditions).and_then(|query| {
            let rows = fetch_all_rows(self.source.as_ref(), &query, self.config.page_size)?;
            rows.into_iter()
                .map(|row| FloodRecord::from_row(&query.table, row))
                .collect::<Result<Vec<_>, _>>()
        });
        match result {
            Ok(records) => {
                debug!(records = records.len(), "flood records loaded");
                Ok(records)
            }
            Err(err) => {
                warn!(error = %err, "flood records unavailable");
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Exact number of records matching the selection and optional condition group.
    pub fn record_count(&self, conditions: Option<&ConditionGroup>) -> Result<u64, FloodError> {
        let result = self
            .records_query(conditions)
            .and_then(|query| self.source.count(&query));
        if let Err(err) = &result {
            self.report(err);
        }
        result
    }

    /// Notices still shown now.
    pub fn notices(&self) -> Vec<Notice> {
        let now = self.clock.now();
        self.notices.lock().expect("notice board poisoned").active(now)
    }

    /// Notices issued after `after`, still shown now.
    pub fn notices_since(&self, after: NoticeId) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|notice| notice.id > after)
            .collect()
    }

    /// Dismiss a notice.
    pub fn dismiss_notice(&self, id: NoticeId) -> bool {
        self.notices.lock().expect("notice board poisoned").dismiss(id)
    }

    /// Raise a notice for an operation failure.
    pub fn report(&self, err: &FloodError) -> Notice {
        let now = self.clock.now();
        self.notices
            .lock()
            .expect("notice board poisoned")
            .push_error(err, now)
    }

    fn records_query(&self, conditions: Option<&ConditionGroup>) -> Result<Query, FloodError> {
        let mut query = Query::new(self.config.floods_table.as_str())
            .filters(self.selection().predicates())
            .order_by(ID_COLUMN, false);
        if let Some(group) = conditions.filter(|group| !group.is_empty()) {
            query = query.filter(group.to_predicate()?);
        }
        Ok(query)
    }

    /// Aggregate `dims` concurrently, one scoped thread per dimension.
    fn compute_options(
        &self,
        selection: &FilterSelection,
        dims: &[FilterDimension],
    ) -> FilterOptionSet {
        let source = self.source.as_ref();
        let table = self.config.floods_table.as_str();
        let page_size = self.config.page_size;
        let results: Vec<(FilterDimension, Result<Vec<FilterValue>, FloodError>)> =
            thread::scope(|scope| {
                let handles: Vec<_> = dims
                    .iter()
                    .map(|dim| {
                        let dim = *dim;
                        let predicates = selection.predicates_excluding(dim);
                        let handle = scope.spawn(move || {
                            fetch_all_distinct(
                                source,
                                table,
                                dim.column(),
                                dim.kind(),
                                &predicates,
                                page_size,
                            )
                        });
                        (dim, handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(dim, handle)| {
                        let result = handle.join().unwrap_or_else(|_| {
                            Err(FloodError::SourceUnavailable {
                                source_id: source.id().to_string(),
                                reason: format!("{dim} aggregation thread panicked"),
                            })
                        });
                        (dim, result)
                    })
                    .collect()
            });

        let mut set = FilterOptionSet::new();
        for (dim, result) in results {
            let options = match result {
                Ok(values) => DimensionOptions::Ready(values),
                Err(err) => {
                    warn!(dimension = %dim, error = %err, "filter options unavailable");
                    let now = self.clock.now();
                    self.notices
                        .lock()
                        .expect("notice board poisoned")
                        .push(
                            NoticeLevel::for_error(&err),
                            format!("{dim} filter unavailable: {err}"),
                            now,
                        );
                    DimensionOptions::Unavailable(err.to_string())
                }
            };
            set.insert(dim, options);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryTable;
    use serde_json::{Value, json};

    fn controller(rows: Value) -> (Arc<InMemoryTable>, FilterController) {
        let rows = match rows {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                })
                .collect(),
            _ => unreachable!(),
        };
        let source = Arc::new(InMemoryTable::new("memory", "floods", rows));
        let config = ClientConfig::new("https://abcd.supabase.co", "key");
        let controller = FilterController::new(source.clone(), config);
        (source, controller)
    }

    fn fixture() -> Value {
        json!([
            {"id": 1, "year": "2020", "location_name": "Athens", "cause_of_flood": "Storm", "flood_event_name": "Ianos", "deaths_toll": "0"},
            {"id": 2, "year": "2023", "location_name": "Volos", "cause_of_flood": "Rainfall", "flood_event_name": "Daniel", "deaths_toll": "17"},
            {"id": 3, "year": "2017", "location_name": "Mandra", "cause_of_flood": "Flash flood", "flood_event_name": null, "deaths_toll": "24"},
            {"id": 4, "year": "2023", "location_name": "Athens", "cause_of_flood": "Rainfall", "flood_event_name": "Elias", "deaths_toll": ""}
        ])
    }

    #[test]
    fn board_rejects_tickets_that_were_superseded() {
        let board = OptionBoard::new();
        let old = board.issue(&FilterDimension::ALL);
        let newer = board.issue(&[FilterDimension::Year]);
        assert!(!board.publish(&old, FilterDimension::Year, DimensionOptions::Ready(vec![])));
        assert!(board.publish(&old, FilterDimension::Cause, DimensionOptions::Ready(vec![])));
        assert!(board.publish(
            &newer,
            FilterDimension::Year,
            DimensionOptions::Ready(vec![FilterValue::Number(2023.0)])
        ));
        assert!(!board.publish(&newer, FilterDimension::Cause, DimensionOptions::Ready(vec![])));
        assert_eq!(board.latest(FilterDimension::Year), newer.seq());
        assert_eq!(
            board.snapshot().values(FilterDimension::Year),
            &[FilterValue::Number(2023.0)]
        );
    }

    #[test]
    fn refresh_fills_every_dimension() {
        let (_, controller) = controller(fixture());
        let outcome = controller.refresh_options();
        let options = outcome.options().unwrap();
        assert_eq!(options.len(), FilterDimension::ALL.len());
        assert_eq!(
            options.values(FilterDimension::Year),
            &[
                FilterValue::Number(2023.0),
                FilterValue::Number(2020.0),
                FilterValue::Number(2017.0)
            ]
        );
        assert_eq!(
            options.values(FilterDimension::DeathToll),
            &[
                FilterValue::Number(0.0),
                FilterValue::Number(17.0),
                FilterValue::Number(24.0)
            ]
        );
        assert_eq!(options.values(FilterDimension::EventName).len(), 3);
    }

    #[test]
    fn selected_dimension_keeps_its_siblings_choices_only() {
        let (_, controller) = controller(fixture());
        let outcome = controller.select(FilterDimension::Location, FilterValue::from("Athens"));
        let options = outcome.options().unwrap();
        assert_eq!(
            options.values(FilterDimension::Cause),
            &[FilterValue::from("Rainfall"), FilterValue::from("Storm")]
        );
        assert_eq!(options.values(FilterDimension::Location).len(), 3);
    }

    #[test]
    fn failed_dimension_is_unavailable_and_raises_a_notice() {
        let (source, controller) = controller(fixture());
        source.fail_on_fetch(1);
        let outcome = controller.refresh_options();
        let options = outcome.options().unwrap();
        let unavailable = FilterDimension::ALL
            .into_iter()
            .filter(|dim| !options.is_available(*dim))
            .count();
        assert_eq!(unavailable, 1);
        let notices = controller.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.contains("filter unavailable"));
    }

    #[test]
    fn incomplete_unfiltered_refresh_is_not_cached() {
        let (source, controller) = controller(fixture());
        source.fail_on_fetch(1);
        controller.refresh_options();
        let calls = source.fetch_calls();
        assert!(matches!(controller.refresh_options(), RefreshOutcome::Fetched(_)));
        assert!(source.fetch_calls() > calls);
    }

    #[test]
    fn overlapping_refresh_is_dropped() {
        let (_, controller) = controller(fixture());
        controller.updating.store(true, Ordering::Release);
        assert_eq!(controller.refresh_options(), RefreshOutcome::Dropped);
        controller.updating.store(false, Ordering::Release);
        assert!(matches!(controller.refresh_options(), RefreshOutcome::Fetched(_)));
        assert!(!controller.is_updating());
    }

    #[test]
    fn records_follow_selection_and_conditions() {
        use crate::query_builder::{Combinator, Condition, Operator};

        let (_, controller) = controller(fixture());
        controller.stage(SelectionChange::Select(
            FilterDimension::Year,
            FilterValue::Number(2023.0),
        ));
        let records = controller.load_records(None).unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 4]);

        let group = ConditionGroup::new(Combinator::And)
            .with(Condition::new("location_name", Operator::Contains, "ath"));
        assert_eq!(controller.record_count(Some(&group)).unwrap(), 1);
    }

    #[test]
    fn invalid_condition_group_reports_a_notice() {
        use crate::query_builder::{Combinator, Condition, Operator};

        let (_, controller) = controller(fixture());
        let group = ConditionGroup::new(Combinator::And)
            .with(Condition::new("year", Operator::GreaterThan, " "));
        let err = controller.load_records(Some(&group)).unwrap_err();
        assert!(matches!(err, FloodError::InvalidCondition(_)));
        assert_eq!(controller.notices().len(), 1);
    }
}

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::data::{FilterValue, ValueKind};
use crate::errors::FloodError;
use crate::query::Predicate;

/// A filter control over one column of the flood table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterDimension {
    /// `year`, newest first.
    Year,
    /// `location_name`.
    Location,
    /// `cause_of_flood`.
    Cause,
    /// `flood_event_name`.
    EventName,
    /// `deaths_toll`, smallest first.
    DeathToll,
}

impl FilterDimension {
    /// Every dimension, in display order.
    pub const ALL: [FilterDimension; 5] = [
        FilterDimension::Year,
        FilterDimension::Location,
        FilterDimension::Cause,
        FilterDimension::EventName,
        FilterDimension::DeathToll,
    ];

    /// Upstream column backing the dimension.
    pub fn column(self) -> &'static str {
        match self {
            FilterDimension::Year => "year",
            FilterDimension::Location => "location_name",
            FilterDimension::Cause => "cause_of_flood",
            FilterDimension::EventName => "flood_event_name",
            FilterDimension::DeathToll => "deaths_toll",
        }
    }

    /// Value interpretation and ordering for the dimension.
    ///
    /// Years list most recent first; death tolls list smallest first.
    pub fn kind(self) -> ValueKind {
        match self {
            FilterDimension::Year => ValueKind::Numeric { descending: true },
            FilterDimension::DeathToll => ValueKind::Numeric { descending: false },
            FilterDimension::Location | FilterDimension::Cause | FilterDimension::EventName => {
                ValueKind::Text
            }
        }
    }

    /// Short name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            FilterDimension::Year => "year",
            FilterDimension::Location => "location",
            FilterDimension::Cause => "cause",
            FilterDimension::EventName => "event",
            FilterDimension::DeathToll => "deaths",
        }
    }

    /// Parse a user-entered value for this dimension.
    pub fn parse_value(self, raw: &str) -> Option<FilterValue> {
        FilterValue::from_raw(&serde_json::Value::String(raw.to_string()), self.kind())
    }
}

impl fmt::Display for FilterDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterDimension {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        FilterDimension::ALL
            .into_iter()
            .find(|dim| dim.name() == wanted || dim.column() == wanted)
            .ok_or_else(|| FloodError::Configuration(format!("unknown filter dimension '{s}'")))
    }
}

/// Values currently chosen in the filter controls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterSelection {
    selected: IndexMap<FilterDimension, FilterValue>,
}

impl FilterSelection {
    /// Empty selection (no filters applied).
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose `value` for `dim`, replacing any earlier choice.
    pub fn set(&mut self, dim: FilterDimension, value: FilterValue) {
        self.selected.insert(dim, value);
    }

    /// Clear the choice for `dim`. Returns whether one existed.
    pub fn clear(&mut self, dim: FilterDimension) -> bool {
        self.selected.shift_remove(&dim).is_some()
    }

    /// Clear every choice.
    pub fn clear_all(&mut self) {
        self.selected.clear();
    }

    /// Current choice for `dim`.
    pub fn get(&self, dim: FilterDimension) -> Option<&FilterValue> {
        self.selected.get(&dim)
    }

    /// Whether no filter is applied.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Chosen dimensions and values in selection order.
    pub fn iter(&self) -> impl Iterator<Item = (FilterDimension, &FilterValue)> {
        self.selected.iter().map(|(dim, value)| (*dim, value))
    }

    /// Equality predicates for every chosen value.
    pub fn predicates(&self) -> Vec<Predicate> {
        self.iter()
            .map(|(dim, value)| Predicate::eq(dim.column(), value))
            .collect()
    }

    /// Predicate context for recomputing `dim`: every other chosen value.
    pub fn predicates_excluding(&self, dim: FilterDimension) -> Vec<Predicate> {
        self.iter()
            .filter(|(other, _)| *other != dim)
            .map(|(other, value)| Predicate::eq(other.column(), value))
            .collect()
    }
}

/// Loaded state of a single filter control.
#[derive(Clone, Debug, PartialEq)]
pub enum DimensionOptions {
    /// Selectable values, already sorted.
    Ready(Vec<FilterValue>),
    /// Loading failed; the control should be disabled with this reason.
    Unavailable(String),
}

/// Per-dimension selectable values under one predicate context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterOptionSet {
    options: IndexMap<FilterDimension, DimensionOptions>,
}

impl FilterOptionSet {
    /// Empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the state of `dim`.
    pub fn insert(&mut self, dim: FilterDimension, options: DimensionOptions) {
        self.options.insert(dim, options);
    }

    /// State of `dim`, if loaded.
    pub fn get(&self, dim: FilterDimension) -> Option<&DimensionOptions> {
        self.options.get(&dim)
    }

    /// Ready values of `dim` (empty when missing or unavailable).
    pub fn values(&self, dim: FilterDimension) -> &[FilterValue] {
        match self.options.get(&dim) {
            Some(DimensionOptions::Ready(values)) => values,
            _ => &[],
        }
    }

    /// Whether `dim` loaded successfully.
    pub fn is_available(&self, dim: FilterDimension) -> bool {
        matches!(self.options.get(&dim), Some(DimensionOptions::Ready(_)))
    }

    /// Whether every dimension in the set loaded successfully.
    pub fn is_complete(&self) -> bool {
        !self.options.is_empty()
            && self
                .options
                .values()
                .all(|options| matches!(options, DimensionOptions::Ready(_)))
    }

    /// Loaded dimensions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (FilterDimension, &DimensionOptions)> {
        self.options.iter().map(|(dim, options)| (*dim, options))
    }

    /// Number of loaded dimensions.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

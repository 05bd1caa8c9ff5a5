use indexmap::IndexMap;
use serde::Serialize;

use crate::data::FloodRecord;
use crate::utils::collate;

/// How many causes the summary lists by default.
pub const DEFAULT_TOP_CAUSES: usize = 5;

/// Summary figures for a set of flood records.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FloodStats {
    /// Records summarized.
    pub total_events: usize,
    /// Records with usable WGS84 coordinates.
    pub with_coordinates: usize,
    /// Sum of numeric death tolls; non-numeric tolls are skipped.
    pub total_deaths: u64,
    /// Earliest numeric year.
    pub earliest_year: Option<i32>,
    /// Latest numeric year.
    pub latest_year: Option<i32>,
    /// Most frequent causes with their event counts, most frequent first.
    pub top_causes: Vec<(String, usize)>,
}

impl FloodStats {
    /// Summarize `records`, listing at most `top_n` causes.
    pub fn from_records(records: &[FloodRecord], top_n: usize) -> Self {
        let mut stats = FloodStats {
            total_events: records.len(),
            ..FloodStats::default()
        };
        let mut causes: IndexMap<String, usize> = IndexMap::new();
        for record in records {
            if record.has_coordinates() {
                stats.with_coordinates += 1;
            }
            if let Some(deaths) = record.deaths() {
                stats.total_deaths += u64::from(deaths);
            }
            if let Some(year) = record.year_number() {
                stats.earliest_year = Some(stats.earliest_year.map_or(year, |y| y.min(year)));
                stats.latest_year = Some(stats.latest_year.map_or(year, |y| y.max(year)));
            }
            if let Some(cause) = record
                .cause_of_flood
                .as_deref()
                .map(str::trim)
                .filter(|cause| !cause.is_empty())
            {
                *causes.entry(cause.to_string()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = causes.into_iter().collect();
        ranked.sort_by(|(a_name, a_count), (b_name, b_count)| {
            b_count.cmp(a_count).then_with(|| collate(a_name, b_name))
        });
        ranked.truncate(top_n);
        stats.top_causes = ranked;
        stats
    }
}

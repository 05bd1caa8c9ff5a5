//! Community corrections.
//!
//! A contributor proposes new values for a flood (or a brand-new flood); the
//! draft is validated locally, checked against an advisory per-contributor
//! rate limit, and inserted into the submission table. The upstream policy
//! remains authoritative and its rejections surface as `RateLimited`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::{ClientConfig, RateLimitPolicy};
use crate::constants::submissions::{MAX_FIELD_CHARS, MAX_NOTES_CHARS, MIN_YEAR};
use crate::data::{FloodId, Row};
use crate::errors::FloodError;
use crate::geo::{GREECE_BOUNDS, within_greece};
use crate::source::TableSource;
use crate::types::{ContributorId, TableName};
use crate::utils::normalize_inline_whitespace;

/// Proposed correction or addition, as entered on the submission form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionDraft {
    /// Contributor email.
    pub contributor: String,
    /// Flood being corrected; `None` proposes a new flood.
    #[serde(default)]
    pub flood_id: Option<FloodId>,
    /// Proposed year.
    #[serde(default)]
    pub year: Option<i32>,
    /// Proposed place name.
    #[serde(default)]
    pub location_name: Option<String>,
    /// Proposed cause.
    #[serde(default)]
    pub cause_of_flood: Option<String>,
    /// Proposed event name.
    #[serde(default)]
    pub flood_event_name: Option<String>,
    /// Proposed death toll.
    #[serde(default)]
    pub deaths_toll: Option<u32>,
    /// Proposed latitude; requires `longitude`.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Proposed longitude; requires `latitude`.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Free-form notes for reviewers.
    #[serde(default)]
    pub notes: Option<String>,
    /// Link backing the proposal.
    #[serde(default)]
    pub source_url: Option<String>,
}

impl SubmissionDraft {
    /// Check every rule and report all problems together.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), FloodError> {
        let mut problems = Vec::new();

        let contributor = self.contributor.trim();
        if contributor.is_empty() {
            problems.push("contributor email is required".to_string());
        } else if !is_email_shaped(contributor) {
            problems.push(format!("'{contributor}' is not a valid email address"));
        }

        let has_coordinates = self.latitude.is_some() || self.longitude.is_some();
        let proposes_something = self.year.is_some()
            || self.deaths_toll.is_some()
            || has_coordinates
            || [
                &self.location_name,
                &self.cause_of_flood,
                &self.flood_event_name,
            ]
            .into_iter()
            .any(|field| text_value(field).is_some());
        if !proposes_something {
            problems.push("propose at least one field".to_string());
        }

        if let Some(year) = self.year {
            let current = now.year();
            if !(MIN_YEAR..=current).contains(&year) {
                problems.push(format!("year must be between {MIN_YEAR} and {current}"));
            }
        }

        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                if !within_greece(lat, lon) {
                    problems.push(format!(
                        "coordinates must lie within Greece (lat {}..{}, lon {}..{})",
                        GREECE_BOUNDS.min_lat,
                        GREECE_BOUNDS.max_lat,
                        GREECE_BOUNDS.min_lon,
                        GREECE_BOUNDS.max_lon
                    ));
                }
            }
            (None, None) => {}
            _ => problems.push("latitude and longitude must be given together".to_string()),
        }

        for (name, field) in [
            ("location", &self.location_name),
            ("cause", &self.cause_of_flood),
            ("event name", &self.flood_event_name),
        ] {
            if let Some(text) = text_value(field)
                && text.chars().count() > MAX_FIELD_CHARS
            {
                problems.push(format!("{name} must be at most {MAX_FIELD_CHARS} characters"));
            }
        }

        if let Some(notes) = self.notes.as_deref()
            && notes.trim().chars().count() > MAX_NOTES_CHARS
        {
            problems.push(format!("notes must be at most {MAX_NOTES_CHARS} characters"));
        }

        if let Some(url) = text_value(&self.source_url)
            && !(url.starts_with("https://") || url.starts_with("http://"))
        {
            problems.push("source must be an http(s) link".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(FloodError::Validation(problems))
        }
    }

    /// Row inserted into the submission table.
    pub fn to_row(&self, submitted_at: DateTime<Utc>) -> Row {
        let text = |field: &Option<String>| match text_value(field) {
            Some(text) => Value::String(text),
            None => Value::Null,
        };
        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(|notes| Value::String(notes.to_string()))
            .unwrap_or(Value::Null);
        let row = json!({
            "contributor_email": contributor_key(&self.contributor),
            "flood_id": self.flood_id,
            "year": self.year.map(|year| year.to_string()),
            "location_name": text(&self.location_name),
            "cause_of_flood": text(&self.cause_of_flood),
            "flood_event_name": text(&self.flood_event_name),
            "deaths_toll": self.deaths_toll.map(|deaths| deaths.to_string()),
            "latitude": self.latitude,
            "longitude": self.longitude,
            "notes": notes,
            "source_url": text(&self.source_url),
            "status": "pending",
            "submitted_at": submitted_at.to_rfc3339(),
        });
        match row {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }
}

fn text_value(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(normalize_inline_whitespace)
        .filter(|text| !text.is_empty())
}

fn is_email_shaped(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn contributor_key(contributor: &str) -> ContributorId {
    contributor.trim().to_lowercase()
}

/// Advisory sliding-window limiter keyed by contributor.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    history: HashMap<ContributorId, VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    /// Limiter enforcing `policy`.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            history: HashMap::new(),
        }
    }

    /// Fail with `RateLimited` if `contributor` has used the whole window.
    pub fn check(&mut self, contributor: &str, now: DateTime<Utc>) -> Result<(), FloodError> {
        let key = contributor_key(contributor);
        let window = self.policy.window;
        let max = self.policy.max_submissions;
        let Some(history) = self.history.get_mut(&key) else {
            return if max == 0 {
                Err(FloodError::RateLimited {
                    contributor: key,
                    retry_after: None,
                })
            } else {
                Ok(())
            };
        };
        prune(history, now, window);
        if history.len() < max {
            return Ok(());
        }
        let retry_after = history
            .front()
            .map(|oldest| (*oldest + window - now).to_std().unwrap_or_default());
        Err(FloodError::RateLimited {
            contributor: key,
            retry_after,
        })
    }

    /// Count a successful submission.
    pub fn record(&mut self, contributor: &str, now: DateTime<Utc>) {
        let window = self.policy.window;
        let history = self.history.entry(contributor_key(contributor)).or_default();
        prune(history, now, window);
        history.push_back(now);
    }

    /// Check and count a submission in one step. Returns the submissions left.
    pub fn reserve(&mut self, contributor: &str, now: DateTime<Utc>) -> Result<usize, FloodError> {
        self.check(contributor, now)?;
        self.record(contributor, now);
        Ok(self.remaining(contributor, now))
    }

    /// Give back a slot taken by [`RateLimiter::reserve`] at `at`.
    pub fn release(&mut self, contributor: &str, at: DateTime<Utc>) {
        let key = contributor_key(contributor);
        if let Some(history) = self.history.get_mut(&key)
            && let Some(idx) = history.iter().rposition(|stamp| *stamp == at)
        {
            history.remove(idx);
        }
    }

    /// Submissions still allowed in the current window.
    pub fn remaining(&mut self, contributor: &str, now: DateTime<Utc>) -> usize {
        let window = self.policy.window;
        let used = match self.history.get_mut(&contributor_key(contributor)) {
            Some(history) => {
                prune(history, now, window);
                history.len()
            }
            None => 0,
        };
        self.policy.max_submissions.saturating_sub(used)
    }
}

fn prune(history: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: chrono::Duration) {
    while history.front().is_some_and(|at| now - *at >= window) {
        history.pop_front();
    }
}

/// Confirmation of an accepted submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    /// Normalized contributor key.
    pub contributor: ContributorId,
    /// When the submission was accepted.
    pub submitted_at: DateTime<Utc>,
    /// Submissions still allowed in the current window.
    pub remaining: usize,
}

/// Validates, rate-limits, and stores submissions.
pub struct SubmissionService {
    source: Arc<dyn TableSource>,
    table: TableName,
    limiter: Mutex<RateLimiter>,
}

impl SubmissionService {
    /// Service writing to the configured submission table.
    pub fn new(source: Arc<dyn TableSource>, config: &ClientConfig) -> Self {
        Self {
            source,
            table: config.submissions_table.clone(),
            limiter: Mutex::new(RateLimiter::new(config.rate_limit.clone())),
        }
    }

    /// Submit `draft` at `now`.
    pub fn submit(
        &self,
        draft: &SubmissionDraft,
        now: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, FloodError> {
        draft.validate(now)?;
        let contributor = contributor_key(&draft.contributor);
        // Slot is taken before the insert and given back if it fails.
        let remaining = self
            .limiter
            .lock()
            .expect("rate limiter poisoned")
            .reserve(&contributor, now)?;

        if let Err(err) = self.source.insert(&self.table, &[draft.to_row(now)]) {
            self.limiter
                .lock()
                .expect("rate limiter poisoned")
                .release(&contributor, now);
            let err = attribute_rejection(err, &contributor);
            warn!(table = %self.table, error = %err, "submission rejected upstream");
            return Err(err);
        }

        info!(
            table = %self.table,
            flood_id = ?draft.flood_id,
            remaining,
            "submission stored"
        );
        Ok(SubmissionReceipt {
            contributor,
            submitted_at: now,
            remaining,
        })
    }

    /// Submissions `contributor` may still make now.
    pub fn remaining(&self, contributor: &str, now: DateTime<Utc>) -> usize {
        self.limiter
            .lock()
            .expect("rate limiter poisoned")
            .remaining(contributor, now)
    }
}

/// Upstream rate-limit rejections arrive as 429 or as a row-level security
/// violation raised by the insert policy.
fn attribute_rejection(err: FloodError, contributor: &str) -> FloodError {
    match err {
        FloodError::RateLimited { retry_after, .. } => FloodError::RateLimited {
            contributor: contributor.to_string(),
            retry_after,
        },
        FloodError::Query {
            status: 401 | 403,
            ref message,
            ..
        } if message.to_lowercase().contains("row-level security") => FloodError::RateLimited {
            contributor: contributor.to_string(),
            retry_after: None,
        },
        other => other,
    }
}

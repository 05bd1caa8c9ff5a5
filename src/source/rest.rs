use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use ureq::Agent;
use ureq::http::{Response, StatusCode};

use crate::config::{ClientConfig, RetryPolicy};
use crate::constants::transport::ERROR_BODY_CHARS;
use crate::constants::upstream::{MAX_PAGE_SIZE, REST_PATH};
use crate::data::Row;
use crate::errors::FloodError;
use crate::query::Query;
use crate::source::TableSource;
use crate::types::SourceId;
use crate::utils::truncate_chars;

const SOURCE_ID: &str = "rest";
/// Contributor reported for rate limits raised before a caller can attribute them.
pub const ANONYMOUS_CONTRIBUTOR: &str = "anonymous";

/// Table source backed by the hosted auto-generated REST API.
pub struct RestSource {
    id: SourceId,
    endpoint: String,
    anon_key: String,
    agent: Agent,
    retry: RetryPolicy,
    max_page_size: usize,
}

impl RestSource {
    /// Build a client from a validated config.
    pub fn new(config: &ClientConfig) -> Result<Self, FloodError> {
        config.validate()?;
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(config.request_timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Ok(Self {
            id: SOURCE_ID.to_string(),
            endpoint: format!("{}/{REST_PATH}", config.base_url.trim_end_matches('/')),
            anon_key: config.anon_key.clone(),
            agent,
            retry: config.retry.clone(),
            max_page_size: config.page_size.min(MAX_PAGE_SIZE),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.endpoint)
    }

    /// Run `send` until it succeeds, a non-transient error occurs, or `retries` run out.
    fn execute(
        &self,
        table: &str,
        retries: u32,
        send: impl Fn() -> Result<Response<ureq::Body>, ureq::Error>,
    ) -> Result<Response<ureq::Body>, FloodError> {
        let mut last_err = None;
        for attempt in 0..=retries {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                warn!(
                    table,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "[floodmap:rest] retrying request"
                );
                thread::sleep(delay);
            }
            let err = match send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => self.status_error(table, response),
                Err(err) => FloodError::SourceUnavailable {
                    source_id: self.id.clone(),
                    reason: format!("request to '{table}' failed: {err}"),
                },
            };
            if !err.is_transient() {
                return Err(err);
            }
            last_err = Some(err);
        }
        Err(last_err.unwrap_or_else(|| FloodError::SourceUnavailable {
            source_id: self.id.clone(),
            reason: format!("request to '{table}' failed"),
        }))
    }

    fn status_error(&self, table: &str, response: Response<ureq::Body>) -> FloodError {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return FloodError::RateLimited {
                contributor: ANONYMOUS_CONTRIBUTOR.to_string(),
                retry_after,
            };
        }
        let body = response
            .into_body()
            .read_to_string()
            .unwrap_or_default();
        FloodError::Query {
            table: table.to_string(),
            status: status.as_u16(),
            message: error_message(status, &body),
        }
    }
}

/// Prefer the structured `message` of an API error body, else a truncated raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    let structured = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        json.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match structured {
        Some(message) => message,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        None => truncate_chars(body.trim(), ERROR_BODY_CHARS),
    }
}

/// Total row count from a `Content-Range` header such as `0-999/2500` or `*/0`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

impl TableSource for RestSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Row>, FloodError> {
        let url = self.table_url(&query.table);
        let params = query.to_params();
        let response = self.execute(&query.table, self.retry.max_retries, || {
            let mut request = self
                .agent
                .get(&url)
                .header("apikey", &self.anon_key)
                .header("Authorization", &format!("Bearer {}", self.anon_key))
                .header("Accept", "application/json");
            for (key, value) in &params {
                request = request.query(key, value);
            }
            request.call()
        })?;
        let body = response.into_body().read_to_string().map_err(|err| {
            FloodError::SourceUnavailable {
                source_id: self.id.clone(),
                reason: format!("failed reading '{}' response body: {err}", query.table),
            }
        })?;
        let rows: Vec<Row> = serde_json::from_str(&body).map_err(|err| FloodError::Decode {
            table: query.table.clone(),
            reason: err.to_string(),
        })?;
        debug!(
            table = %query.table,
            offset = query.offset,
            rows = rows.len(),
            "[floodmap:rest] fetched page"
        );
        Ok(rows)
    }

    fn count(&self, query: &Query) -> Result<u64, FloodError> {
        let url = self.table_url(&query.table);
        let mut unpaged = query.clone();
        unpaged.offset = 0;
        unpaged.limit = None;
        unpaged.order.clear();
        let params = unpaged.to_params();
        let response = self.execute(&query.table, self.retry.max_retries, || {
            let mut request = self
                .agent
                .head(&url)
                .header("apikey", &self.anon_key)
                .header("Authorization", &format!("Bearer {}", self.anon_key))
                .header("Prefer", "count=exact");
            for (key, value) in &params {
                request = request.query(key, value);
            }
            request.call()
        })?;
        response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| FloodError::Decode {
                table: query.table.clone(),
                reason: "missing or malformed Content-Range header in count response".into(),
            })
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<(), FloodError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = self.table_url(table);
        let payload = serde_json::to_string(rows).map_err(|err| FloodError::Decode {
            table: table.to_string(),
            reason: format!("failed encoding insert payload: {err}"),
        })?;
        // Inserts are not idempotent; a lost response must not resend the rows.
        self.execute(table, 0, || {
            self.agent
                .post(&url)
                .header("apikey", &self.anon_key)
                .header("Authorization", &format!("Bearer {}", self.anon_key))
                .header("Content-Type", "application/json")
                .header("Prefer", "return=minimal")
                .send(payload.as_bytes())
        })?;
        debug!(table, rows = rows.len(), "[floodmap:rest] inserted rows");
        Ok(())
    }
}

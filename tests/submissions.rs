use std::sync::{Arc, Barrier};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use floodmap::{
    ClientConfig, FloodError, InMemoryTable, Query, RateLimitPolicy, Row, SubmissionDraft,
    SubmissionService, TableSource,
};
use serde_json::json;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn config() -> ClientConfig {
    ClientConfig::new("https://abcd.supabase.co", "key")
}

fn draft(contributor: &str) -> SubmissionDraft {
    SubmissionDraft {
        contributor: contributor.to_string(),
        flood_id: Some(42),
        deaths_toll: Some(3),
        source_url: Some("https://example.gr/report".into()),
        ..SubmissionDraft::default()
    }
}

#[test]
fn accepted_submission_is_stored_as_pending() {
    let table = Arc::new(InMemoryTable::new("memory", "flood_submissions", Vec::new()));
    let service = SubmissionService::new(table.clone(), &config());
    let mut proposal = draft("  Maria@Example.gr ");
    proposal.year = Some(2023);
    proposal.location_name = Some("  Volos   Magnesia ".into());

    let receipt = service.submit(&proposal, start()).unwrap();
    assert_eq!(receipt.contributor, "maria@example.gr");
    assert_eq!(receipt.remaining, 4);

    let rows = table.rows("flood_submissions");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["contributor_email"], json!("maria@example.gr"));
    assert_eq!(row["flood_id"], json!(42));
    assert_eq!(row["year"], json!("2023"));
    assert_eq!(row["deaths_toll"], json!("3"));
    assert_eq!(row["location_name"], json!("Volos Magnesia"));
    assert_eq!(row["status"], json!("pending"));
    assert_eq!(row["cause_of_flood"], json!(null));
}

#[test]
fn sixth_submission_within_the_hour_is_rate_limited() {
    let table = Arc::new(InMemoryTable::new("memory", "flood_submissions", Vec::new()));
    let service = SubmissionService::new(table.clone(), &config());
    for minute in 0..5 {
        let at = start() + Duration::minutes(minute);
        service.submit(&draft("maria@example.gr"), at).unwrap();
    }

    let err = service
        .submit(&draft("MARIA@example.gr"), start() + Duration::minutes(10))
        .unwrap_err();
    match err {
        FloodError::RateLimited {
            contributor,
            retry_after,
        } => {
            assert_eq!(contributor, "maria@example.gr");
            assert_eq!(retry_after, Some(StdDuration::from_secs(50 * 60)));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert_eq!(table.rows("flood_submissions").len(), 5);

    let other = service.submit(&draft("nikos@example.gr"), start() + Duration::minutes(10));
    assert!(other.is_ok());

    let after_window = start() + Duration::hours(1);
    let receipt = service.submit(&draft("maria@example.gr"), after_window).unwrap();
    assert_eq!(receipt.remaining, 0);
}

#[test]
fn invalid_submission_reports_every_problem_and_keeps_the_allowance() {
    let table = Arc::new(InMemoryTable::new("memory", "flood_submissions", Vec::new()));
    let service = SubmissionService::new(table.clone(), &config());
    let proposal = SubmissionDraft {
        contributor: "not-an-email".into(),
        year: Some(1700),
        latitude: Some(48.85),
        ..SubmissionDraft::default()
    };
    match service.submit(&proposal, start()).unwrap_err() {
        FloodError::Validation(problems) => assert_eq!(problems.len(), 3),
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert!(table.rows("flood_submissions").is_empty());
    assert_eq!(service.remaining("not-an-email", start()), 5);
}

struct PolicyRejects;

impl TableSource for PolicyRejects {
    fn id(&self) -> &str {
        "policy"
    }
    fn max_page_size(&self) -> usize {
        1000
    }
    fn fetch(&self, _query: &Query) -> Result<Vec<Row>, FloodError> {
        Ok(Vec::new())
    }
    fn count(&self, _query: &Query) -> Result<u64, FloodError> {
        Ok(0)
    }
    fn insert(&self, table: &str, _rows: &[Row]) -> Result<(), FloodError> {
        Err(FloodError::Query {
            table: table.to_string(),
            status: 403,
            message: "new row violates row-level security policy for table \"flood_submissions\""
                .into(),
        })
    }
}

#[test]
fn upstream_policy_rejection_surfaces_as_a_rate_limit() {
    let service = SubmissionService::new(Arc::new(PolicyRejects), &config());
    let err = service.submit(&draft("maria@example.gr"), start()).unwrap_err();
    assert!(matches!(
        err,
        FloodError::RateLimited { ref contributor, retry_after: None } if contributor == "maria@example.gr"
    ));
    assert_eq!(service.remaining("maria@example.gr", start()), 5);
}

struct SlowInserts {
    inner: InMemoryTable,
    delay: StdDuration,
}

impl TableSource for SlowInserts {
    fn id(&self) -> &str {
        "slow"
    }
    fn max_page_size(&self) -> usize {
        self.inner.max_page_size()
    }
    fn fetch(&self, query: &Query) -> Result<Vec<Row>, FloodError> {
        self.inner.fetch(query)
    }
    fn count(&self, query: &Query) -> Result<u64, FloodError> {
        self.inner.count(query)
    }
    fn insert(&self, table: &str, rows: &[Row]) -> Result<(), FloodError> {
        std::thread::sleep(self.delay);
        self.inner.insert(table, rows)
    }
}

#[test]
fn concurrent_submissions_cannot_exceed_the_allowance() {
    let source = Arc::new(SlowInserts {
        inner: InMemoryTable::new("memory", "flood_submissions", Vec::new()),
        delay: StdDuration::from_millis(200),
    });
    let mut config = config();
    config.rate_limit = RateLimitPolicy {
        max_submissions: 1,
        window: Duration::hours(1),
    };
    let service = Arc::new(SubmissionService::new(source.clone(), &config));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                service.submit(&draft("maria@example.gr"), start()).is_ok()
            })
        })
        .collect();
    let accepted = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(source.inner.rows("flood_submissions").len(), 1);
    assert_eq!(service.remaining("maria@example.gr", start()), 0);
}

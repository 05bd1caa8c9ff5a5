use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use floodmap::{
    ClientConfig, FilterValue, FloodError, Query, RestSource, RetryPolicy, Row, SubmissionDraft,
    SubmissionService, TableSource, fetch_all_rows,
};
use serde_json::{Value, json};

struct Recorded {
    method: String,
    path: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn param(&self, name: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'%' if idx + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[idx + 1..idx + 3]).unwrap();
                out.push(u8::from_str_radix(hex, 16).unwrap());
                idx += 3;
            }
            b'+' => {
                out.push(b' ');
                idx += 1;
            }
            byte => {
                out.push(byte);
                idx += 1;
            }
        }
    }
    String::from_utf8(out).unwrap()
}

fn read_request(stream: &mut TcpStream) -> Recorded {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap().to_string();
    let target = parts.next().unwrap().to_string();
    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect();

    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).unwrap();
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let find = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };
    let mut body = Vec::new();
    if let Some(length) = find("content-length") {
        body.resize(length.parse::<usize>().unwrap(), 0);
        reader.read_exact(&mut body).unwrap();
    } else if find("transfer-encoding").is_some_and(|value| value.contains("chunked")) {
        loop {
            let mut size = String::new();
            reader.read_line(&mut size).unwrap();
            let size = usize::from_str_radix(size.trim(), 16).unwrap();
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk).unwrap();
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }

    Recorded {
        method,
        path: path.to_string(),
        params,
        headers,
        body: String::from_utf8(body).unwrap(),
    }
}

/// Accept a connection, giving up after `wait`.
fn accept_within(listener: &TcpListener, wait: Duration) -> Option<TcpStream> {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).unwrap();
                return Some(stream);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5))
            }
            Err(err) => panic!("accept failed: {err}"),
        }
    }
    None
}

/// Serve one scripted response per connection, then return what was received.
///
/// An empty response closes the connection after reading the request.
/// Responses no client connects for within two seconds are skipped.
fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for response in responses {
            let Some(mut stream) = accept_within(&listener, Duration::from_secs(2)) else {
                break;
            };
            seen.push(read_request(&mut stream));
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        seen
    });
    (base_url, handle)
}

fn respond(status: &str, extra_headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in extra_headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ));
    response
}

fn source(base_url: &str, page_size: usize) -> RestSource {
    let mut config = ClientConfig::new(base_url, "test-key");
    config.page_size = page_size;
    config.request_timeout = Duration::from_secs(5);
    config.retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(10),
    };
    RestSource::new(&config).unwrap()
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => panic!("fixture must be an object"),
    }
}

#[test]
fn fetch_sends_projection_filters_paging_and_credentials() {
    let (base_url, server) = serve(vec![respond(
        "200 OK",
        &[],
        r#"[{"cause_of_flood":"Storm"},{"cause_of_flood":"Rainfall"}]"#,
    )]);
    let query = Query::new("floods")
        .select(["cause_of_flood"])
        .eq("location_name", &FilterValue::from("Athens"))
        .order_by("id", false)
        .page(0, 1000);
    let rows = source(&base_url, 1000).fetch(&query).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["cause_of_flood"], json!("Storm"));

    let seen = server.join().unwrap();
    let request = &seen[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/rest/v1/floods");
    assert_eq!(request.param("select"), vec!["cause_of_flood"]);
    assert_eq!(request.param("location_name"), vec!["eq.Athens"]);
    assert_eq!(request.param("order"), vec!["id.asc"]);
    assert_eq!(request.param("offset"), vec!["0"]);
    assert_eq!(request.param("limit"), vec!["1000"]);
    assert_eq!(request.header("apikey"), Some("test-key"));
    assert_eq!(request.header("authorization"), Some("Bearer test-key"));
}

#[test]
fn paging_walks_offsets_over_the_wire() {
    let (base_url, server) = serve(vec![
        respond("200 OK", &[], r#"[{"id":1},{"id":2}]"#),
        respond("200 OK", &[], r#"[{"id":3}]"#),
    ]);
    let rest = source(&base_url, 2);
    let rows = fetch_all_rows(&rest, &Query::new("floods"), 2).unwrap();
    let ids: Vec<i64> = rows.iter().map(|row| row["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let seen = server.join().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].param("offset"), vec!["0"]);
    assert_eq!(seen[1].param("offset"), vec!["2"]);
    assert!(seen.iter().all(|request| request.param("limit") == vec!["2"]));
}

#[test]
fn server_errors_are_retried_until_success() {
    let (base_url, server) = serve(vec![
        respond("503 Service Unavailable", &[], ""),
        respond("200 OK", &[], r#"[{"id":7}]"#),
    ]);
    let rows = source(&base_url, 1000)
        .fetch(&Query::new("floods").page(0, 1000))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(server.join().unwrap().len(), 2);
}

#[test]
fn client_errors_are_not_retried() {
    let (base_url, server) = serve(vec![respond(
        "400 Bad Request",
        &[],
        r#"{"code":"42703","message":"column floods.yeer does not exist"}"#,
    )]);
    let err = source(&base_url, 1000)
        .fetch(&Query::new("floods").select(["yeer"]))
        .unwrap_err();
    match err {
        FloodError::Query {
            status, message, ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "column floods.yeer does not exist");
        }
        other => panic!("expected query error, got {other:?}"),
    }
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn count_reads_the_content_range_total() {
    let (base_url, server) = serve(vec![respond(
        "200 OK",
        &[("Content-Range", "0-999/2500")],
        "",
    )]);
    let query = Query::new("floods")
        .eq("year", &FilterValue::Number(2023.0))
        .page(1000, 1000);
    assert_eq!(source(&base_url, 1000).count(&query).unwrap(), 2500);

    let seen = server.join().unwrap();
    assert_eq!(seen[0].method, "HEAD");
    assert_eq!(seen[0].header("prefer"), Some("count=exact"));
    assert_eq!(seen[0].param("year"), vec!["eq.2023"]);
    assert!(seen[0].param("offset").is_empty());
}

#[test]
fn insert_posts_json_with_minimal_return() {
    let (base_url, server) = serve(vec![respond("201 Created", &[], "")]);
    let rows = vec![row(json!({"id": 1, "year": "2023"}))];
    source(&base_url, 1000).insert("floods", &rows).unwrap();

    let seen = server.join().unwrap();
    let request = &seen[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.header("prefer"), Some("return=minimal"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    let body: Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body, json!([{"id": 1, "year": "2023"}]));
}

#[test]
fn too_many_requests_becomes_an_attributed_rate_limit() {
    let (base_url, server) = serve(vec![respond(
        "429 Too Many Requests",
        &[("Retry-After", "30")],
        "",
    )]);
    let service = SubmissionService::new(
        Arc::new(source(&base_url, 1000)),
        &ClientConfig::new(&base_url, "test-key"),
    );
    let draft = SubmissionDraft {
        contributor: "maria@example.gr".into(),
        flood_id: Some(42),
        deaths_toll: Some(3),
        ..SubmissionDraft::default()
    };
    let err = service.submit(&draft, chrono::Utc::now()).unwrap_err();
    match err {
        FloodError::RateLimited {
            contributor,
            retry_after,
        } => {
            assert_eq!(contributor, "maria@example.gr");
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn insert_is_not_resent_after_a_lost_response() {
    let (base_url, server) = serve(vec![String::new(), respond("201 Created", &[], "")]);
    let service = SubmissionService::new(
        Arc::new(source(&base_url, 1000)),
        &ClientConfig::new(&base_url, "test-key"),
    );
    let draft = SubmissionDraft {
        contributor: "maria@example.gr".into(),
        flood_id: Some(42),
        deaths_toll: Some(3),
        ..SubmissionDraft::default()
    };
    let now = chrono::Utc::now();
    let err = service.submit(&draft, now).unwrap_err();
    assert!(matches!(err, FloodError::SourceUnavailable { .. }), "{err:?}");

    let seen = server.join().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(service.remaining("maria@example.gr", now), 5);
}

#[test]
fn insert_server_error_is_not_retried() {
    let (base_url, server) = serve(vec![
        respond("503 Service Unavailable", &[], ""),
        respond("201 Created", &[], ""),
    ]);
    let rows = vec![row(json!({"id": 1}))];
    let err = source(&base_url, 1000).insert("floods", &rows).unwrap_err();
    assert!(matches!(err, FloodError::Query { status: 503, .. }));
    assert_eq!(server.join().unwrap().len(), 1);
}

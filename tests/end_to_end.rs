//! End-to-end scenarios against a fake Gate (§8). Drives the engine
//! in-process (not the compiled binary) so stdout ordering assertions can
//! be made directly against a `Vec<u8>`, following the rationale the
//! ambient test-tooling section records for preferring `wiremock` here.

use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use target_stitch::batcher::{Batcher, BatcherConfig};
use target_stitch::message::parse_line;
use target_stitch::runtime::Runtime;
use target_stitch::sink::{HttpSink, Sink};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A `Write` sink backed by a `Vec<u8>` shared with the test, so assertions
/// can inspect what the background completion callback wrote to "stdout".
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

const SCHEMA: &str = r#"{"type":"SCHEMA","stream":"chicken_stream","schema":{"type":"object","properties":{"id":{"type":"integer"},"name":{"type":"string"}}},"key_properties":["id"]}"#;

fn record(id: i64, name: &str) -> String {
    format!(r#"{{"type":"RECORD","stream":"chicken_stream","record":{{"id":{id},"name":"{name}"}}}}"#)
}

fn state(id: i64) -> String {
    format!(r#"{{"type":"STATE","value":{{"bookmarks":{{"chicken_stream":{{"id":{id}}}}}}}}}"#)
}

async fn run_scenario(server_uri: &str, lines: &[String]) -> (Vec<String>, bool) {
    let runtime = Runtime::new(format!("{server_uri}/v2/import/batch"), "test-token".to_string(), false)
        .expect("runtime construction");

    let captured = Arc::new(Mutex::new(Vec::new()));
    let state_writer: Arc<Mutex<Box<dyn Write + Send>>> =
        Arc::new(Mutex::new(Box::new(SharedBuf(captured.clone())) as Box<dyn Write + Send>));

    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(HttpSink::new(
        runtime.dispatcher.clone(),
        runtime.pending.clone(),
        state_writer,
        1_000_000,
        2,
    ))];

    let config = BatcherConfig {
        max_batch_bytes: 1_000_000,
        max_batch_records: 2,
        batch_delay: Duration::from_secs(3600),
    };
    let mut batcher = Batcher::new(config, sinks);

    for (i, line) in lines.iter().enumerate() {
        let parsed = parse_line(line, i + 1).unwrap();
        batcher.handle(parsed.message, parsed.raw_len).unwrap();
    }
    batcher.finish().unwrap();

    let drain_result = runtime.drain().await;
    let output = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
    let lines_out: Vec<String> = output.lines().map(str::to_string).collect();
    (lines_out, drain_result.is_ok())
}

fn scenario_1_input() -> Vec<String> {
    vec![
        SCHEMA.to_string(),
        record(1, "Mike"),
        state(1),
        record(2, "Paul"),
        state(2),
        record(3, "Harrison"),
        state(3),
        record(4, "Cathy"),
    ]
}

#[tokio::test]
async fn scenario_1_in_order_all_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Mike"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Harrison"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (lines, ok) = run_scenario(&server.uri(), &scenario_1_input()).await;
    assert!(ok);
    assert_eq!(
        lines,
        vec![
            r#"{"bookmarks":{"chicken_stream":{"id":1}}}"#.to_string(),
            r#"{"bookmarks":{"chicken_stream":{"id":3}}}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn scenario_2_first_flush_has_no_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let input = vec![
        SCHEMA.to_string(),
        record(1, "Mike"),
        record(2, "Paul"),
        state(2),
        record(3, "Harrison"),
        state(3),
        record(4, "Cathy"),
    ];

    let (lines, ok) = run_scenario(&server.uri(), &input).await;
    assert!(ok);
    assert_eq!(lines, vec![r#"{"bookmarks":{"chicken_stream":{"id":3}}}"#.to_string()]);
}

#[tokio::test]
async fn scenario_3_out_of_order_completions_same_result_as_scenario_1() {
    let server = MockServer::start().await;
    // flush 1 (Mike/Paul) resolves slower than flush 2 (Harrison/Cathy).
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Mike"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Harrison"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (lines, ok) = run_scenario(&server.uri(), &scenario_1_input()).await;
    assert!(ok);
    assert_eq!(
        lines,
        vec![
            r#"{"bookmarks":{"chicken_stream":{"id":1}}}"#.to_string(),
            r#"{"bookmarks":{"chicken_stream":{"id":3}}}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn scenario_4_first_flush_4xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Mike"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "bad batch"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Harrison"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (lines, ok) = run_scenario(&server.uri(), &scenario_1_input()).await;
    assert!(!ok, "a 4xx on the first flush must be fatal");
    assert!(lines.is_empty());
}

#[tokio::test]
async fn scenario_5_second_flush_4xx_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Mike"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Harrison"))
        .respond_with(ResponseTemplate::new(400).set_delay(Duration::from_millis(80)))
        .mount(&server)
        .await;

    let (lines, ok) = run_scenario(&server.uri(), &scenario_1_input()).await;
    assert!(!ok);
    assert_eq!(lines, vec![r#"{"bookmarks":{"chicken_stream":{"id":1}}}"#.to_string()]);
}

#[tokio::test]
async fn scenario_6_second_flush_4xx_out_of_order() {
    let server = MockServer::start().await;
    // flush 2 fails and resolves before flush 1 succeeds.
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Mike"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/import/batch"))
        .and(body_string_contains("Harrison"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let (lines, ok) = run_scenario(&server.uri(), &scenario_1_input()).await;
    assert!(!ok);
    // Once flush 2's failure is recorded first, no further state is ever
    // emitted - including the id:1 state flush 1's later success would
    // otherwise have carried (see the Open Question decision in DESIGN.md).
    assert!(lines.is_empty());
}

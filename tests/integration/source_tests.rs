//! End-to-end crawls against mock sites
//!
//! These tests use wiremock to stand in for each source and run the real
//! HTTP fetcher, extractors and CSV sink.

use crate::common::read_csv;
use chrono::{TimeZone, Utc};
use holdings_harvest::config::{parse_config, Config};
use holdings_harvest::crawler::{plan_work_units, Coordinator, Exhaustion};
use holdings_harvest::HarvestError;
use std::path::Path;
use std::time::Instant;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a fast test configuration for `source` pointed at `base_url`
fn create_test_config(source: &str, base_url: &str, output: &Path, extra: &str) -> Config {
    parse_config(&format!(
        r#"
[crawler]
source = "{source}"
max-retries = 1
retry-delay-ms = 0
request-timeout-secs = 5

[rate-limit]
soft-limit = 100
min-spacing-ms = 0
max-spacing-ms = 0
cooldown-secs = 1

[user-agent]
value = "HarvestTest/1.0"

[output]
path = "{output}"
byte-order-mark = false

[source]
base-url = "{base_url}"

{extra}
"#,
        source = source,
        base_url = base_url,
        output = output.display(),
        extra = extra,
    ))
    .expect("test config should be valid")
}

fn column(header: &[String], name: &str) -> usize {
    header
        .iter()
        .position(|h| h == name)
        .unwrap_or_else(|| panic!("missing column {} in {:?}", name, header))
}

#[tokio::test]
async fn test_pullpush_pages_back_through_quarter() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("posts.csv");

    // First page of 2023Q1, starting at the quarter's last second.
    Mock::given(method("GET"))
        .and(path("/reddit/search/submission"))
        .and(query_param("before", "1680307199"))
        .and(query_param("after", "1672531200"))
        .and(query_param("subreddit", "wallstreetbets"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"data": [
                {"title": "GME earnings", "selftext": "holding $GME", "score": 10, "created_utc": 1680000000,
                 "author": "a", "permalink": "/r/wallstreetbets/1"},
                {"title": "Daily thread", "selftext": "nothing here", "created_utc": 1679000000,
                 "author": "b", "permalink": "/r/wallstreetbets/2"}
            ]}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Second page continues from the oldest post of the first.
    Mock::given(method("GET"))
        .and(path("/reddit/search/submission"))
        .and(query_param("before", "1679000000"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"data": [{"title": "gme and amc", "created_utc": 1678000000, "author": "c"}]}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Everything else is empty.
    Mock::given(method("GET"))
        .and(path("/reddit/search/submission"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data": []}"#))
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        "pullpush",
        &format!("{}/reddit/search/submission", mock_server.uri()),
        &output,
        r#"
tickers = ["GME", "AMC"]

[window]
start-year = 2023
end-year = 2023

[[target]]
id = "wallstreetbets"
label = "WSB"
"#,
    );

    let now = Utc.with_ymd_and_hms(2023, 5, 15, 0, 0, 0).unwrap();
    let units = plan_work_units(&config, now);
    assert_eq!(units.len(), 2);

    let coordinator = Coordinator::from_config(&config).unwrap();
    let report = coordinator.run(units).await.unwrap();

    let q1 = report.outcome("wallstreetbets:2023Q1").unwrap();
    assert_eq!(q1.exhaustion, Exhaustion::NoMoreData);
    assert_eq!(q1.pages_fetched, 3);
    assert_eq!(q1.records_flushed, 3);

    let q2 = report.outcome("wallstreetbets:2023Q2").unwrap();
    assert_eq!(q2.records_flushed, 0);

    let (header, rows) = read_csv(&output);
    assert_eq!(rows.len(), 3);
    let ticker = column(&header, "ticker");
    let tickers: Vec<&str> = rows.iter().map(|r| &r[ticker]).collect();
    assert_eq!(tickers, vec!["GME", "AMC", "GME"]);
    assert_eq!(&rows[0][column(&header, "quarter")], "1");
    assert_eq!(&rows[0][column(&header, "unit_id")], "wallstreetbets:2023Q1");
}

#[tokio::test]
async fn test_dataroma_history_follows_activity_links() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("history.csv");

    Mock::given(method("GET"))
        .and(path("/m/m_activity.php"))
        .and(query_param("m", "BRK"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><table id="grid">
                <tr><td><a href="/m/stock.php?sym=AAPL">Apple</a></td><td>Buy</td></tr>
                <tr><td><a href="hist/hist.php?f=BRK&s=KO">Coca Cola</a></td><td>Add</td></tr>
                <tr><td><a href="/m/stock.php?sym=AAPL">Apple</a></td><td>Reduce</td></tr>
            </table></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/m/hist/hist.php"))
        .and(query_param("s", "AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table>
                <tr><th>Period</th><th>Shares</th><th>% Change</th></tr>
                <tr><td>2024 Q1</td><td>789,368,450</td><td>-13%</td></tr>
                <tr><td>2023 Q4</td><td>905,560,000</td><td>-1%</td></tr>
                <tr><td>2023 Q3</td><td>915,560,382</td><td></td></tr>
            </table>"#,
        ))
        .mount(&mock_server)
        .await;

    // Too short to be a history table.
    Mock::given(method("GET"))
        .and(path("/m/hist/hist.php"))
        .and(query_param("s", "KO"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<table><tr><th>Period</th></tr><tr><td>2024 Q1</td></tr></table>",
        ))
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        "dataroma-history",
        &format!("{}/m", mock_server.uri()),
        &output,
        r#"
[[target]]
id = "BRK"
label = "Berkshire Hathaway"
tags = { style = "Value" }
"#,
    );

    let coordinator = Coordinator::from_config(&config).unwrap();
    let report = coordinator
        .run(plan_work_units(&config, Utc::now()))
        .await
        .unwrap();

    let outcome = report.outcome("BRK").unwrap();
    assert_eq!(outcome.exhaustion, Exhaustion::NoMoreData);
    assert_eq!(outcome.pages_skipped, 1);
    assert_eq!(outcome.records_flushed, 3);

    let (header, rows) = read_csv(&output);
    assert_eq!(
        header,
        vec!["unit_id", "label", "style", "Ticker", "Period", "Shares", "% Change"]
    );
    assert!(rows.iter().all(|r| &r[3] == "AAPL" && &r[2] == "Value"));
}

#[tokio::test]
async fn test_dataroma_holdings_per_quarter() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("holdings.csv");

    Mock::given(method("GET"))
        .and(path("/m/holdings.php"))
        .and(query_param("p", "2024-03-31"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table id="grid">
                <tr><th>Stock</th><th>Ticker</th><th>%</th><th>Shares</th><th>Price</th><th>Value</th></tr>
                <tr><td>Apple Inc.</td><td>AAPL</td><td>40.81%</td><td>789,368,450</td><td>$171.48</td><td>$135,360,000,000</td></tr>
                <tr><td>Bank of America</td><td>BAC</td><td>11.78%</td><td>1,032,852,006</td><td>$37.92</td><td>$39,165,700,000</td></tr>
            </table>"#,
        ))
        .mount(&mock_server)
        .await;

    // Quarters without a filing render no grid.
    Mock::given(method("GET"))
        .and(path("/m/holdings.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>No data</p>"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        "dataroma-holdings",
        &format!("{}/m/", mock_server.uri()),
        &output,
        r#"
[window]
start-year = 2024
end-year = 2024

[[target]]
id = "BRK"
label = "Berkshire Hathaway"
"#,
    );

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let coordinator = Coordinator::from_config(&config).unwrap();
    let report = coordinator.run(plan_work_units(&config, now)).await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.units_failed(), 0);
    assert_eq!(report.records_written(), 2);

    let (header, rows) = read_csv(&output);
    assert_eq!(&rows[0][column(&header, "period_end")], "2024-03-31");
    assert_eq!(&rows[0][column(&header, "Weight_Pct")], "40.81");
    assert_eq!(&rows[1][column(&header, "Value")], "39165700000");
}

#[tokio::test]
async fn test_whalewisdom_keeps_top_rows() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("whales.csv");

    let rows: String = (1..=25)
        .map(|i| format!("<tr><td>STOCK{}</td><td></td><td>{}</td></tr>", i, i * 1000))
        .collect();
    Mock::given(method("GET"))
        .and(path("/filer/berkshire-hathaway-inc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<table id="holdings_table"><tr><th>Stock</th><th>Sector</th><th>Shares</th></tr>{}</table>"#,
            rows
        )))
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        "whalewisdom",
        &mock_server.uri(),
        &output,
        r#"
[[target]]
id = "berkshire-hathaway-inc"
label = "Berkshire Hathaway"
"#,
    );

    let coordinator = Coordinator::from_config(&config).unwrap();
    coordinator
        .run(plan_work_units(&config, Utc::now()))
        .await
        .unwrap();

    let (header, rows) = read_csv(&output);
    assert_eq!(rows.len(), 20);
    assert!(!header.contains(&"Sector".to_string()));
    assert_eq!(&rows[19][column(&header, "Stock")], "STOCK20");
}

#[tokio::test]
async fn test_throttled_request_is_retried_after_cooldown() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("whales.csv");

    Mock::given(method("GET"))
        .and(path("/filer/scion"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/filer/scion"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table id="holdings_table"><tr><th>Stock</th></tr><tr><td>GEO</td></tr></table>"#,
        ))
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        "whalewisdom",
        &mock_server.uri(),
        &output,
        r#"
[[target]]
id = "scion"
label = "Scion Asset Management"
"#,
    );

    let started = Instant::now();
    let coordinator = Coordinator::from_config(&config).unwrap();
    let report = coordinator
        .run(plan_work_units(&config, Utc::now()))
        .await
        .unwrap();

    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
    assert_eq!(report.units_failed(), 0);
    assert_eq!(report.records_written(), 1);
}

#[tokio::test]
async fn test_unreachable_source_fails_run() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("whales.csv");

    // Nothing listens on the discard port.
    let config = create_test_config(
        "whalewisdom",
        "http://127.0.0.1:9",
        &output,
        r#"
[[target]]
id = "a"
label = "A"

[[target]]
id = "b"
label = "B"
"#,
    );

    let coordinator = Coordinator::from_config(&config).unwrap();
    let result = coordinator.run(plan_work_units(&config, Utc::now())).await;

    assert!(matches!(result, Err(HarvestError::SourceUnreachable(_))));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_separate_runs_append_without_second_header() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("whales.csv");

    Mock::given(method("GET"))
        .and(path("/filer/scion"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table id="holdings_table"><tr><th>Stock</th></tr><tr><td>GEO</td></tr><tr><td>BABA</td></tr></table>"#,
        ))
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        "whalewisdom",
        &mock_server.uri(),
        &output,
        r#"
[[target]]
id = "scion"
label = "Scion Asset Management"
"#,
    );

    for _ in 0..2 {
        let coordinator = Coordinator::from_config(&config).unwrap();
        coordinator
            .run(plan_work_units(&config, Utc::now()))
            .await
            .unwrap();
    }

    let (_, rows) = read_csv(&output);
    assert_eq!(rows.len(), 4);
    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(content.matches("unit_id").count(), 1);
}

#[tokio::test]
async fn test_dataroma_performance_reads_first_table() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("performance.csv");

    Mock::given(method("GET"))
        .and(path("/m/perf.php"))
        .and(query_param("m", "BRK"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table id="perf">
                <tr><th>Year</th><th>Portfolio</th><th>S&amp;P 500</th></tr>
                <tr><td>2023</td><td>17.4%</td><td>24.2%</td></tr>
                <tr><td>2022</td><td>-4.1%</td><td>-19.4%</td></tr>
            </table>
            <table><tr><td>footer</td></tr></table>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Managers without a performance page render no table.
    Mock::given(method("GET"))
        .and(path("/m/perf.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Not found</p>"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        "dataroma-performance",
        &format!("{}/m", mock_server.uri()),
        &output,
        r#"
[[target]]
id = "BRK"
label = "Berkshire Hathaway"

[[target]]
id = "NEW"
label = "New Manager"
"#,
    );

    let coordinator = Coordinator::from_config(&config).unwrap();
    let report = coordinator
        .run(plan_work_units(&config, Utc::now()))
        .await
        .unwrap();

    assert_eq!(report.units_failed(), 0);
    assert_eq!(report.outcome("NEW").unwrap().records_flushed, 0);

    let (header, rows) = read_csv(&output);
    assert_eq!(header, vec!["unit_id", "label", "Year", "Portfolio", "S&P 500"]);
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[1][2], "2022");
    assert_eq!(&rows[1][3], "-4.1%");
}

use std::io::Write;
use std::time::Duration;

use loadtest::config::Config;
use loadtest::payload::{HOUSING_ID, LANDLORD_COUNT};
use loadtest::{Driver, RunReport, Stage};
use loadtest_test::server::{TestServer, unreachable_url};

fn millis(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// A short profile ramping to three users and back.
fn short_config(target: String) -> Config {
    Config {
        target,
        stages: vec![
            Stage::new(millis(200), 3),
            Stage::new(millis(300), 3),
            Stage::new(millis(200), 0),
        ],
        pacing: millis(20),
        ramp_interval: millis(10),
        graceful_stop: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
        seed: Some(7),
        ..Default::default()
    }
}

async fn run(config: &Config) -> RunReport {
    Driver::configure(config)
        .await
        .expect("valid configuration")
        .run()
        .await
}

#[tokio::test]
async fn test_posts_agreement_requests() {
    loadtest_test::tracing::init();
    let server = TestServer::new().await;

    let report = run(&short_config(server.url("/"))).await;

    assert!(report.iterations > 0);
    assert_eq!(report.checks_failed, 0);
    assert!(report.passed(), "{report:?}");

    let requests = server.requests();
    assert_eq!(requests.len() as u64, report.iterations);
    for request in requests {
        assert_eq!(request.authorization.as_deref(), Some("Bearer dummy_token"));
        assert_eq!(request.content_type.as_deref(), Some("application/json"));

        let body = request.body.as_object().expect("JSON object body");
        assert_eq!(body.len(), 4, "{body:?}");
        let landlord = body["landlord_id"].as_str().unwrap();
        assert_eq!(body["tenant_id"], landlord);
        assert_eq!(body["_uid"], landlord);
        assert_eq!(body["housing_id"], HOUSING_ID);

        let n: u32 = landlord.strip_prefix("landlord").unwrap().parse().unwrap();
        assert!((1..=LANDLORD_COUNT).contains(&n));
    }
}

#[tokio::test]
async fn test_failed_checks_are_counted() {
    loadtest_test::tracing::init();
    let server = TestServer::builder().fail_first(1).start().await;

    let report = run(&short_config(server.url("/"))).await;

    assert!(report.iterations > 1);
    assert_eq!(report.checks_failed, 1);
    assert_eq!(report.status_codes.get(&500), Some(&1));
    // failed checks do not affect the latency threshold
    assert!(report.passed());
}

#[tokio::test]
async fn test_slow_target_fails_threshold() {
    loadtest_test::tracing::init();
    let server = TestServer::builder().delay(millis(150)).start().await;

    let mut config = short_config(server.url("/"));
    config.thresholds = vec!["p(95)<100".parse().unwrap(), "max<5000".parse().unwrap()];
    let report = run(&config).await;

    assert_eq!(report.checks_failed, 0);
    assert!(!report.thresholds[0].passed);
    assert!(report.thresholds[1].passed);
    assert!(!report.passed());
}

#[tokio::test]
async fn test_unreachable_target() {
    loadtest_test::tracing::init();

    let report = run(&short_config(unreachable_url())).await;

    assert!(report.iterations > 0);
    assert_eq!(report.checks_failed, report.iterations);
    assert!(report.status_codes.is_empty());
    assert_eq!(report.errors.get("connect"), Some(&report.iterations));
    // refused connections still have a request duration
    assert!(report.latency.is_some());
}

#[tokio::test]
async fn test_token_file() {
    loadtest_test::tracing::init();
    let server = TestServer::new().await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "  header.payload.signature  ").unwrap();

    let mut config = short_config(server.url("/"));
    config.token_file = Some(file.path().into());
    let report = run(&config).await;

    assert!(report.passed());
    let requests = server.requests();
    assert!(!requests.is_empty());
    for request in requests {
        assert_eq!(
            request.authorization.as_deref(),
            Some("Bearer header.payload.signature")
        );
    }
}

#[tokio::test]
async fn test_base_path_is_preserved() {
    let server = TestServer::new().await;

    // requests go to `/api/agreement/generate`, which the server does not route
    let report = run(&short_config(server.url("/api/"))).await;

    assert!(server.requests().is_empty());
    assert_eq!(report.status_codes.get(&404), Some(&report.iterations));
}

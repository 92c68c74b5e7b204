//! End-to-end tests over plaintext HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;

mod common;

use common::{start_echo_upstream, start_gateway, test_config, MemoryPipeline, WarningLog};

fn site() -> Arc<MemoryPipeline> {
    let pipeline = MemoryPipeline::new();
    pipeline.set_file("index.html", "<!doctype html><title>app</title>", "text/html");
    pipeline.set_file("js/app.js", "console.log('v1')", "text/javascript");
    pipeline
}

/// Read from a streaming response until the accumulated text contains
/// `needle`.
async fn read_until(response: &mut reqwest::Response, buffer: &mut String, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !buffer.contains(needle) {
            match response.chunk().await.unwrap() {
                Some(chunk) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                None => panic!("stream ended before {needle:?}; got {buffer:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; got {buffer:?}"));
}

#[tokio::test]
async fn proxy_round_trip_is_byte_identical() {
    let upstream = start_echo_upstream().await;
    let gateway = start_gateway(test_config(upstream), site()).await;

    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let response = reqwest::Client::new()
        .post(gateway.url("/api/users?page=2"))
        .body(body.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["x-seen-method"], "POST");
    assert_eq!(headers["x-seen-path"], "/api/users?page=2");
    assert_eq!(headers["x-seen-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["x-seen-forwarded-proto"], "http");
    assert_eq!(headers["x-seen-host"], gateway.addr.to_string().as_str());
    assert_eq!(response.bytes().await.unwrap().as_ref(), body.as_slice());

    gateway.stop().await;
}

#[tokio::test]
async fn forwarded_for_only_with_xfwd() {
    let upstream = start_echo_upstream().await;
    let mut config = test_config(upstream);
    config.upstream.xfwd = false;
    let gateway = start_gateway(config, site()).await;

    let response = reqwest::get(gateway.url("/api/me")).await.unwrap();
    assert_eq!(response.headers()["x-seen-forwarded-for"], "-");

    gateway.stop().await;
}

#[tokio::test]
async fn change_origin_rewrites_host() {
    let upstream = start_echo_upstream().await;
    let mut config = test_config(upstream);
    config.upstream.change_origin = true;
    let gateway = start_gateway(config, site()).await;

    let response = reqwest::get(gateway.url("/api/me")).await.unwrap();
    assert_eq!(
        response.headers()["x-seen-host"],
        upstream.to_string().as_str()
    );

    gateway.stop().await;
}

#[tokio::test]
async fn request_id_reaches_upstream_and_client() {
    let upstream = start_echo_upstream().await;
    let gateway = start_gateway(test_config(upstream), site()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(gateway.url("/api/me"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-seen-request-id"], "req-123");
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = client.get(gateway.url("/api/me")).send().await.unwrap();
    let generated = response.headers()["x-request-id"].clone();
    assert_eq!(response.headers()["x-seen-request-id"], generated);
    assert_eq!(generated.len(), 36);

    gateway.stop().await;
}

#[tokio::test]
async fn refused_upstream_is_502_within_timeout() {
    let upstream = common::refused_addr().await;
    let gateway = start_gateway(test_config(upstream), site()).await;

    let warnings = WarningLog::default();
    let _log =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(warnings.clone()));

    let client = reqwest::Client::new();
    for attempt in 1..=2 {
        let started = Instant::now();
        let response = client.get(gateway.url("/api/users")).send().await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(started.elapsed() < Duration::from_secs(3));

        // One line per failed request, and nothing else at warn or above.
        assert_eq!(warnings.count("Proxy request failed"), attempt);
        assert_eq!(warnings.total(), attempt);
    }

    gateway.stop().await;
}

#[tokio::test]
async fn silent_upstream_is_504_after_idle_timeout() {
    let upstream = common::start_silent_upstream().await;
    let mut config = test_config(upstream);
    config.timeouts.idle_secs = 1;
    let gateway = start_gateway(config, site()).await;

    let started = Instant::now();
    let response = reqwest::get(gateway.url("/api/slow")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(elapsed >= Duration::from_millis(900), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");

    gateway.stop().await;
}

#[tokio::test]
async fn oversized_body_is_413() {
    let upstream = start_echo_upstream().await;
    let mut config = test_config(upstream);
    config.limits.max_body_bytes = 16;
    let gateway = start_gateway(config, site()).await;

    let response = reqwest::Client::new()
        .post(gateway.url("/api/upload"))
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    gateway.stop().await;
}

#[tokio::test]
async fn upstream_body_is_streamed() {
    let release = Arc::new(Notify::new());
    let upstream = common::start_streaming_upstream("first|", "second", Arc::clone(&release)).await;
    let gateway = start_gateway(test_config(upstream), site()).await;

    let mut response = reqwest::get(gateway.url("/api/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The first chunk must arrive while the upstream is still holding back
    // the rest of the body.
    let mut buffer = String::new();
    read_until(&mut response, &mut buffer, "first|").await;

    release.notify_one();
    read_until(&mut response, &mut buffer, "second").await;
    assert_eq!(buffer, "first|second");

    gateway.stop().await;
}

#[tokio::test]
async fn local_paths_serve_build_output() {
    let upstream = start_echo_upstream().await;
    let gateway = start_gateway(test_config(upstream), site()).await;
    let client = reqwest::Client::new();

    let response = client.get(gateway.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-build-generation"], "1");
    let etag = response.headers()["etag"].clone();
    assert_eq!(
        response.text().await.unwrap(),
        "<!doctype html><title>app</title>"
    );

    let response = client
        .get(gateway.url("/"))
        .header("if-none-match", etag)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let response = client.get(gateway.url("/app.js")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "console.log('v1')");

    let response = client.head(gateway.url("/js/app.js")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "17");

    let response = client.get(gateway.url("/nope.js")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.post(gateway.url("/index.html")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    gateway.stop().await;
}

#[tokio::test]
async fn live_channel_reports_rebuilds() {
    let upstream = start_echo_upstream().await;
    let pipeline = site();
    let gateway = start_gateway(test_config(upstream), Arc::clone(&pipeline)).await;

    let mut live = reqwest::get(gateway.url("/__live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);
    assert_eq!(live.headers()["content-type"], "text/event-stream");

    let mut buffer = String::new();
    read_until(&mut live, &mut buffer, "event: sync").await;
    read_until(&mut live, &mut buffer, "{\"generation\":1}").await;

    pipeline.set_file("js/app.js", "console.log('v2')", "text/javascript");
    gateway.adapter.on_source_changed();
    read_until(&mut live, &mut buffer, "event: generation").await;
    read_until(&mut live, &mut buffer, "\"generation\":2").await;
    assert!(buffer.contains("js/app.js"));

    let body = reqwest::get(gateway.url("/app.js")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "console.log('v2')");

    pipeline.fail_next();
    gateway.adapter.on_source_changed();
    read_until(&mut live, &mut buffer, "event: build-failed").await;
    read_until(&mut live, &mut buffer, "Module not found").await;

    // The failed build left the last good output in place.
    let body = reqwest::get(gateway.url("/app.js")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "console.log('v2')");

    gateway.stop().await;
}

#[tokio::test]
async fn shutdown_ends_live_streams() {
    let upstream = start_echo_upstream().await;
    let gateway = start_gateway(test_config(upstream), site()).await;

    let mut live = reqwest::get(gateway.url("/__live")).await.unwrap();
    let mut buffer = String::new();
    read_until(&mut live, &mut buffer, "event: sync").await;

    gateway.shutdown.trigger();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match live.chunk().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    })
    .await;
    assert!(ended.is_ok());

    let result = tokio::time::timeout(Duration::from_secs(10), gateway.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

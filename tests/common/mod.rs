//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use dev_gateway::build::{BuildAdapter, BuildError, BuildPipeline, BuildResult, BuiltAsset};
use dev_gateway::config::{GatewayConfig, ListenerMode, RouteConfig};
use dev_gateway::net::Listener;
use dev_gateway::{GatewayServer, Shutdown};

/// Start an upstream that echoes the request body and reports what it saw
/// in `x-seen-*` response headers.
pub async fn start_echo_upstream() -> SocketAddr {
    async fn echo(request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

        let mut response = Response::new(Body::from(body));
        let seen = response.headers_mut();
        let copy = |name: &str| {
            parts
                .headers
                .get(name)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("-"))
        };
        seen.insert("x-seen-forwarded-for", copy("x-forwarded-for"));
        seen.insert("x-seen-forwarded-proto", copy("x-forwarded-proto"));
        seen.insert("x-seen-host", copy("host"));
        seen.insert("x-seen-request-id", copy("x-request-id"));
        seen.insert("x-seen-method", HeaderValue::from_str(parts.method.as_str()).unwrap());
        seen.insert(
            "x-seen-path",
            HeaderValue::from_str(&parts.uri.to_string()).unwrap(),
        );
        response
    }

    serve_upstream(Router::new().fallback(echo)).await
}

/// Start an upstream that sends `first`, then waits for `release` before
/// sending `second` and ending the body.
pub async fn start_streaming_upstream(
    first: &'static str,
    second: &'static str,
    release: Arc<Notify>,
) -> SocketAddr {
    let app = Router::new().fallback(move || {
        let release = Arc::clone(&release);
        async move {
            let chunks = futures_util::stream::unfold(0u8, move |step| {
                let release = Arc::clone(&release);
                async move {
                    match step {
                        0 => Some((Ok::<_, std::io::Error>(Bytes::from(first)), 1)),
                        1 => {
                            release.notified().await;
                            Some((Ok(Bytes::from(second)), 2))
                        }
                        _ => None,
                    }
                }
            });
            Response::new(Body::from_stream(chunks))
        }
    });
    serve_upstream(app).await
}

async fn serve_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start an upstream that accepts connections but never answers.
pub async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// In-memory build pipeline driven by the test.
#[derive(Default)]
pub struct MemoryPipeline {
    files: Mutex<HashMap<String, BuiltAsset>>,
    fail_next: AtomicBool,
}

impl MemoryPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_file(&self, path: &str, content: &str, content_type: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), BuiltAsset::new(content.to_string(), content_type));
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BuildPipeline for MemoryPipeline {
    async fn trigger_build(&self) -> Result<BuildResult, BuildError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BuildError::Failed("Module not found: ./missing".into()));
        }
        let files = self.files.lock().unwrap().clone();
        Ok(BuildResult {
            changed_paths: files.keys().cloned().collect(),
            artifacts: files,
        })
    }
}

/// Plaintext config pointing at `upstream`, proxying only `/api/`.
pub fn test_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.mode = ListenerMode::Plaintext;
    config.upstream.url = format!("http://{upstream}");
    config.routes = vec![RouteConfig::Regex("^/api/".into())];
    config.timeouts.connect_secs = 2;
    config.timeouts.idle_secs = 5;
    config.build.watch = false;
    config.live.heartbeat_secs = 1;
    config
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub adapter: BuildAdapter,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.handle.await;
    }
}

/// Start a gateway on an ephemeral port and wait for its initial build.
pub async fn start_gateway(config: GatewayConfig, pipeline: Arc<MemoryPipeline>) -> TestGateway {
    let server = GatewayServer::with_pipeline(config, pipeline)
        .await
        .expect("gateway starts");
    let adapter = server.adapter().clone();

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 64);

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    // The accept loop starts after the initial build.
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if adapter.rebuild_count() > 0
            && client
                .get(format!("http://{addr}/__probe"))
                .send()
                .await
                .is_ok()
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    TestGateway {
        addr,
        adapter,
        shutdown,
        handle,
    }
}

/// Tracing layer that counts `WARN` and `ERROR` events by message.
///
/// Install it with `tracing::subscriber::set_default` in a current-thread
/// test; every task of the gateway then reports to it.
#[derive(Clone, Default)]
pub struct WarningLog {
    messages: Arc<Mutex<Vec<String>>>,
}

impl WarningLog {
    /// Events logged with exactly `message`.
    pub fn count(&self, message: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.as_str() == message)
            .count()
    }

    pub fn total(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl<S: Subscriber> Layer<S> for WarningLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > Level::WARN {
            return;
        }
        let mut message = MessageField(String::new());
        event.record(&mut message);
        self.messages.lock().unwrap().push(message.0);
    }
}

struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

//! Gateway server setup and request dispatch.
//!
//! # Responsibilities
//! - Run every startup check before a port is opened
//! - Drive the accept loop: TLS handshake, then HTTP serving per connection
//! - Wire up middleware (request ID, tracing)
//! - Dispatch each request: classify, then forward or serve locally
//! - Drain connections on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::IF_NONE_MATCH;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::build::{BuildAdapter, BuildPipeline, CommandPipeline, SourceWatcher};
use crate::config::{validate_config, GatewayConfig, ListenerMode, LiveConfig};
use crate::error::{GatewayError, StartupError};
use crate::http::request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
use crate::http::response::artifact_response;
use crate::lifecycle::Shutdown;
use crate::live::{sse_response, LiveHub};
use crate::net::{
    serve_connection, ConnectionState, ConnectionStatus, ConnectionTracker, Listener,
    ListenerError, TlsAcceptor, TlsIdentity,
};
use crate::observability::metrics;
use crate::proxy::{ForwardContext, Forwarder, UpstreamTarget};
use crate::routing::{Classification, Classifier};

/// How long open connections get to finish after shutdown is triggered.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<Classifier>,
    pub forwarder: Forwarder,
    pub adapter: BuildAdapter,
    pub hub: LiveHub,
    pub live: Arc<LiveConfig>,
    pub listener_scheme: &'static str,
    pub listener_port: u16,
    pub log_requests: bool,
}

/// The development gateway.
///
/// Construction performs every startup check; [`run`](Self::run) only
/// serves.
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    state: AppState,
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
}

impl GatewayServer {
    /// Start-up with the command-driven build pipeline.
    pub async fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let pipeline = Arc::new(CommandPipeline::new(&config.build));
        Self::with_pipeline(config, pipeline).await
    }

    /// Start-up with a caller-supplied build pipeline.
    ///
    /// Fails on invalid configuration, incomplete or unreadable TLS
    /// material, an invalid route pattern, or an unresolvable upstream
    /// (refusing too, with `upstream.probe_on_startup`).
    pub async fn with_pipeline(
        config: GatewayConfig,
        pipeline: Arc<dyn BuildPipeline>,
    ) -> Result<Self, StartupError> {
        validate_config(&config).map_err(StartupError::Invalid)?;

        let tls = match config.listener.mode {
            ListenerMode::Tls => {
                let identity = TlsIdentity::load(&config.listener.tls)?;
                let timeout = Duration::from_secs(config.listener.handshake_timeout_secs);
                Some(identity.acceptor(timeout)?)
            }
            ListenerMode::Plaintext => None,
        };

        let classifier = Classifier::from_config(&config.effective_routes())
            .map_err(|(pattern, source)| StartupError::Route { pattern, source })?;

        let target = UpstreamTarget::from_config(&config.upstream)?;
        let unreachable = |source| StartupError::UpstreamUnreachable {
            target: target.to_string(),
            source,
        };
        target.resolve().await.map_err(unreachable)?;
        if config.upstream.probe_on_startup {
            target
                .probe(Duration::from_secs(config.timeouts.connect_secs))
                .await
                .map_err(unreachable)?;
        }

        tracing::info!(
            upstream = %target,
            routes = classifier.rules().len(),
            mode = config.listener.mode.scheme(),
            "Gateway configured"
        );

        let forwarder = Forwarder::new(target, &config.timeouts, &config.limits)?;
        let hub = LiveHub::new(config.live.queue_capacity);
        let adapter = BuildAdapter::new(pipeline, hub.clone(), &config.build);

        let state = AppState {
            classifier: Arc::new(classifier),
            forwarder,
            adapter,
            hub,
            live: Arc::new(config.live.clone()),
            listener_scheme: config.listener.mode.scheme(),
            listener_port: 0,
            log_requests: config.observability.log_requests,
        };

        Ok(Self {
            config: Arc::new(config),
            state,
            tls,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Build the router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http().on_failure(()))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// Warm the cache, then serve until `shutdown` is triggered.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let local_addr = listener.local_addr()?;

        let generation = self.state.adapter.rebuild_now().await;
        tracing::info!(generation, "Initial build finished");

        let _watcher = if self.config.build.watch {
            match SourceWatcher::new(&self.config.build)
                .spawn(self.state.adapter.clone(), shutdown.subscribe())
            {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Source watching disabled");
                    None
                }
            }
        } else {
            None
        };

        let mut state = self.state.clone();
        state.listener_port = local_addr.port();
        let app = Self::build_router(state);

        tracing::info!(
            address = %local_addr,
            scheme = self.state.listener_scheme,
            upstream = %self.state.forwarder.target(),
            "Gateway listening"
        );

        let mut stop = shutdown.subscribe();
        loop {
            let (stream, peer, permit) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Listener stopped");
                        break;
                    }
                },
                _ = stop.recv() => break,
            };

            let guard = self.tracker.track();
            let app = app.clone();
            let tls = self.tls.clone();
            let connection_shutdown = shutdown.subscribe();

            tokio::spawn(async move {
                let _permit = permit;
                let status = guard.status().clone();

                match tls {
                    Some(acceptor) => {
                        status.transition(ConnectionState::Handshaking);
                        match acceptor.handshake(stream, peer).await {
                            Ok(stream) => {
                                serve_connection(stream, peer, app, status, connection_shutdown)
                                    .await
                            }
                            Err(e) => {
                                let reason = if e.is_timeout() { "timeout" } else { "error" };
                                tracing::warn!(
                                    peer_addr = %peer,
                                    connection_id = %guard.id(),
                                    reason,
                                    error = %e.source,
                                    "TLS handshake failed"
                                );
                                metrics::record_handshake_failure(reason);
                            }
                        }
                    }
                    None => serve_connection(stream, peer, app, status, connection_shutdown).await,
                }

                drop(guard);
            });
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Stopped accepting connections"
        );
        self.state.hub.close();

        if self.tracker.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::info!("All connections closed");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout elapsed, abandoning open connections"
            );
        }
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn adapter(&self) -> &BuildAdapter {
        &self.state.adapter
    }

    pub fn hub(&self) -> &LiveHub {
        &self.state.hub
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }
}

/// Classify, then forward or serve.
async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request.request_id().to_string();
    let status = request.extensions().get::<ConnectionStatus>().cloned();
    let transition = |next| {
        if let Some(status) = &status {
            status.transition(next);
        }
    };

    transition(ConnectionState::Routing);
    let (classification, rule) = state.classifier.classify_with_rule(&path);

    if state.log_requests {
        tracing::info!(request_id = %request_id, method = %method, path = %path, %classification, ?rule, "Request");
    } else {
        tracing::debug!(request_id = %request_id, method = %method, path = %path, %classification, ?rule, "Request");
    }

    let response = match classification {
        Classification::Proxy => {
            transition(ConnectionState::Proxying);
            let ctx = ForwardContext {
                peer,
                scheme: state.listener_scheme,
                port: state.listener_port,
            };
            match state.forwarder.forward(request, &ctx).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        path = %path,
                        %classification,
                        upstream = %state.forwarder.target(),
                        status = e.status().as_u16(),
                        error = %e,
                        "Proxy request failed"
                    );
                    GatewayError::from(e).into_response()
                }
            }
        }
        Classification::LocalServe => {
            transition(ConnectionState::Serving);
            serve_local(&state, &request, &path, &request_id)
        }
    };

    metrics::record_request(
        method.as_str(),
        response.status().as_u16(),
        classification.as_str(),
        start,
    );
    response
}

fn serve_local(state: &AppState, request: &Request<Body>, path: &str, request_id: &str) -> Response {
    if path == state.live.path {
        let channel = state.hub.subscribe();
        tracing::debug!(request_id = %request_id, client_id = channel.id(), "Live client connected");
        return sse_response(
            channel,
            state.adapter.generation(),
            Duration::from_secs(state.live.heartbeat_secs),
        );
    }

    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return GatewayError::MethodNotAllowed(method.clone()).into_response();
    }

    match state.adapter.serve(path) {
        Ok(served) => artifact_response(&served, method, request.headers().get(IF_NONE_MATCH)),
        Err(e) => {
            tracing::debug!(
                request_id = %request_id,
                path = %path,
                classification = %Classification::LocalServe,
                upstream = %state.forwarder.target(),
                "No build output"
            );
            GatewayError::from(e).into_response()
        }
    }
}

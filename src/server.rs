//! Admin HTTP server
//!
//! Read-only endpoints for health checks, scraping and operators:
//!
//! | Path | Response |
//! |------|----------|
//! | `/healthz`, `/livez` | `ok` |
//! | `/readyz` | `ok`, or 503 when the distributed tier is unreachable |
//! | `/metrics` | Prometheus text format |
//! | `/stats` | JSON statistics of every region plus global totals |
//! | `/stats/{region}` | JSON statistics of one region |
//! | `/warmup` | JSON report of the last warm-up run |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::{CacheFacade, GlobalStats, RegionStats};
use crate::error::{Error, Result};
use crate::metrics::CacheMetrics;
use crate::warmup::WarmupScheduler;

/// Everything the admin endpoints read from
#[derive(Debug, Clone)]
pub struct AdminState {
    pub facade: Arc<CacheFacade>,
    pub metrics: Arc<CacheMetrics>,
    pub warmup: Option<Arc<WarmupScheduler>>,
}

/// One region as shown by `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct RegionView {
    #[serde(flatten)]
    pub stats: RegionStats,
    pub ttl_seconds: u64,
    pub local_entries: usize,
}

/// Body of `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub backend: &'static str,
    pub global: GlobalStats,
    pub regions: Vec<RegionView>,
}

impl AdminState {
    fn region_view(&self, name: &str) -> Option<RegionView> {
        let region = self.facade.catalog().get(name)?;
        Some(RegionView {
            stats: self.facade.stats(name),
            ttl_seconds: region.ttl().as_secs(),
            local_entries: self.facade.local_len(name),
        })
    }

    fn stats_view(&self) -> StatsView {
        StatsView {
            backend: self.facade.distributed().backend_name(),
            global: self.facade.global_stats(),
            regions: self
                .facade
                .regions()
                .iter()
                .filter_map(|name| self.region_view(name))
                .collect(),
        }
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn json<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec_pretty(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {}", e)),
    }
}

/// Route a request to its endpoint
pub async fn route(state: &AdminState, method: &Method, path: &str) -> Response<Full<Bytes>> {
    if method != Method::GET && method != Method::HEAD {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match path {
        "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
        "/readyz" => match state.facade.distributed().ping().await {
            Ok(()) => text(StatusCode::OK, "ok"),
            Err(e) => {
                warn!(error = %e, "Readiness check failed");
                text(StatusCode::SERVICE_UNAVAILABLE, "distributed tier unavailable")
            }
        },
        "/metrics" => {
            state.metrics.update(&state.facade);
            match state.metrics.encode() {
                Ok(buffer) => {
                    let mut response = text(StatusCode::OK, buffer);
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                    response
                }
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        "/stats" => json(&state.stats_view()),
        "/warmup" => match state.warmup.as_ref().and_then(|w| w.last_report()) {
            Some(report) => json(&report),
            None => text(StatusCode::NOT_FOUND, "no warm-up has run"),
        },
        _ => match path.strip_prefix("/stats/") {
            Some(region) => match state.region_view(region) {
                Some(view) => json(&view),
                None => text(StatusCode::NOT_FOUND, format!("unknown region: {}", region)),
            },
            None => text(StatusCode::NOT_FOUND, "not found"),
        },
    }
}

/// Serve the admin endpoints until cancelled
pub async fn serve(addr: &str, state: AdminState, cancel: CancellationToken) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid admin server address {}: {}", addr, e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Admin server listening on {}", addr);

    let state = Arc::new(state);

    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Admin server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Admin server accept error: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let state = Arc::clone(&state);
                async move {
                    Ok::<_, Infallible>(route(&state, req.method(), req.uri().path()).await)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Admin server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

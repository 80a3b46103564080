//! Prometheus exposition for `GET /metrics`.
//!
//! Request counts and latencies are recorded per route template by
//! [`track_requests`], so `/trigger/{id}` is one series no matter which id
//! was asked for.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Upper bounds of the latency histogram, in seconds.
const LATENCY_BUCKETS: [f64; 3] = [0.1, 0.5, 1.0];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RequestKey {
    handler: String,
    method: String,
    status: u16,
}

#[derive(Debug, Default)]
struct Latency {
    buckets: [u64; LATENCY_BUCKETS.len()],
    count: u64,
    sum: f64,
}

impl Latency {
    fn observe(&mut self, seconds: f64) {
        for (bucket, bound) in self.buckets.iter_mut().zip(LATENCY_BUCKETS) {
            if seconds <= bound {
                *bucket += 1;
            }
        }
        self.count += 1;
        self.sum += seconds;
    }
}

#[derive(Default)]
struct Recorded {
    requests: BTreeMap<RequestKey, u64>,
    latency: BTreeMap<(String, String), Latency>,
}

pub struct Metrics {
    version: String,
    hash: String,
    recorded: Mutex<Recorded>,
}

impl Metrics {
    pub fn new(version: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            hash: hash.into(),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn observe_request(&self, handler: &str, method: &str, status: u16, seconds: f64) {
        let mut recorded = self.recorded();
        *recorded
            .requests
            .entry(RequestKey {
                handler: handler.to_string(),
                method: method.to_string(),
                status,
            })
            .or_default() += 1;
        recorded
            .latency
            .entry((handler.to_string(), method.to_string()))
            .or_default()
            .observe(seconds);
    }

    /// Text exposition format, version 0.0.4.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP build_information_info Build information\n");
        out.push_str("# TYPE build_information_info gauge\n");
        let _ = writeln!(
            out,
            "build_information_info{{hash=\"{}\",version=\"{}\"}} 1",
            escape(&self.hash),
            escape(&self.version)
        );

        let recorded = self.recorded();

        out.push_str("# HELP http_requests_total Total number of requests by handler, method and status.\n");
        out.push_str("# TYPE http_requests_total counter\n");
        for (key, count) in &recorded.requests {
            let _ = writeln!(
                out,
                "http_requests_total{{handler=\"{}\",method=\"{}\",status=\"{}\"}} {count}",
                escape(&key.handler),
                escape(&key.method),
                key.status
            );
        }

        out.push_str("# HELP http_request_duration_seconds Latency of requests by handler and method.\n");
        out.push_str("# TYPE http_request_duration_seconds histogram\n");
        for ((handler, method), latency) in &recorded.latency {
            let labels = format!("handler=\"{}\",method=\"{}\"", escape(handler), escape(method));
            for (bound, count) in LATENCY_BUCKETS.iter().zip(latency.buckets) {
                let _ = writeln!(
                    out,
                    "http_request_duration_seconds_bucket{{{labels},le=\"{bound:?}\"}} {count}"
                );
            }
            let _ = writeln!(
                out,
                "http_request_duration_seconds_bucket{{{labels},le=\"+Inf\"}} {}",
                latency.count
            );
            let _ = writeln!(out, "http_request_duration_seconds_sum{{{labels}}} {}", latency.sum);
            let _ = writeln!(out, "http_request_duration_seconds_count{{{labels}}} {}", latency.count);
        }

        out
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Middleware recording every routed request.
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "none".to_string());
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    metrics.observe_request(
        &handler,
        &method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

pub async fn expose(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render(),
    )
}

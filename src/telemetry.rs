//! Telemetry logic.
//! OTLP traces, Prometheus metrics and per-request tracking.
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{Unit, gauge};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use opentelemetry::trace::{Span, SpanKind, TraceError, Tracer};
use opentelemetry::{KeyValue, global};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

const SERVICE_NAME: &str = "shanyraq";
const PROCESS_REFRESH: Duration = Duration::from_secs(10);
const LATENCY_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Create tracer for OLTP.
///
/// The collector endpoint is read from `OTEL_EXPORTER_OTLP_ENDPOINT`.
pub fn setup_tracer() -> Result<SdkTracerProvider, TraceError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build())
}

fn describe_metrics() {
    metrics::describe_gauge!(
        "process_cpu_usage",
        Unit::Percent,
        "CPU usage of the process in percentage."
    );
    metrics::describe_gauge!(
        "process_memory_used_bytes",
        Unit::Bytes,
        "Total process memory in bytes."
    );
    metrics::describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Requests by route and status."
    );
    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "Request latency by route and status."
    );
    metrics::describe_counter!(
        "auth_login_total",
        Unit::Count,
        "Login attempts by outcome."
    );
    metrics::describe_counter!(
        "auth_tokens_revoked_total",
        Unit::Count,
        "Tokens revoked on logout."
    );
    metrics::describe_counter!(
        "auth_codes_issued_total",
        Unit::Count,
        "Confirmation codes issued by purpose."
    );
}

/// Refresh CPU and memory gauges of this process in the background.
fn spawn_process_gauges() {
    let mut system = System::new_with_specifics(RefreshKind::nothing());
    let pid = Pid::from_u32(std::process::id());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROCESS_REFRESH);
        loop {
            interval.tick().await;
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory().with_cpu(),
            );

            if let Some(process) = system.process(pid) {
                gauge!("process_memory_used_bytes").set(process.memory() as f64);
                gauge!("process_cpu_usage").set(process.cpu_usage() as f64);
            }
        }
    });
}

/// Install the Prometheus recorder. Must run inside a tokio runtime.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_owned()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    describe_metrics();
    spawn_process_gauges();

    Ok(handle)
}

/// Route template of `req`, or its raw path when no route matched.
fn route(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned())
}

/// Count requests, record their latency and export a server span.
pub async fn track(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = route(&req);
    let method = req.method().to_string();

    let tracer = global::tracer(SERVICE_NAME);
    let mut span = tracer
        .span_builder(format!("{method} {route}"))
        .with_kind(SpanKind::Server)
        .start(&tracer);

    let response = next.run(req).await;
    let status = response.status().as_u16();

    span.set_attributes([
        KeyValue::new("http.request.method", method.clone()),
        KeyValue::new("http.route", route.clone()),
        KeyValue::new("http.response.status_code", i64::from(status)),
    ]);
    span.end();

    let labels = [
        ("method", method),
        ("path", route),
        ("status", status.to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

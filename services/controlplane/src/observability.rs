//! Tracing, trace propagation, and Prometheus metrics for keygate.
//!
//! # Metrics
//! | name | type | labels |
//! |---|---|---|
//! | `keygate_rbac_mutations_total` | counter | `op` (service operation, e.g. `replace_key_rbac`) |
//! | `keygate_rbac_errors_total` | counter | `kind` (`not_found`, `bad_request`, `conflict`, `internal`) |
//! | `keygate_roles_total` | gauge | none (memory backend) |
//! | `keygate_permissions_total` | gauge | none (memory backend) |
//!
//! # Notes
//! Tracing is set up once per process. OTLP export is added only when an
//! exporter can be built from the standard `OTEL_EXPORTER_OTLP_*` environment.
use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry::{KeyValue, global};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const RBAC_MUTATIONS_TOTAL: &str = "keygate_rbac_mutations_total";
pub const RBAC_ERRORS_TOTAL: &str = "keygate_rbac_errors_total";
pub const ROLES_TOTAL: &str = "keygate_roles_total";
pub const PERMISSIONS_TOTAL: &str = "keygate_permissions_total";

const INSTANCE_ID_ENV: &str = "KEYGATE_SERVICE_INSTANCE_ID";

static TRACING: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install tracing and the Prometheus recorder; safe to call more than once.
pub fn init_observability(service_name: &str) -> anyhow::Result<PrometheusHandle> {
    TRACING.get_or_init(|| init_tracing(service_name));
    let handle = match RECORDER.get() {
        Some(handle) => handle.clone(),
        None => {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("install prometheus recorder")?;
            RECORDER.get_or_init(|| handle).clone()
        }
    };
    describe_metrics();
    Ok(handle)
}

fn init_tracing(service_name: &str) {
    install_propagator();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    match otlp_provider(service_name) {
        Some(provider) => {
            let tracer = provider.tracer(service_name.to_string());
            global::set_tracer_provider(provider);
            let _ = registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        RBAC_MUTATIONS_TOTAL,
        "Committed RBAC mutations by operation"
    );
    metrics::describe_counter!(RBAC_ERRORS_TOTAL, "Failed RBAC operations by error kind");
    metrics::describe_gauge!(ROLES_TOTAL, "Roles held by the in-memory store");
    metrics::describe_gauge!(PERMISSIONS_TOTAL, "Permissions held by the in-memory store");
}

fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder_empty()
                    .with_attributes(service_attributes(service_name))
                    .build(),
            )
            .build(),
    )
}

fn service_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    if let Ok(instance) = std::env::var(INSTANCE_ID_ENV) {
        attrs.push(KeyValue::new("service.instance.id", instance));
    }
    attrs
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

/// Parent context from the caller's `traceparent` / `tracestate` headers.
pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serve `/metrics` on `addr` until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_on(listener, handle, std::future::pending()).await
}

async fn serve_metrics_on<F>(
    listener: tokio::net::TcpListener,
    handle: PrometheusHandle,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(addr = ?listener.local_addr().ok(), "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::CreateRole;
    use crate::rbac::test_support::{ctx, harness};
    use axum::body::Body;
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
    use opentelemetry::trace::{TraceContextExt, TraceId};
    use serial_test::serial;
    use tower::ServiceExt;

    async fn scrape(handle: PrometheusHandle) -> String {
        let response = metrics_router(handle)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    #[serial]
    async fn rbac_operations_show_up_on_metrics() {
        let handle = init_observability("keygate-test").expect("init");
        let h = harness().await;
        h.service
            .create_role(
                &ctx("ws_1"),
                CreateRole {
                    name: "auditor".to_string(),
                    ..CreateRole::default()
                },
            )
            .await
            .expect("create role");
        h.service
            .get_role(&ctx("ws_1"), "role_missing")
            .await
            .expect_err("missing role");
        h.service
            .resolve_by_key(&ctx("ws_1"), "key_gone")
            .await
            .expect_err("missing key");

        let body = scrape(handle).await;
        assert!(body.contains("# HELP keygate_rbac_mutations_total Committed RBAC mutations"));
        assert!(body.contains(r#"keygate_rbac_mutations_total{op="create_role"}"#));
        assert!(body.contains(r#"keygate_rbac_errors_total{kind="not_found"}"#));
        assert!(body.contains("keygate_roles_total"));
    }

    #[tokio::test]
    #[serial]
    async fn error_kinds_are_labelled_by_category() {
        let handle = init_observability("keygate-test").expect("init");
        let h = harness().await;
        let role = CreateRole {
            name: "dup".to_string(),
            ..CreateRole::default()
        };
        h.service
            .create_role(&ctx("ws_1"), role.clone())
            .await
            .expect("first");
        h.service
            .create_role(&ctx("ws_1"), role)
            .await
            .expect_err("duplicate");

        let body = scrape(handle).await;
        assert!(body.contains(r#"keygate_rbac_errors_total{kind="conflict"}"#));
    }

    #[tokio::test]
    #[serial]
    async fn repeated_init_reuses_the_recorder() {
        let first = init_observability("keygate-test").expect("first");
        let second = init_observability("keygate-test").expect("second");
        metrics::counter!(RBAC_MUTATIONS_TOTAL, "op" => "init_check").increment(1);
        assert!(second.render().contains(r#"op="init_check""#));
        assert!(first.render().contains(r#"op="init_check""#));
    }

    #[tokio::test]
    #[serial]
    async fn metrics_listener_serves_until_shutdown() {
        let handle = init_observability("keygate-test").expect("init");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_metrics_on(listener, handle, async move {
            let _ = stopped.await;
        }));

        let body = reqwest::Client::builder()
            .no_proxy()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .expect("client")
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .expect("scrape")
            .text()
            .await
            .expect("text");
        assert!(body.contains("keygate_"));

        let _ = stop.send(());
        server.await.expect("join").expect("clean shutdown");
    }

    #[test]
    fn service_attributes_include_version_and_instance() {
        let attrs = service_attributes("keygate-controlplane");
        let find = |key: &str| {
            attrs
                .iter()
                .find(|attr| attr.key.as_str() == key)
                .map(|attr| attr.value.to_string())
        };
        assert_eq!(find("service.name").as_deref(), Some("keygate-controlplane"));
        assert_eq!(find("service.version").as_deref(), Some(env!("CARGO_PKG_VERSION")));
        assert_eq!(
            find("service.instance.id"),
            std::env::var(INSTANCE_ID_ENV).ok()
        );
    }

    #[test]
    fn request_trace_parent_is_propagated() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            HeaderValue::from_static("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"),
        );
        let context = trace_context_from_headers(&headers);
        let span = context.span();
        assert!(span.span_context().is_remote());
        assert_eq!(
            span.span_context().trace_id(),
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").expect("trace id")
        );
    }

    #[test]
    fn unreadable_trace_headers_yield_no_parent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            HeaderValue::from_bytes(b"\xFF").expect("header"),
        );
        assert!(HeaderExtractor(&headers).get("traceparent").is_none());
        let context = trace_context_from_headers(&headers);
        assert!(!context.span().span_context().is_valid());
    }
}

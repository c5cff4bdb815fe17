use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use fiscal_monitor::workflows::fiscal::{
    fiscal_router, ConsultationStore, FiscalMonitorService, LookupProvider,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_operational_routes<S, P>(service: Arc<FiscalMonitorService<S, P>>) -> axum::Router
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    fiscal_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::build_service;
    use axum::body::Body;
    use axum::http::Request;
    use fiscal_monitor::config::{MonitorConfig, ProviderConfig};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(readiness: Arc<AtomicBool>) -> axum::Router {
        let provider = ProviderConfig {
            base_url: ProviderConfig::DEFAULT_BASE_URL.to_string(),
            token: None,
            default_timeout: Duration::from_secs(60),
            payroll_fund_timeout: Duration::from_secs(120),
        };
        let state = AppState {
            readiness,
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let service = build_service(&provider, &MonitorConfig::default());
        with_operational_routes(Arc::new(service)).layer(Extension(state))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request builds")
    }

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let readiness = Arc::new(AtomicBool::new(false));
        let app = router(readiness.clone());

        let response = app
            .clone()
            .oneshot(get("/ready"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.store(true, Ordering::Release);
        let response = app.oneshot(get("/ready")).await.expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_metrics_and_fiscal_routes_share_one_router() {
        let app = router(Arc::new(AtomicBool::new(true)));

        let response = app
            .clone()
            .oneshot(get("/health"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get("/metrics"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );

        let response = app
            .oneshot(get("/api/v1/consultations/summary"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }
}

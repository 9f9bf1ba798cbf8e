//! HTTP trigger for scrape runs.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jobscout_sync::{orchestrator_from_env, CardError, Orchestrator, RunOptions, RunSummary};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "jobscout-web";

pub struct AppState {
    orchestrator: Orchestrator,
    run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            run_lock: Mutex::new(()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    jobs_scraped: usize,
    jobs_created: usize,
    jobs_updated: usize,
    errors: Vec<CardError>,
}

impl From<RunSummary> for RefreshResponse {
    fn from(summary: RunSummary) -> Self {
        Self {
            success: true,
            jobs_scraped: summary.jobs_scraped,
            jobs_created: summary.jobs_created,
            jobs_updated: summary.jobs_updated,
            errors: summary.errors,
        }
    }
}

#[derive(Debug, Serialize)]
struct FailureResponse {
    success: bool,
    message: String,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(FailureResponse {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/jobs/refresh", post(refresh_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let orchestrator = orchestrator_from_env().await?;
    let port = orchestrator.config().web_port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving scrape trigger");
    axum::serve(listener, app(AppState::new(orchestrator))).await?;
    Ok(())
}

/// Body is optional; when present it is `{maxPages, maxJobs, skipDetails}`.
async fn refresh_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let opts = if body.iter().all(u8::is_ascii_whitespace) {
        RunOptions::default()
    } else {
        match serde_json::from_slice::<RunOptions>(&body) {
            Ok(opts) => opts,
            Err(err) => return failure(StatusCode::BAD_REQUEST, format!("invalid request body: {err}")),
        }
    };

    let Ok(_guard) = state.run_lock.try_lock() else {
        return failure(StatusCode::CONFLICT, "a scrape run is already in progress");
    };

    match state.orchestrator.run(opts).await {
        Ok(summary) => (StatusCode::OK, Json(RefreshResponse::from(summary))).into_response(),
        Err(err) => {
            warn!(error = %err, "scrape run failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use jobscout_extract::SiteProfile;
    use jobscout_session::FixtureLauncher;
    use jobscout_storage::MemoryJobStore;
    use jobscout_sync::ScrapeConfig;
    use tower::ServiceExt;

    fn fixture_launcher() -> FixtureLauncher {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures/devsunite");
        FixtureLauncher::from_dir(dir).unwrap()
    }

    fn state(launcher: FixtureLauncher) -> AppState {
        AppState::new(Orchestrator::new(
            Arc::new(launcher),
            Arc::new(MemoryJobStore::new()),
            Arc::new(SiteProfile::devsunite().compile().unwrap()),
            ScrapeConfig::default(),
        ))
    }

    fn refresh(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/jobs/refresh")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn refresh_returns_counts() {
        let app = app(state(fixture_launcher()));
        let resp = app.oneshot(refresh(r#"{"maxPages": 1}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["jobsScraped"], 5);
        assert_eq!(body["jobsCreated"], 5);
        assert_eq!(body["jobsUpdated"], 0);
        assert_eq!(body["errors"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn partial_failures_carry_camel_case_card_index() {
        let launcher =
            fixture_launcher().fail_navigation("https://devsunite.com/jobs/zeta-frontend-intern");
        let app = app(state(launcher));
        let resp = app.oneshot(refresh(r#"{"maxPages": 1}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["jobsCreated"], 5);
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["cardIndex"], 2);
        assert_eq!(errors[0]["stage"], "enrichment");
        assert!(errors[0].get("card_index").is_none());
        assert!(errors[0]["message"].as_str().unwrap().contains("zeta-frontend-intern"));
    }

    #[tokio::test]
    async fn refresh_accepts_empty_body_and_reruns_as_updates() {
        let app = app(state(fixture_launcher()));
        let empty = || {
            Request::builder()
                .method("POST")
                .uri("/api/jobs/refresh")
                .body(Body::empty())
                .unwrap()
        };
        let first = json_body(app.clone().oneshot(empty()).await.unwrap()).await;
        let second = json_body(app.oneshot(empty()).await.unwrap()).await;
        assert_eq!(first["jobsCreated"], 7);
        assert_eq!(second["jobsCreated"], 0);
        assert_eq!(second["jobsUpdated"], 7);
    }

    #[tokio::test]
    async fn launch_failure_is_a_server_error_with_message() {
        let app = app(state(fixture_launcher().fail_launch("no chrome on PATH")));
        let resp = app.oneshot(refresh("{}")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("no chrome on PATH"));
    }

    #[tokio::test]
    async fn concurrent_refresh_is_rejected() {
        let state = Arc::new(state(fixture_launcher()));
        let _held = state.run_lock.lock().await;
        let resp = refresh_handler(State(state.clone()), Bytes::from_static(b"{}")).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["success"], false);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let app = app(state(fixture_launcher()));
        let resp = app.oneshot(refresh(r#"{"maxJobs": "lots"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = app(state(fixture_launcher()));
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

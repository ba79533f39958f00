// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Axum surface for the inter-agent job API.
//!
//! | route                     | method | body / reply                         |
//! |---------------------------|--------|--------------------------------------|
//! | `/api/jobs`               | POST   | `{prompt, system_prompt?}` → `{job_id}` (202) |
//! | `/api/jobs/current`       | GET    | most recent job                      |
//! | `/api/jobs/{id}`          | GET    | full status, journal, result         |
//! | `/api/jobs/{id}`          | DELETE | cancel                               |
//! | `/api/jobs/{id}/stream`   | GET    | `text/event-stream` of agent events  |
//! | `/api/agent/info`         | GET    | `{name, capabilities, current_job_id?}` |
//!
//! Authentication is an optional bearer token compared in constant time;
//! when no token is configured every request passes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::info;

use freja_config::NodeConfig;

use crate::{auth::TokenGuard, jobs::JobService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
    pub guard: TokenGuard,
}

pub fn router(service: Arc<JobService>, guard: TokenGuard) -> Router {
    let state = AppState { service, guard };
    Router::new()
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/current", get(current_job))
        .route("/api/jobs/:id", get(get_job).delete(cancel_job))
        .route("/api/jobs/:id/stream", get(stream_job))
        .route("/api/agent/info", get(agent_info))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn serve(cfg: &NodeConfig, service: Arc<JobService>) -> anyhow::Result<()> {
    let guard = TokenGuard::new(cfg.auth_token.as_deref());
    let app = router(service, guard);
    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    info!(bind = %cfg.bind, auth = cfg.auth_token.is_some(), "job service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !state.guard.check(authorization) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" })))
            .into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    prompt: String,
    #[serde(default)]
    system_prompt: Option<String>,
    /// Accepted for wire compatibility; this node always runs its own
    /// configured model.
    #[serde(default)]
    #[allow(dead_code)]
    model: Option<String>,
}

async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Response {
    if body.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt must not be empty" })),
        )
            .into_response();
    }
    let job_id = state.service.submit(body.prompt, body.system_prompt).await;
    (StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response()
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.get(&id) {
        Some(job) => Json(job).into_response(),
        None => job_not_found(&id),
    }
}

async fn current_job(State(state): State<AppState>) -> Response {
    match state.service.current().await {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no jobs submitted yet" })),
        )
            .into_response(),
    }
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.service.cancel(&id) {
        Json(json!({ "cancelled": true })).into_response()
    } else if state.service.get(&id).is_some() {
        // Known job, already terminal.
        Json(json!({ "cancelled": false })).into_response()
    } else {
        job_not_found(&id)
    }
}

async fn agent_info(State(state): State<AppState>) -> Response {
    let current_job_id = state.service.current_active_id().await;
    Json(json!({
        "name": state.service.agent_name(),
        "capabilities": state.service.capabilities(),
        "current_job_id": current_job_id,
    }))
    .into_response()
}

async fn stream_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(rx) = state.service.subscribe(&id) else {
        return job_not_found(&id);
    };
    let stream = BroadcastStream::new(rx).filter_map(|frame| match frame {
        Ok(data) => Some(Ok::<_, Infallible>(Event::default().data(data))),
        // A lagged subscriber skips frames rather than erroring out.
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn job_not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown job: {id}") })),
    )
        .into_response()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use freja_core::AgentEvent;

    use super::*;
    use crate::jobs::{JobExecutor, JobStatus};

    struct EchoExecutor;

    #[async_trait]
    impl JobExecutor for EchoExecutor {
        async fn execute(
            &self,
            prompt: &str,
            _system_prompt: Option<&str>,
            _events: mpsc::Sender<AgentEvent>,
            _cancel: CancellationToken,
        ) -> anyhow::Result<String> {
            Ok(format!("echo: {prompt}"))
        }
    }

    fn test_router(token: Option<&str>) -> (Router, Arc<JobService>) {
        let service = JobService::new(Arc::new(EchoExecutor), "unit-agent", vec!["echo".into()]);
        (router(service.clone(), TokenGuard::new(token)), service)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn submit_returns_202_with_job_id() {
        let (app, _svc) = test_router(None);
        let response = app
            .oneshot(post_json("/api/jobs", json!({ "prompt": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let v = body_json(response).await;
        assert!(v["job_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let (app, _svc) = test_router(None);
        let response = app
            .oneshot(post_json("/api/jobs", json!({ "prompt": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_job_round_trips() {
        let (app, svc) = test_router(None);
        let id = svc.submit("ping".into(), None).await;
        // Give the spawned job a chance to finish.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/jobs/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v = body_json(response).await;
        assert_eq!(v["id"], id.as_str());
        assert_eq!(v["status"], "completed");
        assert_eq!(v["result"], "echo: ping");
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let (app, _svc) = test_router(None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn current_returns_latest_job() {
        let (app, svc) = test_router(None);
        svc.submit("one".into(), None).await;
        let latest = svc.submit("two".into(), None).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/current")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let v = body_json(response).await;
        assert_eq!(v["id"], latest.as_str());
    }

    #[tokio::test]
    async fn agent_info_reports_identity() {
        let (app, _svc) = test_router(None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/agent/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let v = body_json(response).await;
        assert_eq!(v["name"], "unit-agent");
        assert_eq!(v["capabilities"][0], "echo");
    }

    #[tokio::test]
    async fn cancel_of_terminal_job_reports_false() {
        let (app, svc) = test_router(None);
        let id = svc.submit("quick".into(), None).await;
        for _ in 0..100 {
            if svc.get(&id).unwrap().status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/jobs/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let v = body_json(response).await;
        assert_eq!(v["cancelled"], false);
    }

    // ── Auth ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_token_is_401_when_configured() {
        let (app, _svc) = test_router(Some("hunter2"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/agent/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_token_passes() {
        let (app, _svc) = test_router(Some("hunter2"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/agent/info")
                    .header(header::AUTHORIZATION, "Bearer hunter2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stream_endpoint_rejects_unknown_job() {
        let (app, _svc) = test_router(None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/ghost/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use sekia_protocol::subjects;
use sekia_registry::AgentState;
use sekia_workflow::WorkflowSnapshot;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/agents", get(agents))
        .route("/api/v1/workflows", get(workflows))
        .route("/api/v1/workflows/reload", post(reload_workflows))
        .route("/api/v1/config/reload", post(reload_config))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_seconds: u64,
    broker_up: bool,
    agent_count: usize,
    workflow_count: usize,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        uptime_seconds: state.uptime_seconds(),
        broker_up: !state.broker().is_closed(),
        agent_count: state.registry().count(),
        workflow_count: state.engine().map_or(0, sekia_workflow::WorkflowEngine::count),
    })
}

#[derive(Serialize)]
struct AgentsResponse {
    agents: Vec<AgentState>,
}

async fn agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(AgentsResponse { agents: state.registry().agents() })
}

#[derive(Serialize)]
struct WorkflowsResponse {
    workflows: Vec<WorkflowSnapshot>,
}

async fn workflows(State(state): State<AppState>) -> impl IntoResponse {
    Json(WorkflowsResponse { workflows: state.engine().map_or_else(Vec::new, sekia_workflow::WorkflowEngine::workflows) })
}

#[derive(Serialize)]
struct ConfigReloadResponse {
    status: &'static str,
    target: String,
}

async fn reload_workflows(State(state): State<AppState>) -> Response {
    let Some(engine) = state.engine() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "workflow engine not attached").into_response();
    };

    match engine.reload_all() {
        Ok(()) => Json(ConfigReloadResponse { status: "reloaded", target: "*".to_owned() }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct ReloadQuery {
    #[serde(default = "default_target")]
    target: String,
}

fn default_target() -> String {
    "*".to_owned()
}

async fn reload_config(State(state): State<AppState>, Query(q): Query<ReloadQuery>) -> impl IntoResponse {
    let subject = if q.target == "*" { subjects::config_reload().to_owned() } else { subjects::config_reload_for(&q.target) };

    state.broker().publish(&subject, &[]);

    Json(ConfigReloadResponse { status: "published", target: q.target })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use sekia_broker::Broker;
    use sekia_registry::Registry;
    use tower::ServiceExt;

    use super::*;

    fn test_state(with_engine: bool) -> AppState {
        let broker = Broker::new();
        let registry = Registry::new();
        let engine = with_engine.then(|| {
            sekia_workflow::WorkflowEngine::new(broker.clone(), std::env::temp_dir(), Vec::new())
        });
        AppState::new(broker, registry, engine)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_reports_zero_agents_and_no_workflow_engine() {
        let app = router(test_state(false));
        let response =
            app.oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["agent_count"], 0);
        assert_eq!(body["workflow_count"], 0);
        assert_eq!(body["broker_up"], true);
    }

    #[tokio::test]
    async fn reload_workflows_is_unavailable_without_an_attached_engine() {
        let app = router(test_state(false));
        let response = app
            .oneshot(Request::builder().method("POST").uri("/api/v1/workflows/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn reload_workflows_succeeds_with_an_empty_directory() {
        let app = router(test_state(true));
        let response = app
            .oneshot(Request::builder().method("POST").uri("/api/v1/workflows/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn config_reload_defaults_to_broadcast_target() {
        let app = router(test_state(false));
        let response = app
            .oneshot(Request::builder().method("POST").uri("/api/v1/config/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["target"], "*");
    }

    #[tokio::test]
    async fn config_reload_honors_an_explicit_target() {
        let app = router(test_state(false));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/config/reload?target=github-agent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["target"], "github-agent");
    }
}

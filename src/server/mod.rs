//! HTTP server for the CodeShift service

mod handlers;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::config::ServerConfig;
use crate::core::service::CodeShift;

pub use handlers::{status_code, ErrorResponse};

/// Shared application state
pub struct AppState {
    pub shift: CodeShift,
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the application router
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http());
    if state.shift.config().server.cors_enabled {
        router = router.layer(cors_layer(&state.shift.config().server));
    }
    router.with_state(state)
}

/// Run the HTTP server. Jobs left unfinished by a previous run are resumed
/// before the listener opens.
pub async fn run_server(shift: CodeShift) -> Result<()> {
    let resumed = shift.resume_incomplete_jobs().await?;
    if resumed > 0 {
        info!(resumed, "Resumed unfinished conversion jobs");
    }

    let addr: SocketAddr = format!("{}:{}", shift.config().server.host, shift.config().server.port).parse()?;
    let app = app(Arc::new(AppState { shift }));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::core::config::{CompletionProvider, Config};
    use crate::llm;
    use crate::storage::Database;

    fn test_app() -> Router {
        let mut config = Config::default();
        config.completion.provider = CompletionProvider::None;
        let service = llm::from_config(&config.completion);
        let shift = CodeShift::new(Database::open_in_memory().unwrap(), config, service).unwrap();
        app(Arc::new(AppState { shift }))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["completion"], "none");
    }

    #[tokio::test]
    async fn test_project_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "from b import g\n\ndef f():\n    return g()\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "def g():\n    return 1\n").unwrap();
        let app = test_app();

        let (status, project) = send(
            &app,
            "POST",
            "/api/v1/projects",
            Some(json!({
                "name": "demo",
                "root_path": dir.path().to_string_lossy(),
                "source_language": "python",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = project["id"].as_i64().unwrap();
        assert_eq!(project["status"], "uploaded");

        let (status, parsed) = send(&app, "POST", &format!("/api/v1/projects/{}/parse", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parsed["status"], "parsed");
        assert_eq!(parsed["files"], 2);
        assert_eq!(parsed["unresolved_references"], 0);

        let (status, symbols) = send(
            &app,
            "GET",
            &format!("/api/v1/projects/{}/symbols?query=g&kind=function", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let g = symbols
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["qualified_name"] == "b.g")
            .unwrap()
            .clone();

        let (status, by_text) = send(
            &app,
            "GET",
            &format!("/api/v1/projects/{}/symbols?query=return%201&mode=snippet&kind=function", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_text[0]["qualified_name"], "b.g");

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/v1/projects/{}/symbols?query=g&mode=fuzzy", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        let (status, callers) = send(
            &app,
            "GET",
            &format!("/api/v1/nodes/{}/neighbors?kinds=calls&direction=incoming", g["id"]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(callers[0]["node"]["qualified_name"], "a.f");
        assert_eq!(callers[0]["via"], "calls");

        let (status, listed) = send(&app, "GET", "/api/v1/projects", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["status"], "parsed");

        let (status, _) = send(&app, "DELETE", &format!("/api/v1/projects/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, "GET", &format!("/api/v1/projects/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "project_not_found");
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let app = test_app();

        let (status, body) = send(&app, "GET", "/api/v1/jobs/missing/download", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "job_not_found");

        let (status, body) = send(&app, "GET", "/api/v1/nodes/1/neighbors?direction=sideways", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        let (status, body) = send(&app, "GET", "/api/v1/frameworks/klingon", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("klingon"));

        let (status, body) = send(&app, "GET", "/api/v1/frameworks/python", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().iter().any(|f| f["name"] == "django"));
    }

    #[tokio::test]
    async fn test_convert_validation() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app();
        let (_, project) = send(
            &app,
            "POST",
            "/api/v1/projects",
            Some(json!({
                "name": "demo",
                "root_path": dir.path().to_string_lossy(),
                "source_language": "go",
            })),
        )
        .await;
        let id = project["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/projects/{}/convert", id),
            Some(json!({"target_language": "cobol"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/projects/{}/convert", id),
            Some(json!({"target_language": "python"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "project_not_parsed");
    }
}

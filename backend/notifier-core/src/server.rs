// src/server.rs
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode as AxumStatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::period::Period;
use crate::workflow::{AbsenceNotificationService, DealOutcome, WorkflowError};
use crate::zoho_client::ZohoError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Absence notification run failed: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Map AppError to Axum's IntoResponse
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        error!("Error occurred: {}", self); // Log the original error

        let (status_code, error_message) = match self {
            AppError::BadRequest(ref message) => (AxumStatusCode::BAD_REQUEST, message.clone()),
            AppError::Workflow(WorkflowError::Period(ref e)) => {
                (AxumStatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Workflow(WorkflowError::Store(ZohoError::Api { status, .. })) => (
                AxumStatusCode::BAD_GATEWAY,
                format!(
                    "Zoho connector returned status {}. Details logged.",
                    status.as_u16()
                ),
            ),
            AppError::Workflow(WorkflowError::Store(_)) => (
                AxumStatusCode::BAD_GATEWAY,
                "Zoho connector request failed. Details logged.".to_string(),
            ),
            AppError::Workflow(_) | AppError::Io(_) => (
                AxumStatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error. Check logs.".to_string(),
            ),
        };

        (status_code, Json(json!({ "error": error_message }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AbsenceNotificationService>,
    pub default_months_ago: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub months_ago: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub message: String,
    pub period: Period,
    pub outcomes: Vec<DealOutcome>,
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new().route("/absences-notification", post(handle_trigger));

    Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<(), AppError> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid server address {}:{}: {}", host, port, e),
        )
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// --- Web Handlers ---

async fn handle_trigger(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TriggerResponse>, AppError> {
    // The body is optional; an empty one means "use the configured month"
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        serde_json::from_slice::<TriggerRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };
    let months_ago = request.months_ago.unwrap_or(state.default_months_ago);
    info!("Handling absence notification trigger (months_ago={})", months_ago);

    let report = state.service.run(months_ago).await?;
    Ok(Json(TriggerResponse {
        message: format!(
            "Processed {} deals for period {}",
            report.outcomes.len(),
            report.period
        ),
        period: report.period,
        outcomes: report.outcomes,
    }))
}

async fn handle_status() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormDefaults;
    use crate::form_document::{DocumentError, DocumentGenerator};
    use crate::form_fields::FormFillData;
    use crate::period::FixedClock;
    use crate::workflow::WorkflowSettings;
    use crate::zoho_client::{RecordStore, WriteResult};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use tower::ServiceExt;

    struct EmptyStore {
        fail: bool,
    }

    #[async_trait]
    impl RecordStore for EmptyStore {
        async fn search(&self, _module: &str, _criteria: &str) -> Result<Vec<Value>, ZohoError> {
            if self.fail {
                return Err(ZohoError::Api {
                    status: reqwest::StatusCode::UNAUTHORIZED,
                    message: "token expired".to_string(),
                });
            }
            Ok(Vec::new())
        }

        async fn get(&self, _: &str, _: &[String], _: &[&str]) -> Result<Vec<Value>, ZohoError> {
            Ok(Vec::new())
        }

        async fn get_by_id(&self, _: &str, _: &str, _: &[&str]) -> Result<Option<Value>, ZohoError> {
            Ok(None)
        }

        async fn related(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[&str],
        ) -> Result<Vec<Value>, ZohoError> {
            Ok(Vec::new())
        }

        async fn create(&self, _: &str, _: Vec<Value>) -> Result<Vec<WriteResult>, ZohoError> {
            Ok(Vec::new())
        }

        async fn update(&self, _: &str, _: Vec<Value>) -> Result<Vec<WriteResult>, ZohoError> {
            Ok(Vec::new())
        }
    }

    struct NoDocuments;

    #[async_trait]
    impl DocumentGenerator for NoDocuments {
        async fn fill_document(&self, _: &str, _: &FormFillData) -> Result<Vec<u8>, DocumentError> {
            Ok(Vec::new())
        }
    }

    fn app(fail: bool) -> Router {
        let now: DateTime<Utc> = "2024-07-15T10:00:00Z".parse().unwrap();
        let service = AbsenceNotificationService::new(
            Arc::new(EmptyStore { fail }),
            Arc::new(NoDocuments),
            Arc::new(FixedClock::new(now)),
            WorkflowSettings {
                timezone: chrono_tz::Europe::Berlin,
                decision_maker_role: "Decision Maker".to_string(),
                form_defaults: FormDefaults::default(),
            },
        );
        router(AppState {
            service: Arc::new(service),
            default_months_ago: 1,
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn trigger(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/absences-notification")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_ok() {
        let response = app(false)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), AxumStatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["time"].is_string());
    }

    #[tokio::test]
    async fn trigger_without_body_uses_default_month() {
        let response = app(false).oneshot(trigger("")).await.unwrap();

        assert_eq!(response.status(), AxumStatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["period"]["start"], "2024-06-01");
        assert_eq!(body["period"]["end"], "2024-06-30");
        assert_eq!(body["outcomes"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn trigger_accepts_months_ago() {
        let response = app(false)
            .oneshot(trigger(r#"{ "months_ago": 2 }"#))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["period"]["start"], "2024-05-01");
        assert!(body["message"].as_str().unwrap().contains("2024-05-01"));
    }

    #[tokio::test]
    async fn trigger_rejects_malformed_body() {
        let response = app(false).oneshot(trigger("{ not json")).await.unwrap();

        assert_eq!(response.status(), AxumStatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("Invalid request body"));
    }

    #[tokio::test]
    async fn trigger_rejects_months_ago_outside_calendar() {
        for body in [r#"{ "months_ago": 4000000 }"#, r#"{ "months_ago": 4294967295 }"#] {
            let response = app(false).oneshot(trigger(body)).await.unwrap();

            assert_eq!(response.status(), AxumStatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert!(body["error"].as_str().unwrap().contains("outside the supported calendar range"));
        }
    }

    #[tokio::test]
    async fn connector_failure_maps_to_bad_gateway() {
        let response = app(true).oneshot(trigger("")).await.unwrap();

        assert_eq!(response.status(), AxumStatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("401"));
    }
}

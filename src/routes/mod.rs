//! API routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::{EngineError, TurnOutcome};
use crate::AppState;

const DEFAULT_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    agent: String,
    classifier: &'static str,
}

/// Inbound webhook payload
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub sender: String,
    /// The page or account that received the message
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    sender: String,
    cleared: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Error returned to HTTP callers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::Store(_) | EngineError::Classifier(_) => {
                tracing::error!("Turn failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        agent: state.agent.agent.name.clone(),
        classifier: state.engine.classifier_name(),
    })
}

async fn webhook(
    State(state): State<AppState>,
    Json(request): Json<WebhookRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    tracing::debug!(sender = %request.sender, recipient = ?request.recipient, "Webhook message");
    let outcome = state.engine.process_message(&request.sender, &request.text).await?;
    Ok(Json(outcome))
}

async fn reset_conversation(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let cleared = state.engine.reset(&sender_id).await?;
    Ok(Json(ResetResponse {
        sender: sender_id,
        cleared,
    }))
}

async fn conversation_status(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.engine.status(&sender_id).await? {
        Some(status) => Ok(Json(status).into_response()),
        None => Err(ApiError::not_found(format!("No conversation for {}", sender_id))),
    }
}

async fn insights(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> Result<Response, ApiError> {
    let insights = state.engine.insights(&sender_id).await?;
    Ok(Json(json!({ "sender": sender_id, "insights": insights })).into_response())
}

async fn recommendations(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
    Query(params): Query<RecommendationQuery>,
) -> Result<Response, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_RECOMMENDATIONS).clamp(1, 50);
    let recs = state
        .engine
        .recommendations(&sender_id, params.query.as_deref(), limit)
        .await?;
    Ok(Json(json!({ "sender": sender_id, "recommendations": recs })).into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhook", post(webhook))
        .route("/api/webhook/conversation/:sender_id", delete(reset_conversation))
        .route("/api/webhook/status/:sender_id", get(conversation_status))
        .route("/api/webhook/insights/:sender_id", get(insights))
        .route("/api/webhook/recommendations/:sender_id", get(recommendations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::config::AgentConfig;
    use crate::core::catalog::tests::SAMPLE_CATALOG;
    use crate::core::memory::open_in_memory_pool;
    use crate::core::{ConversationStore, ProductCatalog, ResponseComposer, RuleClassifier, SalesEngine};

    async fn test_state() -> AppState {
        let agent = AgentConfig::default();
        let pool = open_in_memory_pool().await.unwrap();
        let catalog = ProductCatalog::from_pool(pool.clone(), agent.catalog.clone())
            .await
            .unwrap();
        catalog.seed_from_str(SAMPLE_CATALOG).await.unwrap();
        let store = ConversationStore::from_pool(pool).await.unwrap();

        let engine = SalesEngine::new(
            store,
            Arc::new(catalog),
            Arc::new(RuleClassifier::new()),
            ResponseComposer::new(&agent.agent.name, &agent.agent.currency),
            agent.conversation.clone(),
        );

        AppState {
            agent: Arc::new(agent),
            engine: Arc::new(engine),
        }
    }

    async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn app() -> Router {
        router().with_state(test_state().await)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app().await, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["classifier"], "rules");
    }

    #[tokio::test]
    async fn test_webhook_turn() {
        let app = app().await;
        let (status, body) = call(
            app,
            Method::POST,
            "/api/webhook",
            Some(json!({ "sender": "cust-1", "recipient": "page-1", "text": "I need perfume" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sender"], "cust-1");
        assert_eq!(body["product_interested"], "Wild Stone Perfume");
        assert_eq!(body["interested_product_ids"].as_array().unwrap().len(), 1);
        assert_eq!(body["is_ready"], false);
        assert_eq!(body["conversation_stage"], "INTEREST");
        assert_eq!(body["handover"], false);
    }

    #[tokio::test]
    async fn test_webhook_rejects_empty_text() {
        let state = test_state().await;
        let app = router().with_state(state.clone());

        let (status, body) = call(
            app,
            Method::POST,
            "/api/webhook",
            Some(json!({ "sender": "cust-1", "text": "" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("text"));
        assert!(state.engine.status("cust-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_and_status() {
        let state = test_state().await;
        let engine = Arc::clone(&state.engine);
        engine.process_message("cust-1", "I need shampoo").await.unwrap();

        let app = router().with_state(state);

        let (status, body) = call(app.clone(), Method::GET, "/api/webhook/status/cust-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message_count"], 2);

        let (status, body) = call(app.clone(), Method::DELETE, "/api/webhook/conversation/cust-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], true);

        let (status, _) = call(app, Method::GET, "/api/webhook/status/cust-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_recommendations_with_query() {
        let (status, body) = call(
            app().await,
            Method::GET,
            "/api/webhook/recommendations/cust-9?query=neem&limit=2",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let recs = body["recommendations"].as_array().unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0]["name"], "Himalaya Neem Face Wash");
    }

    #[tokio::test]
    async fn test_insights() {
        let state = test_state().await;
        let engine = Arc::clone(&state.engine);
        engine.process_message("cust-1", "I need shampoo").await.unwrap();

        let app = router().with_state(state);

        let (status, body) = call(app.clone(), Method::GET, "/api/webhook/insights/cust-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sender"], "cust-1");
        assert_eq!(body["insights"]["conversation_length"], 2);
        assert_eq!(body["insights"]["current_stage"], "INTEREST");
        assert_eq!(body["insights"]["products_discussed"], 1);
        assert_eq!(body["insights"]["insights_available"], true);

        let (status, body) = call(app, Method::GET, "/api/webhook/insights/cust-9", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["insights"]["current_stage"], "NO_CONVERSATION");
        assert_eq!(body["insights"]["insights_available"], false);
    }
}

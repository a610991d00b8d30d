//! Axum route handlers.
//!
//! # Routes
//!
//! - `GET  /health`       — Returns `{"status": "ok", "version": ...}`
//! - `POST /mesh/message` — Accepts a JSON `Message`, returns its
//!   acknowledgement envelope
//!
//! Error mapping is bounded and never leaks internals: feature gates map
//! to 503, malformed bodies to 400, failed signatures to 401, anything
//! else to a generic 500.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::errors::MeshError;
use crate::mesh::bus::MessageBus;
use crate::mesh::message::MessageAck;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Message bus handling every inbound mesh message.
    pub bus: Arc<MessageBus>,
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/mesh/message", post(message_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "attestmesh",
    }))
}

/// POST /mesh/message — the inbound agent message endpoint.
///
/// The raw body goes through `MessageBus::receive` (decode + signature
/// check) and then `handle_incoming` (dispatch); the acknowledgement
/// envelope carries any discovery or pull reply.
async fn message_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessageAck>, (StatusCode, Json<Value>)> {
    let message = state.bus.receive(&body).map_err(error_response)?;
    let ack = state
        .bus
        .handle_incoming(message)
        .await
        .map_err(error_response)?;
    Ok(Json(ack))
}

fn error_response(err: MeshError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        MeshError::NotEnabled { .. } | MeshError::BlockchainDisabled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        MeshError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
        MeshError::UnauthenticatedMessage(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "internal error".to_string()
    } else {
        err.to_string()
    };
    (status, Json(serde_json::json!({ "error": body })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, MeshConfig};
    use crate::ledger::CommitLedger;
    use crate::mesh::directory::AgentDirectory;
    use crate::mesh::message::{Message, MessageBody};
    use crate::mesh::transport::testing::MockTransport;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_with(mesh: MeshConfig, ledger: LedgerConfig) -> Router {
        let transport = Arc::new(MockTransport::new());
        let directory = Arc::new(AgentDirectory::new(
            mesh.clone(),
            "node-self",
            transport.clone(),
        ));
        let ledger = Arc::new(CommitLedger::new(ledger, "node-self", transport.clone()));
        let bus = Arc::new(MessageBus::new(
            mesh, "node-self", directory, ledger, transport,
        ));
        app_router(AppState { bus })
    }

    fn default_app() -> Router {
        app_with(MeshConfig::default(), LedgerConfig::default())
    }

    fn post_message(raw: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mesh/message")
            .header("Content-Type", "application/json")
            .body(Body::from(raw))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = default_app();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::VERSION);
        assert_eq!(json["service"], "attestmesh");
    }

    #[tokio::test]
    async fn test_message_endpoint_acknowledges() {
        let app = default_app();
        let message = Message::new("peer-1", "node-self", &MessageBody::Heartbeat).unwrap();

        let response = app
            .oneshot(post_message(serde_json::to_vec(&message).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "received");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = default_app();

        let response = app
            .oneshot(post_message(b"{not json".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_disabled_bus_is_service_unavailable() {
        let app = app_with(
            MeshConfig {
                enabled: false,
                ..MeshConfig::default()
            },
            LedgerConfig::default(),
        );
        let message = Message::new("peer-1", "node-self", &MessageBody::Heartbeat).unwrap();

        let response = app
            .oneshot(post_message(serde_json::to_vec(&message).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_disabled_ledger_maps_push_to_service_unavailable() {
        let app = app_with(
            MeshConfig::default(),
            LedgerConfig {
                enabled: false,
                ..LedgerConfig::default()
            },
        );
        let message = Message::new(
            "peer-1",
            "node-self",
            &MessageBody::AttestationPull {
                known_digests: vec![],
            },
        )
        .unwrap();

        let response = app
            .oneshot(post_message(serde_json::to_vec(&message).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unsigned_message_is_unauthorized_when_key_configured() {
        let app = app_with(
            MeshConfig {
                signing_key: Some("shared-secret".to_string()),
                ..MeshConfig::default()
            },
            LedgerConfig::default(),
        );
        let message = Message::new("peer-1", "node-self", &MessageBody::Heartbeat).unwrap();

        let response = app
            .oneshot(post_message(serde_json::to_vec(&message).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

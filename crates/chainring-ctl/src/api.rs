//! HTTP responder for member nodes.
//!
//! - `POST /announce`: body is the bare node ID
//! - `GET /cfg/:node_id`: the node's cfg message once published
//! - `GET /health`

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chainring_index::NodeId;
use chainring_queue::{handle_announce_msg, valid_announce_msg, wait_for_cfg_msg, Admission, CfgPoll, QueueStore};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared responder state.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<QueueStore>,
    pub max_hold: usize,
}

/// Build the responder router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/announce", post(announce))
        .route("/cfg/:node_id", get(get_cfg))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

fn internal(e: impl std::fmt::Display) -> Response {
    error!("Queue failure in responder: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn announce(State(state): State<ApiState>, body: String) -> Response {
    let node = match valid_announce_msg(body.trim()) {
        Ok(node) => node,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match handle_announce_msg(&state.store, &node) {
        Ok(Admission::Registered) => {
            (StatusCode::OK, Json(json!({"status": "registered"}))).into_response()
        }
        Ok(Admission::Parked) => {
            (StatusCode::ACCEPTED, Json(json!({"status": "parked"}))).into_response()
        }
        Err(e) => internal(e),
    }
}

async fn get_cfg(State(state): State<ApiState>, Path(node_id): Path<String>) -> Response {
    let node = match NodeId::parse(&node_id) {
        Ok(node) => node,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match wait_for_cfg_msg(&state.store, &node, state.max_hold) {
        Ok(CfgPoll::Ready(cfg)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            cfg.to_json(),
        )
            .into_response(),
        Ok(CfgPoll::Held(polls)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "held", "polls": polls})),
        )
            .into_response(),
        Ok(CfgPoll::Requeued) => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "requeued"})),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainring_queue::{publish_cfg_msg, CfgMsg, Queue};

    async fn serve(store: Arc<QueueStore>) -> String {
        let app = build_router(ApiState { store, max_hold: 2 });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn announce_validates_and_parks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::open(dir.path()).unwrap());
        let base = serve(Arc::clone(&store)).await;
        let http = reqwest::Client::new();

        let bad = http.post(format!("{}/announce", base)).body("deadbeef0").send().await.unwrap();
        assert_eq!(bad.status().as_u16(), 400);

        let ok = http.post(format!("{}/announce", base)).body("deadbeef00\n").send().await.unwrap();
        assert_eq!(ok.status().as_u16(), 202);
        assert!(store.contains(Queue::Announce, "deadbeef00").unwrap());

        let health = http.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn cfg_polls_hold_then_deliver() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::open(dir.path()).unwrap());
        let base = serve(Arc::clone(&store)).await;
        let http = reqwest::Client::new();
        let url = format!("{}/cfg/02beefdead", base);

        let held = http.get(&url).send().await.unwrap();
        assert_eq!(held.status().as_u16(), 404);
        let body: serde_json::Value = held.json().await.unwrap();
        assert_eq!(body["status"], "held");

        let requeued: serde_json::Value = http.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(requeued["status"], "requeued");
        assert_eq!(store.count(Queue::Registered, "02beefdead").unwrap(), 1);

        let cfg = CfgMsg {
            node_id: NodeId::parse("02beefdead").unwrap(),
            networks: vec!["7ac4235ec5d3d938".into()],
        };
        publish_cfg_msg(&store, &cfg).unwrap();
        let ready = http.get(&url).send().await.unwrap();
        assert_eq!(ready.status().as_u16(), 200);
        assert_eq!(ready.text().await.unwrap(), cfg.to_json());

        let bad = http.get(format!("{}/cfg/nothex", base)).send().await.unwrap();
        assert_eq!(bad.status().as_u16(), 400);
    }
}

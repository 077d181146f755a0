use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use medcontent_core::auth::AdminGate;
use medcontent_core::remote::{
    ContentService, MemoryContentService, RemoteCollections, ADMIN_SECRET_HEADER,
};
use medcontent_core::{CollectionName, Item, ItemId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::seed::load_seed;

const RELAY_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
struct RelayFrame {
    origin: u64,
    text: String,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    content: MemoryContentService,
    gate: AdminGate,
    relay: broadcast::Sender<RelayFrame>,
    next_socket: Arc<AtomicU64>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let content = MemoryContentService::new();
        if let Some(path) = config.seed_path.as_deref() {
            let seed = load_seed(path)?;
            tracing::info!("Seeded {} collections from {}", seed.len(), path.display());
            content.seed(seed);
        }

        let (relay, _) = broadcast::channel(RELAY_CAPACITY);
        Ok(Self {
            gate: AdminGate::new(config.admin_secret.clone()),
            content,
            relay,
            next_socket: Arc::new(AtomicU64::new(0)),
            config,
        })
    }
}

pub fn app_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/{collection}", post(create_item))
        .route("/{collection}/{id}", put(update_item).delete(delete_item))
        .route("/{collection}/{id}/increment-counter", post(increment_counter))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/content/all", get(fetch_all))
        .route("/events", get(events))
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    relay_clients: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        relay_clients: state.relay.receiver_count(),
    })
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let candidate = request
        .headers()
        .get(ADMIN_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized(format!("missing {ADMIN_SECRET_HEADER} header")))?;
    if !state.gate.unlock(candidate) {
        return Err(AppError::unauthorized("admin secret does not match"));
    }
    Ok(next.run(request).await)
}

fn collection_name(raw: &str) -> Result<CollectionName, AppError> {
    CollectionName::parse(raw).map_err(|error| AppError::bad_request(error.to_string()))
}

async fn fetch_all(State(state): State<AppState>) -> Result<Json<RemoteCollections>, AppError> {
    Ok(Json(state.content.fetch_all().await?))
}

async fn create_item(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(item): Json<Item>,
) -> Result<(StatusCode, Json<Item>), AppError> {
    let collection = collection_name(&collection)?;
    let stored = state.content.create(&collection, &item).await?;
    tracing::info!(collection = %collection, item = %stored.id, "Created item");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_item(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(mut item): Json<Item>,
) -> Result<Json<Item>, AppError> {
    let collection = collection_name(&collection)?;
    item.id = ItemId::from(id);
    let stored = state.content.update(&collection, &item).await?;
    tracing::info!(collection = %collection, item = %stored.id, "Updated item");
    Ok(Json(stored))
}

async fn delete_item(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let collection = collection_name(&collection)?;
    let id = ItemId::from(id);
    state.content.delete(&collection, &id).await?;
    tracing::info!(collection = %collection, item = %id, "Deleted item");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct IncrementRequest {
    #[serde(default)]
    field: Option<String>,
}

async fn increment_counter(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(request): Json<IncrementRequest>,
) -> Result<Json<Item>, AppError> {
    let collection = collection_name(&collection)?;
    let field = request
        .field
        .as_deref()
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .unwrap_or(medcontent_core::models::DEFAULT_COUNTER_FIELD);
    let stored = state
        .content
        .increment_counter(&collection, &ItemId::from(id), field)
        .await?;
    Ok(Json(stored))
}

async fn events(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_socket(socket, state))
}

/// Re-send every text frame from this socket to every other connected socket.
async fn relay_socket(socket: WebSocket, state: AppState) {
    let origin = state.next_socket.fetch_add(1, Ordering::Relaxed);
    let mut frames = state.relay.subscribe();
    let (mut sink, mut stream) = socket.split();
    tracing::debug!(socket = origin, "Relay client connected");

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    // No receivers just means nobody else is listening.
                    let _ = state.relay.send(RelayFrame {
                        origin,
                        text: text.as_str().to_owned(),
                    });
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            frame = frames.recv() => match frame {
                Ok(frame) if frame.origin != origin => {
                    if sink.send(Message::Text(frame.text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Closing makes the client reconnect and rehydrate.
                    tracing::warn!(socket = origin, missed, "Relay client lagged; closing");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::debug!(socket = origin, "Relay client disconnected");
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    const SECRET: &str = "test-admin-secret";

    fn router() -> Router {
        let state = AppState::from_config(Arc::new(AppConfig::for_tests(SECRET))).unwrap();
        app_router(state)
    }

    fn request(
        method: Method,
        uri: &str,
        secret: Option<&str>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(secret) = secret {
            builder = builder.header(ADMIN_SECRET_HEADER, secret);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let (status, body) = send(&router(), request(Method::GET, "/healthz", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn mutations_require_admin_secret() {
        let router = router();
        let item = json!({"id": "office-1", "name": "Lagos", "updatedAt": 1});

        let (status, body) = send(
            &router,
            request(Method::POST, "/offices", None, Some(item.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains(ADMIN_SECRET_HEADER));

        let (status, _) = send(
            &router,
            request(Method::POST, "/offices", Some("wrong"), Some(item)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn created_item_is_listed_by_fetch_all() {
        let router = router();
        let item = json!({"id": "office-1", "name": "Lagos", "updatedAt": 1});

        let (status, body) = send(
            &router,
            request(Method::POST, "/offices", Some(SECRET), Some(item.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, item);

        let (status, body) = send(&router, request(Method::GET, "/content/all", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["offices"], json!([item]));
    }

    #[tokio::test]
    async fn update_of_missing_item_is_not_found() {
        let (status, _) = send(
            &router(),
            request(
                Method::PUT,
                "/offices/office-9",
                Some(SECRET),
                Some(json!({"id": "office-9", "name": "Kano", "updatedAt": 2})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_uses_path_id() {
        let router = router();
        send(
            &router,
            request(
                Method::POST,
                "/offices",
                Some(SECRET),
                Some(json!({"id": "office-1", "name": "Lagos", "updatedAt": 1})),
            ),
        )
        .await;

        let (status, body) = send(
            &router,
            request(
                Method::PUT,
                "/offices/office-1",
                Some(SECRET),
                Some(json!({"id": "ignored", "name": "Lagos HQ", "updatedAt": 2})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "office-1");
        assert_eq!(body["name"], "Lagos HQ");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let router = router();
        for _ in 0..2 {
            let (status, body) = send(
                &router,
                request(Method::DELETE, "/offices/office-1", Some(SECRET), None),
            )
            .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
            assert_eq!(body, Value::Null);
        }
    }

    #[tokio::test]
    async fn increment_counter_rules() {
        let router = router();
        send(
            &router,
            request(
                Method::POST,
                "/downloads",
                Some(SECRET),
                Some(json!({
                    "id": "download-1",
                    "name": "IFU",
                    "downloadCount": 4,
                    "updatedAt": 1
                })),
            ),
        )
        .await;

        let (status, body) = send(
            &router,
            request(
                Method::POST,
                "/downloads/download-1/increment-counter",
                Some(SECRET),
                Some(json!({})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["downloadCount"], 5);

        let (status, _) = send(
            &router,
            request(
                Method::POST,
                "/downloads/download-1/increment-counter",
                Some(SECRET),
                Some(json!({"field": "name"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            request(
                Method::POST,
                "/downloads/missing/increment-counter",
                Some(SECRET),
                Some(json!({"field": "downloadCount"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_collection_name_is_rejected() {
        let (status, _) = send(
            &router(),
            request(
                Method::POST,
                "/off%20ices",
                Some(SECRET),
                Some(json!({"id": "a", "updatedAt": 1})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

//! REST handlers and the `{success, message, data}` response envelope.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, State, multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use waku_core::error::WakuError;
use waku_core::media::MediaKind;
use waku_core::session::{PairingPoll, SessionState};
use waku_core::types::Jid;

use crate::auth::require_token;
use crate::state::AppState;

/// Largest request body accepted: the biggest media kind plus form overhead.
const MAX_BODY_BYTES: usize = MediaKind::Document.max_size() as usize + 1024 * 1024;

/// Standard response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Error response with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::bad_request(format!("Invalid request: {detail}"))
    }
}

impl From<WakuError> for ApiError {
    fn from(err: WakuError) -> Self {
        let status = match &err {
            WakuError::NotFound(_) => StatusCode::NOT_FOUND,
            WakuError::AlreadyExists(_)
            | WakuError::InvalidDeviceId(_)
            | WakuError::InvalidRecipient(_)
            | WakuError::InvalidMedia(_)
            | WakuError::NotConnected(_) => StatusCode::BAD_REQUEST,
            WakuError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(%err, "Request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, ApiResponse::error(self.message)).into_response()
    }
}

type ApiResult = Result<ApiResponse, ApiError>;

/// Build the full HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/session/create", post(create_session))
        .route("/logout/{device_id}", post(logout_session))
        .route("/session/{device_id}", delete(delete_session))
        .route("/sessions", get(list_sessions))
        .route("/send", post(send_message))
        .route("/send-group", post(send_group_message))
        .route("/send-media", post(send_media))
        .route("/send-group-media", post(send_group_media))
        .route("/contacts/{device_id}", get(contacts))
        .route("/groups/{device_id}", get(groups))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let app = Router::new()
        .route("/health", get(health))
        .route("/qr/{device_id}", get(qr_code))
        .route("/session/{device_id}/status", get(session_status));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResponse {
    ApiResponse::ok(
        "OK",
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": state.registry.len().await,
        }),
    )
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "Metrics recorder not installed").into_response(),
    }
}

// --- Sessions ---

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub device_id: String,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    require_fields(&[("device_id", &req.device_id)])?;

    state.registry.create(&req.device_id).await?;

    Ok(ApiResponse::ok(
        "Session created successfully",
        json!({
            "device_id": req.device_id,
            "qr_url": format!("/qr/{}", req.device_id),
            "status": SessionState::AwaitingPairing.label(),
        }),
    ))
}

async fn qr_code(State(state): State<Arc<AppState>>, Path(device_id): Path<String>) -> ApiResult {
    let session = state.registry.get(&device_id).await.map_err(|_| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "Session not found. Please create session first via POST /session/create",
        )
    })?;

    match session.poll_pairing_code(state.pairing_timeouts).await {
        PairingPoll::Code(code) => Ok(ApiResponse::ok(
            "QR code generated",
            json!({
                "device_id": device_id,
                "qr_code": code,
                "expires_in": state.pairing_code_ttl_secs,
            }),
        )),
        PairingPoll::Connected { phone } => Ok(ApiResponse::ok(
            "Already connected",
            json!({
                "device_id": device_id,
                "status": SessionState::Connected.label(),
                "phone": phone,
            }),
        )),
        PairingPoll::TimedOut => Err(ApiError::new(
            StatusCode::REQUEST_TIMEOUT,
            "QR code generation in progress. Please try again in a few seconds.",
        )),
    }
}

async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> ApiResponse {
    let Ok(session) = state.registry.get(&device_id).await else {
        return ApiResponse::ok(
            "Session status retrieved",
            json!({ "device_id": device_id, "status": "not_found", "phone": null }),
        );
    };

    let status = session.status();
    let mut data = json!({
        "device_id": device_id,
        "status": status.state.label(),
        "phone": status.phone,
    });
    if status.state == SessionState::Connected {
        if let Some(at) = status.connected_at {
            data["connected_at"] = json!(at.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
    }
    ApiResponse::ok("Session status retrieved", data)
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResponse {
    let sessions: Vec<Value> = state
        .registry
        .list()
        .await
        .iter()
        .map(|session| {
            let status = session.status();
            json!({
                "device_id": session.device_id(),
                "status": status.state.label(),
                "phone": status.phone,
            })
        })
        .collect();

    ApiResponse::ok(
        "Sessions retrieved",
        json!({ "total": sessions.len(), "sessions": sessions }),
    )
}

async fn logout_session(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> ApiResult {
    state.registry.logout(&device_id).await?;
    Ok(ApiResponse::ok(
        "Session logged out successfully",
        json!({ "device_id": device_id, "status": SessionState::Disconnected.label() }),
    ))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> ApiResult {
    state.registry.delete(&device_id).await?;
    Ok(ApiResponse::ok(
        "Session deleted successfully",
        json!({
            "device_id": device_id,
            "deleted_at": chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
    ))
}

// --- Messaging ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub device_id: String,
    pub phone: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendGroupMessageRequest {
    pub device_id: String,
    pub group_jid: String,
    pub message: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    require_fields(&[
        ("device_id", &req.device_id),
        ("phone", &req.phone),
        ("message", &req.message),
    ])?;

    let to = Jid::for_phone(&req.phone)?;
    let session = state.registry.get(&req.device_id).await?;
    let receipt = session.send_text(&to, &req.message).await?;

    Ok(ApiResponse::ok(
        "Message sent successfully",
        json!({ "message_id": receipt.message_id, "timestamp": receipt.timestamp }),
    ))
}

async fn send_group_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendGroupMessageRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    require_fields(&[
        ("device_id", &req.device_id),
        ("group_jid", &req.group_jid),
        ("message", &req.message),
    ])?;

    let to = Jid::for_group(&req.group_jid)?;
    let session = state.registry.get(&req.device_id).await?;
    let receipt = session.send_text(&to, &req.message).await?;

    Ok(ApiResponse::ok(
        "Group message sent successfully",
        json!({ "message_id": receipt.message_id, "timestamp": receipt.timestamp }),
    ))
}

/// Fields of a media upload form.
#[derive(Debug, Default)]
struct MediaForm {
    device_id: String,
    recipient: String,
    caption: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

async fn read_media_form(
    multipart: Result<Multipart, MultipartRejection>,
    recipient_field: &str,
) -> Result<MediaForm, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let mut form = MediaForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("File is required: {}", e.body_text())))?;
            form.file = Some((file_name, data.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::invalid_request(e.body_text()))?;
        match name.as_str() {
            "device_id" => form.device_id = value,
            "caption" if !value.is_empty() => form.caption = Some(value),
            n if n == recipient_field => form.recipient = value,
            _ => {}
        }
    }

    if form.device_id.is_empty() || form.recipient.is_empty() {
        return Err(ApiError::bad_request(format!(
            "device_id and {recipient_field} are required"
        )));
    }
    Ok(form)
}

async fn deliver_media(state: &AppState, form: MediaForm, to: Jid, message: &str) -> ApiResult {
    let Some((file_name, data)) = form.file else {
        return Err(ApiError::bad_request("File is required"));
    };

    let session = state.registry.get(&form.device_id).await?;
    let receipt = session.send_media(&to, &file_name, data, form.caption).await?;

    Ok(ApiResponse::ok(
        message,
        json!({
            "message_id": receipt.message_id,
            "media_type": receipt.media_type,
            "file_size": receipt.file_size,
        }),
    ))
}

async fn send_media(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let form = read_media_form(multipart, "phone").await?;
    let to = Jid::for_phone(&form.recipient)?;
    deliver_media(&state, form, to, "Media sent successfully").await
}

async fn send_group_media(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let form = read_media_form(multipart, "group_jid").await?;
    let to = Jid::for_group(&form.recipient)?;
    deliver_media(&state, form, to, "Group media sent successfully").await
}

// --- Directory ---

async fn contacts(State(state): State<Arc<AppState>>, Path(device_id): Path<String>) -> ApiResult {
    let contacts = state.registry.get(&device_id).await?.contacts().await?;
    Ok(ApiResponse::ok(
        "Contacts retrieved",
        json!({ "total": contacts.len(), "contacts": contacts }),
    ))
}

async fn groups(State(state): State<Arc<AppState>>, Path(device_id): Path<String>) -> ApiResult {
    let groups = state.registry.get(&device_id).await?.groups().await?;
    Ok(ApiResponse::ok(
        "Groups retrieved",
        json!({ "total": groups.len(), "groups": groups }),
    ))
}

fn require_fields(fields: &[(&str, &String)]) -> Result<(), ApiError> {
    match fields.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((name, _)) => Err(ApiError::invalid_request(format!("{name} is required"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (WakuError::NotFound("d".into()), StatusCode::NOT_FOUND),
            (WakuError::AlreadyExists("d".into()), StatusCode::BAD_REQUEST),
            (WakuError::NotConnected("d".into()), StatusCode::BAD_REQUEST),
            (WakuError::InvalidRecipient("x".into()), StatusCode::BAD_REQUEST),
            (WakuError::InvalidMedia("x".into()), StatusCode::BAD_REQUEST),
            (WakuError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (WakuError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::error("nope")).unwrap();
        assert_eq!(value, json!({ "success": false, "message": "nope", "data": null }));
    }

    mod http {
        use std::path::Path as FsPath;

        use axum::Router;
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use axum::response::Response;
        use serde_json::Value;
        use tower::ServiceExt;
        use waku_core::config::{AuthConfig, Config, ServerConfig};
        use waku_core::protocol::{ClientFactory, EventSender, ProtocolClient};

        use super::*;
        use crate::registry::SessionRegistry;
        use crate::webhook::WebhookDispatcher;

        struct NoClients;

        impl ClientFactory for NoClients {
            fn open(
                &self,
                _device_id: &str,
                _store_path: &FsPath,
                _events: EventSender,
            ) -> anyhow::Result<Arc<dyn ProtocolClient>> {
                anyhow::bail!("no protocol collaborator in this test")
            }
        }

        fn app(root: &FsPath) -> Router {
            let config = Config {
                server: Some(ServerConfig {
                    auth: Some(AuthConfig {
                        token: Some("secret".into()),
                        token_env: None,
                    }),
                    ..ServerConfig::default()
                }),
                ..Config::default()
            };
            let registry = Arc::new(SessionRegistry::new(
                root,
                5,
                Arc::new(NoClients),
                Arc::new(WebhookDispatcher::disabled()),
            ));
            router(Arc::new(AppState::new(Arc::new(config), registry)))
        }

        async fn body_json(resp: Response) -> Value {
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            serde_json::from_slice(&bytes).unwrap()
        }

        #[tokio::test]
        async fn test_health_is_public() {
            let dir = tempfile::tempdir().unwrap();
            let resp = app(dir.path())
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let body = body_json(resp).await;
            assert_eq!(body["data"]["sessions"], 0);
        }

        #[tokio::test]
        async fn test_protected_route_rejects_missing_token() {
            let dir = tempfile::tempdir().unwrap();
            let resp = app(dir.path())
                .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(resp).await["success"], false);
        }

        #[tokio::test]
        async fn test_malformed_create_is_bad_request() {
            let dir = tempfile::tempdir().unwrap();
            let req = Request::post("/session/create")
                .header("Authorization", "Bearer secret")
                .header("Content-Type", "application/json")
                .body(Body::from("{not json"))
                .unwrap();
            let resp = app(dir.path()).oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body = body_json(resp).await;
            assert!(body["message"].as_str().unwrap().starts_with("Invalid request"));
        }

        #[tokio::test]
        async fn test_create_reports_factory_failure() {
            let dir = tempfile::tempdir().unwrap();
            let req = Request::post("/session/create")
                .header("Authorization", "Bearer secret")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"device_id":"shop-01"}"#))
                .unwrap();
            let resp = app(dir.path()).oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        }
    }

    #[test]
    fn test_require_fields() {
        let empty = String::new();
        let filled = "x".to_string();
        assert!(require_fields(&[("device_id", &filled)]).is_ok());
        let err = require_fields(&[("device_id", &filled), ("phone", &empty)]).unwrap_err();
        assert!(err.message.contains("phone is required"));
    }
}

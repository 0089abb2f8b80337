use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        body::Bytes,
        extract::{Path, Query, State},
        http::{StatusCode, header},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, post},
    },
    qrcode::{QrCode, render::svg},
    serde::Deserialize,
    serde_json::{Value, json},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info},
    zapgate_channels::ChatProvider,
    zapgate_common::{EventKind, InstanceKey, OutboundMessage},
    zapgate_config::ZapgateConfig,
    zapgate_whatsapp::parse_webhook,
};

use crate::{error::GatewayError, state::GatewayState};

type ApiResult<T = Json<Value>> = Result<T, GatewayError>;

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        // sessions
        .route("/instance/create", post(create_handler))
        .route("/instance/connect", post(connect_handler))
        .route("/instance/{key}/qr", get(qr_handler))
        .route("/instance/{key}/status", get(status_handler))
        .route("/instance/{key}/disconnect", post(disconnect_handler))
        .route("/instance/{key}", delete(delete_handler))
        .route("/instances", get(list_handler))
        // resolution and sends
        .route("/phone/validate", post(validate_handler))
        .route("/phone/lid", post(lid_handler))
        .route("/message/send", post(send_text_handler))
        .route("/message/send-media", post(send_media_handler))
        .route("/message/send-contact", post(send_contact_handler))
        .route("/message/send-voice", post(send_voice_handler))
        .route("/message/send-location", post(send_location_handler))
        .route("/message/send-interactive", post(send_interactive_handler))
        // provider events
        .route("/webhook", post(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start_gateway(
    config: ZapgateConfig,
    provider: Arc<dyn ChatProvider>,
) -> anyhow::Result<()> {
    let state = GatewayState::new(&config, Arc::clone(&provider));
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let handlers = state
        .dispatcher
        .handler_names(EventKind::MessageReceived)
        .join(", ");
    let lines = [
        format!("zapgate gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("provider: {}", provider.id()),
        format!(
            "message handlers: {}",
            if handlers.is_empty() {
                "none"
            } else {
                &handlers
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app).await?;
    Ok(())
}

// ── Request bodies ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    instance_key: Option<InstanceKey>,
}

#[derive(Debug, Deserialize)]
struct InstanceRequest {
    instance_key: InstanceKey,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    instance_key: InstanceKey,
    #[serde(alias = "phone")]
    number: String,
}

#[derive(Debug, Deserialize)]
struct LidRequest {
    instance_key: InstanceKey,
    lid: String,
}

/// Common part of every send request; the rest of the body is the message.
#[derive(Debug, Deserialize)]
struct SendEnvelope {
    instance_key: InstanceKey,
    to: String,
}

#[derive(Debug, Default, Deserialize)]
struct QrQuery {
    #[serde(default)]
    format: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "provider": state.provider.id(),
        "sessions": state.sessions.len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn create_handler(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request: CreateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| GatewayError::BadRequest(e.to_string()))?
    };
    if request
        .instance_key
        .as_ref()
        .is_some_and(|k| k.as_str().trim().is_empty())
    {
        return Err(GatewayError::BadRequest("instance_key must not be blank".into()));
    }
    let key = state.sessions.create(request.instance_key)?;
    let status = state.sessions.status(&key)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "instance_key": key, "status": status })),
    ))
}

async fn connect_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<InstanceRequest>,
) -> ApiResult {
    let outcome = state.sessions.connect(&request.instance_key).await?;
    Ok(Json(json!({
        "instance_key": request.instance_key,
        "outcome": outcome,
    })))
}

async fn qr_handler(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<InstanceKey>,
    Query(query): Query<QrQuery>,
) -> ApiResult<Response> {
    let artifact = state.sessions.qr(&key).await?;
    if query.format.as_deref() == Some("json") {
        return Ok(Json(json!({ "instance_key": key, "qr": artifact })).into_response());
    }
    let code = QrCode::new(artifact.as_bytes()).map_err(|e| GatewayError::Render(e.to_string()))?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .build();
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], image).into_response())
}

async fn status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<InstanceKey>,
) -> ApiResult {
    let status = state.sessions.status(&key)?;
    Ok(Json(json!(status)))
}

async fn list_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({ "instances": state.sessions.list() }))
}

async fn disconnect_handler(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<InstanceKey>,
) -> ApiResult {
    let status = state.disconnect(&key).await?;
    Ok(Json(json!(status)))
}

async fn delete_handler(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<InstanceKey>,
) -> ApiResult {
    let last = state.delete(&key).await?;
    Ok(Json(json!({ "deleted": true, "last_status": last })))
}

async fn validate_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult {
    let result = state
        .outbox
        .validate(&request.instance_key, &request.number)
        .await?;
    Ok(Json(json!(result)))
}

async fn lid_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<LidRequest>,
) -> ApiResult {
    let phone = state
        .outbox
        .lid_to_phone(&request.instance_key, &request.lid)
        .await?;
    Ok(Json(json!({ "lid": request.lid, "phone": phone })))
}

/// Parse `body` as a message of `kind` and send it.
async fn send_kind(state: &GatewayState, kind: &str, mut body: Value) -> ApiResult {
    let envelope: SendEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    let Some(fields) = body.as_object_mut() else {
        return Err(GatewayError::BadRequest("expected a JSON object".into()));
    };
    fields.insert("type".into(), Value::from(kind));
    let message: OutboundMessage =
        serde_json::from_value(body).map_err(|e| GatewayError::BadRequest(e.to_string()))?;

    let receipt = state
        .outbox
        .send(&envelope.instance_key, &envelope.to, message)
        .await?;
    Ok(Json(json!(receipt)))
}

async fn send_text_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    send_kind(&state, "text", body).await
}

async fn send_media_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    send_kind(&state, "media", body).await
}

async fn send_contact_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    send_kind(&state, "contact", body).await
}

async fn send_voice_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    send_kind(&state, "voice", body).await
}

async fn send_location_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    send_kind(&state, "location", body).await
}

async fn send_interactive_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    send_kind(&state, "interactive", body).await
}

async fn webhook_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Some(event) = parse_webhook(body)? else {
        return Ok((StatusCode::OK, Json(json!({ "accepted": false }))));
    };
    debug!(tenant = %event.tenant, kind = %event.kind, "webhook event queued");
    state.dispatcher.submit(event)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

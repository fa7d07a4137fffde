//! HTTP ingress bridge.
//!
//! Maps `GET|POST /{cluster_id}/{app_id}` onto the registry's synchronous
//! invoke path and answers `{route, payload}` JSON. The bridge never touches
//! the broker: it calls `invoke`, not `send`. Handler failures surface as
//! HTTP 500 `{error}`; `OPTIONS` answers 204 for cross-origin preflight.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use http::{HeaderMap, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::codec;
use crate::node::InvokeContext;
use crate::registry::NodeRegistry;

const CORRELATION_HEADER: &str = "correlation_id";
const SESSION_HEADER: &str = "session_id";

/// Maximum accepted request body, in bytes.
const BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
struct IngressState {
    registry: Arc<NodeRegistry>,
}

/// Build the ingress router.
pub fn router(registry: Arc<NodeRegistry>) -> Router {
    Router::new()
        .route(
            "/{cluster_id}/{app_id}",
            get(invoke_route).post(invoke_route).options(preflight),
        )
        // A full CORS layer would short-circuit OPTIONS before routing and
        // break the 204 preflight contract; a plain response header keeps
        // cross-origin access open while the route stays in charge.
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(IngressState { registry })
}

/// Serve the router on an already-bound listener until cancellation.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<NodeRegistry>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = router(registry).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        ],
    )
}

async fn invoke_route(
    State(state): State<IngressState>,
    Path((cluster_id, app_id)): Path<(String, String)>,
    request: Request,
) -> Response {
    let ctx = InvokeContext {
        correlation_id: header_value(request.headers(), CORRELATION_HEADER),
        session_id: header_value(request.headers(), SESSION_HEADER),
    };
    // Present only when served with connect info; router tests run without.
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let mut message = read_body(request.into_body()).await;
    if let (Some(ip), Some(fields)) = (remote, message.as_object_mut()) {
        fields.insert("ip".to_string(), json!(ip));
    }

    let route = format!("/{cluster_id}/{app_id}");
    info!(route = %route, "Invoking over HTTP");
    match state.registry.invoke(&cluster_id, &app_id, ctx, message).await {
        Ok(payload) => Json(json!({ "route": route, "payload": payload })).into_response(),
        Err(e) => {
            warn!(route = %route, error = %e, "HTTP invoke failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn read_body(body: Body) -> Value {
    match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => codec::decode_or_empty(&bytes),
        Err(_) => Value::Object(serde_json::Map::new()),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

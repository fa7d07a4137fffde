//! Node and app abstractions.
//!
//! A `Node` is a named collection of invocable apps registered under one
//! cluster id. App tables are built at registration time; there is no
//! runtime reflection over node methods. App names beginning with `_` are
//! invocable but hidden from the routes listing.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::codec;
use crate::ledger::DeliveryLedger;
use crate::outbound::SendHandle;
use crate::registry::{collect_routes, NodeMap};

/// Errors produced by node implementations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Unknown app: {0}")]
    UnknownApp(String),

    #[error("App failed: {0}")]
    AppFailed(String),
}

/// Request context for the synchronous invoke path.
#[derive(Debug, Clone, Default)]
pub struct InvokeContext {
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
}

/// Request context for the fire-and-forget dispatch path.
#[derive(Debug, Clone, Default)]
pub struct PerformContext {
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub reply_to: Option<String>,
    pub error_to: Option<String>,
}

impl PerformContext {
    fn invoke_context(&self) -> InvokeContext {
        InvokeContext {
            correlation_id: self.correlation_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// A dispatch target exposing zero or more named apps.
#[async_trait]
pub trait Node: Send + Sync {
    /// Publicly routable app names (names starting with `_` are excluded).
    fn apps(&self) -> Vec<String>;

    /// Whether `app_id` is invocable on this node, public or not.
    fn has(&self, app_id: &str) -> bool;

    /// Invoke an app synchronously and return its result.
    async fn invoke(
        &self,
        app_id: &str,
        ctx: InvokeContext,
        message: Value,
    ) -> Result<Value, NodeError>;

    /// Fire-and-forget dispatch for inbound broker messages.
    ///
    /// The default implementation invokes the app and routes the outcome:
    /// results go to `reply_to`, failures to `error_to`. Either address may
    /// be absent, in which case the outcome is dropped after logging.
    async fn perform(&self, app_id: &str, ctx: PerformContext, message: Value, replies: SendHandle) {
        let correlation_id = ctx
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        match self.invoke(app_id, ctx.invoke_context(), message).await {
            Ok(result) => {
                if let Some(reply_to) = &ctx.reply_to {
                    deliver(&replies, reply_to, result, correlation_id, &ctx.session_id);
                }
            }
            Err(e) => {
                warn!(app_id = %app_id, error = %e, "App failed during dispatch");
                if let Some(error_to) = &ctx.error_to {
                    let report = json!({ "error": e.to_string() });
                    deliver(&replies, error_to, report, correlation_id, &ctx.session_id);
                }
            }
        }
    }
}

fn deliver(
    replies: &SendHandle,
    target: &str,
    payload: Value,
    correlation_id: String,
    session_id: &Option<String>,
) {
    match replies.send_correlated(target, payload, correlation_id, session_id.clone()) {
        Ok(Some(_)) => {}
        Ok(None) => warn!(target = %target, "Reply target endpoint is not a known outbound"),
        Err(e) => warn!(target = %target, error = %e, "Failed to enqueue reply"),
    }
}

/// Boxed app handler stored in an [`AppNode`] table.
pub type AppHandler =
    Arc<dyn Fn(InvokeContext, Value) -> BoxFuture<'static, Result<Value, NodeError>> + Send + Sync>;

/// A node whose apps are plain handler functions in a registration-time table.
#[derive(Default)]
pub struct AppNode {
    apps: BTreeMap<String, AppHandler>,
}

impl AppNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an app handler under `name`. Builder-style.
    pub fn app<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(InvokeContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, NodeError>> + Send + 'static,
    {
        let handler: AppHandler = Arc::new(move |ctx, message| Box::pin(handler(ctx, message)));
        self.apps.insert(name.into(), handler);
        self
    }
}

#[async_trait]
impl Node for AppNode {
    fn apps(&self) -> Vec<String> {
        self.apps
            .keys()
            .filter(|name| !name.starts_with('_'))
            .cloned()
            .collect()
    }

    fn has(&self, app_id: &str) -> bool {
        self.apps.contains_key(app_id)
    }

    async fn invoke(
        &self,
        app_id: &str,
        ctx: InvokeContext,
        message: Value,
    ) -> Result<Value, NodeError> {
        let handler = self
            .apps
            .get(app_id)
            .ok_or_else(|| NodeError::UnknownApp(app_id.to_string()))?;
        handler(ctx, message).await
    }
}

/// The built-in node registered under the reserved `"system"` cluster.
///
/// Exposes liveness (`ping`), the invocable address list (`routes`) and
/// delivery-confirmation statistics (`stats`).
pub struct SystemNode {
    endpoint_id: String,
    nodes: Weak<RwLock<NodeMap>>,
    ledger: Arc<DeliveryLedger>,
}

impl SystemNode {
    pub(crate) fn new(
        endpoint_id: impl Into<String>,
        nodes: Weak<RwLock<NodeMap>>,
        ledger: Arc<DeliveryLedger>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            nodes,
            ledger,
        }
    }

    fn routes(&self) -> Vec<String> {
        match self.nodes.upgrade() {
            Some(nodes) => collect_routes(&self.endpoint_id, &nodes.read().expect("node map lock")),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl Node for SystemNode {
    fn apps(&self) -> Vec<String> {
        vec![
            "ping".to_string(),
            "routes".to_string(),
            "stats".to_string(),
        ]
    }

    fn has(&self, app_id: &str) -> bool {
        matches!(app_id, "ping" | "routes" | "stats")
    }

    async fn invoke(
        &self,
        app_id: &str,
        _ctx: InvokeContext,
        _message: Value,
    ) -> Result<Value, NodeError> {
        match app_id {
            "ping" => Ok(json!({ "pong": codec::encode_timestamp(Utc::now()) })),
            "routes" => Ok(json!({ "routes": self.routes() })),
            "stats" => serde_json::to_value(self.ledger.stats())
                .map_err(|e| NodeError::AppFailed(e.to_string())),
            other => Err(NodeError::UnknownApp(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_node() -> AppNode {
        AppNode::new()
            .app("echo", |_ctx, message| async move { Ok(message) })
            .app("_hidden", |_ctx, _message| async move { Ok(json!({})) })
    }

    #[tokio::test]
    async fn test_app_node_invoke() {
        let node = echo_node();
        let result = node
            .invoke("echo", InvokeContext::default(), json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_app_node_unknown_app() {
        let node = echo_node();
        let err = node
            .invoke("missing", InvokeContext::default(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::UnknownApp(_)));
    }

    #[test]
    fn test_underscore_apps_hidden_but_invocable() {
        let node = echo_node();
        assert_eq!(node.apps(), vec!["echo".to_string()]);
        assert!(node.has("_hidden"));
        assert!(node.has("echo"));
        assert!(!node.has("missing"));
    }
}

//! Inbound delivery dispatch.
//!
//! Resolves each delivery to a registered node/app and hands the `perform`
//! call to the configured executor. The delivery is acknowledged
//! unconditionally afterwards: handler outcome never affects the ack, and
//! handlers self-report failures through their `error_to` address.

use std::sync::Arc;

use futures::FutureExt;
use lapin::message::Delivery;
use lapin::options::BasicAckOptions;
use tracing::{debug, error, info, warn};

use crate::executor::DispatchExecutor;
use crate::message::InboundMessage;
use crate::node::PerformContext;
use crate::outbound::SendHandle;
use crate::registry::NodeRegistry;

/// Routes broker deliveries into the node registry.
pub struct InboundDispatcher {
    registry: Arc<NodeRegistry>,
    executor: Box<dyn DispatchExecutor>,
    replies: SendHandle,
}

impl InboundDispatcher {
    pub fn new(
        registry: Arc<NodeRegistry>,
        executor: Box<dyn DispatchExecutor>,
        replies: SendHandle,
    ) -> Self {
        Self {
            registry,
            executor,
            replies,
        }
    }

    /// Decode, dispatch and acknowledge one delivery.
    pub async fn handle(&self, delivery: Delivery) {
        let inbound = InboundMessage::from_parts(&delivery.properties, &delivery.data);
        self.dispatch(inbound).await;

        // Ack regardless of handler outcome; the broker cannot know whether
        // a handler failure is retryable.
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!(error = %e, "Failed to ack delivery");
        }
    }

    async fn dispatch(&self, inbound: InboundMessage) {
        let (Some(cluster_id), Some(app_id)) = (inbound.cluster_id, inbound.app_id) else {
            warn!("Dropping delivery without cluster_id/app_id headers");
            return;
        };

        let Some(node) = self.registry.resolve(&cluster_id) else {
            warn!(cluster_id = %cluster_id, "Dropping delivery for unregistered cluster");
            return;
        };
        if !node.has(&app_id) {
            warn!(
                cluster_id = %cluster_id,
                app_id = %app_id,
                "Dropping delivery for unknown app"
            );
            return;
        }

        info!(cluster_id = %cluster_id, app_id = %app_id, "Dispatching inbound message");
        let ctx = PerformContext {
            correlation_id: inbound.correlation_id,
            session_id: inbound.session_id,
            reply_to: inbound.reply_to,
            error_to: inbound.error_to,
        };
        let replies = self.replies.clone();
        let payload = inbound.payload;
        let task = async move {
            node.perform(&app_id, ctx, payload, replies).await;
            debug!("Dispatch complete");
        }
        .boxed();
        self.executor.execute(task).await;
    }
}

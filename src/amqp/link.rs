//! Broker connection state machine.
//!
//! One task owns the connection, its single channel, the consumer stream and
//! the publish tick. Setup runs sequentially through the lifecycle states;
//! any failure tears the whole connection down and, unless the endpoint is
//! stopping, re-enters the cycle after a fixed delay. There is no
//! partial-channel recovery.

use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{InboundDispatcher, LinkError, LinkState};
use crate::config::AmqpConfig;
use crate::ledger::DeliveryLedger;
use crate::outbound::SendQueue;
use crate::redirect::RedirectTable;

/// How a connected session ended.
enum SessionEnd {
    /// `stop()` was requested; the machine terminates permanently.
    Stopped,
    /// The broker went away; the machine reconnects.
    ConnectionLost,
}

/// Owns the broker connection lifecycle for one endpoint.
pub struct AmqpLink {
    endpoint_id: String,
    config: AmqpConfig,
    queue: Arc<SendQueue>,
    ledger: Arc<DeliveryLedger>,
    redirects: Arc<RedirectTable>,
    dispatcher: InboundDispatcher,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl AmqpLink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint_id: impl Into<String>,
        config: AmqpConfig,
        queue: Arc<SendQueue>,
        ledger: Arc<DeliveryLedger>,
        redirects: Arc<RedirectTable>,
        dispatcher: InboundDispatcher,
        state: watch::Sender<LinkState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            config,
            queue,
            ledger,
            redirects,
            dispatcher,
            state,
            cancel,
        }
    }

    /// Drive the connection cycle until `stop()` terminates it.
    pub async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                self.set_state(LinkState::Disconnected);
                return;
            }

            self.set_state(LinkState::Connecting);
            match self.session().await {
                Ok(SessionEnd::Stopped) => {
                    self.set_state(LinkState::Disconnected);
                    info!("Link stopped");
                    return;
                }
                Ok(SessionEnd::ConnectionLost) => {
                    warn!("Connection lost");
                }
                Err(e) => {
                    warn!(error = %e, "Connection cycle failed");
                }
            }

            // Confirms pending on the dead channel will never arrive.
            self.ledger.reset_pending();

            if self.cancel.is_cancelled() {
                self.set_state(LinkState::Disconnected);
                return;
            }
            self.set_state(LinkState::Reconnecting);
            warn!(
                delay_secs = self.config.reconnect_delay_secs,
                "Reopening connection after delay"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_state(LinkState::Disconnected);
                    return;
                }
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
        }
    }

    /// One full connect-to-consume session.
    async fn session(&self) -> Result<SessionEnd, LinkError> {
        info!(url = %self.config.url, "Connecting");
        let conn = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(|e| LinkError::Connection(e.to_string()))?;

        self.set_state(LinkState::ChannelOpening);
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| LinkError::Channel(e.to_string()))?;

        // Confirm mode is enabled exactly once per channel lifetime.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| LinkError::Channel(e.to_string()))?;

        self.set_state(LinkState::ExchangeDeclaring);
        info!(exchange = %self.config.exchange, "Declaring exchange");
        channel
            .exchange_declare(
                &self.config.exchange,
                exchange_kind(&self.config.exchange_kind),
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| LinkError::Topology(e.to_string()))?;

        self.set_state(LinkState::QueuesDeclaring);
        self.declare_and_bind(&channel, &self.endpoint_id).await?;
        for outbound in self.redirects.outbound_endpoints() {
            self.declare_and_bind(&channel, &outbound).await?;
        }

        self.set_state(LinkState::Bound);
        let consumer_tag = format!("{}-consumer", self.endpoint_id);
        let mut consumer = channel
            .basic_consume(
                &self.endpoint_id,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| LinkError::Consume(e.to_string()))?;

        self.set_state(LinkState::Consuming);
        info!(queue = %self.endpoint_id, "Consuming");

        let mut tick = tokio::time::interval(self.config.publish_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.close(&conn, &channel, &consumer_tag).await;
                    return Ok(SessionEnd::Stopped);
                }
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => self.dispatcher.handle(delivery).await,
                    Some(Err(e)) => return Err(LinkError::Consume(e.to_string())),
                    None => {
                        // Broker cancelled the consumer; restart from scratch.
                        warn!("Consumer cancelled remotely");
                        let _ = channel.close(200, "consumer cancelled").await;
                        return Ok(SessionEnd::ConnectionLost);
                    }
                },
                _ = tick.tick() => self.publish_one(&channel).await?,
            }
        }
    }

    async fn declare_and_bind(&self, channel: &Channel, queue: &str) -> Result<(), LinkError> {
        info!(queue = %queue, "Declaring queue");
        channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| LinkError::Topology(e.to_string()))?;

        info!(
            exchange = %self.config.exchange,
            queue = %queue,
            routing_key = %queue,
            "Binding queue"
        );
        channel
            .queue_bind(
                queue,
                &self.config.exchange,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| LinkError::Topology(e.to_string()))?;
        Ok(())
    }

    /// Publish at most one queued message. Empty queue is a no-op tick.
    async fn publish_one(&self, channel: &Channel) -> Result<(), LinkError> {
        let Some(message) = self.queue.pop() else {
            return Ok(());
        };

        info!(
            endpoint_id = %message.endpoint_id,
            cluster_id = %message.cluster_id,
            app_id = %message.app_id,
            "Publishing message"
        );
        let seq = self.ledger.begin_delivery();
        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                message.routing_key(),
                BasicPublishOptions::default(),
                &message.body(),
                message.properties(),
            )
            .await
            .map_err(|e| LinkError::Channel(e.to_string()))?;

        // Settle the confirm off the link task so a slow broker never stalls
        // consumption or the next tick.
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            match confirm.await {
                Ok(Confirmation::Nack(_)) => {
                    warn!(sequence = seq, "Broker nacked delivery");
                    ledger.record_nack(seq);
                }
                Ok(_) => {
                    debug!(sequence = seq, "Delivery confirmed");
                    ledger.record_ack(seq);
                }
                Err(e) => {
                    // Channel died before confirming; pending state is
                    // cleared when the session ends.
                    warn!(sequence = seq, error = %e, "Confirm failed");
                }
            }
        });
        Ok(())
    }

    async fn close(&self, conn: &Connection, channel: &Channel, consumer_tag: &str) {
        self.set_state(LinkState::Closing);
        info!("Stopping consumer and closing link");
        if let Err(e) = channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            debug!(error = %e, "Consumer cancel failed during shutdown");
        }
        if let Err(e) = channel.close(200, "shutdown").await {
            debug!(error = %e, "Channel close failed during shutdown");
        }
        if let Err(e) = conn.close(200, "shutdown").await {
            debug!(error = %e, "Connection close failed during shutdown");
        }
    }

    fn set_state(&self, state: LinkState) {
        debug!(state = %state, "Link state");
        self.state.send_replace(state);
    }
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "topic" => ExchangeKind::Topic,
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        other => ExchangeKind::Custom(other.to_string().into()),
    }
}

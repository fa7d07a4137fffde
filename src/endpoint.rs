//! The endpoint facade.
//!
//! One `Endpoint` per process owns every piece of mutable state: the node
//! registry, redirect table, outbound queue, delivery ledger and the link
//! state. Sub-components receive `Arc` handles; there are no ambient
//! globals. Register nodes and redirects before `run()` so every outbound
//! queue is declared before the link starts consuming.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::address::{Address, AddressError};
use crate::amqp::{AmqpLink, InboundDispatcher, LinkState};
use crate::config::Config;
use crate::executor::executor_for;
use crate::ingress;
use crate::ledger::{DeliveryLedger, DeliveryStats};
use crate::node::{InvokeContext, Node};
use crate::outbound::{SendError, SendHandle, SendOptions, SendQueue};
use crate::redirect::RedirectTable;
use crate::registry::{NodeRegistry, RegistryError};

/// Errors from endpoint startup.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Ingress bind failed: {0}")]
    Ingress(#[from] std::io::Error),

    #[error("Endpoint is already running")]
    AlreadyRunning,
}

/// A process-level messaging node.
pub struct Endpoint {
    config: Config,
    registry: Arc<NodeRegistry>,
    redirects: Arc<RedirectTable>,
    queue: Arc<SendQueue>,
    ledger: Arc<DeliveryLedger>,
    sender: SendHandle,
    state_tx: Mutex<Option<watch::Sender<LinkState>>>,
    state_rx: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    http_addr: Mutex<Option<SocketAddr>>,
}

impl Endpoint {
    pub fn new(config: Config) -> Self {
        let ledger = Arc::new(DeliveryLedger::new());
        let registry = Arc::new(NodeRegistry::new(&config.endpoint_id, ledger.clone()));
        let redirects = Arc::new(RedirectTable::new(&config.endpoint_id));
        let queue = Arc::new(SendQueue::new(config.amqp.queue_capacity));
        let sender = SendHandle::new(queue.clone(), redirects.clone());
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        Self {
            config,
            registry,
            redirects,
            queue,
            ledger,
            sender,
            state_tx: Mutex::new(Some(state_tx)),
            state_rx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            http_addr: Mutex::new(None),
        }
    }

    /// This endpoint's inbound identity.
    pub fn endpoint_id(&self) -> &str {
        self.registry.endpoint_id()
    }

    /// Register a node under a cluster id. Call before `run()`.
    pub fn register_node(&self, cluster_id: &str, node: Arc<dyn Node>) -> Result<(), RegistryError> {
        self.registry.register(cluster_id, node)
    }

    /// Redirect one of this endpoint's output addresses to a remote address.
    ///
    /// Returns whether the rule was accepted; a source this endpoint does
    /// not own is a no-op.
    pub fn redirect(&self, source: &str, target: &str) -> Result<bool, AddressError> {
        let source = Address::parse(source)?;
        let target = Address::parse(target)?;
        Ok(self.redirects.redirect(&source, &target))
    }

    /// Register a peer endpoint this process sends to without a redirect
    /// rule, so its queue is declared during connection setup.
    pub fn register_outbound(&self, endpoint_id: &str) {
        self.redirects.register_outbound(endpoint_id);
    }

    /// Send a message to a `pin://` address.
    ///
    /// Returns the correlation id when the target endpoint is a known
    /// outbound destination, `None` otherwise.
    pub fn send(
        &self,
        address: &str,
        payload: Value,
        opts: SendOptions,
    ) -> Result<Option<String>, SendError> {
        self.sender.send(address, payload, opts)
    }

    /// Resolve a local output address through the redirect table and send
    /// the payload to every registered target.
    ///
    /// All targets share one correlation id. Returns the serialized target
    /// addresses actually enqueued.
    pub fn forward(
        &self,
        source: &str,
        payload: Value,
        session_id: Option<String>,
    ) -> Result<Vec<String>, SendError> {
        let source = Address::parse(source)?;
        let correlation_id = Uuid::new_v4().to_string();
        let mut delivered = Vec::new();
        for target in self.redirects.targets(&source) {
            let target = target.to_string();
            if self
                .sender
                .send_correlated(&target, payload.clone(), correlation_id.clone(), session_id.clone())?
                .is_some()
            {
                delivered.push(target);
            }
        }
        Ok(delivered)
    }

    /// A clonable send handle for application glue and worker tasks.
    pub fn sender(&self) -> SendHandle {
        self.sender.clone()
    }

    /// Synchronous invoke path, used by the ingress bridge and local callers.
    pub async fn invoke(
        &self,
        cluster_id: &str,
        app_id: &str,
        ctx: InvokeContext,
        message: Value,
    ) -> Result<Value, RegistryError> {
        self.registry.invoke(cluster_id, app_id, ctx, message).await
    }

    /// Every currently invocable address on this endpoint.
    pub fn routes(&self) -> Vec<String> {
        self.registry.routes()
    }

    /// Delivery-confirmation statistics.
    pub fn stats(&self) -> DeliveryStats {
        self.ledger.stats()
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Observe link state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Address of the bound ingress listener, once running.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        *self.http_addr.lock().expect("http addr lock")
    }

    /// Start the broker link and the HTTP ingress.
    ///
    /// Returns once both are spawned; `stop()` shuts them down.
    pub async fn run(&self) -> Result<(), EndpointError> {
        let state_tx = self
            .state_tx
            .lock()
            .expect("state lock")
            .take()
            .ok_or(EndpointError::AlreadyRunning)?;

        let mut tasks = Vec::new();

        if self.config.http.enabled {
            let bound = async {
                let listener =
                    TcpListener::bind((self.config.http.host.as_str(), self.config.http.port))
                        .await?;
                let addr = listener.local_addr()?;
                Ok::<_, std::io::Error>((listener, addr))
            }
            .await;
            let (listener, addr) = match bound {
                Ok(bound) => bound,
                Err(e) => {
                    // Hand the sender back so a failed startup can be retried.
                    *self.state_tx.lock().expect("state lock") = Some(state_tx);
                    return Err(e.into());
                }
            };
            *self.http_addr.lock().expect("http addr lock") = Some(addr);
            info!(addr = %addr, "Ingress listening");

            let registry = self.registry.clone();
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = ingress::serve(listener, registry, cancel).await {
                    error!(error = %e, "Ingress server failed");
                }
            }));
        }

        let dispatcher = InboundDispatcher::new(
            self.registry.clone(),
            executor_for(self.config.dispatch),
            self.sender.clone(),
        );
        let link = AmqpLink::new(
            self.config.endpoint_id.clone(),
            self.config.amqp.clone(),
            self.queue.clone(),
            self.ledger.clone(),
            self.redirects.clone(),
            dispatcher,
            state_tx,
            self.cancel.clone(),
        );
        tasks.push(tokio::spawn(link.run()));

        self.tasks.lock().expect("task lock").extend(tasks);
        Ok(())
    }

    /// Stop the endpoint: cancel the link and ingress, drain the close
    /// handshake and wait for the link to settle in `Disconnected`.
    pub async fn stop(&self) {
        info!("Stopping");
        self.cancel.cancel();

        let mut state = self.state_rx.clone();
        // A never-started link is already Disconnected.
        let _ = state.wait_for(|s| *s == LinkState::Disconnected).await;

        let tasks: Vec<_> = self.tasks.lock().expect("task lock").drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Stopped");
    }
}

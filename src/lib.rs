//! pinbus: an addressable messaging endpoint over a RabbitMQ-style topic
//! broker, with a blocking HTTP bridge onto the local invoke path.
//!
//! A process constructs one [`Endpoint`], registers nodes (named clusters of
//! invocable apps) and redirect rules, then calls `run()`. The endpoint
//! declares its topology on the broker, consumes its inbound queue, drains
//! the outbound queue on a fixed tick and serves
//! `GET|POST /{cluster}/{app}` over HTTP.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pinbus::{AppNode, Config, Endpoint};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Endpoint::new(Config::default());
//! endpoint.register_node(
//!     "demo",
//!     Arc::new(AppNode::new().app("echo", |_ctx, message| async move { Ok(message) })),
//! )?;
//! endpoint.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod amqp;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod executor;
pub mod ingress;
pub mod ledger;
pub mod message;
pub mod node;
pub mod outbound;
pub mod redirect;
pub mod registry;

pub use address::{Address, AddressError};
pub use amqp::LinkState;
pub use config::Config;
pub use endpoint::{Endpoint, EndpointError};
pub use executor::DispatchMode;
pub use ledger::DeliveryStats;
pub use node::{AppNode, InvokeContext, Node, NodeError, PerformContext};
pub use outbound::{SendError, SendHandle, SendOptions};
pub use registry::{NodeRegistry, RegistryError};

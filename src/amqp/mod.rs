//! AMQP link: connection lifecycle, topology, publishing, consuming.

mod dispatcher;
mod link;

pub use dispatcher::InboundDispatcher;
pub use link::AmqpLink;

use std::fmt;

/// Observable connection lifecycle states.
///
/// Setup runs the states in order; an unexpected close from any of them
/// moves to `Reconnecting`, an explicit stop to `Closing` and then
/// `Disconnected` permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    ChannelOpening,
    ExchangeDeclaring,
    QueuesDeclaring,
    Bound,
    Consuming,
    Reconnecting,
    Closing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::ChannelOpening => "channel_opening",
            LinkState::ExchangeDeclaring => "exchange_declaring",
            LinkState::QueuesDeclaring => "queues_declaring",
            LinkState::Bound => "bound",
            LinkState::Consuming => "consuming",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Errors inside the connection cycle. Never surfaced to callers; every
/// variant routes into the reconnect path.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel failed: {0}")]
    Channel(String),

    #[error("Topology setup failed: {0}")]
    Topology(String),

    #[error("Consume failed: {0}")]
    Consume(String),
}

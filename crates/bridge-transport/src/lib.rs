//! Transport adapters and the protocol dispatch they share. One
//! `MessageSink`-shaped contract (`hub::TransportHub`, implementing
//! `bridge_core`'s `OutboundSink`/`PortSink`), two adapters feeding it
//! inbound frames (`broker`, `stream`), and the dispatch logic itself
//! (`handler`).

pub mod broker;
pub mod handler;
pub mod hub;
pub mod stream;

pub use broker::{run_broker, BrokerConfig};
pub use handler::{DispatchOutcome, ProtocolHandler};
pub use hub::TransportHub;
pub use stream::run_stream_server;

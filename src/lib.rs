//! A hierarchical publish/subscribe message broker served over TCP, with
//! pluggable JSON/XML/Object wire framing.
//!
//! The crate root exposes the pieces an embedder needs: [`Config`] to
//! describe where to listen, [`Broker`] to run the reactor, and
//! [`BrokerError`] for everything that can go wrong. The [`client`] module is
//! a thin synchronous helper for talking to a broker from tests and small
//! tools — it is not how the broker itself is implemented.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod reactor;
pub mod topic;

pub use config::Config;
pub use error::{BrokerError, CodecError, ProtocolError};
pub use reactor::{serve, Broker, ShutdownHandle};

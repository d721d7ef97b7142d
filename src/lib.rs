#![deny(unsafe_code)]

//! Request broker for the Sparkgap notification server.
//!
//! Many concurrent call sessions issue synchronous transactions (verify a
//! recipient, send a message) against a single remote server over one
//! persistent TCP connection. A single worker task owns that connection:
//! it multiplexes an inbound queue of requests from arbitrary caller tasks,
//! routes responses back through a fixed pool of generation-tagged
//! correlation slots, and manages connection lifecycle (primary/secondary
//! failover, retry backoff, keepalive, disconnect-on-error). Callers block
//! only on their own request, bounded by a fixed timeout.
//!
//! # Example
//!
//! ```ignore
//! use sparkgap_broker::{Broker, IdleSession, ServerConfig};
//!
//! let config = ServerConfig::from_file("/etc/sparkgap.toml")?;
//! let broker = Broker::start(config);
//!
//! let mut session = IdleSession::new();
//! let code = broker.send_message(&mut session, "alice", "hi", "bob").await;
//! println!("{}", code.label());
//!
//! broker.stop().await;
//! ```
//!
//! Calls carrying real telephony semantics implement [`CallSession`] over
//! their own event stream so a hangup interrupts the wait; repeated
//! operations on one call reuse the slot attached to it.

pub mod codec;
pub mod config;
mod error;
mod link;
pub mod request;
pub mod session;
pub mod slot;
mod worker;

mod broker;

pub use broker::Broker;
pub use codec::{ResponseCode, TagBase, CLIENT_ID_MAX, PARAM_MAX};
pub use config::{ServerConfig, DEFAULT_CLIENT_ID, DEFAULT_PORT};
pub use error::ConfigError;
pub use link::{CONNECT_RETRY_INTERVAL, KEEPALIVE_INTERVAL, SERVER_TIMEOUT};
pub use session::{wait_response, CallEvent, CallSession, IdleSession, CALLER_WAIT};
pub use slot::{Correlation, SlotHandle, SlotPool, GENERATION_STEP, SLOT_COUNT};

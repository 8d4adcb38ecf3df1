//! # tagwire
//!
//! Tagged, length-prefixed message transport over TCP.
//!
//! Every frame on the wire is an 8-byte big-endian header (tag, payload
//! length) followed by the payload. Payloads are produced by a pluggable
//! codec (JSON by default). Incoming frames are dispatched by tag to handlers
//! registered in a [`DispatchTable`].
//!
//! ## Architecture
//!
//! - **Endpoint**: listener, accept loop and registry of live connections
//! - **Connection**: one socket, one read task, one write task
//! - **Dispatch table**: tag → handler, shared read-only by every connection
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tagwire::messages::{Echo, ECHO};
//! use tagwire::{DispatchTable, Endpoint, EndpointConfig};
//!
//! #[tokio::main]
//! async fn main() -> tagwire::Result<()> {
//!     let mut table = DispatchTable::new();
//!     table.register(ECHO, |msg: Echo, ctx| async move { ctx.reply(&msg).await })?;
//!
//!     let endpoint = Endpoint::bind("127.0.0.1:6666", Arc::new(table), EndpointConfig::default()).await?;
//!     endpoint.accept_loop().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod messages;
pub mod protocol;

mod writer;

pub use connection::{Connection, ConnectionConfig, ConnectionId, ConnectionState, TerminationPolicy};
pub use endpoint::{Endpoint, EndpointConfig};
pub use error::{Result, TagwireError};
pub use handler::{DispatchTable, MessageContext};
pub use protocol::{Message, Tag};

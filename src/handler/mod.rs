//! Handler module - per-tag message dispatch.
//!
//! Provides:
//! - [`DispatchTable`] - maps tags to handlers
//! - [`MessageContext`] - lets handlers reply on, or close, their connection
//!
//! Handlers run inline on the connection's read task, so a slow handler delays
//! the next frame from the same peer.

mod context;
mod registry;

pub use context::MessageContext;
pub use registry::{BoxFuture, DispatchTable, Handler, HandlerResult, RawHandler, TypedHandler};

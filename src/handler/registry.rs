//! Dispatch table mapping frame tags to handlers.
//!
//! The table is filled before any traffic flows and then shared read-only
//! behind an `Arc` by every connection. Each tag has at most one handler.
//!
//! # Example
//!
//! ```
//! use tagwire::handler::DispatchTable;
//! use tagwire::messages::{Echo, ECHO};
//!
//! let mut table = DispatchTable::new();
//! table
//!     .register(ECHO, |msg: Echo, ctx| async move { ctx.reply(&msg).await })
//!     .unwrap();
//!
//! assert!(table.contains(ECHO));
//! assert!(table.register_raw(ECHO, |_, _| async { Ok(()) }).is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::MessageContext;
use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::{Result, TagwireError};
use crate::protocol::Tag;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle one inbound frame's payload.
    fn call(&self, payload: Bytes, ctx: MessageContext) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that decodes the payload with codec `C` before calling the handler.
pub struct TypedHandler<C, F, T, Fut> {
    handler: F,
    _phantom: PhantomData<(fn() -> C, fn(T) -> Fut)>,
}

impl<C, F, T, Fut> TypedHandler<C, F, T, Fut>
where
    C: PayloadCodec,
    F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, T, Fut> Handler for TypedHandler<C, F, T, Fut>
where
    C: PayloadCodec,
    F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, payload: Bytes, ctx: MessageContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match C::decode(&payload) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed, ctx))
    }
}

/// Handler that receives the undecoded payload.
pub struct RawHandler<F, Fut> {
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> RawHandler<F, Fut>
where
    F: Fn(Bytes, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new raw handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for RawHandler<F, Fut>
where
    F: Fn(Bytes, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, payload: Bytes, ctx: MessageContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(payload, ctx))
    }
}

/// Table mapping tags to handlers.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<Tag, Box<dyn Handler>>,
}

impl DispatchTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler whose payload is decoded as JSON.
    pub fn register<T, F, Fut>(&mut self, tag: Tag, handler: F) -> Result<()>
    where
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_with::<JsonCodec, T, F, Fut>(tag, handler)
    }

    /// Register a handler whose payload is decoded with codec `C`.
    pub fn register_with<C, T, F, Fut>(&mut self, tag: Tag, handler: F) -> Result<()>
    where
        C: PayloadCodec,
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(tag, Box::new(TypedHandler::<C, F, T, Fut>::new(handler)))
    }

    /// Register a handler that receives the raw payload bytes.
    pub fn register_raw<F, Fut>(&mut self, tag: Tag, handler: F) -> Result<()>
    where
        F: Fn(Bytes, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(tag, Box::new(RawHandler::new(handler)))
    }

    /// Register an already boxed handler.
    pub fn insert(&mut self, tag: Tag, handler: Box<dyn Handler>) -> Result<()> {
        if self.handlers.contains_key(&tag) {
            return Err(TagwireError::DuplicateHandler(tag));
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    /// Get the handler for a tag.
    pub fn lookup(&self, tag: Tag) -> Option<&dyn Handler> {
        self.handlers.get(&tag).map(|h| h.as_ref())
    }

    /// Whether a handler is registered for `tag`.
    pub fn contains(&self, tag: Tag) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a payload to the handler registered for `tag`.
    ///
    /// Fails with `HandlerNotFound` when the tag has no handler; otherwise
    /// returns whatever the handler (or its payload decode) returns.
    pub async fn dispatch(&self, tag: Tag, payload: Bytes, ctx: MessageContext) -> Result<()> {
        let handler = self
            .lookup(tag)
            .ok_or(TagwireError::HandlerNotFound(tag))?;

        handler.call(payload, ctx).await
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("DispatchTable").field("tags", &tags).finish()
    }
}

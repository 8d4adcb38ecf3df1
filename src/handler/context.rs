//! Per-message context handed to handlers.
//!
//! Gives a handler the inbound tag and the connection the frame arrived on,
//! so it can reply, send unrelated messages, or close the connection.
//!
//! # Example
//!
//! ```ignore
//! async fn echo(msg: Echo, ctx: MessageContext) -> Result<()> {
//!     ctx.reply(&msg).await
//! }
//! ```

use bytes::Bytes;

use crate::codec::PayloadCodec;
use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{Message, Tag};

/// Context passed to message handlers.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone, Debug)]
pub struct MessageContext {
    /// Tag of the inbound frame.
    tag: Tag,
    /// Connection the frame was read from.
    connection: Connection,
}

impl MessageContext {
    /// Create a context for a frame received on `connection`.
    pub fn new(tag: Tag, connection: Connection) -> Self {
        Self { tag, connection }
    }

    /// Tag of the message being handled.
    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The connection the message arrived on.
    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Remote address of the connection.
    pub fn peer(&self) -> &str {
        self.connection.peer()
    }

    /// Send a JSON-encoded message back on the same connection.
    ///
    /// The reply's tag comes from the message itself, not from the inbound
    /// frame.
    pub async fn reply<M: Message + ?Sized>(&self, message: &M) -> Result<()> {
        self.connection.send(message).await
    }

    /// Send a message encoded with codec `C` back on the same connection.
    pub async fn reply_with<C, M>(&self, message: &M) -> Result<()>
    where
        C: PayloadCodec,
        M: Message + ?Sized,
    {
        self.connection.send_with::<C, M>(message).await
    }

    /// Send a pre-encoded payload under `tag`.
    pub async fn reply_raw(&self, tag: Tag, payload: Bytes) -> Result<()> {
        self.connection.send_frame(tag, payload).await
    }

    /// Close the connection this message arrived on.
    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }
}

//! Capabilities a connection consumes
//!
//! The connection never touches sockets itself. It writes frames through a
//! [`Transport`] and hands incoming calls to a [`CallHandler`]; both are
//! supplied by the surrounding application.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope::Call;
use crate::error::{HandlerError, TransportError};

/// Message-oriented transport carrying SRPC frames (e.g. a WebSocket)
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one frame
    async fn send(&self, frame: Value) -> Result<(), TransportError>;

    /// Close the transport; completes once the close has been carried out
    async fn close(&self) -> Result<(), TransportError>;
}

/// Answers calls initiated by the peer
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle(&self, call: Call) -> Result<Value, HandlerError>;
}

/// [`CallHandler`] backed by an async closure
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a [`CallHandler`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> CallHandler for HandlerFn<F>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, call: Call) -> Result<Value, HandlerError> {
        (self.0)(call).await
    }
}

//! # tether
//! A client-side implementation of the WebSocket protocol (RFC 6455) built for
//! request/reply and subscription style workloads.
//!
//! The [`Client`] owns a single connection that is opened lazily on first use and
//! transparently reopened after it has been closed. Every public operation is bounded by a
//! deadline derived from the configured (or per-call) timeout, so a call either completes,
//! fails with [`WebSocketError::Timeout`], or reports a distinct protocol or transport error.
//!
//! On top of the plain message channel ([`Client::send`], [`Client::recv`]) the client offers:
//!
//! - [`Client::request`]: send a message and wait for the reply, reconnecting and retrying
//!   once when the first attempt fails (see [`RetryPolicy`]).
//! - [`Client::subscribe`]: a long running receive loop that answers pings and sends
//!   keepalive pings while the connection is idle.
//!
//! Lifecycle events (open, send, recv, message, close) are reported to an optional
//! [`Observer`].
//!
//! # Features
//!
//! - `logging`: Enables debug logging for connection setup, retries and keepalive using the
//!   `log` crate.
//!
//! - `json`: Enables sending and decoding JSON payloads through `serde_json`.
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//! use tether::{Client, Flow, Options};
//!
//! async fn run() -> tether::Result<()> {
//!     let mut client = Client::new(
//!         "ws://127.0.0.1:9001/rpc".parse()?,
//!         Options::default().with_timeout(Duration::from_secs(5)),
//!     )?;
//!
//!     let reply = client.request("ping", None).await?;
//!     println!("{:?}", reply.payload);
//!
//!     client
//!         .subscribe(
//!             |payload: bytes::Bytes, _: &mut Client| payload.as_ref() != b"bye",
//!             Duration::from_secs(30),
//!         )
//!         .await
//! }
//! ```
//!
//! # Proxies
//! An `http://` or `https://` proxy can be configured with [`Options::with_proxy`]. The upgrade
//! request is written to the proxy in absolute form; no `CONNECT` tunnel is negotiated, so with an
//! `https` proxy only the hop to the proxy is encrypted.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
pub mod codec;
pub mod frame;
pub mod handshake;
mod mask;
mod observer;
mod options;
mod stream;
mod subscribe;

use thiserror::Error;

pub use client::Client;
pub use frame::{Message, OpCode};
pub use observer::{Event, Observer};
pub use options::{Options, RetryPolicy};
pub use subscribe::{Flow, Handler};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur while talking to a WebSocket server.
///
/// Every failure of the client surfaces as one of these variants; apart from the single
/// reconnect performed by [`Client::request`] nothing is retried or swallowed.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The transport could not be established (DNS, TCP or TLS failure, connect timeout).
    ///
    /// Also returned when the handshake accept check fails while a proxy is configured, since
    /// that is usually the proxy giving up on the upstream connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The upgrade response is malformed, incomplete or carries the wrong accept key.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The upgrade response status line is not `HTTP/1.1 101 Switching Protocols`.
    /// Carries the status line that was received instead.
    #[error("Unexpected status line: {0:?}")]
    SwitchingProtocols(String),

    /// An incoming frame violates the protocol, e.g. it is masked or uses a reserved opcode.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A read or write on the socket failed for a reason other than "would block".
    #[error("Data transfer failed: {0}")]
    DataTransfer(String),

    /// The peer closed the stream while more bytes were expected.
    #[error("Connection broken")]
    ConnectionBroken,

    /// A deadline elapsed during the handshake, a send or a receive.
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// Occurs when a received frame's payload length exceeds the maximum configured size.
    /// This helps prevent memory exhaustion attacks.
    #[error("Frame too large")]
    FrameTooLarge,

    /// Returned when the endpoint URL does not use the `ws://` or `wss://` scheme.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// Returned when the proxy URL does not use the `http://` or `https://` scheme.
    #[error("Unsupported proxy scheme {0:?}, only http and https proxies are supported")]
    UnsupportedProxyScheme(String),

    /// Wraps I/O errors surfaced through the frame codec.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Occurs when serialization or deserialization of JSON data fails.
    /// Only available when the `json` feature is enabled.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

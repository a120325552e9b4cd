//! The long running receive loop of [`Client::subscribe`].
use std::{future::Future, time::Duration};

use bytes::Bytes;
use tokio::time::Instant;

use crate::{Client, OpCode, Result};

/// How long a readiness probe waits when keepalive is disabled.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Tells the subscribe loop whether to keep receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Keep receiving messages.
    #[default]
    Continue,
    /// Return from [`Client::subscribe`].
    Stop,
}

impl From<()> for Flow {
    fn from(_: ()) -> Self {
        Flow::Continue
    }
}

impl From<bool> for Flow {
    /// `false` stops the loop, `true` keeps it running.
    fn from(value: bool) -> Self {
        if value {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }
}

/// Handles the text and binary messages received by [`Client::subscribe`].
///
/// The handler gets the client itself, so it can reply on the same connection.
///
/// Closures `FnMut(Bytes, &mut Client) -> R` are handlers whenever `R: Into<Flow>`: returning
/// `()` or `true` keeps the loop running and `false` stops it. Handlers that need to await
/// (to send a reply, for instance) implement the trait:
///
/// ```no_run
/// use bytes::Bytes;
/// use tether::{Client, Flow, Handler};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     async fn on_message(&mut self, payload: Bytes, client: &mut Client) -> tether::Result<Flow> {
///         client.send(&payload, None).await?;
///         Ok(Flow::Continue)
///     }
/// }
/// ```
pub trait Handler: Send {
    /// Called for every text or binary message. Errors end the loop and are returned by
    /// [`Client::subscribe`].
    fn on_message(
        &mut self,
        payload: Bytes,
        client: &mut Client,
    ) -> impl Future<Output = Result<Flow>> + Send;
}

impl<F, R> Handler for F
where
    F: FnMut(Bytes, &mut Client) -> R + Send,
    R: Into<Flow>,
{
    fn on_message(
        &mut self,
        payload: Bytes,
        client: &mut Client,
    ) -> impl Future<Output = Result<Flow>> + Send {
        let flow = self(payload, client).into();
        std::future::ready(Ok(flow))
    }
}

impl Client {
    /// Receives messages until the handler or the server ends the session.
    ///
    /// - Text and binary messages go to `handler`; the returned [`Flow`] decides whether the
    ///   loop continues.
    /// - A close frame ends the loop.
    /// - Pings are answered with a pong carrying the same payload.
    ///
    /// While no data arrives, a ping is sent every `keepalive` to keep the connection (and any
    /// intermediary) alive. `Duration::ZERO` disables keepalive pings.
    ///
    /// Every receive uses the default timeout. Any error ends the loop and is returned.
    pub async fn subscribe<H: Handler>(
        &mut self,
        mut handler: H,
        keepalive: Duration,
    ) -> Result<()> {
        let keepalive = (!keepalive.is_zero()).then_some(keepalive);
        let wait = keepalive.unwrap_or(IDLE_POLL);
        let mut last_activity = Instant::now();

        loop {
            while !self.is_recv_ready(wait).await? {
                if let Some(keepalive) = keepalive {
                    if last_activity.elapsed() >= keepalive {
                        #[cfg(feature = "logging")]
                        log::debug!(
                            "{}: idle for {:?}, sending ping",
                            self.endpoint().url(),
                            last_activity.elapsed()
                        );

                        self.ping(b"").await?;
                        last_activity = Instant::now();
                    }
                }
            }

            let message = self.recv(None).await?;
            last_activity = Instant::now();

            let flow = match message.opcode {
                OpCode::Text | OpCode::Binary => handler.on_message(message.payload, self).await?,
                OpCode::Close => Flow::Stop,
                OpCode::Ping => {
                    self.pong(&message.payload).await?;
                    Flow::Continue
                }
                OpCode::Pong | OpCode::Continuation => Flow::Continue,
            };

            if flow == Flow::Stop {
                return Ok(());
            }
        }
    }
}

use bytes::Bytes;

use crate::Message;

/// A lifecycle event of a [`Client`](crate::Client).
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// The upgrade handshake succeeded and the connection is open.
    Open,
    /// A text or binary message is about to be sent.
    Send(&'a [u8]),
    /// A frame of any kind was received.
    Recv(&'a Message),
    /// A text or binary message was received; emitted right after the matching `Recv`.
    Message(&'a Bytes),
    /// An open connection was closed.
    Close,
}

impl Event<'_> {
    /// A short name for the event, handy for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Open => "open",
            Event::Send(_) => "send",
            Event::Recv(_) => "recv",
            Event::Message(_) => "message",
            Event::Close => "close",
        }
    }
}

/// Receives the lifecycle events of a client.
///
/// Notifications are fire-and-forget: they run inline on the caller's task, before the
/// operation that triggered them continues, and cannot influence it.
///
/// Any `Fn(Event<'_>)` closure is an observer:
///
/// ```
/// use tether::{Client, Event, Options};
///
/// let client = Client::new("ws://localhost:9001".parse().unwrap(), Options::default())
///     .unwrap()
///     .with_observer(|event: Event<'_>| println!("{}", event.name()));
/// ```
pub trait Observer: Send + Sync {
    fn notify(&self, event: Event<'_>);
}

impl<F> Observer for F
where
    F: Fn(Event<'_>) + Send + Sync,
{
    fn notify(&self, event: Event<'_>) {
        self(event)
    }
}

/// The observer of clients that were not given one.
pub(crate) struct NoopObserver;

impl Observer for NoopObserver {
    fn notify(&self, _: Event<'_>) {}
}

use std::time::Duration;

use url::Url;

/// Default timeout for connecting, sending and receiving.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// The default maximum payload size for reading: unbounded.
///
/// Use [`Options::with_max_payload_read`] to reject frames above a size of your choosing.
pub const MAX_PAYLOAD_READ: usize = usize::MAX;

/// Value of the `User-Agent` header when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));

/// How many times [`Client::request`](crate::Client::request) tries a round trip.
///
/// Between attempts the connection is closed, so the next attempt starts on a freshly
/// established connection. The error of the last attempt is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
}

impl RetryPolicy {
    /// A policy making at most `max_attempts` attempts. Values below 1 are raised to 1.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Never retries: a failed round trip is reported immediately.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// The total number of attempts, including the first one.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// One attempt plus one retry after reconnecting.
    fn default() -> Self {
        Self::new(2)
    }
}

/// Configuration for a [`Client`](crate::Client).
///
/// The options are fixed when the client is created and apply to every connection it opens.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tether::Options;
///
/// let options = Options::default()
///     .with_timeout(Duration::from_millis(1500))
///     .with_protocol("chat")
///     .with_origin("https://example.com");
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Proxy the connection goes through, `http://` or `https://`.
    pub(crate) proxy: Option<Url>,
    /// Default deadline for connect, handshake, send and receive.
    pub(crate) timeout: Duration,
    /// Value of the `Sec-WebSocket-Protocol` header.
    pub(crate) protocol: Option<String>,
    /// Whether outgoing frames are masked.
    pub(crate) masking: bool,
    /// Value of the `Origin` header.
    pub(crate) origin: Option<String>,
    /// Value of the `User-Agent` header.
    pub(crate) user_agent: String,
    /// Largest payload accepted from the server.
    pub(crate) max_payload_read: usize,
    /// Retry policy of request/reply round trips.
    pub(crate) retry: RetryPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: DEFAULT_TIMEOUT,
            protocol: None,
            masking: true,
            origin: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_payload_read: MAX_PAYLOAD_READ,
            retry: RetryPolicy::default(),
        }
    }
}

impl Options {
    /// Routes connections through an HTTP(S) proxy.
    ///
    /// Only `http` and `https` proxies are supported; any other scheme makes
    /// [`Client::new`](crate::Client::new) fail.
    pub fn with_proxy(self, proxy: Url) -> Self {
        Self {
            proxy: Some(proxy),
            ..self
        }
    }

    /// Sets the default timeout used when a call does not provide its own.
    ///
    /// A zero duration keeps the current value.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            return self;
        }
        Self { timeout, ..self }
    }

    /// Requests a subprotocol through the `Sec-WebSocket-Protocol` header.
    pub fn with_protocol(self, protocol: impl Into<String>) -> Self {
        Self {
            protocol: Some(protocol.into()),
            ..self
        }
    }

    /// Sends an `Origin` header with the upgrade request.
    pub fn with_origin(self, origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..self
        }
    }

    /// Overrides the `User-Agent` header.
    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..self
        }
    }

    /// Disables masking of outgoing frames.
    ///
    /// RFC 6455 requires clients to mask; only use this with servers known to accept
    /// unmasked frames.
    pub fn without_masking(self) -> Self {
        Self {
            masking: false,
            ..self
        }
    }

    /// Sets the maximum payload size accepted from the server.
    ///
    /// Larger frames fail with `FrameTooLarge` and the connection is dropped.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: size,
            ..self
        }
    }

    /// Sets the retry policy of [`Client::request`](crate::Client::request).
    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    /// The default timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

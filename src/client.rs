use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use tokio::{
    net::TcpStream,
    time::{timeout_at, Instant},
};
use tokio_rustls::{
    rustls::{self, pki_types::ServerName},
    TlsConnector,
};
use tokio_util::codec::Encoder as _;
use url::Url;

use crate::{
    codec::{Decoder, Encoder},
    frame::Frame,
    handshake::{self, Endpoint, ProxyEndpoint},
    observer::NoopObserver,
    stream::{MaybeTlsStream, Transport},
    Event, Message, Observer, Options, Result, WebSocketError,
};

/// The smallest time budget handed to a step of [`Client::request`], even when the overall
/// deadline has already passed.
const MIN_STEP_TIMEOUT: Duration = Duration::from_millis(10);

/// An established connection: the stream plus the decoder state of the frame being read.
struct Session {
    transport: Transport,
    decoder: Decoder,
}

/// Connection state of a client.
enum Connection {
    Closed,
    Open(Box<Session>),
}

/// A WebSocket client bound to a single endpoint.
///
/// The client owns at most one connection. It starts closed; the first operation that needs
/// the connection establishes it (TCP, optional TLS, upgrade handshake), and after
/// [`Client::close`] the next operation establishes a new one.
///
/// Every operation takes an optional timeout; `None` (or a zero duration) uses the timeout
/// from [`Options`]. Operations never retry on their own, except [`Client::request`].
///
/// Cloning a client gives an independent, closed client with the same configuration and
/// observer. Dropping an open client closes it.
///
/// # Example
/// ```no_run
/// use tether::{Client, Options};
///
/// async fn echo() -> tether::Result<()> {
///     let mut client = Client::new("wss://echo.example.com".parse()?, Options::default())?;
///     client.send("hello", None).await?;
///     let message = client.recv(None).await?;
///     assert_eq!(message.as_str(), Some("hello"));
///     Ok(())
/// }
/// ```
pub struct Client {
    endpoint: Endpoint,
    proxy: Option<ProxyEndpoint>,
    options: Options,
    connector: Option<TlsConnector>,
    observer: Arc<dyn Observer>,
    connection: Connection,
}

impl Client {
    /// Creates a closed client for a `ws://` or `wss://` endpoint.
    ///
    /// # Errors
    /// - `InvalidHttpScheme` if `url` is not a WebSocket URL.
    /// - `UnsupportedProxyScheme` if the configured proxy is not `http` or `https`.
    pub fn new(url: Url, options: Options) -> Result<Self> {
        let endpoint = Endpoint::new(url)?;
        let proxy = options.proxy.as_ref().map(ProxyEndpoint::new).transpose()?;

        Ok(Self {
            endpoint,
            proxy,
            options,
            connector: None,
            observer: Arc::new(NoopObserver),
            connection: Connection::Closed,
        })
    }

    /// Sets the observer notified of lifecycle events.
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Sets a custom TLS connector for `wss://` endpoints and `https://` proxies.
    ///
    /// Without one, a connector trusting the webpki root certificates is used.
    pub fn with_connector(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// The endpoint this client connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The options this client was created with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns `true` while a connection is established.
    pub fn is_open(&self) -> bool {
        matches!(self.connection, Connection::Open(_))
    }

    fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(self.options.timeout)
    }

    /// Returns the open session, connecting first if the client is closed.
    async fn ensure_open(&mut self) -> Result<&mut Session> {
        if let Connection::Closed = self.connection {
            let session = self.connect().await?;
            self.connection = Connection::Open(Box::new(session));
            self.observer.notify(Event::Open);
        }

        let Connection::Open(session) = &mut self.connection else {
            unreachable!()
        };
        Ok(session.as_mut())
    }

    /// Opens the stream to the proxy or the endpoint and performs the upgrade handshake.
    async fn connect(&self) -> Result<Session> {
        let (host, port, secure) = match &self.proxy {
            Some(proxy) => (proxy.host(), proxy.port(), proxy.is_secure()),
            None => (
                self.endpoint.host(),
                self.endpoint.port(),
                self.endpoint.is_secure(),
            ),
        };

        #[cfg(feature = "logging")]
        log::debug!(
            "connecting to {} via {host}:{port} (tls={secure})",
            self.endpoint.url()
        );

        let deadline = Instant::now() + self.options.timeout;
        let connecting = TcpStream::connect(format!("{host}:{port}"));
        let tcp_stream = match timeout_at(deadline, connecting).await {
            Err(_) => {
                return Err(WebSocketError::Connection(format!(
                    "connect timed out: {}",
                    self.endpoint.url()
                )))
            }
            Ok(Err(err)) => {
                return Err(WebSocketError::Connection(format!(
                    "{err}: {}",
                    self.endpoint.url()
                )))
            }
            Ok(Ok(stream)) => stream,
        };
        // frames are written in one piece, there is nothing to coalesce
        let _ = tcp_stream.set_nodelay(true);

        let stream = if secure {
            let connector = match &self.connector {
                Some(connector) => connector.clone(),
                None => tls_connector()?,
            };
            let server_name = host.trim_matches(|c: char| c == '[' || c == ']').to_string();
            let domain = ServerName::try_from(server_name)
                .map_err(|_| WebSocketError::Connection(format!("invalid dnsname {host:?}")))?;

            match timeout_at(deadline, connector.connect(domain, tcp_stream)).await {
                Err(_) => {
                    return Err(WebSocketError::Connection(format!(
                        "tls handshake timed out: {}",
                        self.endpoint.url()
                    )))
                }
                Ok(Err(err)) => {
                    return Err(WebSocketError::Connection(format!(
                        "{err}: {}",
                        self.endpoint.url()
                    )))
                }
                Ok(Ok(tls)) => MaybeTlsStream::Tls(Box::new(tls)),
            }
        } else {
            MaybeTlsStream::Plain(tcp_stream)
        };

        let mut transport = Transport::new(stream);
        let deadline = Instant::now() + self.options.timeout;
        handshake::handshake(
            &mut transport,
            &self.endpoint,
            self.proxy.as_ref(),
            &self.options,
            deadline,
        )
        .await?;

        #[cfg(feature = "logging")]
        log::debug!("connected to {}", self.endpoint.url());

        Ok(Session {
            transport,
            decoder: Decoder::new(self.options.max_payload_read),
        })
    }

    /// Encodes and writes one frame.
    async fn send_frame(&mut self, frame: Frame, timeout: Option<Duration>) -> Result<()> {
        let timeout = self.timeout_or_default(timeout);
        let mut encoder = Encoder::new(self.options.masking);

        let session = self.ensure_open().await?;

        let mut buf = BytesMut::with_capacity(frame.payload.len() + 14);
        encoder.encode(frame, &mut buf)?;

        let deadline = Instant::now() + timeout;
        session.transport.write_all(&buf, deadline).await
    }

    /// Sends a text message.
    ///
    /// The payload is sent as is; it is the caller's responsibility to pass valid UTF-8.
    pub async fn send(
        &mut self,
        payload: impl AsRef<[u8]>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let payload = payload.as_ref();
        self.observer.notify(Event::Send(payload));
        self.send_frame(Frame::text(payload), timeout).await
    }

    /// Sends a binary message.
    pub async fn send_binary(
        &mut self,
        payload: impl AsRef<[u8]>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let payload = payload.as_ref();
        self.observer.notify(Event::Send(payload));
        self.send_frame(Frame::binary(payload), timeout).await
    }

    /// Serializes `data` as JSON and sends it as a text message.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub async fn send_json<T: serde::Serialize>(
        &mut self,
        data: &T,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(data)?;
        self.send(bytes, timeout).await
    }

    /// Sends a ping with the default timeout.
    pub async fn ping(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.send_frame(Frame::ping(data), None).await
    }

    /// Sends a pong with the default timeout.
    pub async fn pong(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.send_frame(Frame::pong(data), None).await
    }

    /// Receives the next frame of any kind.
    ///
    /// Control frames are returned like any other message; answering pings is up to the
    /// caller (the subscribe loop does it).
    ///
    /// # Errors
    /// - `Timeout` if no complete frame arrived in time. Bytes of a partially received frame
    ///   are kept and the next call continues where this one stopped.
    /// - `ConnectionBroken` if the server closed the stream.
    /// - `Protocol` for masked frames or reserved opcodes.
    /// - `FrameTooLarge` if the frame exceeds [`Options::with_max_payload_read`].
    ///
    /// After `Protocol` and `FrameTooLarge` the stream can no longer be framed, so the
    /// connection is closed and the next operation opens a new one.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<Message> {
        let timeout = self.timeout_or_default(timeout);
        let session = self.ensure_open().await?;

        let started = Instant::now();
        let read = session
            .transport
            .read_frame(&mut session.decoder, started + timeout)
            .await;
        let (opcode, payload) = match read {
            Ok(frame) => frame,
            Err(err @ (WebSocketError::Protocol(_) | WebSocketError::FrameTooLarge)) => {
                #[cfg(feature = "logging")]
                log::warn!("{}: {err}, dropping the connection", self.endpoint.url());

                self.close();
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let message = Message::new(opcode, payload.freeze(), started.elapsed());

        self.observer.notify(Event::Recv(&message));
        if message.opcode.is_data() {
            self.observer.notify(Event::Message(&message.payload));
        }

        Ok(message)
    }

    /// Waits up to `timeout` for incoming data without consuming it.
    ///
    /// Returns `true` as soon as bytes are available (or the server closed the stream, in which
    /// case the next [`Client::recv`] fails), and `false` if nothing arrived in time.
    pub async fn is_recv_ready(&mut self, timeout: Duration) -> Result<bool> {
        let session = self.ensure_open().await?;
        session
            .transport
            .is_readable(Instant::now() + timeout)
            .await
    }

    /// Sends `message` and waits for the next message, as a single request/reply round trip.
    ///
    /// The timeout covers the whole round trip: every step is given what is left of it, but
    /// never less than 10ms. When an attempt fails the connection is closed and the round trip
    /// is tried again on a new connection, as allowed by the [`RetryPolicy`](crate::RetryPolicy)
    /// (by default one retry). The error of the last attempt is returned unchanged.
    pub async fn request(
        &mut self,
        message: impl AsRef<[u8]>,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let message = message.as_ref();
        let deadline = Instant::now() + self.timeout_or_default(timeout);
        let max_attempts = self.options.retry.max_attempts();

        let mut attempt = 1;
        loop {
            match self.round_trip(message, deadline).await {
                Ok(reply) => return Ok(reply),
                Err(_err) if attempt < max_attempts => {
                    #[cfg(feature = "logging")]
                    log::warn!(
                        "request to {} failed (attempt {attempt}/{max_attempts}): {_err}",
                        self.endpoint.url()
                    );

                    self.close();
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn round_trip(&mut self, message: &[u8], deadline: Instant) -> Result<Message> {
        self.send(message, Some(step_timeout(deadline))).await?;
        self.recv(Some(step_timeout(deadline))).await
    }

    /// Closes the connection, if open, and notifies the observer.
    ///
    /// The socket is released immediately; no close frame is sent. Closing a closed client
    /// does nothing, and the next operation opens a new connection.
    pub fn close(&mut self) {
        if let Connection::Open(_) = std::mem::replace(&mut self.connection, Connection::Closed) {
            #[cfg(feature = "logging")]
            log::debug!("closed connection to {}", self.endpoint.url());

            self.observer.notify(Event::Close);
        }
    }
}

/// What is left until `deadline`, floored to [`MIN_STEP_TIMEOUT`].
fn step_timeout(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(MIN_STEP_TIMEOUT)
}

impl Clone for Client {
    /// Returns a closed client with the same configuration; the connection is never shared.
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            proxy: self.proxy.clone(),
            options: self.options.clone(),
            connector: self.connector.clone(),
            observer: Arc::clone(&self.observer),
            connection: Connection::Closed,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Creates a TLS connector with root certificates for secure WebSocket connections.
/// If the crypto provider hasn't been set, [*ring*](https://github.com/briansmith/ring) will be used.
///
/// The connector trusts the webpki roots, does no client authentication and offers
/// HTTP/1.1 through ALPN.
fn tls_connector() -> Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    // define the provider if any, fallback to ring
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|err| WebSocketError::Connection(format!("tls configuration: {err}")))?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}

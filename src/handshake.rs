//! # Handshake
//!
//! Target addressing and the HTTP/1.1 upgrade exchange that opens a WebSocket connection
//! ([RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4)).
//!
//! The request is written by hand rather than through an HTTP client so that its layout is
//! exactly the one below, and the response is checked strictly: the status line must be
//! `HTTP/1.1 101 Switching Protocols` and a `Sec-WebSocket-Accept` header must carry the
//! value derived from the key we sent.
//!
//! ```text
//! GET /chat HTTP/1.1
//! Host: example.com:80
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Connection: Upgrade
//! User-Agent: tether/0.1.0
//! Upgrade: Websocket
//! Sec-WebSocket-Version: 13
//! ```
use std::fmt::Write as _;

use base64::prelude::*;
use nom::{
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{crlf, space0},
    combinator::all_consuming,
    sequence::{pair, separated_pair, terminated},
    IResult, Parser,
};
use sha1::{Digest, Sha1};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::Instant,
};
use url::Url;

use crate::{stream::Transport, Options, Result, WebSocketError};

/// The GUID appended to the key before hashing, from RFC 6455.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only status line accepted in response to the upgrade request.
const SWITCHING_PROTOCOLS: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n";

/// Upper bound on the size of the response head (status line and headers).
const MAX_RESPONSE_HEAD: usize = 4096;

/// The server a client talks to, derived from a `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    secure: bool,
    host: String,
    port: u16,
    /// Path and query, the request target in origin form.
    path: String,
}

impl Endpoint {
    /// Parses the endpoint, applying the default port of the scheme (80 or 443).
    ///
    /// # Errors
    /// `InvalidHttpScheme` unless the scheme is `ws` or `wss`.
    pub fn new(url: Url) -> Result<Self> {
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };

        let host = url
            .host_str()
            .ok_or(WebSocketError::UrlParseError(url::ParseError::EmptyHost))?
            .to_string();
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });
        let path = url[url::Position::BeforePath..url::Position::AfterQuery].to_string();

        Ok(Self {
            url,
            secure,
            host,
            port,
            path,
        })
    }

    /// The URL the endpoint was created from.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `true` for `wss://` endpoints.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The request target in origin form, e.g. `/chat?room=1`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The request target in absolute form, as proxies expect it.
    ///
    /// The scheme is mapped to its HTTP counterpart: `http` for `ws`, `https` for `wss`.
    pub fn absolute_target(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

/// An HTTP(S) proxy the connection is routed through.
///
/// The upgrade request is sent to the proxy with an absolute-form target; no `CONNECT` tunnel
/// is established. Through an `https` proxy this only encrypts the hop to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    secure: bool,
    host: String,
    port: u16,
}

impl ProxyEndpoint {
    /// Parses a proxy URL, applying the default port of the scheme (80 or 443).
    ///
    /// # Errors
    /// `UnsupportedProxyScheme` unless the scheme is `http` or `https`.
    pub fn new(url: &Url) -> Result<Self> {
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            scheme => return Err(WebSocketError::UnsupportedProxyScheme(scheme.to_string())),
        };

        let host = url
            .host_str()
            .ok_or(WebSocketError::UrlParseError(url::ParseError::EmptyHost))?
            .to_string();
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });

        Ok(Self { secure, host, port })
    }

    /// `true` for `https://` proxies.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Computes the `Sec-WebSocket-Accept` value for a `Sec-WebSocket-Key`.
///
/// ```
/// assert_eq!(
///     tether::handshake::accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Generates a fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub(crate) fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Formats the upgrade request.
///
/// Behind a proxy the target is written in absolute form.
pub(crate) fn request(endpoint: &Endpoint, proxied: bool, options: &Options, key: &str) -> String {
    let target = if proxied {
        endpoint.absolute_target()
    } else {
        endpoint.path().to_string()
    };

    let mut req = format!(
        "GET {target} HTTP/1.1\r\n\
         Host: {}:{}\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Connection: Upgrade\r\n\
         User-Agent: {}\r\n\
         Upgrade: Websocket\r\n",
        endpoint.host(),
        endpoint.port(),
        options.user_agent,
    );

    // writing to a String cannot fail
    if let Some(origin) = &options.origin {
        let _ = write!(req, "Origin: {origin}\r\n");
    }
    if let Some(protocol) = &options.protocol {
        let _ = write!(req, "Sec-WebSocket-Protocol: {protocol}\r\n");
    }
    req.push_str("Sec-WebSocket-Version: 13\r\n\r\n");

    req
}

/// Parses one `Name: value\r\n` header line.
fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    terminated(
        separated_pair(
            take_while1(|c: char| c != ':' && !c.is_ascii_whitespace()),
            pair(tag(":"), space0),
            take_till(|c: char| c == '\r' || c == '\n'),
        ),
        crlf,
    )
    .parse(input)
}

/// Parses a header line into its trimmed name and value.
pub(crate) fn parse_header(line: &[u8]) -> Result<(&str, &str)> {
    let line = std::str::from_utf8(line)
        .map_err(|_| WebSocketError::Handshake("header is not valid UTF-8".to_string()))?;

    let (_, (name, value)) = all_consuming(header_line)
        .parse(line)
        .map_err(|_| WebSocketError::Handshake(format!("malformed header {:?}", line.trim_end())))?;

    Ok((name, value.trim_end()))
}

/// Performs the upgrade exchange over a freshly connected stream.
///
/// On success any bytes the server sent after the response head remain buffered in
/// `transport`.
pub(crate) async fn handshake<S>(
    transport: &mut Transport<S>,
    endpoint: &Endpoint,
    proxy: Option<&ProxyEndpoint>,
    options: &Options,
    deadline: Instant,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let req = request(endpoint, proxy.is_some(), options, &key);
    transport.write_all(req.as_bytes(), deadline).await?;

    let status = match transport
        .read_until(b"\r\n", MAX_RESPONSE_HEAD, deadline)
        .await
    {
        Ok(Some(status)) => status,
        Ok(None) => {
            return Err(WebSocketError::Handshake(
                "status line is too long".to_string(),
            ))
        }
        Err(WebSocketError::ConnectionBroken) => {
            return Err(WebSocketError::Handshake(
                "connection closed before the status line".to_string(),
            ))
        }
        Err(err) => return Err(err),
    };

    if &status[..] != SWITCHING_PROTOCOLS {
        let line = String::from_utf8_lossy(&status);
        return Err(WebSocketError::SwitchingProtocols(
            line.trim_end().to_string(),
        ));
    }

    let expected = accept_key(&key);
    let mut accepted = false;
    let mut remaining = MAX_RESPONSE_HEAD - status.len();

    loop {
        let line = match transport.read_until(b"\r\n", remaining, deadline).await {
            Ok(Some(line)) => line,
            Ok(None) | Err(WebSocketError::ConnectionBroken) => {
                return Err(WebSocketError::Handshake(
                    "receive headers failed".to_string(),
                ))
            }
            Err(err) => return Err(err),
        };
        remaining -= line.len();

        if &line[..] == b"\r\n" {
            break;
        }

        // only the accept header matters, other lines may be in any encoding
        match parse_header(&line) {
            Ok((name, value)) => {
                if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") && value == expected {
                    accepted = true;
                }
            }
            Err(_err) => {
                #[cfg(feature = "logging")]
                log::debug!("{}: skipping header line: {_err}", endpoint.url());
            }
        }
    }

    if !accepted {
        #[cfg(feature = "logging")]
        log::warn!("{}: Sec-WebSocket-Accept missing or invalid", endpoint.url());

        return Err(if proxy.is_some() {
            WebSocketError::Connection(format!(
                "Connection by proxy timed out: {}",
                endpoint.url()
            ))
        } else {
            WebSocketError::Handshake("handshake fail".to_string())
        });
    }

    Ok(())
}

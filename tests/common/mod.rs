//! A minimal in-process WebSocket server used as the peer in integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use url::Url;

pub const TEXT: u8 = 0x1;
pub const BINARY: u8 = 0x2;
pub const CLOSE: u8 = 0x8;
pub const PING: u8 = 0x9;
pub const PONG: u8 = 0xA;

/// Binds a listener on an ephemeral port and returns it with a `ws://` URL pointing at it.
pub async fn listen(path: &str) -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}{path}").parse().unwrap();
    (listener, url)
}

/// The server side of one connection.
pub struct Peer {
    pub stream: TcpStream,
    /// The upgrade request as received, head only.
    pub request: String,
}

/// Reads the upgrade request without answering it.
pub async fn accept_raw(listener: &TcpListener) -> Peer {
    let (mut stream, _) = listener.accept().await.unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = stream.read_u8().await.unwrap();
        head.push(byte);
    }

    Peer {
        stream,
        request: String::from_utf8(head).unwrap(),
    }
}

/// Accepts a connection and completes the upgrade handshake.
pub async fn accept(listener: &TcpListener) -> Peer {
    let mut peer = accept_raw(listener).await;
    let key = peer.header("Sec-WebSocket-Key").expect("key");

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        tether::handshake::accept_key(&key)
    );
    peer.stream.write_all(response.as_bytes()).await.unwrap();
    peer
}

impl Peer {
    /// Returns the value of a request header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.request.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    /// The first line of the request.
    pub fn request_line(&self) -> &str {
        self.request.lines().next().unwrap_or_default()
    }

    /// Reads one client frame, returning its opcode and unmasked payload.
    ///
    /// Panics if the frame is not masked, since clients must mask.
    pub async fn read_frame(&mut self) -> std::io::Result<(u8, Vec<u8>)> {
        let (opcode, masked, payload) = self.read_raw_frame().await?;
        assert!(masked, "client frames must be masked");
        Ok((opcode, payload))
    }

    /// Reads one frame, returning opcode, mask flag and unmasked payload.
    pub async fn read_raw_frame(&mut self) -> std::io::Result<(u8, bool, Vec<u8>)> {
        let first = self.stream.read_u8().await?;
        let second = self.stream.read_u8().await?;
        assert_eq!(first & 0x80, 0x80, "FIN must be set");

        let len = match second & 0x7F {
            126 => usize::from(self.stream.read_u16().await?),
            127 => self.stream.read_u64().await? as usize,
            len => usize::from(len),
        };

        let masked = second & 0x80 != 0;
        let mut mask = [0u8; 4];
        if masked {
            self.stream.read_exact(&mut mask).await?;
        }

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        if masked {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok((first & 0x0F, masked, payload))
    }

    /// Writes an unmasked frame with the minimal length encoding.
    pub async fn write_frame(&mut self, opcode: u8, payload: &[u8]) {
        let mut frame = vec![0x80 | opcode];
        match payload.len() {
            len if len <= 125 => frame.push(len as u8),
            len if len <= 65535 => {
                frame.push(126);
                frame.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                frame.push(127);
                frame.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Waits for the client to go away, returning the bytes it still sent.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        let _ = self.stream.read_to_end(&mut rest).await;
        rest
    }
}

/// Collects the names of observed events.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn observer(&self) -> impl tether::Observer + 'static {
        let events = Arc::clone(&self.0);
        move |event: tether::Event<'_>| {
            let entry = match event {
                tether::Event::Send(payload) => {
                    format!("send:{}", String::from_utf8_lossy(payload))
                }
                tether::Event::Message(payload) => {
                    format!("message:{}", String::from_utf8_lossy(payload))
                }
                event => event.name().to_string(),
            };
            events.lock().unwrap().push(entry);
        }
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

mod common;

use std::time::Duration;

use common::{accept, accept_raw, listen, Events, BINARY, CLOSE, PING, TEXT};
use tether::{Client, OpCode, Options, RetryPolicy, WebSocketError};
use tokio::{io::AsyncWriteExt, time::Instant};

#[tokio::test]
async fn test_send_and_recv_with_events() {
    let (listener, url) = listen("/chat").await;

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        assert_eq!(peer.request_line(), "GET /chat HTTP/1.1");

        let (opcode, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, TEXT);
        peer.write_frame(TEXT, &payload).await;

        let (opcode, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, BINARY);
        peer.write_frame(BINARY, &payload).await;

        peer.read_to_end().await
    });

    let events = Events::default();
    let mut client = Client::new(url, Options::default())
        .unwrap()
        .with_observer(events.observer());

    client.send("hello", None).await.unwrap();
    let message = client.recv(None).await.unwrap();
    assert_eq!(message.opcode, OpCode::Text);
    assert_eq!(message.as_str(), Some("hello"));

    client.send_binary([1u8, 2, 3], None).await.unwrap();
    let message = client.recv(None).await.unwrap();
    assert_eq!(message.opcode, OpCode::Binary);
    assert_eq!(&message.payload[..], &[1, 2, 3]);

    client.close();
    assert!(server.await.unwrap().is_empty());

    assert_eq!(
        events.take(),
        vec![
            "send:hello",
            "open",
            "recv",
            "message:hello",
            "send:\u{1}\u{2}\u{3}",
            "recv",
            "message:\u{1}\u{2}\u{3}",
            "close",
        ]
    );
}

#[tokio::test]
async fn test_handshake_request_headers() {
    let (listener, url) = listen("/feed?topic=a").await;
    let host = format!("{}:{}", url.host_str().unwrap(), url.port().unwrap());

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await;
        peer
    });

    let options = Options::default()
        .with_origin("https://example.com")
        .with_protocol("chat.v1")
        .with_user_agent("tetherc-test/1.0");
    let mut client = Client::new(url, options).unwrap();
    client.send("x", None).await.unwrap();

    let peer = server.await.unwrap();
    assert_eq!(peer.request_line(), "GET /feed?topic=a HTTP/1.1");
    assert_eq!(peer.header("Host"), Some(host));
    assert_eq!(peer.header("Connection").as_deref(), Some("Upgrade"));
    assert_eq!(peer.header("Upgrade").as_deref(), Some("Websocket"));
    assert_eq!(peer.header("Sec-WebSocket-Version").as_deref(), Some("13"));
    assert_eq!(peer.header("Origin").as_deref(), Some("https://example.com"));
    assert_eq!(peer.header("Sec-WebSocket-Protocol").as_deref(), Some("chat.v1"));
    assert_eq!(peer.header("User-Agent").as_deref(), Some("tetherc-test/1.0"));
    assert!(peer.request.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_proxied_request_uses_absolute_target() {
    let (listener, proxy) = listen("").await;
    let proxy = format!("http://{}:{}", proxy.host_str().unwrap(), proxy.port().unwrap());

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let (_, payload) = peer.read_frame().await.unwrap();
        peer.write_frame(TEXT, &payload).await;
        peer
    });

    let options = Options::default().with_proxy(proxy.parse().unwrap());
    let mut client =
        Client::new("ws://backend.invalid:8080/chat".parse().unwrap(), options).unwrap();

    let reply = client.request("via proxy", None).await.unwrap();
    assert_eq!(reply.as_str(), Some("via proxy"));

    let peer = server.await.unwrap();
    assert_eq!(
        peer.request_line(),
        "GET http://backend.invalid:8080/chat HTTP/1.1"
    );
    assert_eq!(peer.header("Host").as_deref(), Some("backend.invalid:8080"));
}

#[tokio::test]
async fn test_proxy_without_upgrade_is_connection_error() {
    let (listener, proxy) = listen("").await;
    let proxy = format!("http://{}:{}", proxy.host_str().unwrap(), proxy.port().unwrap());

    tokio::spawn(async move {
        let mut peer = accept_raw(&listener).await;
        peer.stream
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n")
            .await
            .unwrap();
        peer.read_to_end().await
    });

    let options = Options::default()
        .with_proxy(proxy.parse().unwrap())
        .with_retry(RetryPolicy::no_retry());
    let mut client = Client::new("ws://backend.invalid/".parse().unwrap(), options).unwrap();

    let err = client.send("x", None).await.unwrap_err();
    assert!(matches!(err, WebSocketError::Connection(_)), "{err:?}");
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_rejected_upgrade() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept_raw(&listener).await;
        peer.stream
            .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        peer.read_to_end().await
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    match client.recv(None).await {
        Err(WebSocketError::SwitchingProtocols(line)) => {
            assert_eq!(line, "HTTP/1.1 403 Forbidden")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_silent_server_times_out_handshake() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        // read the upgrade request and never answer
        let mut peer = accept_raw(&listener).await;
        peer.read_to_end().await
    });

    let options = Options::default().with_timeout(Duration::from_millis(100));
    let mut client = Client::new(url, options).unwrap();

    let started = Instant::now();
    let result = client.send("hello?", None).await;
    assert!(matches!(result, Err(WebSocketError::Timeout(_))), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_recv_timeout_is_bounded() {
    let (listener, url) = listen("/").await;

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
        // stay silent until the client goes away
        peer.read_to_end().await
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    client.send("anyone?", None).await.unwrap();

    let started = Instant::now();
    let result = client.recv(Some(Duration::from_millis(50))).await;
    assert!(matches!(result, Err(WebSocketError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_millis(200));

    drop(client);
    server.await.unwrap();
}

#[tokio::test]
async fn test_partial_frame_survives_timeout() {
    let (listener, url) = listen("/").await;

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();

        peer.stream.write_all(&[0x81, 0x05, b'h', b'e']).await.unwrap();
        // wait for the client to time out on the partial frame
        let _ = peer.read_frame().await.unwrap();
        peer.stream.write_all(b"llo").await.unwrap();
        peer.read_to_end().await
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    client.send("go", None).await.unwrap();

    let result = client.recv(Some(Duration::from_millis(50))).await;
    assert!(matches!(result, Err(WebSocketError::Timeout(_))));

    client.send("more", None).await.unwrap();
    let message = client.recv(None).await.unwrap();
    assert_eq!(message.as_str(), Some("hello"));

    drop(client);
    server.await.unwrap();
}

#[tokio::test]
async fn test_peer_closing_mid_frame_is_broken_connection() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
        // header of a 2 byte text frame, then nothing
        peer.stream.write_all(&[0x81, 0x02]).await.unwrap();
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    client.send("hi", None).await.unwrap();

    let result = client.recv(None).await;
    assert!(matches!(result, Err(WebSocketError::ConnectionBroken)));
}

#[tokio::test]
async fn test_masked_server_frame_drops_connection() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
        peer.stream
            .write_all(&[0x81, 0x82, 1, 2, 3, 4, b'h' ^ 1, b'i' ^ 2])
            .await
            .unwrap();
        let _ = peer.read_to_end().await;

        let mut peer = accept(&listener).await;
        peer.write_frame(TEXT, b"fresh").await;
        peer.read_to_end().await
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    client.send("hi", None).await.unwrap();

    let result = client.recv(None).await;
    assert!(matches!(result, Err(WebSocketError::Protocol(_))));
    assert!(!client.is_open());

    // the next receive starts over on a new connection
    let message = client.recv(None).await.unwrap();
    assert_eq!(message.opcode, OpCode::Text);
    assert_eq!(message.as_str(), Some("fresh"));
}

#[tokio::test]
async fn test_large_frames() {
    let (listener, url) = listen("/").await;

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let (opcode, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, BINARY);
        assert_eq!(payload.len(), 65536);
        assert!(payload.iter().all(|b| *b == 7));

        peer.write_frame(BINARY, &vec![9u8; 70_000]).await;
        peer.read_to_end().await
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    client.send_binary(vec![7u8; 65536], None).await.unwrap();

    let message = client.recv(None).await.unwrap();
    assert_eq!(message.payload.len(), 70_000);
    assert!(message.payload.iter().all(|b| *b == 9));

    drop(client);
    server.await.unwrap();
}

#[tokio::test]
async fn test_frame_above_read_limit_drops_connection() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
        peer.write_frame(BINARY, &[0u8; 2048]).await;
        let _ = peer.read_to_end().await;

        let mut peer = accept(&listener).await;
        peer.write_frame(TEXT, b"fresh").await;
        peer.read_to_end().await
    });

    let options = Options::default().with_max_payload_read(1024);
    let mut client = Client::new(url, options).unwrap();
    client.send("give me", None).await.unwrap();

    let result = client.recv(None).await;
    assert!(matches!(result, Err(WebSocketError::FrameTooLarge)));
    assert!(!client.is_open());

    // the unread payload must not be decoded as frames
    let message = client.recv(None).await.unwrap();
    assert_eq!(message.opcode, OpCode::Text);
    assert_eq!(message.as_str(), Some("fresh"));
}

#[tokio::test]
async fn test_no_read_limit_by_default() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
        peer.write_frame(BINARY, &vec![5u8; 2 * 1024 * 1024]).await;
        peer.read_to_end().await
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    client.send("big one", None).await.unwrap();

    let message = client.recv(None).await.unwrap();
    assert_eq!(message.opcode, OpCode::Binary);
    assert_eq!(message.payload.len(), 2 * 1024 * 1024);
    assert!(message.payload.iter().all(|b| *b == 5));
}

#[tokio::test]
async fn test_unmasked_frames_when_masking_disabled() {
    let (listener, url) = listen("/").await;

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.read_raw_frame().await.unwrap()
    });

    let mut client = Client::new(url, Options::default().without_masking()).unwrap();
    client.send("plain", None).await.unwrap();

    let (opcode, masked, payload) = server.await.unwrap();
    assert_eq!(opcode, TEXT);
    assert!(!masked);
    assert_eq!(payload, b"plain");
}

#[tokio::test]
async fn test_ping_and_control_frames_are_returned() {
    let (listener, url) = listen("/").await;

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let (opcode, payload) = peer.read_frame().await.unwrap();
        assert_eq!(opcode, PING);
        assert_eq!(payload, b"beat");

        peer.write_frame(PING, b"back").await;
        peer.write_frame(CLOSE, &[0x03, 0xE8]).await;
        peer.read_to_end().await
    });

    let events = Events::default();
    let mut client = Client::new(url, Options::default())
        .unwrap()
        .with_observer(events.observer());
    client.ping("beat").await.unwrap();

    let message = client.recv(None).await.unwrap();
    assert_eq!(message.opcode, OpCode::Ping);
    assert_eq!(&message.payload[..], b"back");

    let message = client.recv(None).await.unwrap();
    assert_eq!(message.opcode, OpCode::Close);

    // control frames never reach the message event
    assert_eq!(events.take(), vec!["open", "recv", "recv"]);

    drop(client);
    server.await.unwrap();
}

#[tokio::test]
async fn test_request_retries_on_new_connection() {
    let (listener, url) = listen("/rpc").await;

    let server = tokio::spawn(async move {
        // first connection: read the request and hang up without replying
        let mut peer = accept(&listener).await;
        let (_, payload) = peer.read_frame().await.unwrap();
        assert_eq!(payload, b"ping?");
        drop(peer);

        let mut peer = accept(&listener).await;
        let (_, payload) = peer.read_frame().await.unwrap();
        assert_eq!(payload, b"ping?");
        peer.write_frame(TEXT, b"pong!").await;
        peer.read_to_end().await
    });

    let events = Events::default();
    let mut client = Client::new(url, Options::default())
        .unwrap()
        .with_observer(events.observer());

    let reply = client.request("ping?", None).await.unwrap();
    assert_eq!(reply.as_str(), Some("pong!"));
    assert!(client.is_open());

    drop(client);
    server.await.unwrap();

    assert_eq!(
        events.take(),
        vec![
            "send:ping?",
            "open",
            "close",
            "send:ping?",
            "open",
            "recv",
            "message:pong!",
            "close",
        ]
    );
}

#[tokio::test]
async fn test_request_fails_after_last_attempt() {
    let (listener, url) = listen("/").await;

    let server = tokio::spawn(async move {
        let mut accepted = 0;
        while accepted < 2 {
            let mut peer = accept(&listener).await;
            let _ = peer.read_frame().await.unwrap();
            accepted += 1;
        }
        accepted
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    let result = client.request("ping?", Some(Duration::from_secs(2))).await;
    assert!(matches!(result, Err(WebSocketError::ConnectionBroken)));

    assert_eq!(server.await.unwrap(), 2);
}

#[tokio::test]
async fn test_request_without_retry() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
    });

    let options = Options::default().with_retry(RetryPolicy::no_retry());
    let mut client = Client::new(url, options).unwrap();

    let result = client.request("ping?", None).await;
    assert!(matches!(result, Err(WebSocketError::ConnectionBroken)));
}

#[tokio::test]
async fn test_clone_is_closed_and_close_notifies_once() {
    let (listener, url) = listen("/").await;

    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
        peer.read_to_end().await
    });

    let events = Events::default();
    let mut client = Client::new(url, Options::default())
        .unwrap()
        .with_observer(events.observer());
    client.send("x", None).await.unwrap();
    assert!(client.is_open());

    let copy = client.clone();
    assert!(!copy.is_open());
    assert_eq!(copy.endpoint().path(), client.endpoint().path());
    drop(copy);

    client.close();
    client.close();
    assert!(!client.is_open());
    server.await.unwrap();

    assert_eq!(events.take(), vec!["send:x", "open", "close"]);
}

#[tokio::test]
async fn test_is_recv_ready_does_not_consume() {
    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_frame().await.unwrap();
        peer.write_frame(TEXT, b"queued").await;
        peer.read_to_end().await
    });

    let mut client = Client::new(url, Options::default()).unwrap();
    assert!(!client.is_recv_ready(Duration::from_millis(20)).await.unwrap());

    client.send("x", None).await.unwrap();
    assert!(client.is_recv_ready(Duration::from_secs(1)).await.unwrap());
    assert!(client.is_recv_ready(Duration::from_secs(1)).await.unwrap());

    let message = client.recv(None).await.unwrap();
    assert_eq!(message.as_str(), Some("queued"));
}

#[cfg(feature = "json")]
#[tokio::test]
async fn test_json_messages() {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Quote {
        symbol: String,
        price: f64,
    }

    let (listener, url) = listen("/").await;

    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let (_, payload) = peer.read_frame().await.unwrap();
        peer.write_frame(TEXT, &payload).await;
        peer.read_to_end().await
    });

    let quote = Quote {
        symbol: "ABC".into(),
        price: 12.5,
    };

    let mut client = Client::new(url, Options::default()).unwrap();
    client.send_json(&quote, None).await.unwrap();
    let message = client.recv(None).await.unwrap();
    assert_eq!(message.json::<Quote>().unwrap(), quote);
}

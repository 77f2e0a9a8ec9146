use msgbus_core::{ContentType, SerializedEnvelope};
use msgbus_fabric::{
    error::Error,
    wire::{
        tcp, unix, ChannelListener, Frame, Hello, PeerRole, TcpChannelListener,
        UnixChannelListener,
    },
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

fn message(text: &str) -> Frame {
    Frame::Message(SerializedEnvelope {
        name: None,
        content_type: ContentType::Blob,
        parts: vec![text.as_bytes().to_vec()],
    })
}

/// Helper to get a free port
async fn get_listener() -> (TcpChannelListener, std::net::SocketAddr) {
    let listener = TcpChannelListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn tcp_echoes_frame() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let mut channel = listener.accept().await.unwrap();
        let received: Frame = channel.receive().await.unwrap();
        channel.send(&received).await.unwrap();
    });

    let mut client = tcp::connect(addr, CONNECT_TIMEOUT).await.unwrap();
    let hello = Frame::Hello(Hello {
        role: PeerRole::Subscriber,
        name: "test".to_string(),
        client_key: Some("key".to_string()),
    });
    client.send(&hello).await.unwrap();
    let response: Frame = client.receive().await.unwrap();

    assert_eq!(response, hello);
}

#[tokio::test]
async fn tcp_multiple_frames_preserve_boundaries() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let mut channel = listener.accept().await.unwrap();
        for _ in 0..3 {
            let frame: Frame = channel.receive().await.unwrap();
            channel.send(&frame).await.unwrap();
        }
    });

    let mut client = tcp::connect(addr, CONNECT_TIMEOUT).await.unwrap();
    let frames = vec![message("first"), message("second"), message("third")];

    for frame in &frames {
        client.send(frame).await.unwrap();
        let response: Frame = client.receive().await.unwrap();
        assert_eq!(&response, frame);
    }
}

#[tokio::test]
async fn split_halves_work_independently() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let channel = listener.accept().await.unwrap();
        let (mut reader, mut writer) = channel.split();
        let frame: Frame = reader.receive().await.unwrap();
        writer.send(&frame).await.unwrap();
        writer.send(&Frame::Welcome).await.unwrap();
    });

    let (mut reader, mut writer) = tcp::connect(addr, CONNECT_TIMEOUT)
        .await
        .unwrap()
        .split();
    writer.send(&message("ping")).await.unwrap();

    assert_eq!(reader.receive::<Frame>().await.unwrap(), message("ping"));
    assert_eq!(reader.receive::<Frame>().await.unwrap(), Frame::Welcome);
}

#[tokio::test]
async fn tcp_receive_timeout_fires() {
    let (listener, addr) = get_listener().await;

    // Server that never responds
    tokio::spawn(async move {
        let _channel = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut client = tcp::connect(addr, CONNECT_TIMEOUT).await.unwrap();
    client.send(&message("hello")).await.unwrap();

    let result = client
        .receive_timeout::<Frame>(Duration::from_millis(100))
        .await;
    match result {
        Err(Error::Custom(msg)) => assert!(msg.contains("timeout")),
        other => panic!("Expected timeout error, got {:?}", other),
    }
}

#[tokio::test]
async fn tcp_rejects_oversized_frame() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    // Server sends a frame header claiming 200MB (over the 100MB limit)
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_u32(200 * 1024 * 1024).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = tcp::connect(addr, CONNECT_TIMEOUT).await.unwrap();

    match client.receive::<Frame>().await {
        Err(Error::InvalidFrame(msg)) => assert!(msg.contains("too large")),
        other => panic!("Expected InvalidFrame error, got {:?}", other),
    }
}

#[tokio::test]
async fn closed_peer_reports_connection_closed() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let channel = listener.accept().await.unwrap();
        channel.close().await.unwrap();
    });

    let mut client = tcp::connect(addr, CONNECT_TIMEOUT).await.unwrap();

    assert!(matches!(
        client.receive::<Frame>().await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn connect_to_missing_socket_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = unix::connect(dir.path().join("missing"), CONNECT_TIMEOUT).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unix_echoes_frame_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bus.sock");

    let listener = UnixChannelListener::bind(&path).await.unwrap();
    assert!(path.exists());
    assert!(listener.describe().starts_with("ipc://"));

    let server = tokio::spawn(async move {
        let mut channel = listener.accept().await.unwrap();
        let frame: Frame = channel.receive().await.unwrap();
        channel.send(&frame).await.unwrap();
        // Listener dropped here
    });

    let mut client = unix::connect(&path, CONNECT_TIMEOUT).await.unwrap();
    client.send(&message("over unix")).await.unwrap();
    let response: Frame = client.receive().await.unwrap();
    assert_eq!(response, message("over unix"));

    server.await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn unix_bind_replaces_stale_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stale.sock");
    std::fs::write(&path, b"").unwrap();

    let listener = UnixChannelListener::bind(&path).await.unwrap();
    assert_eq!(listener.path(), path.as_path());
}

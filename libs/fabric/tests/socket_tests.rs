use msgbus_fabric::wire::{unix, Frame, Hello, PeerRole};
use msgbus_fabric::{Client, Config, EndpointConfig, Error, ReceiveTimeout, Value};
use serde_json::json;
use std::time::Duration;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn ipc_publish_subscribe_between_clients() {
    let dir = tempfile::tempdir().unwrap();
    let publisher_client = Client::new(Config::ipc(dir.path())).unwrap();
    let subscriber_client = Client::new(Config::ipc(dir.path())).unwrap();

    let mut publisher = publisher_client.new_publisher("test").await.unwrap();
    assert!(dir.path().join("test").exists());
    let mut subscriber = subscriber_client.new_subscriber("test").await.unwrap();

    let message = Value::Array(vec![
        Value::from(json!({"str": "hello", "int": 2, "float": 55.5})),
        Value::bytes((0u8..10).collect::<Vec<_>>()),
    ]);
    publisher.publish(&message).await.unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(2), subscriber.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(envelope.name(), "test");
    assert_eq!(envelope.data().unwrap().get("int"), Some(&Value::Integer(2)));
    assert_eq!(envelope.blob().unwrap().len(), 10);

    subscriber.close();
    publisher.close().unwrap();
    publisher_client.close();
    subscriber_client.close();
}

#[tokio::test]
async fn stalled_subscriber_does_not_block_publisher() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::ipc(dir.path()).with_send_timeout(Duration::from_millis(200));
    let publisher_client = Client::new(config.clone()).unwrap();
    let subscriber_client = Client::new(config).unwrap();

    let mut publisher = publisher_client.new_publisher("frames").await.unwrap();

    // Completes the handshake, then never reads again
    let mut stalled = unix::connect(dir.path().join("frames"), Duration::from_secs(2))
        .await
        .unwrap();
    stalled
        .send(&Frame::Hello(Hello {
            role: PeerRole::Subscriber,
            name: "frames".to_string(),
            client_key: None,
        }))
        .await
        .unwrap();
    assert_eq!(stalled.receive::<Frame>().await.unwrap(), Frame::Welcome);

    let mut subscriber = subscriber_client.new_subscriber("frames").await.unwrap();

    let frame = Value::bytes(vec![7u8; 1024 * 1024]);
    let published = tokio::time::timeout(Duration::from_secs(10), async {
        for _ in 0..8 {
            publisher.publish(&frame).await.unwrap();
        }
    })
    .await;
    assert!(published.is_ok(), "publisher blocked on a stalled subscriber");

    for _ in 0..8 {
        let envelope = tokio::time::timeout(Duration::from_secs(5), subscriber.messages().recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.blob().unwrap().len(), 1024 * 1024);
    }

    // A new subscriber can still attach
    assert!(subscriber_client.new_subscriber("frames").await.is_ok());
    drop(stalled);
}

#[tokio::test]
async fn ipc_socket_file_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::ipc(dir.path())
        .with_endpoint("camera", EndpointConfig::default().with_socket_file("cam.sock"));
    let client = Client::new(config).unwrap();

    let _publisher = client.new_publisher("camera").await.unwrap();
    assert!(dir.path().join("cam.sock").exists());
    assert!(!dir.path().join("camera").exists());
}

#[tokio::test]
async fn subscribe_without_publisher_fails() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new(Config::ipc(dir.path())).unwrap();

    assert!(matches!(
        client.new_subscriber("nobody").await,
        Err(Error::Transport { op: "subscriber_new", .. })
    ));
}

#[tokio::test]
async fn ipc_echo_service() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new(Config::ipc(dir.path())).unwrap();

    let mut service = client.new_service("svc").await.unwrap();
    let mut requester = client.get_service("svc").await.unwrap();

    let hello = Value::from(json!({"hello": "world"}));
    requester.request(&hello).await.unwrap();

    let request = service
        .receive_request(ReceiveTimeout::from_millis(2000))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.name(), "svc");
    service.response(&request.into_value()).await.unwrap();

    let response = requester
        .receive_response(ReceiveTimeout::from_millis(2000))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.data(), Some(&hello));
}

#[tokio::test]
async fn service_answers_each_requester() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new(Config::ipc(dir.path())).unwrap();

    let mut service = client.new_service("svc").await.unwrap();
    let mut first = client.get_service("svc").await.unwrap();
    let mut second = client.get_service("svc").await.unwrap();

    for (requester, id) in [(&mut first, 1i64), (&mut second, 2)] {
        requester.request(&Value::object([("id", id)])).await.unwrap();
        let request = service
            .receive_request(ReceiveTimeout::from_millis(2000))
            .await
            .unwrap()
            .unwrap();
        service.response(&request.into_value()).await.unwrap();

        let response = requester
            .receive_response(ReceiveTimeout::from_millis(2000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.data().unwrap().get("id"), Some(&Value::Integer(id)));
    }
}

#[tokio::test]
async fn tcp_echo_service() {
    let port = free_port();
    let config = Config::tcp().with_endpoint("echo", EndpointConfig::tcp("127.0.0.1", port));
    let server = Client::new(config.clone()).unwrap();
    let client = Client::new(config).unwrap();

    let mut service = server.new_service("echo").await.unwrap();
    let response = tokio::spawn(async move {
        msgbus_fabric::request::request(
            &client,
            "echo",
            &Value::bytes(b"ping".to_vec()),
            ReceiveTimeout::from_millis(2000),
        )
        .await
    });

    let request = service
        .receive_request(ReceiveTimeout::from_millis(2000))
        .await
        .unwrap()
        .unwrap();
    service.response(&request.into_value()).await.unwrap();

    let response = response.await.unwrap().unwrap().unwrap();
    assert_eq!(response.blob(), Some(&b"ping"[..]));
}

#[tokio::test]
async fn unknown_client_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let server = Client::new(Config::ipc(dir.path()).with_allowed_clients(["trusted"])).unwrap();
    let _publisher = server.new_publisher("secure").await.unwrap();
    let _service = server.new_service("secure-svc").await.unwrap();

    let intruder = Client::new(
        Config::ipc(dir.path())
            .with_endpoint("secure", EndpointConfig::default().with_client_key("guess"))
            .with_endpoint("secure-svc", EndpointConfig::default()),
    )
    .unwrap();
    assert!(matches!(
        intruder.new_subscriber("secure").await,
        Err(Error::AuthenticationFailed)
    ));
    assert!(matches!(
        intruder.get_service("secure-svc").await,
        Err(Error::AuthenticationFailed)
    ));

    let trusted = Client::new(
        Config::ipc(dir.path())
            .with_endpoint("secure", EndpointConfig::default().with_client_key("trusted")),
    )
    .unwrap();
    assert!(trusted.new_subscriber("secure").await.is_ok());
}

#[tokio::test]
async fn closing_client_disconnects_its_subscriber() {
    let dir = tempfile::tempdir().unwrap();
    let publisher_client = Client::new(Config::ipc(dir.path())).unwrap();
    let subscriber_client = Client::new(Config::ipc(dir.path())).unwrap();

    let _publisher = publisher_client.new_publisher("test").await.unwrap();
    let mut subscriber = subscriber_client.new_subscriber("test").await.unwrap();

    subscriber_client.close();

    let error = tokio::time::timeout(Duration::from_secs(2), subscriber.errors().recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(error, Error::Disconnected));
}

#[test]
fn ipc_config_requires_socket_dir() {
    let config = Config::parse(r#"{"type": "zmq_ipc"}"#).unwrap();
    assert!(matches!(Client::new(config), Err(Error::Config(_))));
}

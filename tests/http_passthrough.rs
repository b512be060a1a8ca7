//! Plain HTTP forward proxying and CONNECT tunneling.

mod common;

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use capture_proxy::protocol::PacketDirection;
use common::RecordingHooks;

fn proxied_client(proxy: std::net::SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", proxy)).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn get_is_forwarded_through_proxy() {
    let (backend, seen) = common::start_mock_backend("hello from backend").await;
    let (listener, proxy) = common::start_proxy(|_| {}).await;
    let hooks = Arc::new(RecordingHooks::default());
    listener.set_hook_executor(hooks.clone());

    let response = proxied_client(proxy)
        .get(format!("http://{}/greeting?lang=en", backend))
        .header("x-trace", "abc")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-backend"], "mock");
    assert_eq!(response.headers()["connection"], "close");
    assert_eq!(response.text().await.unwrap(), "hello from backend");

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /greeting?lang=en HTTP/1.1\r\n"));
    assert!(requests[0].to_ascii_lowercase().contains("x-trace: abc\r\n"));

    hooks.wait_for_ended(1).await;
    let outbound = hooks.packets_in(PacketDirection::Outbound);
    assert_eq!(outbound.len(), 1);
    assert!(outbound[0].starts_with(b"GET http://"));
    let inbound = hooks.packets_in(PacketDirection::Inbound);
    assert_eq!(inbound.len(), 1);
    assert!(inbound[0].ends_with(b"hello from backend"));

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn post_body_reaches_backend() {
    let (backend, seen) = common::start_mock_backend("stored").await;
    let (listener, proxy) = common::start_proxy(|_| {}).await;

    let response = proxied_client(proxy)
        .post(format!("http://{}/items", backend))
        .body("item=42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "stored");

    let requests = seen.lock().unwrap().clone();
    assert!(requests[0].starts_with("POST /items HTTP/1.1\r\n"));
    assert!(requests[0].ends_with("\r\n\r\nitem=42"));

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn hop_by_hop_headers_are_not_forwarded() {
    let (backend, seen) = common::start_mock_backend("ok").await;
    let (listener, proxy) = common::start_proxy(|_| {}).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(
            format!(
                "GET http://{}/ HTTP/1.1\r\nHost: {}\r\nProxy-Connection: keep-alive\r\nKeep-Alive: 5\r\nX-Kept: yes\r\n\r\n",
                backend, backend
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.ends_with("ok"));

    let request = seen.lock().unwrap()[0].to_ascii_lowercase();
    assert!(!request.contains("proxy-connection"));
    assert!(!request.contains("keep-alive: 5"));
    assert!(request.contains("x-kept: yes"));

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn chunked_request_body_is_refused() {
    let (backend, seen) = common::start_mock_backend("unused").await;
    let (listener, proxy) = common::start_proxy(|_| {}).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(
            format!(
                "POST http://{}/ HTTP/1.1\r\nHost: {}\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n0\r\n\r\n",
                backend, backend
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    assert!(seen.lock().unwrap().is_empty());

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn unreachable_backend_gets_502() {
    let dead = common::unused_addr().await;
    let (listener, proxy) = common::start_proxy(|_| {}).await;

    let response = proxied_client(proxy)
        .get(format!("http://{}/", dead))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Upstream request failed\n");

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn connect_tunnels_raw_bytes() {
    let (backend, seen) = common::start_mock_backend("tunneled").await;
    let (listener, proxy) = common::start_proxy(|_| {}).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", backend, backend).as_bytes())
        .await
        .unwrap();

    let mut established = [0u8; 39];
    client.read_exact(&mut established).await.unwrap();
    assert_eq!(&established[..], b"HTTP/1.1 200 Connection Established\r\n\r\n");

    client
        .write_all(b"GET /inside HTTP/1.1\r\nHost: backend\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.ends_with("tunneled"));
    assert!(seen.lock().unwrap()[0].starts_with("GET /inside HTTP/1.1\r\n"));

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn connect_to_dead_target_gets_502() {
    let dead = common::unused_addr().await;
    let (listener, proxy) = common::start_proxy(|_| {}).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", dead, dead).as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));

    listener.stop().await.unwrap();
}

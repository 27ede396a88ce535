//! End-to-end relay tests over real sockets
//!
//! A hand-driven WebSocket client plays the agent so the tests can inspect
//! exactly what the relay puts on the wire.

use futures_util::{SinkExt, StreamExt};
use hooktunnel_auth::generate_token;
use hooktunnel_proto::{Frame, ProxyResponse, CLOSE_MANUAL, CLOSE_SUPERSEDED};
use hooktunnel_relay::{RelayConfig, RelayServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "e2e-secret";

async fn start_relay(config: RelayConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RelayServer::new(config);
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    addr
}

async fn connect_agent(addr: SocketAddr, tunnel_id: &str, token: &str) -> AgentSocket {
    let mut request = format!("ws://{}/connect/{}", addr, tunnel_id)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(&format!("webhooks-proxy-tunnel, {}", token)).unwrap(),
    );

    let (socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get("sec-websocket-protocol").unwrap(),
        "webhooks-proxy-tunnel"
    );
    socket
}

/// Wait until the relay reports the tunnel as connected
async fn wait_connected(addr: SocketAddr, tunnel_id: &str) {
    for _ in 0..50 {
        let stats: serde_json::Value = reqwest::get(format!("http://{}/stats/{}", addr, tunnel_id))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if stats["isConnected"] == true {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Agent never attached");
}

async fn next_close_code(socket: &mut AgentSocket) -> u16 {
    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Close(Some(frame))) => return u16::from(frame.code),
            Ok(_) => continue,
            Err(e) => panic!("Socket error before close frame: {}", e),
        }
    }
    panic!("Socket ended without close frame");
}

#[tokio::test]
async fn test_request_round_trip_through_agent() {
    let addr = start_relay(RelayConfig::default().with_secret(SECRET)).await;
    let tunnel_id = "6f9619ff-8b86-d011-b42d-00c04fc964ff";
    let mut agent = connect_agent(addr, tunnel_id, &generate_token(tunnel_id, SECRET)).await;
    wait_connected(addr, tunnel_id).await;

    let agent_task = tokio::spawn(async move {
        let text = match agent.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("Expected request frame, got {:?}", other),
        };
        let request = match Frame::decode(&text).unwrap() {
            Frame::Request { request } => request,
            other => panic!("Expected request frame, got {:?}", other),
        };

        assert_eq!(request.method, "POST");
        assert!(request
            .url
            .ends_with(&format!("/proxy/{}/hooks/github?delivery=1", tunnel_id)));
        assert_eq!(request.body.as_deref(), Some(&b"{\"ping\":true}"[..]));

        let response = ProxyResponse::text(202, "Accepted", "queued")
            .with_header("x-agent", "yes")
            .with_header("transfer-encoding", "chunked");
        agent
            .send(Message::Text(Frame::response(response).encode()))
            .await
            .unwrap();
        agent
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!(
            "http://{}/proxy/{}/hooks/github?delivery=1",
            addr, tunnel_id
        ))
        .header("content-type", "application/json")
        .body("{\"ping\":true}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 202);
    assert_eq!(response.headers().get("x-agent").unwrap(), "yes");
    assert_eq!(response.text().await.unwrap(), "queued");
    let _agent = agent_task.await.unwrap();

    let stats: serde_json::Value = reqwest::get(format!("http://{}/stats/{}", addr, tunnel_id))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["isConnected"], true);
    assert_eq!(stats["requestCount"], 1);

    let listing: serde_json::Value = reqwest::get(format!("http://{}/stats", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        listing,
        serde_json::json!([{"tunnelId": tunnel_id, "isConnected": true, "requestCount": 1}])
    );
}

#[tokio::test]
async fn test_agent_with_bad_token_is_refused() {
    let addr = start_relay(RelayConfig::default().with_secret(SECRET)).await;
    let tunnel_id = "6f9619ff-8b86-d011-b42d-00c04fc964ff";

    let mut request = format!("ws://{}/connect/{}", addr, tunnel_id)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("webhooks-proxy-tunnel, no-secret"),
    );

    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

#[tokio::test]
async fn test_second_agent_supersedes_first() {
    let addr = start_relay(RelayConfig::default()).await;
    let tunnel_id = "00000000-0000-0000-0000-0000000000aa";

    let mut first = connect_agent(addr, tunnel_id, "no-secret").await;
    wait_connected(addr, tunnel_id).await;
    let mut second = connect_agent(addr, tunnel_id, "no-secret").await;

    assert_eq!(next_close_code(&mut first).await, CLOSE_SUPERSEDED);

    let body = reqwest::get(format!("http://{}/close/{}", addr, tunnel_id))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Closed connection");
    assert_eq!(next_close_code(&mut second).await, CLOSE_MANUAL);

    let response = reqwest::get(format!("http://{}/proxy/{}/", addr, tunnel_id))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn test_agent_disconnect_fails_waiting_caller() {
    let addr = start_relay(RelayConfig::default()).await;
    let tunnel_id = "00000000-0000-0000-0000-0000000000bb";
    let mut agent = connect_agent(addr, tunnel_id, "no-secret").await;
    wait_connected(addr, tunnel_id).await;

    let caller = tokio::spawn(async move {
        reqwest::get(format!("http://{}/proxy/{}/slow", addr, tunnel_id))
            .await
            .unwrap()
            .status()
            .as_u16()
    });

    // Take the request, then hang up without answering
    assert!(matches!(agent.next().await, Some(Ok(Message::Text(_)))));
    agent
        .close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();

    assert_eq!(caller.await.unwrap(), 502);
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let addr = start_relay(
        RelayConfig::default().with_response_timeout(Duration::from_millis(200)),
    )
    .await;
    let tunnel_id = "00000000-0000-0000-0000-0000000000cc";
    let mut agent = connect_agent(addr, tunnel_id, "no-secret").await;
    wait_connected(addr, tunnel_id).await;

    let response = reqwest::get(format!("http://{}/proxy/{}/", addr, tunnel_id))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 504);
    assert_eq!(
        response.text().await.unwrap(),
        "waiting for response from the tunnel client timed out"
    );

    // The connection survives the timeout
    assert!(matches!(agent.next().await, Some(Ok(Message::Text(_)))));
    let stats: serde_json::Value = reqwest::get(format!("http://{}/stats/{}", addr, tunnel_id))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["isConnected"], true);
}

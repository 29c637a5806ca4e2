use dualchat_core::{ChatApiClient, ChatRequest, ChatTransport, ModelId, StreamEvent, TransportError};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the fake backend writes back after reading one request.
enum Reply {
    Full(String),
    /// Headers, then each chunk with a pause in between, then close.
    Chunked(Vec<&'static str>),
    /// Headers and the chunks, then the connection stays open.
    Stall(Vec<&'static str>),
    Silent,
}

fn json_reply(status: &str, body: &str) -> Reply {
    Reply::Full(format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    ))
}

const STREAM_HEAD: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

/// Serves exactly one connection. The handle yields the raw request.
async fn serve_once(reply: Reply) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        match reply {
            Reply::Full(raw) => {
                socket.write_all(raw.as_bytes()).await.unwrap();
            }
            Reply::Chunked(chunks) => {
                socket.write_all(STREAM_HEAD.as_bytes()).await.unwrap();
                for chunk in chunks {
                    socket.write_all(chunk.as_bytes()).await.unwrap();
                    socket.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
            Reply::Stall(chunks) => {
                socket.write_all(STREAM_HEAD.as_bytes()).await.unwrap();
                for chunk in chunks {
                    socket.write_all(chunk.as_bytes()).await.unwrap();
                }
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Reply::Silent => {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}/api/v1", addr), handle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let body_len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn request_body(raw: &str) -> serde_json::Value {
    let (_, body) = raw.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

async fn collect_stream(
    client: &ChatApiClient,
    request: &ChatRequest,
    cancel: &CancellationToken,
) -> (Vec<StreamEvent>, Result<(), TransportError>) {
    let mut events = Vec::new();
    let result = client
        .stream(request, &mut |event: StreamEvent| events.push(event), cancel)
        .await;
    (events, result)
}

#[tokio::test]
async fn complete_posts_the_request_and_parses_the_reply() {
    let (base, server) = serve_once(json_reply(
        "200 OK",
        r#"{"reply":"Hi there","model":"gpt-4o","usage":{"total_tokens":12},"latency":0.8}"#,
    ))
    .await;
    let client = ChatApiClient::new(&base);

    let request = ChatRequest::new("hello", ModelId::Gpt4).with_system_prompt("Be brief.");
    let response = client.complete(&request).await.unwrap();

    assert_eq!(response.reply, "Hi there");
    assert_eq!(response.model, "gpt-4o");
    assert_eq!(response.latency, Some(0.8));

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /api/v1/chat/completions "));
    let body = request_body(&raw);
    assert_eq!(body["message"], "hello");
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["system_prompt"], "Be brief.");
    assert!(body.get("stream").is_none());
}

#[tokio::test]
async fn complete_surfaces_the_server_detail() {
    let (base, _server) =
        serve_once(json_reply("400 Bad Request", r#"{"detail":"Invalid model"}"#)).await;
    let client = ChatApiClient::new(&base);

    let err = client
        .complete(&ChatRequest::new("hello", ModelId::DeepSeek))
        .await
        .unwrap_err();

    match err {
        TransportError::Http { status, detail } => {
            assert_eq!(status, 400);
            assert_eq!(detail, "Invalid model");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn complete_falls_back_to_a_status_message() {
    let (base, _server) = serve_once(Reply::Full(
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 9\r\nConnection: close\r\n\r\nexploded!"
            .to_string(),
    ))
    .await;
    let client = ChatApiClient::new(&base);

    let err = client
        .complete(&ChatRequest::new("hello", ModelId::Gpt4))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "API Error: 500");
}

#[tokio::test]
async fn stream_decodes_frames_across_chunk_boundaries() {
    let (base, server) = serve_once(Reply::Chunked(vec![
        "data: {\"type\":\"delta\",\"content\":\"Hel\"}\n",
        "data: {\"type\":\"delta\",\"con",
        "tent\":\"lo\"}\n\n",
        "data: {\"type\":\"done\",\"latency\":1.5,\"usage\":{\"total_tokens\":7}}",
    ]))
    .await;
    let client = ChatApiClient::new(&base);

    let (events, result) = collect_stream(
        &client,
        &ChatRequest::new("hi", ModelId::DeepSeek),
        &CancellationToken::new(),
    )
    .await;
    result.unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::Delta("Hel".into()));
    assert_eq!(events[1], StreamEvent::Delta("lo".into()));
    match &events[2] {
        StreamEvent::Done { latency, usage } => {
            assert_eq!(*latency, Some(1.5));
            assert_eq!(usage.as_ref().unwrap()["total_tokens"], 7);
        }
        other => panic!("expected done, got {other:?}"),
    }

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /api/v1/chat/stream "));
    let body = request_body(&raw);
    assert_eq!(body["model"], "deepseek");
    assert_eq!(body["stream"], true);
}

#[tokio::test]
async fn stream_rejects_non_success_status() {
    let (base, _server) = serve_once(Reply::Full(
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string(),
    ))
    .await;
    let client = ChatApiClient::new(&base);

    let (events, result) = collect_stream(
        &client,
        &ChatRequest::new("hi", ModelId::Gpt4),
        &CancellationToken::new(),
    )
    .await;

    assert!(events.is_empty());
    assert_eq!(result.unwrap_err().to_string(), "Stream Error: 503");
}

#[tokio::test]
async fn cancelling_a_stream_returns_aborted() {
    let (base, _server) = serve_once(Reply::Stall(vec![
        "data: {\"type\":\"delta\",\"content\":\"partial\"}\n",
    ]))
    .await;
    let client = ChatApiClient::new(&base);
    let cancel = CancellationToken::new();

    let mut events = Vec::new();
    let trigger = cancel.clone();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.stream(
            &ChatRequest::new("hi", ModelId::Gpt4),
            &mut |event: StreamEvent| {
                events.push(event);
                trigger.cancel();
            },
            &cancel,
        ),
    )
    .await
    .expect("stream stopped after cancel");

    assert!(result.unwrap_err().is_aborted());
    assert_eq!(events, vec![StreamEvent::Delta("partial".into())]);
}

#[tokio::test]
async fn health_check_hits_the_server_root() {
    let (base, server) = serve_once(json_reply("200 OK", r#"{"status":"ok"}"#)).await;
    let client = ChatApiClient::new(&base);

    assert!(client.health_check().await);
    assert!(server.await.unwrap().starts_with("GET /health "));
}

#[tokio::test]
async fn health_check_is_false_on_error_status() {
    let (base, _server) = serve_once(json_reply("503 Service Unavailable", "{}")).await;
    assert!(!ChatApiClient::new(&base).health_check().await);
}

#[tokio::test]
async fn health_check_is_false_when_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ChatApiClient::new(&format!("http://{}/api/v1", addr));
    assert!(!client.health_check().await);
}

#[tokio::test]
async fn health_check_gives_up_after_the_timeout() {
    let (base, _server) = serve_once(Reply::Silent).await;
    let client = ChatApiClient::new(&base);

    let started = Instant::now();
    assert!(!client.health_check().await);
    assert!(started.elapsed() < Duration::from_secs(8));
}

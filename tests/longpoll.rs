//! End-to-end tests of the client and the long-poll driver against a mock
//! Bot API server.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use telefeed::api::{Client, ClientOpts, UpdateType};
use telefeed::logging::Discard;
use telefeed::stream::{decode_raw, LongPollOptions, LongPollStreamer, Update};
use telefeed::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-token";

fn ok_body(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": result}))
}

fn client(server: &MockServer) -> Arc<Client> {
    Arc::new(Client::new(&server.uri(), TOKEN, ClientOpts::default()).unwrap())
}

// Starts a driver polling the mock server with a short timeout.
fn start(
    server: &MockServer,
    limit: usize,
    shutdown: &CancellationToken,
) -> (
    tokio::sync::mpsc::Receiver<Update>,
    tokio::sync::oneshot::Receiver<Option<Error>>,
) {
    let streamer = LongPollStreamer::new(
        client(server),
        decode_raw,
        LongPollOptions {
            limit,
            timeout: Duration::from_secs(1),
            logger: Some(Arc::new(Discard)),
            recoverable: None,
        },
    );
    streamer.stream(shutdown.clone())
}

fn updates_path() -> wiremock::matchers::PathExactMatcher {
    path(format!("/bot{TOKEN}/getUpdates"))
}

#[tokio::test]
async fn test_long_poll_advances_offset_across_batches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(updates_path())
        .and(body_json(json!({"limit": 2, "timeout": 1})))
        .respond_with(ok_body(json!([
            {"update_id": 1, "message": {"text": "a"}},
            {"update_id": 2, "message": {"text": "b"}},
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(updates_path())
        .and(body_json(json!({"offset": 3, "limit": 2, "timeout": 1})))
        .respond_with(ok_body(json!([
            {"update_id": 3, "poll": {"id": "p"}},
        ])))
        .expect(1)
        .mount(&server)
        .await;
    // Once everything is consumed the driver just keeps polling from 4.
    Mock::given(method("POST"))
        .and(updates_path())
        .and(body_json(json!({"offset": 4, "limit": 2, "timeout": 1})))
        .respond_with(ok_body(json!([])))
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    let (mut updates, errors) = start(&server, 2, &shutdown);

    let mut got = Vec::new();
    for _ in 0..3 {
        let update = timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("driver stalled")
            .expect("stream closed early");
        got.push(update);
    }
    assert_eq!(
        got.iter().map(|u| (u.info.id, u.info.kind)).collect::<Vec<_>>(),
        vec![
            (1, UpdateType::Message),
            (2, UpdateType::Message),
            (3, UpdateType::Poll),
        ]
    );
    assert_eq!(got[0].content.get(), r#"{"text":"a"}"#);

    shutdown.cancel();
    // Cancellation closes both channels and signals a clean shutdown.
    assert!(timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .is_none());
    let terminal = timeout(Duration::from_secs(5), errors).await.unwrap().unwrap();
    assert!(terminal.is_none());
}

#[tokio::test]
async fn test_long_poll_blocks_when_downstream_stops_reading() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(updates_path())
        .respond_with(ok_body(json!([
            {"update_id": 1, "message": {"text": "a"}},
            {"update_id": 2, "message": {"text": "b"}},
            {"update_id": 3, "message": {"text": "c"}},
        ])))
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    // Capacity 1 and nobody reading: the driver must park on the handoff.
    let (mut updates, errors) = start(&server, 1, &shutdown);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        requests.len(),
        1,
        "a blocked driver must not issue further requests"
    );

    shutdown.cancel();
    // Whatever was already handed off is still readable, then the stream
    // closes; the undelivered tail is dropped.
    let mut delivered = 0;
    while timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .is_some()
    {
        delivered += 1;
    }
    assert_eq!(delivered, 1);
    let terminal = timeout(Duration::from_secs(5), errors).await.unwrap().unwrap();
    assert!(terminal.is_none());
}

#[tokio::test]
async fn test_long_poll_recovers_from_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(updates_path())
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(updates_path())
        .and(body_json(json!({"limit": 2, "timeout": 1})))
        .respond_with(ok_body(json!([{"update_id": 7, "poll": {"id": "p"}}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(updates_path())
        .and(body_json(json!({"offset": 8, "limit": 2, "timeout": 1})))
        .respond_with(ok_body(json!([])))
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    let (mut updates, _errors) = start(&server, 2, &shutdown);

    let update = timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("driver never recovered")
        .expect("stream closed early");
    assert_eq!(update.info.id, 7);

    shutdown.cancel();
}

#[tokio::test]
async fn test_long_poll_retries_non_ok_responses() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(updates_path())
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false, "description": "flood", "error_code": 429,
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(updates_path())
        .respond_with(ok_body(json!([{"update_id": 1, "poll": {"id": "p"}}])))
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    let (mut updates, _errors) = start(&server, 2, &shutdown);

    let update = timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("driver never recovered")
        .expect("stream closed early");
    assert_eq!(update.info.id, 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_long_poll_aborts_on_protocol_violation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(updates_path())
        .respond_with(ok_body(json!([
            {"message": {}, "update_id": 2},
        ])))
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    let (mut updates, errors) = start(&server, 2, &shutdown);

    let terminal = timeout(Duration::from_secs(5), errors)
        .await
        .expect("driver kept retrying a fatal error")
        .unwrap();
    assert!(matches!(terminal, Some(Error::Protocol(_))));
    assert!(updates.recv().await.is_none());
}

#[tokio::test]
async fn test_call_decodes_typed_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .and(body_json(json!({"chat_id": 5, "text": "hi"})))
        .respond_with(ok_body(json!({
            "message_id": 10,
            "chat": {"id": 5, "type": "private"},
            "text": "hi",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let message = client(&server).send_message(5, "hi").await.unwrap();
    assert_eq!(message.message_id, 10);
    assert_eq!(message.chat.id, 5);
    assert_eq!(message.text.as_deref(), Some("hi"));
}

#[tokio::test]
async fn test_transport_errors_do_not_leak_the_token() {
    // Nothing listens here; the request fails at the transport level.
    let client = Client::new("http://127.0.0.1:9", TOKEN, ClientOpts::default()).unwrap();
    let err = client
        .call::<_, serde_json::Value>("getMe", &json!({}))
        .await
        .unwrap_err();

    let mut rendered = format!("{err}");
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        rendered.push_str(&format!(" {cause}"));
        source = cause.source();
    }
    assert!(
        !rendered.contains(TOKEN),
        "token leaked into error output: {rendered}"
    );
}

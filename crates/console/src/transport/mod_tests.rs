use super::*;
use crate::protocol::{self, msg_type};
use tokio::io::duplex;

fn echo_body(body: &[u8]) -> Bytes {
    Bytes::copy_from_slice(body)
}

/// Mock agent: replies `result(id, body)` to every request it reads, and can
/// be told to push streaming envelopes via `pushes`.
async fn run_mock_agent<S: Duplex>(mut stream: S, mut pushes: mpsc::UnboundedReceiver<Envelope>) {
    loop {
        tokio::select! {
            biased;
            push = pushes.recv() => {
                match push {
                    Some(env) => { let _ = protocol::write_envelope(&mut stream, &env).await; }
                    None => {}
                }
            }
            read = protocol::read_envelope(&mut stream) => {
                match read {
                    Ok(Some(env)) => {
                        let reply = Envelope::new(msg_type::RESULT, env.id, echo_body(&env.body));
                        if protocol::write_envelope(&mut stream, &reply).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }
}

#[tokio::test]
async fn echo_round_trip_returns_original_body() {
    let (client_side, agent_side) = duplex(4096);
    let (_push_tx, push_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_mock_agent(agent_side, push_rx));

    let client = TransportClient::new(client_side, Arc::<str>::from("srv"));
    let result = client
        .request(msg_type::RESULT, Bytes::from_static(b"hello"), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(result.as_ref(), b"hello");
}

#[tokio::test]
async fn concurrent_requests_route_by_id() {
    let (client_side, agent_side) = duplex(8192);
    let (_push_tx, push_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_mock_agent(agent_side, push_rx));

    let client = Arc::new(TransportClient::new(client_side, Arc::<str>::from("srv")));
    let mut handles = Vec::new();
    for i in 0..3 {
        let client = Arc::clone(&client);
        let body = Bytes::from(format!("payload-{i}"));
        handles.push(tokio::spawn(async move {
            client.request(msg_type::RESULT, body.clone(), Duration::from_secs(1)).await.map(|r| (body, r))
        }));
    }
    for h in handles {
        let (sent, got) = h.await.unwrap().unwrap();
        assert_eq!(sent, got);
    }
}

#[tokio::test]
async fn request_ids_are_strictly_increasing() {
    let (client_side, agent_side) = duplex(8192);
    let (_push_tx, push_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_mock_agent(agent_side, push_rx));

    let client = TransportClient::new(client_side, Arc::<str>::from("srv"));
    for _ in 0..3 {
        client.request(msg_type::RESULT, Bytes::new(), Duration::from_secs(1)).await.unwrap();
    }
    assert_eq!(client.next_id.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn stream_dispatch_preserves_order_and_tags_server() {
    let (client_side, agent_side) = duplex(8192);
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_mock_agent(agent_side, push_rx));

    let client = TransportClient::new(client_side, Arc::<str>::from("srv-a"));
    let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel();
    client.bind(dispatch_tx);

    let metrics = serde_json::json!({"ts": 1, "host": null, "containers": []});
    let log = serde_json::json!({"container_id":"c1","container_name":"n","ts":1,"level":"info","message":"m"});
    let alert = serde_json::json!({"alert_id":1,"rule":"r","state":"firing","fired_at":1,"message":"m"});

    push_tx
        .send(Envelope::streaming(msg_type::METRICS_UPDATE, Bytes::from(serde_json::to_vec(&metrics).unwrap())))
        .unwrap();
    push_tx
        .send(Envelope::streaming(msg_type::LOG_ENTRY, Bytes::from(serde_json::to_vec(&log).unwrap())))
        .unwrap();
    push_tx
        .send(Envelope::streaming(msg_type::ALERT_EVENT, Bytes::from(serde_json::to_vec(&alert).unwrap())))
        .unwrap();

    for expected in ["metrics", "log", "alert"] {
        let msg = dispatch_rx.recv().await.unwrap();
        match msg {
            OrchestratorMessage::Streaming { server, message } => {
                assert_eq!(server.as_ref(), "srv-a");
                match (expected, message) {
                    ("metrics", StreamingMessage::MetricsUpdate(_)) => {}
                    ("log", StreamingMessage::LogEntry(_)) => {}
                    ("alert", StreamingMessage::AlertEvent(_)) => {}
                    (label, other) => panic!("unexpected order: wanted {label}, got {other:?}"),
                }
            }
            other => panic!("expected Streaming, got connection event instead: {:?}", matches!(other, OrchestratorMessage::ConnectionLost { .. })),
        }
    }
}

#[tokio::test]
async fn agent_error_reply_is_surfaced_and_truncated() {
    let (client_side, agent_side) = duplex(4096);
    tokio::spawn(async move {
        let mut stream = agent_side;
        let env = protocol::read_envelope(&mut stream).await.unwrap().unwrap();
        let long = "x".repeat(500);
        let reply = Envelope::new(msg_type::ERROR, env.id, Bytes::from(long));
        protocol::write_envelope(&mut stream, &reply).await.unwrap();
    });

    let client = TransportClient::new(client_side, Arc::<str>::from("srv"));
    let err = client.request(msg_type::RESULT, Bytes::new(), Duration::from_secs(1)).await.unwrap_err();
    match err {
        TransportError::Agent(msg) => assert_eq!(msg.len(), crate::error::AGENT_MESSAGE_MAX_LEN),
        other => panic!("expected Agent error, got {other:?}"),
    }
}

#[tokio::test]
async fn request_times_out_when_no_reply_arrives() {
    let (client_side, _agent_side) = duplex(4096);
    let client = TransportClient::new(client_side, Arc::<str>::from("srv"));
    let err = client
        .request(msg_type::RESULT, Bytes::new(), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
}

#[tokio::test]
async fn explicit_close_does_not_emit_connection_lost() {
    let (client_side, _agent_side) = duplex(4096);
    let client = TransportClient::new(client_side, Arc::<str>::from("srv"));
    let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel();
    client.bind(dispatch_tx);

    client.close().await;
    // Give the reader a moment to observe EOF and drain.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(dispatch_rx.try_recv().is_err());
}

#[tokio::test]
async fn dropped_connection_emits_connection_lost_once() {
    let (client_side, agent_side) = duplex(4096);
    let client = TransportClient::new(client_side, Arc::<str>::from("srv"));
    let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel();
    client.bind(dispatch_tx);

    drop(agent_side);
    let msg = dispatch_rx.recv().await.unwrap();
    assert!(matches!(msg, OrchestratorMessage::ConnectionLost { server } if server.as_ref() == "srv"));
    assert!(dispatch_rx.try_recv().is_err());
}

#[tokio::test]
async fn connection_close_while_request_in_flight_resolves_with_connection_closed() {
    let (client_side, agent_side) = duplex(4096);
    let client = Arc::new(TransportClient::new(client_side, Arc::<str>::from("srv")));
    let (dispatch_tx, _dispatch_rx) = mpsc::unbounded_channel();
    client.bind(dispatch_tx);

    let req_client = Arc::clone(&client);
    let handle = tokio::spawn(async move {
        req_client.request(msg_type::RESULT, Bytes::new(), Duration::from_secs(5)).await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(agent_side);

    let result = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert_eq!(result, Err(TransportError::ConnectionClosed));
}

#[tokio::test]
async fn bind_is_idempotent() {
    let (client_side, agent_side) = duplex(4096);
    let client = TransportClient::new(client_side, Arc::<str>::from("srv"));
    let (tx1, _rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    client.bind(tx1);
    client.bind(tx2);
    drop(agent_side);
    // Second bind was a no-op; tx2's receiver never gets anything.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx2.try_recv().is_err());
}

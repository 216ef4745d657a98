use super::*;
use std::io::Cursor;

#[tokio::test]
async fn envelope_round_trips_through_framing() {
    let env = Envelope::new(msg_type::RESULT, 7, Bytes::from_static(b"{\"ok\":true}"));
    let mut buf = Vec::new();
    write_envelope(&mut buf, &env).await.unwrap();

    let mut cursor = Cursor::new(buf);
    let decoded = read_envelope(&mut cursor).await.unwrap().unwrap();
    assert_eq!(decoded.msg_type, msg_type::RESULT);
    assert_eq!(decoded.id, 7);
    assert_eq!(decoded.body.as_ref(), b"{\"ok\":true}");
}

#[tokio::test]
async fn clean_eof_at_frame_boundary_returns_none() {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    let result = read_envelope(&mut cursor).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(MAX_FRAME_BODY + 100).to_be_bytes());
    let mut cursor = Cursor::new(buf);
    assert!(read_envelope(&mut cursor).await.is_err());
}

#[test]
fn unknown_streaming_type_decodes_to_none() {
    assert!(StreamingMessage::decode(9999, b"{}").is_none());
}

#[test]
fn metrics_update_decodes() {
    let body = serde_json::json!({
        "ts": 100,
        "host": {"cpu_percent": 1.0, "mem_percent": 2.0, "mem_used_percent": 3.0, "net": []},
        "containers": [],
    });
    let bytes = serde_json::to_vec(&body).unwrap();
    let decoded = StreamingMessage::decode(msg_type::METRICS_UPDATE, &bytes).unwrap().unwrap();
    match decoded {
        StreamingMessage::MetricsUpdate(update) => {
            assert_eq!(update.ts, 100);
            assert_eq!(update.host.unwrap().cpu_percent, 1.0);
        }
        other => panic!("expected MetricsUpdate, got {other:?}"),
    }
}

#[test]
fn standalone_container_has_no_service_identity() {
    let sample = ContainerSample { id: "abc".into(), name: "t".into(), ..Default::default() };
    assert_eq!(sample.service_identity(), None);
}

#[test]
fn orchestrated_container_has_service_identity() {
    let sample = ContainerSample {
        id: "abc".into(),
        project: "app".into(),
        service: "web".into(),
        name: "t".into(),
        ..Default::default()
    };
    assert_eq!(sample.service_identity(), Some(("app", "web")));
}

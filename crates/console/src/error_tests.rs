use super::*;

#[test]
fn agent_message_is_truncated() {
    let long = "x".repeat(500);
    let err = TransportError::agent(&long);
    match err {
        TransportError::Agent(msg) => assert_eq!(msg.chars().count(), AGENT_MESSAGE_MAX_LEN),
        other => panic!("expected Agent variant, got {other:?}"),
    }
}

#[test]
fn short_agent_message_is_untouched() {
    let err = TransportError::agent("container not found");
    assert_eq!(err, TransportError::Agent("container not found".to_owned()));
}

#[test]
fn display_is_human_readable() {
    assert_eq!(TransportError::ConnectionClosed.to_string(), "connection closed");
    assert_eq!(TransportError::Timeout.to_string(), "request timed out");
}

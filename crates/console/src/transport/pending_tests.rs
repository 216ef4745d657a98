use super::*;

#[tokio::test]
async fn deliver_wakes_the_waiter() {
    let pending = PendingMap::new();
    let rx = pending.insert(1);
    assert!(pending.deliver(1, Ok(Bytes::from_static(b"hi"))));
    assert_eq!(rx.await.unwrap().unwrap(), Bytes::from_static(b"hi"));
}

#[test]
fn deliver_with_no_waiter_returns_false() {
    let pending = PendingMap::new();
    assert!(!pending.deliver(42, Ok(Bytes::new())));
}

#[tokio::test]
async fn remove_drops_without_delivering() {
    let pending = PendingMap::new();
    let rx = pending.insert(1);
    pending.remove(1);
    assert_eq!(pending.len(), 0);
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn drain_closed_wakes_every_waiter() {
    let pending = PendingMap::new();
    let rx1 = pending.insert(1);
    let rx2 = pending.insert(2);
    pending.drain_closed();
    assert_eq!(rx1.await.unwrap(), Err(TransportError::ConnectionClosed));
    assert_eq!(rx2.await.unwrap(), Err(TransportError::ConnectionClosed));
    assert_eq!(pending.len(), 0);
}

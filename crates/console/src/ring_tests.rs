use super::*;

#[test]
fn len_never_exceeds_capacity() {
    let mut ring = RingBuffer::new(3);
    for i in 0..10 {
        ring.push(i);
        assert!(ring.len() <= ring.capacity());
    }
}

#[test]
fn data_equals_last_min_n_c_pushed_values() {
    let mut ring = RingBuffer::new(3);
    for i in 0..7 {
        ring.push(i);
    }
    assert_eq!(ring.len(), 3);
    assert_eq!(ring.data(), vec![4, 5, 6]);
}

#[test]
fn fewer_pushes_than_capacity() {
    let mut ring = RingBuffer::new(5);
    ring.push("a");
    ring.push("b");
    assert_eq!(ring.len(), 2);
    assert_eq!(ring.data(), vec!["a", "b"]);
}

#[test]
fn empty_buffer_has_zero_len() {
    let ring: RingBuffer<i32> = RingBuffer::new(4);
    assert_eq!(ring.len(), 0);
    assert!(ring.is_empty());
    assert_eq!(ring.data(), Vec::<i32>::new());
}

#[test]
fn capacity_one_keeps_only_latest() {
    let mut ring = RingBuffer::new(1);
    ring.push(1);
    ring.push(2);
    ring.push(3);
    assert_eq!(ring.data(), vec![3]);
}

#[test]
fn replace_with_rebuilds_from_scratch() {
    let mut ring = RingBuffer::new(600);
    ring.push(99.0);
    let replaced = replace_with(600, vec![10.0, 30.0]);
    assert_eq!(replaced.len(), 2);
    assert_eq!(replaced.data(), vec![10.0, 30.0]);
    // original is untouched by building a fresh replacement
    assert_eq!(ring.data(), vec![99.0]);
}

proptest::proptest! {
    #[test]
    fn prop_len_is_min_of_pushes_and_capacity(capacity in 1usize..50, pushes in 0usize..200) {
        let mut ring = RingBuffer::new(capacity);
        for i in 0..pushes {
            ring.push(i);
        }
        proptest::prop_assert_eq!(ring.len(), pushes.min(capacity));
        proptest::prop_assert!(ring.len() <= ring.capacity());
    }
}

//! 事件队列测试
//! Event queue tests

use super::*;
use std::time::Duration;

#[test]
fn test_events_pop_in_time_order() {
    let mut queue = EventQueue::new();
    queue.schedule(Duration::from_millis(300), "c");
    queue.schedule(Duration::from_millis(100), "a");
    queue.schedule(Duration::from_millis(200), "b");

    let order: Vec<_> = std::iter::from_fn(|| queue.pop_next())
        .map(|entry| entry.event)
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(queue.now(), Duration::from_millis(300));
}

#[test]
fn test_same_tick_events_are_fifo() {
    let mut queue = EventQueue::new();
    for i in 0..10 {
        queue.schedule(Duration::from_secs(1), i);
    }

    let order: Vec<_> = std::iter::from_fn(|| queue.pop_next())
        .map(|entry| entry.event)
        .collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_cancel_is_idempotent() {
    let mut queue = EventQueue::new();
    let id = queue.schedule(Duration::from_secs(1), ());

    assert!(queue.is_pending(id));
    assert!(queue.cancel(id));
    assert!(!queue.cancel(id));
    assert!(queue.pop_next().is_none());
    assert!(queue.is_empty());
}

#[test]
fn test_cancel_after_fire_is_noop() {
    let mut queue = EventQueue::new();
    let id = queue.schedule(Duration::from_secs(1), 7);
    let fired = queue.pop_next().unwrap();

    assert_eq!(fired.id, id);
    assert_eq!(fired.event, 7);
    assert!(!queue.cancel(id));
}

#[test]
fn test_cancelled_entry_is_skipped() {
    let mut queue = EventQueue::new();
    let first = queue.schedule(Duration::from_secs(1), "first");
    queue.schedule(Duration::from_secs(2), "second");
    queue.cancel(first);

    assert_eq!(queue.next_expiry_time(), Some(Duration::from_secs(2)));
    assert_eq!(queue.pop_next().unwrap().event, "second");
}

#[test]
fn test_schedule_relative_to_current_time() {
    let mut queue = EventQueue::new();
    queue.schedule(Duration::from_secs(5), 1);
    queue.pop_next();

    queue.schedule(Duration::from_secs(1), 2);
    let entry = queue.pop_next().unwrap();
    assert_eq!(entry.expiry_time, Duration::from_secs(6));

    // Past requests are clamped to now.
    queue.schedule_at(Duration::from_secs(1), 3);
    assert_eq!(queue.pop_next().unwrap().expiry_time, Duration::from_secs(6));
}

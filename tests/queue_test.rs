/*!
 * Blocking Queue Tests
 * Tests for the bounded array queue and the delay queue
 */

use ai_os_sync::{ArrayBlockingQueue, DelayQueue, DelayedEntry, Fairness, QueueConfig, SyncError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rand::Rng;
use serial_test::serial;
use std::collections::VecDeque;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Array Blocking Queue
// ============================================================================

#[test]
fn test_capacity_three_blocks_fourth_put() {
    let queue = Arc::new(ArrayBlockingQueue::new(3, Fairness::NonFair).unwrap());
    queue.put(1).unwrap();
    queue.put(2).unwrap();
    queue.put(3).unwrap();

    let (tx, rx) = mpsc::channel();
    let queue_clone = queue.clone();
    let producer = thread::spawn(move || {
        queue_clone.put(4).unwrap();
        tx.send(()).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(queue.take().unwrap(), 1);
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    producer.join().unwrap();

    let drained: Vec<_> = (0..3).map(|_| queue.take().unwrap()).collect();
    assert_eq!(drained, vec![2, 3, 4]);
}

#[test]
fn test_queue_from_json_config() {
    let config: QueueConfig = serde_json::from_str(r#"{"capacity":2,"fairness":"fair"}"#).unwrap();
    let queue = ArrayBlockingQueue::from_config(config).unwrap();
    assert!(queue.is_fair());
    assert_eq!(queue.capacity(), 2);
    assert_eq!(queue.offer("a"), Ok(()));
    assert_eq!(queue.offer("b"), Ok(()));
    assert_eq!(queue.offer("c"), Err("c"));
}

#[test]
#[serial]
fn test_producers_and_consumers_preserve_per_producer_order() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 500;

    let queue = Arc::new(ArrayBlockingQueue::new(8, Fairness::Fair).unwrap());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for seq in 0..PER_PRODUCER {
                    queue.put((producer, seq)).unwrap();
                    if rng.gen_bool(0.05) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let mut last_seen = vec![None; PRODUCERS as usize];
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let (producer, seq) = queue.poll_timeout(Duration::from_secs(5)).unwrap().unwrap();
        let last = &mut last_seen[producer as usize];
        assert!(last.map_or(true, |prev| prev < seq));
        *last = Some(seq);
    }
    for producer in producers {
        producer.join().unwrap();
    }
    assert!(queue.is_empty());
}

#[test]
fn test_interrupted_put_leaves_queue_intact() {
    let queue = Arc::new(ArrayBlockingQueue::with_items(1, Fairness::NonFair, [7]).unwrap());
    let (tx, rx) = mpsc::channel();
    let queue_clone = queue.clone();
    let producer = thread::spawn(move || {
        tx.send(ai_os_sync::park::current()).unwrap();
        queue_clone.put(8)
    });

    let target = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(30));
    target.interrupt();
    assert_eq!(producer.join().unwrap(), Err(SyncError::Interrupted));
    assert_eq!(queue.to_vec(), vec![7]);
}

#[derive(Debug, Clone)]
enum Op {
    Put,
    Take,
    RemoveNth(usize),
    Advance,
    NewIterator,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Put),
        2 => Just(Op::Take),
        1 => (0usize..8).prop_map(Op::RemoveNth),
        3 => Just(Op::Advance),
        1 => Just(Op::NewIterator),
    ]
}

proptest! {
    /// The ring behaves like a bounded FIFO model, and every value an
    /// iterator yields is present, newer than the previous one, and not
    /// preceded by a present value it jumped over.
    #[test]
    fn prop_ring_and_iterator_consistency(
        capacity in 1usize..6,
        ops in proptest::collection::vec(arb_op(), 1..80),
    ) {
        let queue = ArrayBlockingQueue::new(capacity, Fairness::NonFair).unwrap();
        let mut model: VecDeque<u64> = VecDeque::new();
        let mut next_value = 0u64;
        let mut iter = queue.iter();
        let mut last_yielded: Option<u64> = None;

        for op in ops {
            match op {
                Op::Put => {
                    let accepted = queue.offer(next_value).is_ok();
                    prop_assert_eq!(accepted, model.len() < capacity);
                    if accepted {
                        model.push_back(next_value);
                    }
                    next_value += 1;
                }
                Op::Take => {
                    prop_assert_eq!(queue.poll(), model.pop_front());
                }
                Op::RemoveNth(n) => {
                    if let Some(&value) = model.get(n) {
                        prop_assert!(queue.remove(&value));
                        model.remove(n);
                    }
                }
                Op::Advance => {
                    if let Some(value) = iter.next() {
                        prop_assert!(model.contains(&value));
                        if let Some(prev) = last_yielded {
                            prop_assert!(prev < value);
                            prop_assert!(!model.iter().any(|&v| prev < v && v < value));
                        }
                        last_yielded = Some(value);
                    }
                }
                Op::NewIterator => {
                    iter = queue.iter();
                    last_yielded = None;
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert_eq!(queue.to_vec(), model.iter().copied().collect::<Vec<_>>());
        }
    }
}

// ============================================================================
// Delay Queue
// ============================================================================

#[test]
fn test_zero_delay_returned_by_next_poll() {
    let queue = DelayQueue::new();
    queue.offer(DelayedEntry::new("now", Duration::ZERO));
    assert_eq!(queue.poll().map(DelayedEntry::into_value), Some("now"));
}

#[test]
#[serial]
fn test_half_second_delay_is_honored() {
    let queue = Arc::new(DelayQueue::new());
    let start = Instant::now();
    queue.offer(DelayedEntry::new(42, Duration::from_millis(500)));

    assert!(queue.poll().is_none());
    thread::sleep(Duration::from_millis(100));
    assert!(queue.poll().is_none());

    let entry = queue.take().unwrap();
    let elapsed = start.elapsed();
    assert_eq!(*entry.value(), 42);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1_500));
}

#[test]
#[serial]
fn test_concurrent_takers_receive_in_deadline_order() {
    let queue = Arc::new(DelayQueue::<DelayedEntry<i32>>::new());
    let (tx, rx) = mpsc::channel();

    let takers: Vec<_> = (0..3)
        .map(|_| {
            let queue = queue.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let entry = queue.take().unwrap();
                tx.send(entry.into_value()).unwrap();
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    queue.offer(DelayedEntry::new(3, Duration::from_millis(150)));
    queue.offer(DelayedEntry::new(1, Duration::from_millis(50)));
    queue.offer(DelayedEntry::new(2, Duration::from_millis(100)));

    let order: Vec<_> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    for taker in takers {
        taker.join().unwrap();
    }
    assert_eq!(order, vec![1, 2, 3]);
    assert!(queue.is_empty());
}

#[test]
fn test_poll_timeout_returns_element_expiring_within_budget() {
    let queue = DelayQueue::new();
    queue.offer(DelayedEntry::new('x', Duration::from_millis(30)));
    assert!(queue.poll_timeout(Duration::from_millis(5)).unwrap().is_none());
    let entry = queue.poll_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(entry.map(DelayedEntry::into_value), Some('x'));
}

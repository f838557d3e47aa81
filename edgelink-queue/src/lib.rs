#[macro_use]
extern crate log;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// What happens when `push` would exceed the queue's configured bound.
///
/// `LeakNew` (the default) drops the item that just arrived; `LeakOld`
/// makes room by dropping the item at the head of the queue instead.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LeakPolicy {
    LeakNew,
    LeakOld,
}

impl Default for LeakPolicy {
    fn default() -> Self {
        LeakPolicy::LeakNew
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    max_len: usize,
    leaky: LeakPolicy,
}

/// A bounded, thread-safe FIFO used to buffer outgoing frames between a
/// producer thread and the thread that drains it.
///
/// One `Mutex` guards the deque, a `Condvar` wakes a blocked
/// `wait_pop`. `push` signals the condvar after inserting under the
/// lock; `wait_pop` waits on it from inside the same lock.
pub struct EdgeQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> EdgeQueue<T> {
    pub fn new() -> Self {
        EdgeQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                max_len: 0,
                leaky: LeakPolicy::default(),
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Sets the bound (`0` = unbounded) and leak policy applied on
    /// future pushes.
    pub fn set_limit(&self, max_len: usize, leaky: LeakPolicy) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.max_len = max_len;
        inner.leaky = leaky;
        while inner.max_len != 0 && inner.items.len() > inner.max_len {
            inner.items.pop_front();
        }
    }

    /// Pushes `item` onto the tail of the queue, applying the
    /// configured leak policy if the queue is already at capacity.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.max_len != 0 && inner.items.len() >= inner.max_len {
            match inner.leaky {
                LeakPolicy::LeakNew => {
                    trace!("queue at capacity, dropping arriving item");
                    return;
                }
                LeakPolicy::LeakOld => {
                    trace!("queue at capacity, dropping head item");
                    inner.items.pop_front();
                }
            }
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Non-blocking pop; returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.items.pop_front()
    }

    /// Blocks until an item is available or `timeout` elapses (`None`
    /// means wait indefinitely), using a monotonic deadline so spurious
    /// wakeups never extend the wait past the caller's budget.
    pub fn wait_pop(&self, timeout: Option<Duration>) -> Option<T> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            match deadline {
                None => {
                    inner = self.not_empty.wait(inner).expect("queue mutex poisoned");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, result) = self
                        .not_empty
                        .wait_timeout(inner, deadline - now)
                        .expect("queue mutex poisoned");
                    inner = guard;
                    if result.timed_out() && inner.items.is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    /// Drops every queued item and wakes any waiter (which will then
    /// observe an empty queue and, if waiting indefinitely, keep
    /// waiting for the next push).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.items.clear();
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").items.len()
    }

    /// The bound set by the most recent [`set_limit`] call (`0` = unbounded).
    pub fn max_len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").max_len
    }

    pub fn leak_policy(&self) -> LeakPolicy {
        self.inner.lock().expect("queue mutex poisoned").leaky
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EdgeQueue<T> {
    fn default() -> Self {
        EdgeQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = EdgeQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        let popped: Vec<_> = (0..5).map(|_| queue.pop().unwrap()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn leak_old_keeps_the_newest_items() {
        let queue = EdgeQueue::new();
        queue.set_limit(3, LeakPolicy::LeakOld);
        for i in 1..=5 {
            queue.push(i);
        }
        let remaining: Vec<_> = (0..3).map(|_| queue.pop().unwrap()).collect();
        assert_eq!(remaining, vec![3, 4, 5]);
    }

    #[test]
    fn leak_new_drops_the_arriving_item() {
        let queue = EdgeQueue::new();
        queue.set_limit(2, LeakPolicy::LeakNew);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn wait_pop_times_out_when_empty() {
        let queue: EdgeQueue<u8> = EdgeQueue::new();
        let start = Instant::now();
        let result = queue.wait_pop(Some(Duration::from_millis(50)));
        assert_eq!(result, None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wait_pop_wakes_on_push() {
        let queue = Arc::new(EdgeQueue::new());
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(99);
        });
        let result = queue.wait_pop(Some(Duration::from_secs(2)));
        handle.join().unwrap();
        assert_eq!(result, Some(99));
    }

    #[test]
    fn clear_drops_all_items() {
        let queue = EdgeQueue::new();
        queue.push(1);
        queue.push(2);
        queue.clear();
        assert!(queue.is_empty());
    }
}

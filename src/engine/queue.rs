//! Producer/consumer handoff between the receiver worker and the engine.
//!
//! A mutex-protected vector with a swap-based drain: the consumer trades
//! its empty scratch buffer for the filled one, so the lock is held for a
//! pointer swap rather than for the length of the work. Inputs pushed
//! concurrently with a drain land in the next drain.

use crate::codec::ClientInput;
use parking_lot::Mutex;

/// An input bound to the simulation tick it must be applied at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedInput {
    pub target_sim_tick: u64,
    pub input: ClientInput,
}

#[derive(Debug, Default)]
pub struct HandoffQueue {
    inner: Mutex<Vec<QueuedInput>>,
}

impl HandoffQueue {
    pub fn new() -> Self {
        HandoffQueue {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, queued: QueuedInput) {
        self.inner.lock().push(queued);
    }

    /// Swap the queue's contents into `out`. `out` must arrive empty; the
    /// vector handed over becomes the queue's next backing buffer, so
    /// capacity is recycled between the two sides.
    pub fn drain_into(&self, out: &mut Vec<QueuedInput>) {
        debug_assert!(out.is_empty(), "drain target must be cleared first");
        let mut guard = self.inner.lock();
        std::mem::swap(&mut *guard, out);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(target: u64, seq: u32) -> QueuedInput {
        QueuedInput {
            target_sim_tick: target,
            input: ClientInput {
                client_id: 0,
                client_tick: 0,
                client_seq: seq,
                buttons: 0,
                axis_x: 0.0,
                axis_y: 0.0,
            },
        }
    }

    #[test]
    fn test_drain_preserves_push_order() {
        let queue = HandoffQueue::new();
        for seq in 0..1000 {
            queue.push(queued(5, seq));
        }

        let mut out = Vec::new();
        queue.drain_into(&mut out);
        assert_eq!(out.len(), 1000);
        for (i, q) in out.iter().enumerate() {
            assert_eq!(q.input.client_seq, i as u32);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_empty_queue() {
        let queue = HandoffQueue::new();
        let mut out = Vec::new();
        queue.drain_into(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_buffer_recycled_between_drains() {
        let queue = HandoffQueue::new();
        queue.push(queued(1, 1));

        let mut out = Vec::with_capacity(64);
        queue.drain_into(&mut out);
        assert_eq!(out.len(), 1);
        out.clear();

        // The capacity we handed over backs the next round of pushes.
        queue.push(queued(2, 2));
        queue.drain_into(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target_sim_tick, 2);
    }

    #[test]
    fn test_concurrent_pushes_all_arrive() {
        use std::sync::Arc;

        let queue = Arc::new(HandoffQueue::new());
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for seq in 0..10_000 {
                    queue.push(queued(1, seq));
                }
            })
        };

        let mut out = Vec::new();
        let mut total = 0;
        while total < 10_000 {
            out.clear();
            queue.drain_into(&mut out);
            total += out.len();
        }
        producer.join().unwrap();
        assert_eq!(total, 10_000);
        assert!(queue.is_empty());
    }
}

// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded single-producer/single-consumer queue used for the per-Connection
//! and per-Service queues that live entirely on a worker's own thread.
//!
//! There is no real concurrency here — everything using this type runs on
//! one cooperative thread — so `offer` is simply a capacity-checked push.
//! The suspending `send` half of the source's `offer`/`send` distinction is
//! realized one layer up, in the connection state machine: a caller that
//! gets `Err(item)` back from `offer` is responsible for re-queuing its
//! Connection instead of dropping the item, which is what "suspend until
//! space exists" means on a cooperative scheduler with no OS thread to park.

use std::collections::VecDeque;

/// A fixed-capacity FIFO queue. `offer` never blocks; it fails loudly
/// (returning the rejected item) once the queue is full, so the caller can
/// apply backpressure instead of silently dropping work.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue that rejects pushes once it holds `capacity`
    /// items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Attempts to push `item` onto the back of the queue. Returns the item
    /// back to the caller if the queue is already at capacity.
    pub fn offer(&mut self, item: T) -> Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Pops the item at the front of the queue, if any.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Looks at the item at the front of the queue without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when the queue is at its configured capacity.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offer_rejects_once_at_capacity() {
        let mut q = BoundedQueue::new(2);
        assert_eq!(Ok(()), q.offer(1));
        assert_eq!(Ok(()), q.offer(2));
        assert_eq!(Err(3), q.offer(3));
        assert!(q.is_full());
    }

    #[test]
    fn pop_returns_items_in_fifo_order() {
        let mut q = BoundedQueue::new(4);
        q.offer(1).unwrap();
        q.offer(2).unwrap();
        assert_eq!(Some(1), q.pop());
        assert_eq!(Some(2), q.pop());
        assert_eq!(None, q.pop());
    }

    #[test]
    fn offer_succeeds_again_after_pop_frees_space() {
        let mut q = BoundedQueue::new(1);
        q.offer(1).unwrap();
        assert_eq!(Err(2), q.offer(2));
        q.pop();
        assert_eq!(Ok(()), q.offer(2));
    }
}

//! Access pattern detection and prefetching.
//!
//! `record_access` pushes onto a lock-free queue; the prefetch maintenance
//! tick drains it into the [`PrefetchEngine`] and the cache-region pattern
//! trackers.

pub(crate) mod engine;
pub(crate) mod hardware;
pub(crate) mod pattern;

use crossbeam_queue::SegQueue;

pub use engine::{HotSpot, PrefetchEngine, PrefetchHint, TickReport};
pub use hardware::Locality;
pub use pattern::AccessPattern;

/// Lock-free handoff of access events to the prefetch tick.
#[derive(Default)]
pub struct AccessQueue {
    events: SegQueue<usize>,
}

impl AccessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an access. Never blocks.
    pub fn push(&self, addr: usize) {
        self.events.push(addr);
    }

    /// Take every queued access, oldest first.
    pub fn drain(&self) -> Vec<usize> {
        let mut drained = Vec::with_capacity(self.events.len());
        while let Some(addr) = self.events.pop() {
            drained.push(addr);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queue_drains_across_threads() {
        let queue = Arc::new(AccessQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        assert_eq!(queue.drain().len(), 400);
        assert!(queue.is_empty());
    }
}

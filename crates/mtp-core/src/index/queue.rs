//! Crawl job priority queue (spec §4.8): keyed by `(priority desc,
//! enqueue-order asc)`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

/// Declared in ascending urgency so the derived `Ord` sorts `Immediate`
/// highest, matching "higher priority runs first" (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CrawlPriority {
    Background,
    Foreground,
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub id: u64,
    pub device_id: String,
    pub storage_id: u32,
    pub parent_handle: Option<u32>,
    pub priority: CrawlPriority,
}

impl Ord for CrawlJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; among equal priorities, lower id wins ties
        // (spec §3 `CrawlJob`), so we reverse the id comparison to make the
        // smaller id sort as "greater" for `BinaryHeap`'s max-heap pop order.
        self.priority.cmp(&other.priority).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for CrawlJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending folder enumerations (spec §4.8).
#[derive(Default)]
pub struct CrawlQueue {
    heap: Mutex<BinaryHeap<CrawlJob>>,
    next_id: AtomicU64,
}

impl CrawlQueue {
    pub fn new() -> Self {
        Self { heap: Mutex::new(BinaryHeap::new()), next_id: AtomicU64::new(1) }
    }

    /// Enqueues a job. An `Immediate` job for a `(device, storage, parent)`
    /// tuple already queued is boosted in place rather than duplicated
    /// ("boost-if-present else enqueue at head", spec §4.8).
    pub fn enqueue(&self, device_id: String, storage_id: u32, parent_handle: Option<u32>, priority: CrawlPriority) -> u64 {
        let mut heap = self.heap.lock().unwrap();
        if priority == CrawlPriority::Immediate {
            let mut items: Vec<CrawlJob> = std::mem::take(&mut *heap).into_vec();
            if let Some(existing) = items
                .iter_mut()
                .find(|j| j.device_id == device_id && j.storage_id == storage_id && j.parent_handle == parent_handle)
            {
                existing.priority = CrawlPriority::Immediate;
                let id = existing.id;
                *heap = items.into_iter().collect();
                return id;
            }
            *heap = items.into_iter().collect();
        }
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        heap.push(CrawlJob { id, device_id, storage_id, parent_handle, priority });
        id
    }

    pub fn dequeue(&self) -> Option<CrawlJob> {
        self.heap.lock().unwrap().pop()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_dequeues_first() {
        let q = CrawlQueue::new();
        q.enqueue("d".to_string(), 1, None, CrawlPriority::Background);
        q.enqueue("d".to_string(), 1, Some(2), CrawlPriority::Immediate);
        q.enqueue("d".to_string(), 1, Some(3), CrawlPriority::Foreground);
        assert_eq!(q.dequeue().unwrap().priority, CrawlPriority::Immediate);
        assert_eq!(q.dequeue().unwrap().priority, CrawlPriority::Foreground);
        assert_eq!(q.dequeue().unwrap().priority, CrawlPriority::Background);
    }

    #[test]
    fn equal_priority_ties_break_by_lower_id_first() {
        let q = CrawlQueue::new();
        let first = q.enqueue("d".to_string(), 1, Some(1), CrawlPriority::Background);
        let second = q.enqueue("d".to_string(), 1, Some(2), CrawlPriority::Background);
        assert_eq!(q.dequeue().unwrap().id, first);
        assert_eq!(q.dequeue().unwrap().id, second);
    }

    #[test]
    fn immediate_enqueue_boosts_an_existing_job_instead_of_duplicating() {
        let q = CrawlQueue::new();
        q.enqueue("d".to_string(), 1, Some(9), CrawlPriority::Background);
        q.enqueue("d".to_string(), 1, Some(9), CrawlPriority::Immediate);
        assert_eq!(q.len(), 1);
        assert_eq!(q.dequeue().unwrap().priority, CrawlPriority::Immediate);
    }
}

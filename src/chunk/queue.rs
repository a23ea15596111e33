//! Closest-first backlog of chunk requests.
//!
//! Entries are ordered by ascending priority (squared grid distance to the
//! observer) and, among equal priorities, by insertion order. A key is held
//! at most once; enqueueing it again either does nothing (same resolution and
//! priority) or replaces the old entry, which moves it behind its new peers.
use super::tracker::Blacklist;
use super::ChunkKey;
use std::collections::{BTreeMap, HashMap};

/// A pending request as handed to the concurrency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: ChunkKey,
    pub resolution: u32,
    pub priority: u64,
}

/// What [`RequestQueue::enqueue`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Inserted,
    Replaced,
    Unchanged,
    Rejected,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    resolution: u32,
    priority: u64,
    seq: u64,
}

/// Priority queue keyed by chunk. `order` drives dequeueing; `slots` gives
/// O(1) membership and lets an entry be found for replacement.
#[derive(Debug, Default)]
pub struct RequestQueue {
    order: BTreeMap<(u64, u64), ChunkKey>,
    slots: HashMap<ChunkKey, Slot>,
    next_seq: u64,
}

impl RequestQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update the request for `key`.
    ///
    /// Blacklisted keys are never accepted. A request identical to the one
    /// already queued is a no-op so per-tick re-enqueueing keeps its place.
    pub fn enqueue(&mut self, blacklist: &Blacklist, key: ChunkKey, resolution: u32, priority: u64) -> Enqueue {
        if blacklist.contains(key) {
            return Enqueue::Rejected;
        }
        let outcome = match self.slots.get(&key) {
            Some(slot) if slot.resolution == resolution && slot.priority == priority => return Enqueue::Unchanged,
            Some(slot) => {
                self.order.remove(&(slot.priority, slot.seq));
                Enqueue::Replaced
            }
            None => Enqueue::Inserted,
        };
        self.push(QueueEntry { key, resolution, priority });
        outcome
    }

    /// Pop the closest request, oldest first among ties.
    pub fn dequeue_next(&mut self) -> Option<QueueEntry> {
        let ((priority, _), key) = self.order.pop_first()?;
        let slot = self.slots.remove(&key)?;
        Some(QueueEntry { key, resolution: slot.resolution, priority })
    }

    /// Put a dequeued entry back behind every queued entry of equal priority.
    /// It is not promoted ahead of anything it was behind before.
    pub fn requeue_to_tail(&mut self, entry: QueueEntry) {
        if let Some(slot) = self.slots.remove(&entry.key) {
            self.order.remove(&(slot.priority, slot.seq));
        }
        self.push(entry);
    }

    /// Drop the request for `key`, returning it if one was queued.
    pub fn remove(&mut self, key: ChunkKey) -> Option<QueueEntry> {
        let slot = self.slots.remove(&key)?;
        self.order.remove(&(slot.priority, slot.seq));
        Some(QueueEntry { key, resolution: slot.resolution, priority: slot.priority })
    }

    /// Keep only the requests whose key satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(ChunkKey) -> bool) {
        let slots = &mut self.slots;
        self.order.retain(|_, key| {
            let kept = keep(*key);
            if !kept {
                slots.remove(&*key);
            }
            kept
        });
    }

    #[must_use]
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Resolution currently requested for `key`, if queued.
    #[must_use]
    pub fn queued_resolution(&self, key: ChunkKey) -> Option<u32> {
        self.slots.get(&key).map(|slot| slot.resolution)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.slots.clear();
    }

    fn push(&mut self, entry: QueueEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert((entry.priority, seq), entry.key);
        self.slots.insert(entry.key, Slot { resolution: entry.resolution, priority: entry.priority, seq });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut RequestQueue) -> Vec<(ChunkKey, u32, u64)> {
        std::iter::from_fn(|| queue.dequeue_next())
            .map(|e| (e.key, e.resolution, e.priority))
            .collect()
    }

    #[test]
    fn dequeues_in_ascending_priority_regardless_of_insert_order() {
        let blacklist = Blacklist::default();
        let mut queue = RequestQueue::new();
        queue.enqueue(&blacklist, ChunkKey::new(3, 0), 9, 9);
        queue.enqueue(&blacklist, ChunkKey::new(1, 0), 9, 1);
        queue.enqueue(&blacklist, ChunkKey::new(2, 0), 9, 4);

        let order: Vec<u64> = drain(&mut queue).into_iter().map(|(_, _, p)| p).collect();
        assert_eq!(order, vec![1, 4, 9]);
    }

    #[test]
    fn ties_are_first_in_first_out() {
        let blacklist = Blacklist::default();
        let mut queue = RequestQueue::new();
        for x in [5, -2, 7] {
            queue.enqueue(&blacklist, ChunkKey::new(x, 1), 17, 2);
        }
        let keys: Vec<i32> = drain(&mut queue).into_iter().map(|(k, _, _)| k.x).collect();
        assert_eq!(keys, vec![5, -2, 7]);
    }

    #[test]
    fn identical_request_is_a_no_op_and_keeps_its_place() {
        let blacklist = Blacklist::default();
        let mut queue = RequestQueue::new();
        let a = ChunkKey::new(0, 1);
        let b = ChunkKey::new(1, 0);
        assert_eq!(queue.enqueue(&blacklist, a, 33, 1), Enqueue::Inserted);
        queue.enqueue(&blacklist, b, 33, 1);
        assert_eq!(queue.enqueue(&blacklist, a, 33, 1), Enqueue::Unchanged);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue_next().map(|e| e.key), Some(a));
    }

    #[test]
    fn changed_request_replaces_the_entry() {
        let blacklist = Blacklist::default();
        let mut queue = RequestQueue::new();
        let key = ChunkKey::new(4, 4);
        queue.enqueue(&blacklist, key, 9, 32);
        assert_eq!(queue.enqueue(&blacklist, key, 17, 8), Enqueue::Replaced);
        assert_eq!(queue.len(), 1);
        assert_eq!(drain(&mut queue), vec![(key, 17, 8)]);
    }

    #[test]
    fn blacklisted_keys_are_rejected() {
        let mut blacklist = Blacklist::default();
        let key = ChunkKey::new(0, 0);
        blacklist.insert(key);
        let mut queue = RequestQueue::new();
        assert_eq!(queue.enqueue(&blacklist, key, 65, 0), Enqueue::Rejected);
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_goes_behind_equal_priorities() {
        let blacklist = Blacklist::default();
        let mut queue = RequestQueue::new();
        let a = ChunkKey::new(1, 0);
        let b = ChunkKey::new(0, 1);
        queue.enqueue(&blacklist, a, 9, 1);
        queue.enqueue(&blacklist, b, 9, 1);
        let first = queue.dequeue_next().expect("entry");
        queue.requeue_to_tail(first);
        let keys: Vec<ChunkKey> = drain(&mut queue).into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(keys, vec![b, a]);
    }

    #[test]
    fn retain_and_remove_keep_both_indexes_in_sync() {
        let blacklist = Blacklist::default();
        let mut queue = RequestQueue::new();
        for x in 0..5 {
            queue.enqueue(&blacklist, ChunkKey::new(x, 0), 9, x as u64);
        }
        queue.retain(|k| k.x % 2 == 0);
        assert_eq!(queue.remove(ChunkKey::new(2, 0)).map(|e| e.priority), Some(2));
        assert!(!queue.contains(ChunkKey::new(1, 0)));
        let keys: Vec<i32> = drain(&mut queue).into_iter().map(|(k, _, _)| k.x).collect();
        assert_eq!(keys, vec![0, 4]);
    }
}

//! Concurrency budget for chunk fetches.
//!
//! The gate counts in-flight fetches against `max_concurrent_fetches` and
//! drains the request queue into new fetches while there is room. It is the
//! only place that starts fetches, so the budget can never be exceeded.

use super::queue::{QueueEntry, RequestQueue};
use super::tracker::{Admission, ChunkTracker};
use crate::fetch::FetchClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyGate {
    budget: usize,
    in_flight: usize,
}

impl ConcurrencyGate {
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self { budget, in_flight: 0 }
    }

    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.budget
    }

    /// Fetches over the budget, e.g. right after the budget was lowered.
    #[must_use]
    pub fn excess(&self) -> usize {
        self.in_flight.saturating_sub(self.budget)
    }

    /// Change the budget. Fetches already running are not touched.
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    fn admit(&mut self) {
        self.in_flight += 1;
    }

    /// Return one slot. Releasing an empty gate is a no-op.
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

/// Start queued fetches, closest first, until the budget is used up or the
/// queue runs dry. Returns the entries that were started.
///
/// Entries that turn out blacklisted or already satisfied are dropped
/// without using budget. An entry whose wait has not run out goes back to
/// the tail and stops this round, so a cooling-down chunk cannot be skipped
/// over and starved. An entry for a chunk in flight at another resolution
/// cancels that fetch first.
pub fn try_admit_next<C, R>(
    gate: &mut ConcurrencyGate,
    queue: &mut RequestQueue,
    tracker: &mut ChunkTracker<C::Pending, R>,
    client: &C,
    now: f64,
) -> Vec<QueueEntry>
where
    C: FetchClient,
{
    let mut started = Vec::new();
    while gate.has_capacity() {
        let Some(entry) = queue.dequeue_next() else { break };
        match tracker.admission(entry.key, entry.resolution, now) {
            Admission::Blacklisted | Admission::AlreadySatisfied => continue,
            Admission::Defer => {
                queue.requeue_to_tail(entry);
                break;
            }
            Admission::Supersede => {
                if tracker.cancel(entry.key).is_some() {
                    gate.release();
                }
            }
            Admission::Start => {}
        }
        let pending = client.fetch(entry.key, entry.resolution);
        tracker.begin_fetch(entry.key, entry.resolution, pending);
        gate.admit();
        started.push(entry);
    }
    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::testing::{FakeMesh, ScriptedClient, ScriptedFetch};
    use crate::chunk::ChunkKey;

    type Tracker = ChunkTracker<ScriptedFetch, FakeMesh>;

    fn queue_with(tracker: &Tracker, entries: &[(i32, u32, u64)]) -> RequestQueue {
        let mut queue = RequestQueue::new();
        for &(x, resolution, priority) in entries {
            queue.enqueue(tracker.blacklist(), ChunkKey::new(x, 0), resolution, priority);
        }
        queue
    }

    #[test]
    fn release_saturates_at_zero() {
        let mut gate = ConcurrencyGate::new(2);
        gate.release();
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.has_capacity());
    }

    #[test]
    fn admits_closest_first_up_to_budget() {
        let client = ScriptedClient::default();
        let mut tracker = Tracker::new();
        let mut queue = queue_with(&tracker, &[(3, 9, 9), (1, 9, 1), (2, 9, 4)]);
        let mut gate = ConcurrencyGate::new(2);

        let started = try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 0.0);
        let xs: Vec<i32> = started.iter().map(|e| e.key.x).collect();
        assert_eq!(xs, vec![1, 2]);
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(queue.len(), 1);

        assert!(try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 0.0).is_empty());
        assert_eq!(client.fetches().len(), 2);
    }

    #[test]
    fn satisfied_entries_cost_nothing() {
        let client = ScriptedClient::default();
        let mut tracker = Tracker::new();
        let busy = ChunkKey::new(0, 0);
        tracker.begin_fetch(busy, 9, client.fetch(busy, 9));
        let mut gate = ConcurrencyGate::new(2);
        gate.admit();

        let mut queue = queue_with(&tracker, &[(0, 9, 0), (1, 9, 1)]);
        let started = try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 0.0);
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].key, ChunkKey::new(1, 0));
        assert_eq!(client.fetch_count(busy), 1);
    }

    #[test]
    fn deferred_entry_goes_back_and_stops_the_round() {
        use crate::chunk::testing::{FakeBuilder, FakeDecoder};
        use crate::chunk::StreamingConfig;
        use crate::fetch::FetchOutcome;

        let client = ScriptedClient::default();
        let mut builder = FakeBuilder::default();
        let mut tracker = Tracker::new();
        let waiting = ChunkKey::new(0, 0);
        tracker.begin_fetch(waiting, 9, client.fetch(waiting, 9));
        tracker.complete(waiting, 9, FetchOutcome::NotReady, 0.0, &StreamingConfig::default(), &FakeDecoder, &mut builder);

        let mut queue = queue_with(&tracker, &[(0, 9, 0), (1, 9, 1)]);
        let mut gate = ConcurrencyGate::new(4);
        assert!(try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 0.5).is_empty());
        assert_eq!(queue.len(), 2);

        let started = try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 1.0);
        assert_eq!(started.len(), 2);
    }

    #[test]
    fn superseding_a_resolution_keeps_the_count_stable() {
        let client = ScriptedClient::default();
        let mut tracker = Tracker::new();
        let key = ChunkKey::new(0, 0);
        let mut gate = ConcurrencyGate::new(1);
        let mut queue = queue_with(&tracker, &[(0, 9, 0)]);
        try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 0.0);

        // At capacity: the finer request waits until a slot frees up.
        queue.enqueue(tracker.blacklist(), key, 17, 0);
        assert!(try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 0.0).is_empty());

        gate.set_budget(2);
        try_admit_next(&mut gate, &mut queue, &mut tracker, &client, 0.0);
        assert!(client.was_cancelled(key, 9));
        assert_eq!(client.live(), vec![(key, 17)]);
        assert_eq!(gate.in_flight(), 1);
    }
}

//! Due-time ordered fetch schedule

use crate::models::{ContentSource, FetchHistory};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Notify;

/// A source waiting for its next fetch
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub source: ContentSource,
    pub last_fetch: Option<FetchHistory>,
}

impl ScheduleEntry {
    pub fn new(source: ContentSource, last_fetch: Option<FetchHistory>) -> Self {
        Self { source, last_fetch }
    }

    /// Last fetch time plus the fetch interval; `None` for a source never fetched
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_fetch.as_ref()?;
        let interval = chrono::Duration::from_std(self.source.fetch_interval())
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Some(last.fetched_at.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Time left until the entry is due, zero when it already is
    pub fn wait_from(&self, now: DateTime<Utc>) -> Duration {
        match self.due_at() {
            Some(due) => (due - now).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }

    fn sort_key(&self) -> (i64, u64, i64) {
        let due = self.due_at().map_or(i64::MIN, |due| due.timestamp_millis());
        (due, self.source.fetch_interval_secs, self.source.id)
    }
}

impl PartialEq for ScheduleEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for ScheduleEntry {}

impl PartialOrd for ScheduleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Earlier due time first, then the shorter interval, then the lower source id
impl Ord for ScheduleEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

enum Next {
    Due(ScheduleEntry),
    Wait(Duration),
    Empty,
}

/// Min-heap of schedule entries with a wakeable deadline
///
/// A waiter sleeps until the earliest due time, but every insert wakes it so
/// an entry due earlier than the current head takes over.
#[derive(Default)]
pub struct FetchSchedule {
    heap: Mutex<BinaryHeap<Reverse<ScheduleEntry>>>,
    changed: Notify,
}

impl FetchSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: ScheduleEntry) {
        self.heap.lock().push(Reverse(entry));
        self.changed.notify_one();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Due time of the head entry; `Some(None)` when it is due immediately
    pub fn next_due_at(&self) -> Option<Option<DateTime<Utc>>> {
        self.heap.lock().peek().map(|Reverse(entry)| entry.due_at())
    }

    /// Pop the head entry if it is due at `now`
    pub fn pop_due(&self, now: DateTime<Utc>) -> Option<ScheduleEntry> {
        match self.poll(now) {
            Next::Due(entry) => Some(entry),
            Next::Wait(_) | Next::Empty => None,
        }
    }

    /// All entries in fetch order
    pub fn snapshot(&self) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> = self
            .heap
            .lock()
            .iter()
            .map(|Reverse(entry)| entry.clone())
            .collect();
        entries.sort();
        entries
    }

    /// Wait for the next due entry and remove it from the schedule
    pub async fn next_due(&self) -> ScheduleEntry {
        loop {
            let changed = self.changed.notified();
            match self.poll(Utc::now()) {
                Next::Due(entry) => return entry,
                Next::Empty => changed.await,
                Next::Wait(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = changed => {}
                    }
                }
            }
        }
    }

    fn poll(&self, now: DateTime<Utc>) -> Next {
        let mut heap = self.heap.lock();
        let wait = match heap.peek() {
            None => return Next::Empty,
            Some(Reverse(head)) => head.wait_from(now),
        };
        if !wait.is_zero() {
            return Next::Wait(wait);
        }
        match heap.pop() {
            Some(Reverse(entry)) => Next::Due(entry),
            None => Next::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn source(id: i64, name: &str, interval_secs: u64) -> ContentSource {
        ContentSource {
            id,
            name: name.to_string(),
            source_type: SourceType::JsonFeed,
            url: format!("http://localhost/{name}"),
            category_id: 1,
            locale: None,
            fetch_interval_secs: interval_secs,
            enabled: true,
        }
    }

    #[test]
    fn test_never_fetched_first_then_earliest_due() {
        let now = Utc::now();
        let schedule = FetchSchedule::new();

        let b = ScheduleEntry::new(
            source(2, "b", 60),
            Some(FetchHistory::new(2, now - chrono::Duration::seconds(2), true)),
        );
        let c = ScheduleEntry::new(
            source(3, "c", 60),
            Some(FetchHistory::new(3, now - chrono::Duration::milliseconds(3001), true)),
        );
        let a = ScheduleEntry::new(source(1, "a", 300), None);

        schedule.insert(b);
        schedule.insert(c);
        schedule.insert(a);

        let order: Vec<String> = schedule
            .snapshot()
            .into_iter()
            .map(|entry| entry.source.name)
            .collect();
        assert_eq!(order, vec!["a", "c", "b"]);

        // only the never-fetched source is due right now
        assert_eq!(schedule.pop_due(now).unwrap().source.name, "a");
        assert!(schedule.pop_due(now).is_none());

        let later = now + chrono::Duration::seconds(120);
        assert_eq!(schedule.pop_due(later).unwrap().source.name, "c");
        assert_eq!(schedule.pop_due(later).unwrap().source.name, "b");
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_equal_due_time_prefers_shorter_interval() {
        let fetched = Utc::now() - chrono::Duration::hours(1);
        let schedule = FetchSchedule::new();
        schedule.insert(ScheduleEntry::new(
            source(1, "slow", 600),
            Some(FetchHistory::new(1, fetched - chrono::Duration::seconds(540), true)),
        ));
        schedule.insert(ScheduleEntry::new(
            source(2, "fast", 60),
            Some(FetchHistory::new(2, fetched, true)),
        ));

        let first = schedule.snapshot().remove(0);
        assert_eq!(first.source.name, "fast");
    }

    #[tokio::test]
    async fn test_insert_preempts_waiting() {
        let schedule = std::sync::Arc::new(FetchSchedule::new());
        schedule.insert(ScheduleEntry::new(
            source(1, "hourly", 3600),
            Some(FetchHistory::new(1, Utc::now(), true)),
        ));

        let waiter = {
            let schedule = schedule.clone();
            tokio::spawn(async move { schedule.next_due().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        schedule.insert(ScheduleEntry::new(source(2, "new", 60), None));

        let entry = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
        assert_eq!(entry.source.name, "new");
        assert_eq!(schedule.len(), 1);
    }
}

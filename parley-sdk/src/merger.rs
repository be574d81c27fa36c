//! Merges history snapshots with the live stream into one feed.
//!
//! A snapshot replaces the feed wholesale. Live entries are appended at the
//! tail unless their [`SequenceKey`] is already present, which makes
//! re-delivery after a reconnect harmless. While a snapshot fetch is in
//! flight, live entries are held back and replayed once it lands.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use crate::feed::{FeedEntry, SequenceKey};

/// Immutable view of the feed at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedView(Arc<Vec<FeedEntry>>);

impl Deref for FeedView {
    type Target = [FeedEntry];

    fn deref(&self) -> &[FeedEntry] {
        &self.0
    }
}

/// What happened to the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedNotification {
    /// The feed was replaced by a snapshot.
    Reset(FeedView),
    /// The feed grew by these entries, in order.
    EntriesAppended(Vec<FeedEntry>),
}

#[derive(Debug, Default)]
pub struct MessageStreamMerger {
    entries: Arc<Vec<FeedEntry>>,
    keys: HashSet<SequenceKey>,
    snapshot_pending: bool,
    held: Vec<FeedEntry>,
    notifications: Vec<FeedNotification>,
}

impl MessageStreamMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a history fetch as started. Live entries are held until
    /// [`replace_snapshot`](Self::replace_snapshot) or
    /// [`abort_snapshot`](Self::abort_snapshot).
    pub fn begin_snapshot(&mut self) {
        self.snapshot_pending = true;
    }

    pub fn snapshot_pending(&self) -> bool {
        self.snapshot_pending
    }

    /// Replace the feed with `snapshot`, then replay held live entries.
    ///
    /// Duplicate keys inside the snapshot collapse to the later entry.
    pub fn replace_snapshot(&mut self, snapshot: Vec<FeedEntry>) {
        let mut keys = HashSet::with_capacity(snapshot.len());
        let mut kept: Vec<FeedEntry> = snapshot
            .into_iter()
            .rev()
            .filter(|e| keys.insert(e.key()))
            .collect();
        kept.reverse();

        tracing::debug!(entries = kept.len(), "feed replaced by snapshot");
        self.entries = Arc::new(kept);
        self.keys = keys;
        self.snapshot_pending = false;
        let view = self.current_feed();
        self.notifications.push(FeedNotification::Reset(view));
        self.replay_held();
    }

    /// Give up on the pending snapshot and replay held entries as live.
    pub fn abort_snapshot(&mut self) {
        if self.snapshot_pending {
            self.snapshot_pending = false;
            self.replay_held();
        }
    }

    /// Offer one live entry. Returns `true` if it was appended now; `false`
    /// if it was a duplicate or is being held for a pending snapshot.
    pub fn append_live(&mut self, entry: FeedEntry) -> bool {
        if self.snapshot_pending {
            self.held.push(entry);
            return false;
        }
        match self.push_tail(entry) {
            Some(e) => {
                self.notifications.push(FeedNotification::EntriesAppended(vec![e]));
                true
            }
            None => false,
        }
    }

    pub fn current_feed(&self) -> FeedView {
        FeedView(Arc::clone(&self.entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take the notifications produced since the last call, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<FeedNotification> {
        std::mem::take(&mut self.notifications)
    }

    fn replay_held(&mut self) {
        let held = std::mem::take(&mut self.held);
        let appended: Vec<FeedEntry> = held.into_iter().filter_map(|e| self.push_tail(e)).collect();
        if !appended.is_empty() {
            tracing::debug!(entries = appended.len(), "replayed held live entries");
            self.notifications.push(FeedNotification::EntriesAppended(appended));
        }
    }

    fn push_tail(&mut self, entry: FeedEntry) -> Option<FeedEntry> {
        if !self.keys.insert(entry.key()) {
            tracing::debug!(key = ?entry.key(), "dropping re-delivered entry");
            return None;
        }
        if let Some(last) = self.entries.last()
            && entry.timestamp < last.timestamp
        {
            tracing::debug!(key = ?entry.key(), "live entry older than feed tail");
        }
        Arc::make_mut(&mut self.entries).push(entry.clone());
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parse_timestamp;

    fn entry(user: &str, text: &str, secs: u32) -> FeedEntry {
        let json = format!(
            r#"{{"type":"chat","user":"{user}","text":"{text}","ts":"2024-05-01T12:00:{secs:02}"}}"#
        );
        FeedEntry::parse(&json, parse_timestamp("2024-05-01T00:00:00Z").unwrap()).unwrap()
    }

    fn texts(view: &FeedView) -> Vec<&str> {
        view.iter().map(|e| e.text.as_deref().unwrap_or("")).collect()
    }

    #[test]
    fn snapshot_then_redelivery_is_idempotent() {
        let s = vec![entry("a", "one", 1), entry("b", "two", 2), entry("a", "three", 3)];
        let mut m = MessageStreamMerger::new();
        m.replace_snapshot(s.clone());
        for e in s.clone() {
            assert!(!m.append_live(e));
        }
        assert_eq!(&*m.current_feed(), s.as_slice());
    }

    #[test]
    fn resume_snapshot_absorbs_earlier_live_entries() {
        let a = entry("x", "a", 1);
        let b = entry("y", "b", 2);
        let c = entry("x", "c", 3);
        let d = entry("z", "d", 4);
        let mut m = MessageStreamMerger::new();
        m.replace_snapshot(vec![a.clone(), b.clone()]);
        assert!(m.append_live(c.clone()));
        m.replace_snapshot(vec![a, b, c.clone(), d.clone()]);
        assert_eq!(texts(&m.current_feed()), ["a", "b", "c", "d"]);

        // A late re-delivery of c or d changes nothing.
        assert!(!m.append_live(c));
        assert!(!m.append_live(d));
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn later_snapshot_duplicate_wins() {
        let mut m = MessageStreamMerger::new();
        let a = entry("x", "a", 1);
        m.replace_snapshot(vec![a.clone(), entry("y", "b", 2), a]);
        assert_eq!(texts(&m.current_feed()), ["b", "a"]);
    }

    #[test]
    fn live_entries_during_fetch_are_held_then_replayed() {
        let mut m = MessageStreamMerger::new();
        m.begin_snapshot();
        assert!(!m.append_live(entry("x", "b", 2)));
        assert!(!m.append_live(entry("x", "c", 3)));
        assert!(m.is_empty());

        m.replace_snapshot(vec![entry("x", "a", 1), entry("x", "b", 2)]);
        assert_eq!(texts(&m.current_feed()), ["a", "b", "c"]);

        let n = m.drain_notifications();
        assert_eq!(n.len(), 2);
        assert!(matches!(&n[0], FeedNotification::Reset(v) if v.len() == 2));
        assert!(matches!(&n[1], FeedNotification::EntriesAppended(es) if es.len() == 1 && es[0].text.as_deref() == Some("c")));
        assert!(m.drain_notifications().is_empty());
    }

    #[test]
    fn aborted_fetch_replays_held_entries() {
        let mut m = MessageStreamMerger::new();
        m.replace_snapshot(vec![entry("x", "a", 1)]);
        m.drain_notifications();
        m.begin_snapshot();
        m.append_live(entry("x", "b", 2));
        m.abort_snapshot();
        assert!(!m.snapshot_pending());
        assert_eq!(texts(&m.current_feed()), ["a", "b"]);
        assert!(matches!(
            m.drain_notifications().as_slice(),
            [FeedNotification::EntriesAppended(es)] if es.len() == 1
        ));
    }

    #[test]
    fn views_are_unaffected_by_later_appends() {
        let mut m = MessageStreamMerger::new();
        m.append_live(entry("x", "a", 1));
        let before = m.current_feed();
        m.append_live(entry("x", "b", 2));
        assert_eq!(before.len(), 1);
        assert_eq!(m.current_feed().len(), 2);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut m = MessageStreamMerger::new();
        m.append_live(entry("x", "first", 5));
        m.append_live(entry("y", "second", 5));
        m.append_live(entry("z", "third", 5));
        assert_eq!(texts(&m.current_feed()), ["first", "second", "third"]);
    }
}

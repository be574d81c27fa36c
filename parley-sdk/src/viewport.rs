//! Whether a view of the feed should follow new entries.

use crate::feed::FeedEntry;
use crate::merger::FeedNotification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Reset,
    EntriesAppended,
}

impl From<&FeedNotification> for NotificationKind {
    fn from(n: &FeedNotification) -> Self {
        match n {
            FeedNotification::Reset(_) => NotificationKind::Reset,
            FeedNotification::EntriesAppended(_) => NotificationKind::EntriesAppended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportDecision {
    /// Move the view to the newest entry.
    AutoAdvance,
    /// Keep the view where it is and flag that new content arrived.
    ShowIndicator,
    NoOp,
}

/// A reset always advances. Appended entries advance when the viewer is near
/// the bottom or wrote one of them; otherwise the indicator is raised.
pub fn decide(
    kind: NotificationKind,
    any_self_authored: bool,
    viewer_near_bottom: bool,
) -> ViewportDecision {
    match kind {
        NotificationKind::Reset => ViewportDecision::AutoAdvance,
        NotificationKind::EntriesAppended if viewer_near_bottom || any_self_authored => {
            ViewportDecision::AutoAdvance
        }
        NotificationKind::EntriesAppended => ViewportDecision::ShowIndicator,
    }
}

/// Applies [`decide`] to a notification for the local `username`. An
/// append of nothing is a no-op.
pub fn decide_for(
    notification: &FeedNotification,
    username: &str,
    viewer_near_bottom: bool,
) -> ViewportDecision {
    let self_authored = match notification {
        FeedNotification::EntriesAppended(entries) if entries.is_empty() => {
            return ViewportDecision::NoOp;
        }
        FeedNotification::EntriesAppended(entries) => {
            entries.iter().any(|e: &FeedEntry| e.is_authored_by(username))
        }
        FeedNotification::Reset(_) => false,
    };
    decide(notification.into(), self_authored, viewer_near_bottom)
}

/// Tracks the "new content" indicator for one view.
///
/// Once raised, the indicator stays up until [`acknowledge`](Self::acknowledge)
/// is called; new arrivals never clear it.
#[derive(Debug, Default)]
pub struct ViewportFollower {
    indicator: bool,
    unseen: usize,
}

impl ViewportFollower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        notification: &FeedNotification,
        username: &str,
        viewer_near_bottom: bool,
    ) -> ViewportDecision {
        let decision = decide_for(notification, username, viewer_near_bottom);
        if decision == ViewportDecision::ShowIndicator {
            self.indicator = true;
            if let FeedNotification::EntriesAppended(entries) = notification {
                self.unseen += entries.len();
            }
        }
        decision
    }

    pub fn indicator_shown(&self) -> bool {
        self.indicator
    }

    /// Entries that arrived while the indicator was up.
    pub fn unseen(&self) -> usize {
        self.unseen
    }

    /// The viewer caught up; go back to following.
    pub fn acknowledge(&mut self) {
        self.indicator = false;
        self.unseen = 0;
    }
}

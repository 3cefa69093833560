//! Events describe what a service did, so an editor can redraw, move carets and show remote
//! cursors. They're queued per subscriber and drained with [`Subscription::consume`].

use std::fmt::{Debug, Formatter};
use std::mem;
use std::sync::{Arc, Weak};
use parking_lot::Mutex;

use crate::changeset::Changeset;
use crate::selection::{SelectionId, SelectionRange};
use crate::service::ResyncOutcome;
use crate::{Revision, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabEvent {
    /// A local edit was applied to the view.
    AppliedTypingOperation { changeset: Changeset },
    HeadRevisionChanged { revision: Revision },
    /// A record from another user was merged in. `changeset` is the edit as applied to the view,
    /// and `selection` is the author's selection mapped into view coordinates.
    HandledExternalChanges {
        revision: Revision,
        author: UserId,
        changeset: Changeset,
        selection: Option<SelectionRange>,
    },
    SubmittedRecord { base_revision: Revision, changeset: Changeset },
    SubmittedChangesAcknowledged { revision: Revision },
    /// The edit from `revision` was undone. `changeset` is what was applied to the view.
    AppliedUndo { revision: Revision, changeset: Changeset },
    AppliedRedo { revision: Revision, changeset: Changeset },
    /// The view text changed by `changeset`. Emitted for every change to the view, whatever
    /// caused it.
    ViewChanged { changeset: Changeset },
    SelectionChanged { id: SelectionId, range: SelectionRange },
    SubmissionRejected { missed: usize },
    /// The service can't make progress until it's resynchronized with the server.
    ResyncRequired,
    Resynchronized { revision: Revision, outcome: ResyncOutcome },
    RecordsLoaded { count: usize, tail_revision: Revision },
}

type EventQueue = Arc<Mutex<Vec<CollabEvent>>>;

/// Fans events out to every live [`Subscription`]. Dropped subscriptions are pruned lazily.
#[derive(Default)]
pub(crate) struct Topic(Mutex<Vec<Weak<Mutex<Vec<CollabEvent>>>>>);

impl Topic {
    pub(crate) fn subscribe(&mut self) -> Subscription {
        let subscription = Subscription(EventQueue::default());
        self.0.get_mut().push(Arc::downgrade(&subscription.0));
        subscription
    }

    #[cfg(test)]
    fn has_subscribers(&mut self) -> bool {
        self.0.get_mut().iter().any(|s| s.strong_count() > 0)
    }

    pub(crate) fn publish(&mut self, event: CollabEvent) {
        self.0.get_mut().retain(|subscription| {
            if let Some(subscription) = subscription.upgrade() {
                subscription.lock().push(event.clone());
                true
            } else {
                false
            }
        });
    }
}

impl Debug for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("subscribers", &self.0.lock().len())
            .finish()
    }
}

/// A queue of events from one service.
#[derive(Debug)]
pub struct Subscription(EventQueue);

impl Subscription {
    /// Take every event published since the last call.
    pub fn consume(&self) -> Vec<CollabEvent> {
        mem::take(&mut *self.0.lock())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fan_out_and_prune() {
        let mut topic = Topic::default();
        assert!(!topic.has_subscribers());

        let a = topic.subscribe();
        let b = topic.subscribe();
        topic.publish(CollabEvent::HeadRevisionChanged { revision: 1 });
        assert_eq!(a.consume(), vec![CollabEvent::HeadRevisionChanged { revision: 1 }]);
        assert!(a.consume().is_empty());

        drop(b);
        topic.publish(CollabEvent::ResyncRequired);
        assert_eq!(topic.0.lock().len(), 1);
        assert_eq!(a.consume(), vec![CollabEvent::ResyncRequired]);

        drop(a);
        assert!(!topic.has_subscribers());
    }
}

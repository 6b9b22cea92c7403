//! Thread-confined change-notification bus (spec.md §4.2).
//!
//! `Notifier` owns the sending half of the event channel; the writer thread (see
//! [`crate::concurrency::dispatcher`]) owns the receiving half and is the only task that
//! ever drains it. Because every [`Event`] is posted after its mutating transaction commits
//! and is drained solely by the writer thread, subscriber callbacks always observe events
//! on the notifier's owning thread, whether or not the caller that triggered the mutation
//! was itself running there.

use std::sync::{Arc, Mutex};

use crate::types::ids::{Guid, LocalId};

/// Flags carried by a [`Event::NoteUpdated`] event, mirroring the options a caller passed
/// to `updateNote` (spec.md §4.3.7).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoteUpdateOptions {
    pub update_resource_metadata: bool,
    pub update_resource_binary_data: bool,
    pub update_tags: bool,
}

/// Every event the notifier can emit (spec.md §4.2).
#[derive(Clone, Debug)]
pub enum Event {
    UserPut(i64),
    UserExpunged(i64),
    NotebookPut(LocalId),
    NotebookExpunged(LocalId),
    LinkedNotebookPut(Guid),
    LinkedNotebookExpunged(Guid),
    NotePut(LocalId),
    NoteUpdated(LocalId, NoteUpdateOptions),
    NoteNotebookChanged { note_local_id: LocalId, old_notebook_local_id: LocalId, new_notebook_local_id: LocalId },
    NoteTagListChanged { note_local_id: LocalId, previous_tag_local_ids: Vec<LocalId>, new_tag_local_ids: Vec<LocalId> },
    NoteExpunged(LocalId),
    TagPut(LocalId),
    TagExpunged { local_id: LocalId, expunged_child_local_ids: Vec<LocalId> },
    ResourcePut(LocalId),
    ResourceExpunged(LocalId),
    SavedSearchPut(LocalId),
    SavedSearchExpunged(LocalId),
}

type Subscriber = Box<dyn Fn(&Event) + Send + 'static>;

/// The event bus. Cheap to clone; all clones share the same channel and subscriber list.
#[derive(Clone)]
pub struct Notifier {
    sender: std::sync::mpsc::Sender<Event>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

/// The receiving half, owned exclusively by the writer thread's run loop.
pub struct NotifierDrain {
    receiver: std::sync::mpsc::Receiver<Event>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl Notifier {
    /// Builds a fresh notifier and the drain its owning (writer) thread must poll.
    pub fn new() -> (Self, NotifierDrain) {
        let (sender, receiver) = std::sync::mpsc::channel();
        let subscribers = Arc::new(Mutex::new(Vec::new()));
        (
            Self { sender, subscribers: subscribers.clone() },
            NotifierDrain { receiver, subscribers },
        )
    }

    /// Registers a callback invoked for every event, on the notifier's owning thread.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + 'static,
    {
        self.subscribers
            .lock()
            .expect("notifier subscriber list poisoned")
            .push(Box::new(callback));
    }

    /// Posts an event. Never blocks the caller on subscriber execution; the event is
    /// dispatched to subscribers only once it is drained on the writer thread. Failure to
    /// post (the writer thread has shut down) is logged, not propagated — the mutating
    /// transaction already committed (spec.md §7).
    pub fn emit(&self, event: Event) {
        if self.sender.send(event).is_err() {
            tracing::warn!("notifier channel closed; dropping event after successful commit");
        }
    }
}

impl NotifierDrain {
    /// Drains and dispatches every event currently queued, without blocking. Called by the
    /// writer thread between write jobs.
    pub fn drain_available(&self) {
        while let Ok(event) = self.receiver.try_recv() {
            self.dispatch(&event);
        }
    }

    /// Blocks until either an event or the given duration elapses, dispatching whatever
    /// arrives. Used by the writer thread's idle loop so it isn't a busy spin.
    pub fn drain_blocking_for(&self, timeout: std::time::Duration) {
        if let Ok(event) = self.receiver.recv_timeout(timeout) {
            self.dispatch(&event);
            self.drain_available();
        }
    }

    fn dispatch(&self, event: &Event) {
        for subscriber in self.subscribers.lock().expect("notifier subscriber list poisoned").iter() {
            subscriber(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_observes_emitted_event() {
        let (notifier, drain) = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        notifier.subscribe(move |event| {
            seen_clone.lock().unwrap().push(format!("{event:?}"));
        });

        notifier.emit(Event::NotebookPut(LocalId::new("nb-1")));
        drain.drain_available();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn emit_after_drain_dropped_does_not_panic() {
        let (notifier, drain) = Notifier::new();
        drop(drain);
        notifier.emit(Event::NotebookExpunged(LocalId::new("nb-1")));
    }
}

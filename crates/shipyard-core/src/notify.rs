//! Wait/notify coordinator.
//!
//! Maps correlation ids to waiting instances and delivers every id's result
//! at most once. A `wait_for_all` registration fires its callback exactly
//! once, when the last of its ids has been notified, regardless of whether
//! the notifications arrived before or after the registration.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use shipyard_types::notify::NotifyResponse;

/// Receives the full id -> response map of a completed wait.
pub trait NotifyCallback: Send + Sync {
    fn on_complete(&self, responses: HashMap<String, NotifyResponse>);
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NotifyError {
    /// The id already has a result.
    #[error("duplicate notification for correlation id '{0}'")]
    DuplicateNotification(String),

    #[error("missing correlation id")]
    MissingCorrelation,

    /// A wait must name at least one id.
    #[error("wait registered without correlation ids")]
    EmptyWait,

    #[error("correlation id '{0}' is already awaited")]
    AlreadyAwaited(String),
}

/// What happened to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Stored; a registered wait may have fired.
    Delivered,
    /// Stored until a wait names the id.
    Buffered,
    /// The wait for this id was cancelled; the result was dropped.
    Discarded,
}

enum Slot {
    Buffered(NotifyResponse),
    Delivered,
    Discarded,
}

struct Waiter {
    ids: Vec<String>,
    callback: Arc<dyn NotifyCallback>,
}

#[derive(Default)]
struct Inner {
    /// One slot per correlation id; insert-if-absent enforces at-most-once.
    slots: DashMap<String, Slot>,
    waiters: DashMap<Uuid, Waiter>,
    /// Correlation id -> wait registration.
    index: DashMap<String, Uuid>,
}

/// Thread-safe coordinator shared by the executor and the notify path.
#[derive(Clone, Default)]
pub struct WaitNotifyCoordinator {
    inner: Arc<Inner>,
}

impl WaitNotifyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to fire once every id in `ids` has been notified.
    pub fn wait_for_all(
        &self,
        callback: Arc<dyn NotifyCallback>,
        ids: &[String],
    ) -> Result<Uuid, NotifyError> {
        if ids.is_empty() {
            return Err(NotifyError::EmptyWait);
        }
        if ids.iter().any(String::is_empty) {
            return Err(NotifyError::MissingCorrelation);
        }

        let wait_id = Uuid::now_v7();
        for (i, id) in ids.iter().enumerate() {
            match self.inner.index.entry(id.clone()) {
                Entry::Occupied(_) => {
                    for claimed in &ids[..i] {
                        self.inner.index.remove(claimed);
                    }
                    return Err(NotifyError::AlreadyAwaited(id.clone()));
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(wait_id);
                }
            }
        }
        self.inner.waiters.insert(
            wait_id,
            Waiter {
                ids: ids.to_vec(),
                callback,
            },
        );
        tracing::debug!(%wait_id, count = ids.len(), "wait registered");

        self.try_complete(wait_id);
        Ok(wait_id)
    }

    /// Deliver `response` for `correlation_id`.
    pub fn notify(
        &self,
        correlation_id: &str,
        response: NotifyResponse,
    ) -> Result<NotifyOutcome, NotifyError> {
        if correlation_id.is_empty() {
            return Err(NotifyError::MissingCorrelation);
        }

        match self.inner.slots.entry(correlation_id.to_string()) {
            Entry::Occupied(slot) => match slot.get() {
                Slot::Discarded => {
                    tracing::debug!(correlation_id, "notification for cancelled wait discarded");
                    return Ok(NotifyOutcome::Discarded);
                }
                Slot::Buffered(_) | Slot::Delivered => {
                    tracing::error!(correlation_id, "duplicate notification rejected");
                    return Err(NotifyError::DuplicateNotification(
                        correlation_id.to_string(),
                    ));
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Buffered(response));
            }
        }

        let wait_id = self.inner.index.get(correlation_id).map(|w| *w);
        match wait_id {
            Some(wait_id) => {
                self.try_complete(wait_id);
                Ok(NotifyOutcome::Delivered)
            }
            None => {
                tracing::debug!(correlation_id, "notification buffered until registration");
                Ok(NotifyOutcome::Buffered)
            }
        }
    }

    /// Cancel a wait. Its pending and future notifications are discarded.
    pub fn cancel(&self, wait_id: Uuid) {
        let Some((_, waiter)) = self.inner.waiters.remove(&wait_id) else {
            return;
        };
        for id in &waiter.ids {
            self.inner.index.remove(id);
            match self.inner.slots.entry(id.clone()) {
                Entry::Occupied(mut slot) => {
                    if matches!(slot.get(), Slot::Buffered(_)) {
                        slot.insert(Slot::Discarded);
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot::Discarded);
                }
            }
        }
        tracing::debug!(%wait_id, "wait cancelled");
    }

    pub fn is_waiting(&self, wait_id: Uuid) -> bool {
        self.inner.waiters.contains_key(&wait_id)
    }

    /// Number of registered, not yet fired waits.
    pub fn pending_waits(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Number of correlation ids the coordinator still tracks.
    pub fn tracked_ids(&self) -> usize {
        self.inner.slots.len()
    }

    /// Forget delivered ids so the same ids may be reused.
    ///
    /// Call once the execution owning `ids` has finished. Buffered results
    /// stay until a wait claims them; discarded ids stay so late results
    /// for an aborted wait are still recognised.
    pub fn forget(&self, ids: &[String]) {
        for id in ids {
            self.inner
                .slots
                .remove_if(id, |_, slot| matches!(slot, Slot::Delivered));
        }
    }

    fn try_complete(&self, wait_id: Uuid) {
        let ids = match self.inner.waiters.get(&wait_id) {
            Some(waiter) => waiter.ids.clone(),
            None => return,
        };
        let all_buffered = ids.iter().all(|id| {
            self.inner
                .slots
                .get(id)
                .is_some_and(|slot| matches!(*slot, Slot::Buffered(_)))
        });
        if !all_buffered {
            return;
        }

        // Only the caller that removes the waiter fires it.
        let Some((_, waiter)) = self.inner.waiters.remove(&wait_id) else {
            return;
        };
        let mut responses = HashMap::with_capacity(waiter.ids.len());
        for id in &waiter.ids {
            self.inner.index.remove(id);
            if let Some(mut slot) = self.inner.slots.get_mut(id) {
                if let Slot::Buffered(response) = std::mem::replace(&mut *slot, Slot::Delivered) {
                    responses.insert(id.clone(), response);
                }
            }
        }
        tracing::debug!(%wait_id, count = responses.len(), "wait complete");
        waiter.callback.on_complete(responses);
    }
}

impl std::fmt::Debug for WaitNotifyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitNotifyCoordinator")
            .field("pending_waits", &self.inner.waiters.len())
            .field("slots", &self.inner.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::notify::CommandResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<HashMap<String, NotifyResponse>>>,
    }

    impl NotifyCallback for Recorder {
        fn on_complete(&self, responses: HashMap<String, NotifyResponse>) {
            self.calls.lock().unwrap().push(responses);
        }
    }

    fn ok() -> NotifyResponse {
        NotifyResponse::Command(CommandResult::success())
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fires_once_when_all_ids_arrive() {
        let coordinator = WaitNotifyCoordinator::new();
        let recorder = Arc::new(Recorder::default());
        coordinator
            .wait_for_all(recorder.clone(), &ids(&["a", "b"]))
            .unwrap();

        assert_eq!(coordinator.notify("a", ok()).unwrap(), NotifyOutcome::Delivered);
        assert!(recorder.calls.lock().unwrap().is_empty());
        coordinator.notify("b", ok()).unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(coordinator.pending_waits(), 0);
    }

    #[test]
    fn duplicate_notification_rejected() {
        let coordinator = WaitNotifyCoordinator::new();
        coordinator.notify("a", ok()).unwrap();
        assert_eq!(
            coordinator.notify("a", ok()),
            Err(NotifyError::DuplicateNotification("a".into()))
        );

        let recorder = Arc::new(Recorder::default());
        coordinator.wait_for_all(recorder.clone(), &ids(&["a"])).unwrap();
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
        // Still rejected after delivery.
        assert!(matches!(
            coordinator.notify("a", ok()),
            Err(NotifyError::DuplicateNotification(_))
        ));
    }

    #[test]
    fn registration_after_partial_delivery_still_fires() {
        let coordinator = WaitNotifyCoordinator::new();
        assert_eq!(coordinator.notify("x", ok()).unwrap(), NotifyOutcome::Buffered);

        let recorder = Arc::new(Recorder::default());
        coordinator
            .wait_for_all(recorder.clone(), &ids(&["x", "y"]))
            .unwrap();
        assert!(recorder.calls.lock().unwrap().is_empty());

        coordinator.notify("y", ok()).unwrap();
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn registration_after_full_delivery_fires_immediately() {
        let coordinator = WaitNotifyCoordinator::new();
        coordinator.notify("x", ok()).unwrap();
        coordinator.notify("y", ok()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let wait_id = coordinator
            .wait_for_all(recorder.clone(), &ids(&["y", "x"]))
            .unwrap();
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
        assert!(!coordinator.is_waiting(wait_id));
    }

    #[test]
    fn cancelled_wait_discards_late_notifications() {
        let coordinator = WaitNotifyCoordinator::new();
        let recorder = Arc::new(Recorder::default());
        let wait_id = coordinator
            .wait_for_all(recorder.clone(), &ids(&["a", "b"]))
            .unwrap();
        coordinator.notify("a", ok()).unwrap();
        coordinator.cancel(wait_id);

        assert_eq!(coordinator.notify("b", ok()).unwrap(), NotifyOutcome::Discarded);
        assert_eq!(coordinator.notify("a", ok()).unwrap(), NotifyOutcome::Discarded);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_registrations() {
        let coordinator = WaitNotifyCoordinator::new();
        let recorder = Arc::new(Recorder::default());
        assert_eq!(
            coordinator.wait_for_all(recorder.clone(), &[]),
            Err(NotifyError::EmptyWait)
        );
        coordinator.wait_for_all(recorder.clone(), &ids(&["a"])).unwrap();
        assert_eq!(
            coordinator.wait_for_all(recorder.clone(), &ids(&["b", "a"])),
            Err(NotifyError::AlreadyAwaited("a".into()))
        );
        // The failed registration released "b".
        coordinator.wait_for_all(recorder, &ids(&["b"])).unwrap();
        assert_eq!(
            coordinator.notify("", ok()),
            Err(NotifyError::MissingCorrelation)
        );
    }

    #[test]
    fn concurrent_notifications_fire_exactly_once() {
        let coordinator = WaitNotifyCoordinator::new();
        let recorder = Arc::new(Recorder::default());
        let all: Vec<String> = (0..64).map(|i| format!("id-{i}")).collect();
        coordinator.wait_for_all(recorder.clone(), &all).unwrap();

        std::thread::scope(|scope| {
            for id in &all {
                let coordinator = coordinator.clone();
                scope.spawn(move || {
                    coordinator.notify(id, ok()).unwrap();
                    let _ = coordinator.notify(id, ok());
                });
            }
        });

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 64);
    }

    #[test]
    fn forget_allows_reuse() {
        let coordinator = WaitNotifyCoordinator::new();
        let recorder = Arc::new(Recorder::default());
        coordinator.wait_for_all(recorder.clone(), &ids(&["a"])).unwrap();
        coordinator.notify("a", ok()).unwrap();
        coordinator.forget(&ids(&["a"]));
        assert_eq!(coordinator.tracked_ids(), 0);
        assert_eq!(coordinator.notify("a", ok()).unwrap(), NotifyOutcome::Buffered);
    }

    #[test]
    fn forget_keeps_buffered_and_discarded_ids() {
        let coordinator = WaitNotifyCoordinator::new();
        let recorder = Arc::new(Recorder::default());
        let wait = coordinator.wait_for_all(recorder, &ids(&["a"])).unwrap();
        coordinator.cancel(wait);
        coordinator.notify("b", ok()).unwrap();

        coordinator.forget(&ids(&["a", "b"]));
        assert_eq!(coordinator.tracked_ids(), 2);
        assert_eq!(coordinator.notify("a", ok()).unwrap(), NotifyOutcome::Discarded);
    }
}

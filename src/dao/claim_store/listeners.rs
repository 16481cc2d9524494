use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use indexmap::IndexMap;

use crate::dao::models::GameEntity;

/// Callback receiving a full snapshot of the games after every committed change.
///
/// Each invocation gets its own copy, so listeners are free to mutate it.
pub type Listener = Box<dyn Fn(Vec<GameEntity>) + Send + Sync>;

struct Registration {
    active: AtomicBool,
    listener: Listener,
}

type Registrations = Mutex<IndexMap<u64, Arc<Registration>>>;

/// Ordered set of in-process listeners shared by a store and its subscriptions.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    registrations: Arc<Registrations>,
    next_id: Arc<AtomicU64>,
}

impl ListenerRegistry {
    /// Registry with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; it stays registered until the returned handle is
    /// unsubscribed or dropped.
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Arc::new(Registration {
            active: AtomicBool::new(true),
            listener,
        });
        lock(&self.registrations).insert(id, registration);

        Subscription {
            id,
            registrations: Arc::downgrade(&self.registrations),
        }
    }

    /// Hand a copy of `snapshot` to every active listener, in registration order.
    ///
    /// The lock is released before any listener runs, so listeners may subscribe,
    /// unsubscribe or call back into the store.
    pub fn notify(&self, snapshot: &[GameEntity]) {
        let registrations: Vec<Arc<Registration>> =
            lock(&self.registrations).values().cloned().collect();

        for registration in registrations {
            if registration.active.load(Ordering::Acquire) {
                (registration.listener)(snapshot.to_vec());
            }
        }
    }

    /// Number of listeners currently registered.
    pub fn len(&self) -> usize {
        lock(&self.registrations).len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`ClaimStore::subscribe`](super::ClaimStore::subscribe).
///
/// Dropping the handle unsubscribes the listener.
#[must_use = "dropping a subscription unsubscribes its listener immediately"]
pub struct Subscription {
    id: u64,
    registrations: Weak<Registrations>,
}

impl Subscription {
    /// Stop delivering snapshots to the listener.
    pub fn unsubscribe(self) {
        // Deregistration happens in `Drop`.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registrations) = self.registrations.upgrade() else {
            return;
        };
        if let Some(registration) = lock(&registrations).shift_remove(&self.id) {
            registration.active.store(false, Ordering::Release);
        }
    }
}

fn lock(registrations: &Registrations) -> MutexGuard<'_, IndexMap<u64, Arc<Registration>>> {
    registrations.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use time::macros::datetime;

    use super::*;
    use crate::dao::models::{GameId, NewGame};

    fn sample_games() -> Vec<GameEntity> {
        vec![
            NewGame {
                date: datetime!(2025-03-01 10:00 UTC),
                opponent: "Team A".into(),
                is_home: true,
            }
            .into_entity(GameId::new("1")),
        ]
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Listener) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let make = move |name: &'static str| -> Listener {
            let sink = sink.clone();
            Box::new(move |_games: Vec<GameEntity>| sink.lock().unwrap().push(name.to_string()))
        };
        (calls, make)
    }

    #[test]
    fn notifies_in_registration_order() {
        let registry = ListenerRegistry::new();
        let (calls, make) = recorder();
        let _first = registry.subscribe(make("first"));
        let _second = registry.subscribe(make("second"));
        let _third = registry.subscribe(make("third"));

        registry.notify(&sample_games());

        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_and_drop_both_deregister() {
        let registry = ListenerRegistry::new();
        let (calls, make) = recorder();
        let first = registry.subscribe(make("first"));
        let second = registry.subscribe(make("second"));
        assert_eq!(registry.len(), 2);

        first.unsubscribe();
        drop(second);

        registry.notify(&sample_games());
        assert!(registry.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn listener_removed_during_fan_out_is_not_called() {
        let registry = ListenerRegistry::new();
        let (calls, make) = recorder();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = victim.clone();
        let _killer = registry.subscribe(Box::new(move |_games: Vec<GameEntity>| {
            if let Some(subscription) = slot.lock().unwrap().take() {
                subscription.unsubscribe();
            }
        }));
        *victim.lock().unwrap() = Some(registry.subscribe(make("victim")));

        registry.notify(&sample_games());

        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn each_listener_gets_its_own_copy() {
        let registry = ListenerRegistry::new();
        let _mutator = registry.subscribe(Box::new(|mut games: Vec<GameEntity>| {
            games[0].opponent = "changed".into();
            games.clear();
        }));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _observer = registry.subscribe(Box::new(move |games: Vec<GameEntity>| {
            sink.lock().unwrap().extend(games);
        }));

        let snapshot = sample_games();
        registry.notify(&snapshot);

        assert_eq!(snapshot[0].opponent, "Team A");
        assert_eq!(*seen.lock().unwrap(), snapshot);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let registry = ListenerRegistry::new();
        let subscription = registry.subscribe(Box::new(|_games: Vec<GameEntity>| {}));
        drop(registry);
        subscription.unsubscribe();
    }
}

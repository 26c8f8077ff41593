use std::{cell::Cell, panic::{self, AssertUnwindSafe}, sync::{atomic::{AtomicU64, Ordering}, Arc}};

use micro4_core_emulator_protocol::StateSnapshot;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::warn;

use crate::Fault;

/// Which kind of notification a [Subscription] receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    StateUpdate,
    Halted,
    Error,
}

/// Handle to a registered callback, used to unsubscribe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub topic: Topic,
    id: u64,
}

struct Entry<T> {
    id: u64,

    // Held for the duration of each delivery, so that clearing the flag waits out any call
    // in progress on another thread. Reentrant so a callback may unsubscribe itself.
    active: ReentrantMutex<Cell<bool>>,

    callback: Box<dyn Fn(&T) + Send + Sync>,
}

struct Entries<T> {
    list: Vec<Arc<Entry<T>>>,
    closed: bool,
}

pub(crate) struct Registry<T> {
    entries: Mutex<Entries<T>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self { entries: Mutex::new(Entries { list: vec![], closed: false }) }
    }

    /// Registers a callback. Once closed, the callback is dropped without being registered.
    fn add(&self, id: u64, callback: Box<dyn Fn(&T) + Send + Sync>) {
        let mut entries = self.entries.lock();
        if entries.closed {
            return
        }
        entries.list.push(Arc::new(Entry { id, active: ReentrantMutex::new(Cell::new(true)), callback }));
    }

    fn remove(&self, id: u64) -> bool {
        let entry = {
            let mut entries = self.entries.lock();
            let Some(index) = entries.list.iter().position(|e| e.id == id) else {
                return false
            };
            entries.list.remove(index)
        };

        entry.active.lock().set(false);
        true
    }

    /// Calls every active callback in registration order.
    /// A panicking callback is logged and doesn't affect the others.
    pub fn notify(&self, value: &T) {
        let list = self.entries.lock().list.clone();
        for entry in list {
            let active = entry.active.lock();
            if !active.get() {
                continue
            }

            if panic::catch_unwind(AssertUnwindSafe(|| (entry.callback)(value))).is_err() {
                warn!(subscription = entry.id, "subscriber panicked");
            }
        }
    }

    fn close(&self) {
        let list = {
            let mut entries = self.entries.lock();
            entries.closed = true;
            std::mem::take(&mut entries.list)
        };
        for entry in list {
            entry.active.lock().set(false);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().list.len()
    }
}

pub(crate) struct Subscribers {
    next_id: AtomicU64,
    pub state: Registry<StateSnapshot>,
    pub halted: Registry<()>,
    pub error: Registry<Fault>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Registry::new(),
            halted: Registry::new(),
            error: Registry::new(),
        }
    }

    pub fn on_state_update(&self, callback: impl Fn(&StateSnapshot) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id();
        self.state.add(id, Box::new(callback));
        Subscription { topic: Topic::StateUpdate, id }
    }

    pub fn on_halted(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_id();
        self.halted.add(id, Box::new(move |_: &()| callback()));
        Subscription { topic: Topic::Halted, id }
    }

    pub fn on_error(&self, callback: impl Fn(&Fault) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id();
        self.error.add(id, Box::new(callback));
        Subscription { topic: Topic::Error, id }
    }

    pub fn remove(&self, subscription: Subscription) -> bool {
        match subscription.topic {
            Topic::StateUpdate => self.state.remove(subscription.id),
            Topic::Halted => self.halted.remove(subscription.id),
            Topic::Error => self.error.remove(subscription.id),
        }
    }

    /// Drops every callback, and every one registered from now on.
    pub fn close(&self) {
        self.state.close();
        self.halted.close();
        self.error.close();
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

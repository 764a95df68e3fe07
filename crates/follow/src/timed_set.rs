use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

struct Entry {
    generation: u64,
    expiry: JoinHandle<()>,
}

struct Inner<T> {
    entries: HashMap<T, Entry>,
    next_generation: u64,
}

/// A set whose members disappear on their own once their ttl elapses.
///
/// Every insertion schedules its own expiry task, so [`TimedSet::contains`]
/// never needs a sweep. Inserting a value again cancels the pending expiry
/// and starts a fresh countdown. Dropping the set cancels all pending
/// expiries.
///
/// Insertion spawns onto the current tokio runtime.
pub struct TimedSet<T> {
    inner: Arc<Mutex<Inner<T>>>,
    default_ttl: Duration,
}

impl<T> TimedSet<T>
where
    T: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_generation: 0,
            })),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Only affects values inserted afterwards.
    pub fn set_default_ttl(&mut self, ttl: Duration) {
        self.default_ttl = ttl;
    }

    pub fn insert(&self, value: T) {
        self.insert_with_ttl(value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, value: T, ttl: Duration) {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let expiry = tokio::spawn(expire(
            Arc::downgrade(&self.inner),
            value.clone(),
            generation,
            ttl,
        ));

        if let Some(previous) = inner.entries.insert(value, Entry { generation, expiry }) {
            previous.expiry.abort();
        }
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().entries.contains_key(value)
    }

    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.inner.lock().entries.remove(value) {
            Some(entry) => {
                entry.expiry.abort();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

async fn expire<T>(inner: Weak<Mutex<Inner<T>>>, value: T, generation: u64, ttl: Duration)
where
    T: Eq + Hash + Debug,
{
    tokio::time::sleep(ttl).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut inner = inner.lock();
    // a newer insertion owns the entry now
    if inner
        .entries
        .get(&value)
        .is_some_and(|entry| entry.generation == generation)
    {
        inner.entries.remove(&value);
        log::trace!("Timed out value {value:?}");
    }
}

impl<T> Drop for TimedSet<T> {
    fn drop(&mut self) {
        for (_, entry) in self.inner.lock().entries.drain() {
            entry.expiry.abort();
        }
    }
}

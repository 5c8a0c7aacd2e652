//! Sharded timer id map.
//!
//! One slot per wheel cell in total, addressed by `id % size`. Each slot
//! is a small vector behind a spin lock whose lock word records the
//! owning thread id, so unlocking from the wrong thread is caught
//! immediately instead of corrupting the list.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::util::thread_id;

use super::{TimerId, TimerObj};

/// Spin lock tagged with the owning thread id. The lock word is 0 when
/// free.
pub(crate) struct TaggedSpinLock {
    owner: AtomicU64,
}

impl TaggedSpinLock {
    pub(crate) fn new() -> Self {
        Self { owner: AtomicU64::new(0) }
    }

    pub(crate) fn lock(&self) {
        let tid = thread_id();
        let mut spins = 0u32;
        while self
            .owner
            .compare_exchange_weak(0, tid, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins % 1000 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Panics when the calling thread does not hold the lock; a foreign
    /// unlock is a double-unlock bug, not a recoverable condition.
    pub(crate) fn unlock(&self) {
        let tid = thread_id();
        if self.owner.compare_exchange(tid, 0, Ordering::Release, Ordering::Relaxed).is_err() {
            panic!("thread {tid} unlocking a timer list it does not own");
        }
    }

    #[cfg(test)]
    pub(crate) fn owner(&self) -> u64 {
        self.owner.load(Ordering::Relaxed)
    }
}

struct MapSlot {
    lock: TaggedSpinLock,
    timers: UnsafeCell<Vec<Arc<TimerObj>>>,
}

// The UnsafeCell is only touched between lock()/unlock() of the slot's
// spin lock.
unsafe impl Sync for MapSlot {}
unsafe impl Send for MapSlot {}

impl MapSlot {
    fn new() -> Self {
        Self { lock: TaggedSpinLock::new(), timers: UnsafeCell::new(Vec::new()) }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Vec<Arc<TimerObj>>) -> R) -> R {
        self.lock.lock();
        let result = f(unsafe { &mut *self.timers.get() });
        self.lock.unlock();
        result
    }
}

pub(crate) struct TimerMap {
    slots: Vec<MapSlot>,
}

impl TimerMap {
    pub(crate) fn new(size: usize) -> Self {
        Self { slots: (0..size).map(|_| MapSlot::new()).collect() }
    }

    fn slot(&self, id: TimerId) -> &MapSlot {
        &self.slots[(id % self.slots.len() as u64) as usize]
    }

    pub(crate) fn add(&self, timer: Arc<TimerObj>) {
        self.slot(timer.id()).with(|timers| timers.push(timer.clone()));
    }

    pub(crate) fn find(&self, id: TimerId) -> Option<Arc<TimerObj>> {
        if id == 0 {
            return None;
        }
        self.slot(id).with(|timers| timers.iter().find(|t| t.id() == id).cloned())
    }

    pub(crate) fn remove(&self, id: TimerId) {
        self.slot(id).with(|timers| {
            if let Some(i) = timers.iter().position(|t| t.id() == id) {
                timers.remove(i);
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().map(|s| s.with(|t| t.len())).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    fn timer_with_id(id: u64) -> Arc<TimerObj> {
        let timer = Arc::new(TimerObj::new());
        timer.id.store(id, Ordering::Release);
        timer
    }

    #[test]
    fn test_add_find_remove() {
        let map = TimerMap::new(64);
        let t = timer_with_id(7);
        map.add(t.clone());
        assert!(map.find(7).is_some());
        // colliding slot, different id
        assert!(map.find(7 + 64).is_none());
        map.remove(7);
        assert!(map.find(7).is_none());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_zero_id_never_found() {
        let map = TimerMap::new(8);
        assert!(map.find(0).is_none());
    }

    #[test]
    fn test_colliding_ids_share_slot() {
        let map = TimerMap::new(4);
        map.add(timer_with_id(1));
        map.add(timer_with_id(5));
        map.add(timer_with_id(9));
        assert!(map.find(5).is_some());
        map.remove(5);
        assert!(map.find(1).is_some());
        assert!(map.find(9).is_some());
    }

    #[test]
    fn test_lock_records_owner() {
        let lock = TaggedSpinLock::new();
        assert_eq!(lock.owner(), 0);
        lock.lock();
        assert_eq!(lock.owner(), thread_id());
        lock.unlock();
        assert_eq!(lock.owner(), 0);
    }

    #[test]
    fn test_foreign_unlock_panics() {
        let lock = Arc::new(TaggedSpinLock::new());
        lock.lock();
        let foreign = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| lock.unlock())).is_err()
            })
        };
        assert!(foreign.join().unwrap(), "foreign unlock must panic");
        lock.unlock();
    }

    #[test]
    fn test_lock_contention() {
        let lock = Arc::new(TaggedSpinLock::new());
        let counter = Arc::new(StdAtomicU64::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    lock.lock();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                    lock.unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }
}

//! Millisecond-resolution timer service.
//!
//! A three-level hierarchical timing wheel holds pending timers; a
//! dedicated tick thread splices expired slots out and hands them to a
//! small worker pool that runs the callbacks. Timers are addressed by
//! monotonically increasing ids through a sharded id map, so handles stay
//! valid (and merely go stale) after a timer fires.
//!
//! Users obtain a labeled [`TimerCtrl`] from [`init`] and start timers
//! against it; the controller pool is a fixed free-list and a cleaned-up
//! controller rejects further starts.
//!
//! Lifecycle of one timer: `waiting → expired → stopped` when it fires,
//! or `waiting → canceled` when [`stop`] wins the race. The callback runs
//! at most once, and a stop that observes any state but `waiting` blocks
//! until the running callback returns (unless called from the callback
//! thread itself).

pub(crate) mod map;
pub(crate) mod sched;
pub(crate) mod wheel;

use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::util::{now_ms, thread_id};
use map::TimerMap;
use wheel::{Wheel, NUM_WHEELS};

/// Cadence of the tick thread and resolution of the innermost wheel.
pub const MSECONDS_PER_TICK: u64 = 5;

/// Size of the controller free-list.
pub const MAX_TIMER_CTRL: usize = 512;

/// Worker threads running expired callbacks.
pub const TIMER_THREADS: usize = 1;

/// Width of a controller label, bytes.
pub const CTRL_LABEL_BYTES: usize = 16;

pub(crate) const STATE_WAITING: u8 = 0;
pub(crate) const STATE_EXPIRED: u8 = 1;
pub(crate) const STATE_STOPPED: u8 = 2;
pub(crate) const STATE_CANCELED: u8 = 3;

/// Opaque non-zero timer id.
pub type TimerId = u64;

/// A timer callback; invoked at most once with the timer's id.
pub type TimerCallback = Box<dyn FnOnce(TimerId) + Send + 'static>;

/// Handle to one controller slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCtrl {
    index: usize,
}

pub(crate) struct TimerObj {
    id: AtomicU64,
    ctrl: AtomicUsize,
    state: AtomicU8,
    /// `NUM_WHEELS` means "not in any wheel".
    pub(crate) wheel: AtomicU8,
    pub(crate) slot: AtomicU16,
    pub(crate) expire_at: AtomicI64,
    executed_by: AtomicU64,
    cb: Mutex<Option<TimerCallback>>,
}

impl TimerObj {
    fn new() -> Self {
        Self {
            id: AtomicU64::new(0),
            ctrl: AtomicUsize::new(usize::MAX),
            state: AtomicU8::new(STATE_WAITING),
            wheel: AtomicU8::new(NUM_WHEELS as u8),
            slot: AtomicU16::new(0),
            expire_at: AtomicI64::new(0),
            executed_by: AtomicU64::new(0),
            cb: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> TimerId {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn cas_state(&self, from: u8, to: u8) -> u8 {
        match self.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire) {
            Ok(prev) => prev,
            Err(prev) => prev,
        }
    }

    /// Runs the callback if this timer still owns the waiting state.
    /// Returns true when the callback was invoked.
    pub(crate) fn fire(&self) -> bool {
        self.executed_by.store(thread_id(), Ordering::Release);
        if self.cas_state(STATE_WAITING, STATE_EXPIRED) != STATE_WAITING {
            return false;
        }
        trace!(id = self.id(), ctrl = self.ctrl.load(Ordering::Relaxed), "timer execution start");
        if let Some(cb) = self.cb.lock().take() {
            cb(self.id());
        }
        self.state.store(STATE_STOPPED, Ordering::Release);
        trace!(id = self.id(), "timer execution end");
        true
    }
}

struct CtrlPool {
    labels: Vec<[u8; CTRL_LABEL_BYTES]>,
    free: Vec<usize>,
    active: usize,
}

impl CtrlPool {
    fn new() -> Self {
        Self {
            labels: vec![[0u8; CTRL_LABEL_BYTES]; MAX_TIMER_CTRL],
            free: (0..MAX_TIMER_CTRL).rev().collect(),
            active: 0,
        }
    }

    fn is_alive(&self, ctrl: TimerCtrl) -> bool {
        ctrl.index < MAX_TIMER_CTRL && self.labels[ctrl.index][0] != 0
    }
}

pub(crate) struct TimerCore {
    pub(crate) wheels: Vec<Wheel>,
    pub(crate) map: TimerMap,
}

struct TimerModule {
    core: Arc<TimerCore>,
    queue: crossbeam::channel::Sender<Arc<TimerObj>>,
    ctrls: Mutex<CtrlPool>,
    next_id: AtomicU64,
}

static MODULE: OnceLock<TimerModule> = OnceLock::new();

fn module() -> &'static TimerModule {
    MODULE.get_or_init(|| {
        let now = now_ms();
        let wheels = vec![
            Wheel::new(MSECONDS_PER_TICK, 4096, now),
            Wheel::new(1_000, 1024, now),
            Wheel::new(60_000, 1024, now),
        ];
        let map_size: usize = wheels.iter().map(|w| w.size as usize).sum();
        let core = Arc::new(TimerCore { wheels, map: TimerMap::new(map_size) });

        let (tx, rx) = crossbeam::channel::unbounded::<Arc<TimerObj>>();
        sched::start_workers(TIMER_THREADS, core.clone(), rx);
        wheel::start_tick_thread(core.clone(), tx.clone());

        debug!(threads = TIMER_THREADS, "timer module initialized");
        TimerModule {
            core,
            queue: tx,
            ctrls: Mutex::new(CtrlPool::new()),
            next_id: AtomicU64::new(1),
        }
    })
}

fn next_timer_id(m: &TimerModule) -> TimerId {
    loop {
        let id = m.next_id.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Acquires a labeled controller from the free-list.
///
/// `max_timers`, `resolution_ms` and `longest_ms` describe the expected
/// load; the wheel geometry is fixed at compile time, so they are only
/// recorded for diagnostics. Returns `None` when the pool is exhausted or
/// the label is empty.
pub fn init(max_timers: usize, resolution_ms: u64, longest_ms: u64, label: &str) -> Option<TimerCtrl> {
    let m = module();
    if label.is_empty() {
        return None;
    }

    let mut pool = m.ctrls.lock();
    let Some(index) = pool.free.pop() else {
        error!(label, "too many timer controllers, failed to create timer controller");
        return None;
    };
    pool.active += 1;

    let slot = &mut pool.labels[index];
    slot.fill(0);
    let bytes = label.as_bytes();
    let n = bytes.len().min(CTRL_LABEL_BYTES - 1);
    slot[..n].copy_from_slice(&bytes[..n]);

    trace!(label, max_timers, resolution_ms, longest_ms, active = pool.active,
        "timer controller initialized");
    Some(TimerCtrl { index })
}

/// Hands a controller back to the free-list; its label is zeroed so stale
/// handles fail the liveness check.
pub fn cleanup(ctrl: TimerCtrl) {
    let m = module();
    let mut pool = m.ctrls.lock();
    if !pool.is_alive(ctrl) {
        return;
    }
    pool.labels[ctrl.index].fill(0);
    pool.free.push(ctrl.index);
    pool.active -= 1;
    trace!(index = ctrl.index, "timer controller cleaned up");
}

fn do_start(
    m: &TimerModule,
    mut timer: Arc<TimerObj>,
    ctrl: TimerCtrl,
    delay_ms: u64,
    cb: TimerCallback,
) -> TimerId {
    let id = next_timer_id(m);
    {
        // the object is exclusively ours until it is published to the map
        let obj = Arc::get_mut(&mut timer).expect("timer must be unshared before start");
        obj.id.store(id, Ordering::Release);
        obj.state.store(STATE_WAITING, Ordering::Release);
        obj.ctrl.store(ctrl.index, Ordering::Release);
        obj.wheel.store(NUM_WHEELS as u8, Ordering::Release);
        obj.executed_by.store(0, Ordering::Release);
    }
    *timer.cb.lock() = Some(cb);
    m.core.map.add(timer.clone());

    trace!(id, delay_ms, "timer started");

    if delay_ms == 0 {
        timer.expire_at.store(now_ms(), Ordering::Release);
        if m.queue.send(timer).is_err() {
            error!(id, "timer worker queue closed");
        }
    } else {
        wheel::add_to_wheel(&m.core.wheels, &timer, delay_ms);
    }

    id
}

/// Starts a timer; the callback fires once after `delay_ms` milliseconds.
/// Returns `None` when the controller is dead.
pub fn start(ctrl: TimerCtrl, delay_ms: u64, cb: TimerCallback) -> Option<TimerId> {
    let m = module();
    if !m.ctrls.lock().is_alive(ctrl) {
        warn!(index = ctrl.index, "start on a dead timer controller");
        return None;
    }
    Some(do_start(m, Arc::new(TimerObj::new()), ctrl, delay_ms, cb))
}

/// Stop tail shared by [`stop`] and [`reset`]. Returns true when the
/// timer object is safe to reuse (it was removed from the wheel).
fn do_stop(m: &TimerModule, timer: &Arc<TimerObj>, prev_state: u8) -> bool {
    match prev_state {
        STATE_WAITING => {
            if wheel::remove_from_wheel(&m.core.wheels, timer) {
                m.core.map.remove(timer.id());
                trace!(id = timer.id(), "timer canceled");
                return true;
            }
            // a zero-delay timer is already queued; the worker will see
            // the canceled state and drop it
            false
        }
        STATE_EXPIRED => {
            if timer.executed_by.load(Ordering::Acquire) == thread_id() {
                // stop from inside the callback; waiting would deadlock
                return false;
            }
            trace!(id = timer.id(), "timer fired, waiting for callback");
            let mut spins = 0u32;
            while timer.state() != STATE_STOPPED {
                spins += 1;
                if spins % 1000 == 0 {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
            false
        }
        // already stopped or canceled elsewhere
        _ => false,
    }
}

/// Cancels a timer. Returns true iff the callback was actually prevented;
/// false means it already ran or is running (in which case this call has
/// waited for it to finish, unless invoked from the callback itself).
pub fn stop(id: TimerId) -> bool {
    let m = module();
    let Some(timer) = m.core.map.find(id) else {
        trace!(id, "timer does not exist");
        return false;
    };

    let prev = timer.cas_state(STATE_WAITING, STATE_CANCELED);
    do_stop(m, &timer, prev);
    prev == STATE_WAITING
}

/// [`stop`] that also clears the caller's handle.
pub fn stop_and_clear(id: &mut Option<TimerId>) -> bool {
    let stopped = match *id {
        Some(id) => stop(id),
        None => false,
    };
    *id = None;
    stopped
}

/// Atomically stops `*id` (when set) and starts a fresh timer, reusing
/// the timer object when it could be safely reclaimed. Returns true iff
/// the old callback was prevented; `*id` always holds the new timer
/// afterwards (or `None` if the controller is dead).
pub fn reset(ctrl: TimerCtrl, delay_ms: u64, cb: TimerCallback, id: &mut Option<TimerId>) -> bool {
    let m = module();
    if !m.ctrls.lock().is_alive(ctrl) {
        warn!(index = ctrl.index, "reset on a dead timer controller");
        *id = None;
        return false;
    }

    let mut stopped = false;
    let mut reusable: Option<Arc<TimerObj>> = None;

    if let Some(old) = *id {
        if let Some(timer) = m.core.map.find(old) {
            let prev = timer.cas_state(STATE_WAITING, STATE_CANCELED);
            stopped = prev == STATE_WAITING;
            if do_stop(m, &timer, prev) {
                reusable = Some(timer);
            }
        } else {
            trace!(id = old, "timer does not exist, starting anew");
        }
    }

    match reusable {
        None => {
            *id = start(ctrl, delay_ms, cb);
        }
        Some(mut timer) => {
            trace!(id = timer.id(), "timer object reused");
            // wait until every other reference (tick thread, other stop
            // calls) has drained before reinitializing
            let mut spins = 0u32;
            loop {
                if Arc::get_mut(&mut timer).is_some() {
                    break;
                }
                spins += 1;
                if spins % 1000 == 0 {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
            *id = Some(do_start(m, timer, ctrl, delay_ms, cb));
        }
    }

    stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn ctrl() -> TimerCtrl {
        init(1000, MSECONDS_PER_TICK, 60_000, "test").expect("controller")
    }

    #[test]
    fn test_timer_fires_once() {
        let c = ctrl();
        let (tx, rx) = mpsc::channel();
        let id = start(c, 20, Box::new(move |tid| tx.send(tid).unwrap())).unwrap();
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired, id);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        cleanup(c);
    }

    #[test]
    fn test_zero_delay_fires_immediately() {
        let c = ctrl();
        let (tx, rx) = mpsc::channel();
        start(c, 0, Box::new(move |_| tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        cleanup(c);
    }

    #[test]
    fn test_stop_before_fire_prevents_callback() {
        let c = ctrl();
        let (tx, rx) = mpsc::channel();
        let id = start(c, 60_000, Box::new(move |_| tx.send(()).unwrap())).unwrap();
        assert!(stop(id));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        // a second stop finds nothing
        assert!(!stop(id));
        cleanup(c);
    }

    #[test]
    fn test_stop_after_fire_returns_false() {
        let c = ctrl();
        let (tx, rx) = mpsc::channel();
        let id = start(c, 10, Box::new(move |_| tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // the worker also removes the timer from the map
        std::thread::sleep(Duration::from_millis(100));
        assert!(!stop(id));
        cleanup(c);
    }

    #[test]
    fn test_stop_during_fire_waits_for_callback() {
        let c = ctrl();
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let id = start(
            c,
            10,
            Box::new(move |_| {
                started_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(300));
                done_tx.send(()).unwrap();
            }),
        )
        .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let begin = Instant::now();
        assert!(!stop(id));
        assert!(begin.elapsed() >= Duration::from_millis(200), "stop must block");
        done_rx.try_recv().unwrap();
        cleanup(c);
    }

    #[test]
    fn test_stop_from_callback_does_not_deadlock() {
        let c = ctrl();
        let (tx, rx) = mpsc::channel();
        start(
            c,
            10,
            Box::new(move |tid| {
                let prevented = stop(tid);
                tx.send(prevented).unwrap();
            }),
        )
        .unwrap();
        let prevented = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!prevented);
        cleanup(c);
    }

    #[test]
    fn test_reset_extends_deadline() {
        let c = ctrl();
        let (tx, rx) = mpsc::channel();
        let (old_tx, old_rx) = mpsc::channel();
        let begin = Instant::now();
        let mut id = Some(start(c, 400, Box::new(move |_| old_tx.send(()).unwrap())).unwrap());

        let stopped = reset(
            c,
            1_000,
            Box::new(move |_| tx.send(Instant::now()).unwrap()),
            &mut id,
        );
        assert!(stopped);
        assert!(id.is_some());

        let fired_at = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(fired_at - begin >= Duration::from_millis(950), "fired too early");
        assert!(old_rx.try_recv().is_err(), "replaced timer must not fire");
        cleanup(c);
    }

    #[test]
    fn test_stop_and_clear_nulls_handle() {
        let c = ctrl();
        let mut id = Some(start(c, 60_000, Box::new(|_| {})).unwrap());
        assert!(stop_and_clear(&mut id));
        assert_eq!(id, None);
        assert!(!stop_and_clear(&mut id));
        cleanup(c);
    }

    #[test]
    fn test_dead_controller_rejected() {
        // the free-list hands out low slots first; the last slot is never
        // allocated during the test run, so this handle is reliably dead
        let c = TimerCtrl { index: MAX_TIMER_CTRL - 1 };
        assert!(start(c, 10, Box::new(|_| {})).is_none());
        let mut id = None;
        assert!(!reset(c, 10, Box::new(|_| {}), &mut id));
        assert_eq!(id, None);
    }

    #[test]
    fn test_controller_slots_recycled() {
        let a = init(1, MSECONDS_PER_TICK, 100, "recycle-a").unwrap();
        cleanup(a);
        // the freed slot returns to the pool and the pool stays usable
        let b = init(1, MSECONDS_PER_TICK, 100, "recycle-b").unwrap();
        cleanup(b);
    }

    #[test]
    fn test_ids_are_monotonic_nonzero() {
        let c = ctrl();
        let a = start(c, 60_000, Box::new(|_| {})).unwrap();
        let b = start(c, 60_000, Box::new(|_| {})).unwrap();
        assert!(b > a);
        assert_ne!(a, 0);
        stop(a);
        stop(b);
        cleanup(c);
    }

    #[test]
    fn test_exactly_one_of_fire_or_stop() {
        // hammer the stop/fire race: for every timer, either stop()
        // returned true (callback prevented) or the callback ran
        use std::sync::atomic::{AtomicUsize, Ordering};

        let c = ctrl();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut ids = Vec::new();
        for _ in 0..64 {
            let fired = fired.clone();
            let id = start(
                c,
                10,
                Box::new(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
            ids.push(id);
        }

        let mut prevented = 0;
        for id in &ids {
            if stop(*id) {
                prevented += 1;
            }
        }
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(prevented + fired.load(Ordering::SeqCst), ids.len());
        cleanup(c);
    }
}

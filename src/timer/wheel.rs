//! The hierarchical timing wheel and its tick thread.
//!
//! Three levels with resolutions of one tick, one second and one minute.
//! A timer with delay `d` goes to the lowest wheel whose span
//! (`resolution × size`) exceeds `d`, clamping to the highest. Slot
//! placement is adjusted against the wheel's next scan time so a timer
//! never fires earlier than requested; it may fire up to one resolution
//! late, which is the accepted inaccuracy of the service.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tracing::error;

use crate::util::now_ms;

use super::{TimerCore, TimerObj, MSECONDS_PER_TICK};

pub(crate) const NUM_WHEELS: usize = 3;

pub(crate) struct Wheel {
    pub(crate) resolution: u64,
    pub(crate) size: u16,
    inner: Mutex<WheelInner>,
}

struct WheelInner {
    index: u16,
    next_scan_at: i64,
    slots: Vec<Vec<Arc<TimerObj>>>,
}

impl Wheel {
    pub(crate) fn new(resolution: u64, size: u16, now: i64) -> Self {
        Self {
            resolution,
            size,
            inner: Mutex::new(WheelInner {
                index: 0,
                next_scan_at: now + resolution as i64,
                slots: vec![Vec::new(); size as usize],
            }),
        }
    }

    /// Total time span covered by one revolution.
    fn span(&self) -> u64 {
        self.resolution * self.size as u64
    }
}

/// Lowest wheel whose span exceeds the delay; the highest wheel catches
/// everything else.
pub(crate) fn select_wheel(wheels: &[Wheel], delay_ms: u64) -> usize {
    for (i, wheel) in wheels.iter().enumerate() {
        if delay_ms < wheel.span() {
            return i;
        }
    }
    wheels.len() - 1
}

pub(crate) fn add_to_wheel(wheels: &[Wheel], timer: &Arc<TimerObj>, delay_ms: u64) {
    let which = select_wheel(wheels, delay_ms);
    let wheel = &wheels[which];

    let expire_at = now_ms() + delay_ms as i64;
    timer.expire_at.store(expire_at, std::sync::atomic::Ordering::Release);

    let mut inner = wheel.inner.lock();

    // place relative to the next scan so the timer cannot fire early
    let mut idx = 0u64;
    if expire_at > inner.next_scan_at {
        let remaining = (expire_at - inner.next_scan_at) as u64;
        idx = remaining.div_ceil(wheel.resolution);
    }

    let slot = ((inner.index as u64 + idx + 1) % wheel.size as u64) as u16;
    timer.wheel.store(which as u8, std::sync::atomic::Ordering::Release);
    timer.slot.store(slot, std::sync::atomic::Ordering::Release);
    inner.slots[slot as usize].push(timer.clone());
}

/// Detaches a timer from its wheel. Returns false when the timer is not
/// on any wheel (already spliced out by the tick thread, or zero-delay).
pub(crate) fn remove_from_wheel(wheels: &[Wheel], timer: &Arc<TimerObj>) -> bool {
    use std::sync::atomic::Ordering;

    let which = timer.wheel.load(Ordering::Acquire) as usize;
    if which >= wheels.len() {
        return false;
    }
    let wheel = &wheels[which];

    let mut inner = wheel.inner.lock();
    // the tick thread may have moved it while we were locking
    if timer.wheel.load(Ordering::Acquire) as usize != which {
        return false;
    }

    let slot = timer.slot.load(Ordering::Acquire) as usize;
    if let Some(pos) = inner.slots[slot].iter().position(|t| Arc::ptr_eq(t, timer)) {
        inner.slots[slot].remove(pos);
        timer.wheel.store(NUM_WHEELS as u8, Ordering::Release);
        true
    } else {
        false
    }
}

/// One scan pass over every wheel: advance each wheel to `now`, splicing
/// timers that are due into the expired batch. Timers in an expiring slot
/// whose deadline lies in a later revolution stay put.
pub(crate) fn scan(wheels: &[Wheel], now: i64, expired: &mut Vec<Arc<TimerObj>>) {
    use std::sync::atomic::Ordering;

    for wheel in wheels {
        let mut inner = wheel.inner.lock();
        while now >= inner.next_scan_at {
            inner.index = (inner.index + 1) % wheel.size;
            let index = inner.index as usize;

            let slot = &mut inner.slots[index];
            let mut i = 0;
            while i < slot.len() {
                if now < slot[i].expire_at.load(Ordering::Acquire) {
                    i += 1;
                    continue;
                }
                let timer = slot.remove(i);
                timer.wheel.store(NUM_WHEELS as u8, Ordering::Release);
                expired.push(timer);
            }

            inner.next_scan_at += wheel.resolution as i64;
        }
    }
}

pub(crate) fn start_tick_thread(core: Arc<TimerCore>, queue: Sender<Arc<TimerObj>>) {
    std::thread::Builder::new()
        .name("tmr-tick".into())
        .spawn(move || {
            let sleep = Duration::from_millis((MSECONDS_PER_TICK / 2).max(1));
            let mut expired = Vec::new();
            loop {
                std::thread::sleep(sleep);
                scan(&core.wheels, now_ms(), &mut expired);
                for timer in expired.drain(..) {
                    if queue.send(timer).is_err() {
                        error!("timer worker queue closed, tick thread exiting");
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn timer tick thread");
}

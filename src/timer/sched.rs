//! Worker pool draining expired timers.
//!
//! Workers pull timer objects off a channel, race the state byte from
//! waiting to expired, run the callback, and finally retire the map
//! entry. A timer whose stop call won the race arrives here in the
//! canceled state and is only unregistered.

use std::sync::Arc;

use crossbeam::channel::Receiver;
use tracing::trace;

use super::{TimerCore, TimerObj};

pub(crate) fn start_workers(n: usize, core: Arc<TimerCore>, rx: Receiver<Arc<TimerObj>>) {
    for worker in 0..n {
        let core = core.clone();
        let rx = rx.clone();
        std::thread::Builder::new()
            .name(format!("tmr-worker-{worker}"))
            .spawn(move || run_worker(core, rx))
            .expect("failed to spawn timer worker");
    }
}

fn run_worker(core: Arc<TimerCore>, rx: Receiver<Arc<TimerObj>>) {
    while let Ok(timer) = rx.recv() {
        let id = timer.id();
        if !timer.fire() {
            trace!(id, "expired timer was already canceled");
        }
        core.map.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::map::TimerMap;
    use crate::timer::{STATE_CANCELED, STATE_STOPPED, STATE_WAITING};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn core() -> Arc<TimerCore> {
        Arc::new(TimerCore { wheels: Vec::new(), map: TimerMap::new(16) })
    }

    fn queued_timer(core: &TimerCore, id: u64) -> Arc<TimerObj> {
        let timer = Arc::new(TimerObj::new());
        timer.id.store(id, Ordering::Release);
        core.map.add(timer.clone());
        timer
    }

    #[test]
    fn test_worker_runs_callback_and_unregisters() {
        let core = core();
        let (tx, rx) = crossbeam::channel::unbounded();
        start_workers(1, core.clone(), rx);

        let (fired_tx, fired_rx) = std::sync::mpsc::channel();
        let timer = queued_timer(&core, 3);
        *timer.cb.lock() = Some(Box::new(move |id| fired_tx.send(id).unwrap()));
        tx.send(timer.clone()).unwrap();

        assert_eq!(fired_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        // state settles and the map entry is gone
        let mut tries = 0;
        while core.map.find(3).is_some() && tries < 100 {
            std::thread::sleep(Duration::from_millis(10));
            tries += 1;
        }
        assert!(core.map.find(3).is_none());
        assert_eq!(timer.state(), STATE_STOPPED);
    }

    #[test]
    fn test_canceled_timer_not_fired() {
        let core = core();
        let (tx, rx) = crossbeam::channel::unbounded();
        start_workers(1, core.clone(), rx);

        let timer = queued_timer(&core, 9);
        let (fired_tx, fired_rx) = std::sync::mpsc::channel::<()>();
        *timer.cb.lock() = Some(Box::new(move |_| fired_tx.send(()).unwrap()));
        timer
            .state
            .compare_exchange(STATE_WAITING, STATE_CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .unwrap();
        tx.send(timer).unwrap();

        assert!(fired_rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(core.map.find(9).is_none());
    }
}

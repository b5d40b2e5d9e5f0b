//! One-shot rendezvous
//!
//! A single-slot, single-waiter signal carrying a payload. It moves through
//!
//! ```text
//! Empty ──wait──▶ Parked(pid) ──signal──▶ Full(v) ──wait──▶ Drained
//!   └──────────────signal───────────────────▲
//! ```
//!
//! and never goes back. A second `signal` is refused, a `wait` on a drained
//! slot gets `None`. Blocking goes through the [`Scheduler`]; a wakeup that
//! races ahead of the park is not lost (see the scheduler contract), and a
//! spurious one just goes round the loop again.

use core::fmt;

use spin::Mutex;

use super::Pid;
use crate::platform::Scheduler;

enum Slot<T> {
    Empty,
    Parked(Pid),
    Full(T),
    Drained,
}

pub struct OneShot<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> OneShot<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Deliver `value` and wake the waiter, if one is parked.
    ///
    /// Returns the value back if the rendezvous was already signaled.
    pub fn signal(&self, value: T, scheduler: &dyn Scheduler) -> Result<(), T> {
        let waiter = {
            let mut slot = self.slot.lock();
            let waiter = match *slot {
                Slot::Full(_) | Slot::Drained => return Err(value),
                Slot::Empty => None,
                Slot::Parked(pid) => Some(pid),
            };
            *slot = Slot::Full(value);
            waiter
        };

        if let Some(pid) = waiter {
            scheduler.unblock(pid);
            scheduler.yield_now();
        }
        Ok(())
    }

    /// Block `me` until the value arrives, then take it.
    pub fn wait(&self, me: Pid, scheduler: &dyn Scheduler) -> Option<T> {
        loop {
            {
                let mut slot = self.slot.lock();
                match core::mem::replace(&mut *slot, Slot::Drained) {
                    Slot::Full(value) => return Some(value),
                    Slot::Drained => return None,
                    Slot::Empty => *slot = Slot::Parked(me),
                    Slot::Parked(other) => {
                        debug_assert_eq!(other, me, "second waiter on a one-shot rendezvous");
                        *slot = Slot::Parked(me);
                    }
                }
            }
            scheduler.block_current();
        }
    }

    /// Whether a value has been delivered (drained or not).
    pub fn is_signaled(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Full(_) | Slot::Drained)
    }
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for OneShot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.slot.lock() {
            Slot::Empty => "empty",
            Slot::Parked(_) => "parked",
            Slot::Full(_) => "full",
            Slot::Drained => "drained",
        };
        write!(f, "OneShot({})", state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosted::ThreadScheduler;
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_signal_before_wait() {
        let scheduler = ThreadScheduler::new();
        scheduler.adopt_current(Pid::INIT);
        let shot = OneShot::new();
        shot.signal(42, &scheduler).unwrap();
        assert!(shot.is_signaled());
        assert_eq!(shot.wait(Pid::INIT, &scheduler), Some(42));
    }

    #[test]
    fn test_second_signal_is_refused() {
        let scheduler = ThreadScheduler::new();
        let shot = OneShot::new();
        shot.signal(1, &scheduler).unwrap();
        assert_eq!(shot.signal(2, &scheduler), Err(2));
    }

    #[test]
    fn test_drained_slot_yields_nothing() {
        let scheduler = ThreadScheduler::new();
        scheduler.adopt_current(Pid::INIT);
        let shot = OneShot::new();
        shot.signal(7, &scheduler).unwrap();
        assert_eq!(shot.wait(Pid::INIT, &scheduler), Some(7));
        assert_eq!(shot.wait(Pid::INIT, &scheduler), None);
        assert_eq!(shot.signal(8, &scheduler), Err(8));
    }

    #[test]
    fn test_waiter_blocks_until_signal() {
        let scheduler = Arc::new(ThreadScheduler::new());
        scheduler.adopt_current(Pid::INIT);
        let shot = Arc::new(OneShot::new());

        let signaler = Arc::clone(&shot);
        let sched = Arc::clone(&scheduler);
        scheduler
            .spawn(
                Pid::FIRST_USER,
                "signaler",
                Box::new(move || {
                    std::thread::sleep(Duration::from_millis(30));
                    signaler.signal(-3, &*sched).unwrap();
                }),
            )
            .unwrap();

        assert_eq!(shot.wait(Pid::INIT, &*scheduler), Some(-3));
        scheduler.join_all();
    }
}

//! Discrete-event simulation clock.
//!
//! The clock only moves when [`Clock::tick`] is called. Alarms are kept in
//! an arena of slots; the pending set is a `Vec` of slot ids sorted
//! ascending by absolute deadline, so equal deadlines fire in the order
//! they were scheduled. Handles are cheap id + weak-reference pairs, which
//! lets the CPU core hold its timer alarms without tying its lifetime to
//! the clock's.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::trace;

type Trigger = Rc<RefCell<dyn FnMut()>>;

struct AlarmSlot {
    deadline: u64,
    scheduled: bool,
    trigger: Trigger,
}

struct ClockInner {
    frequency: u64,
    nanos: u64,
    slots: Vec<AlarmSlot>,
    /// Slot ids sorted ascending by deadline, ties in insertion order.
    pending: Vec<usize>,
}

impl ClockInner {
    fn link(&mut self, id: usize, deadline: u64) {
        self.slots[id].deadline = deadline;
        let slots = &self.slots;
        let pos = self
            .pending
            .partition_point(|&p| slots[p].deadline <= deadline);
        self.pending.insert(pos, id);
        self.slots[id].scheduled = true;
    }

    fn unlink(&mut self, id: usize) {
        if let Some(pos) = self.pending.iter().position(|&p| p == id) {
            self.pending.remove(pos);
        }
        self.slots[id].scheduled = false;
    }
}

/// Shared handle to a virtual clock. Cloning yields another handle to the
/// same clock; the CPU core and the orchestrator each keep one.
#[derive(Clone)]
pub struct Clock {
    inner: Rc<RefCell<ClockInner>>,
}

impl Clock {
    pub fn new(frequency: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ClockInner {
                frequency,
                nanos: 0,
                slots: Vec::new(),
                pending: Vec::new(),
            })),
        }
    }

    /// Tick rate in Hz. Immutable for the lifetime of the clock.
    pub fn frequency(&self) -> u64 {
        self.inner.borrow().frequency
    }

    /// Simulated time in nanoseconds. Never decreases.
    pub fn nanos(&self) -> u64 {
        self.inner.borrow().nanos
    }

    /// Allocates an alarm bound to this clock. Initially unscheduled.
    pub fn create_alarm(&self, trigger: impl FnMut() + 'static) -> Alarm {
        let trigger: Trigger = Rc::new(RefCell::new(trigger));
        let mut inner = self.inner.borrow_mut();
        let id = inner.slots.len();
        inner.slots.push(AlarmSlot {
            deadline: 0,
            scheduled: false,
            trigger,
        });
        Alarm {
            clock: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Advances simulated time by `delta_nanos`, firing every pending alarm
    /// whose deadline falls inside the window, in deadline order.
    ///
    /// Each trigger runs with `nanos` set to its own deadline, and may
    /// schedule or cancel alarms; a newly scheduled alarm still fires within
    /// this same call if its deadline lands inside the remaining window.
    pub fn tick(&self, delta_nanos: u64) {
        let target = self.inner.borrow().nanos + delta_nanos;
        loop {
            let due = {
                let mut inner = self.inner.borrow_mut();
                match inner.pending.first().copied() {
                    Some(id) if inner.slots[id].deadline <= target => {
                        inner.pending.remove(0);
                        inner.slots[id].scheduled = false;
                        inner.nanos = inner.slots[id].deadline;
                        trace!("alarm {} fired at {} ns", id, inner.nanos);
                        Some(Rc::clone(&inner.slots[id].trigger))
                    }
                    _ => None,
                }
            };
            // The borrow is released before the trigger runs so it can
            // re-enter schedule()/cancel().
            match due {
                Some(trigger) => (trigger.borrow_mut())(),
                None => break,
            }
        }
        self.inner.borrow_mut().nanos = target;
    }

    /// Nanoseconds until the earliest pending alarm, or 0 if none.
    pub fn nanos_to_next_alarm(&self) -> u64 {
        let inner = self.inner.borrow();
        match inner.pending.first() {
            Some(&id) => inner.slots[id].deadline - inner.nanos,
            None => 0,
        }
    }
}

/// Handle to one alarm slot. Clones alias the same slot.
#[derive(Clone)]
pub struct Alarm {
    clock: Weak<RefCell<ClockInner>>,
    id: usize,
}

impl Alarm {
    /// Arms the alarm `delta_nanos` after the clock's current time. If the
    /// alarm is already pending, the earlier occurrence is cancelled first,
    /// so a slot is linked at most once.
    pub fn schedule(&self, delta_nanos: u64) {
        let Some(inner) = self.clock.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        if inner.slots[self.id].scheduled {
            inner.unlink(self.id);
        }
        let deadline = inner.nanos + delta_nanos;
        inner.link(self.id, deadline);
    }

    /// Unlinks the alarm from the pending set. No-op if not pending.
    pub fn cancel(&self) {
        if let Some(inner) = self.clock.upgrade() {
            inner.borrow_mut().unlink(self.id);
        }
    }

    pub fn is_scheduled(&self) -> bool {
        match self.clock.upgrade() {
            Some(inner) => inner.borrow().slots[self.id].scheduled,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_alarm(clock: &Clock, log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Alarm {
        let log = Rc::clone(log);
        clock.create_alarm(move || log.borrow_mut().push(tag))
    }

    #[test]
    fn test_alarms_fire_in_deadline_order() {
        let clock = Clock::new(125_000_000);
        let log = Rc::new(RefCell::new(Vec::new()));

        let b = recording_alarm(&clock, &log, "b");
        let a = recording_alarm(&clock, &log, "a");
        let c = recording_alarm(&clock, &log, "c");
        b.schedule(200);
        a.schedule(100);
        c.schedule(300);

        clock.tick(1000);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(clock.nanos(), 1000);
        assert_eq!(clock.nanos_to_next_alarm(), 0);
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let clock = Clock::new(125_000_000);
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = recording_alarm(&clock, &log, "first");
        let second = recording_alarm(&clock, &log, "second");
        first.schedule(500);
        second.schedule(500);

        clock.tick(500);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_partial_window_does_not_fire() {
        let clock = Clock::new(125_000_000);
        let fired = Rc::new(RefCell::new(0));
        let alarm = {
            let fired = Rc::clone(&fired);
            clock.create_alarm(move || *fired.borrow_mut() += 1)
        };
        alarm.schedule(100);

        clock.tick(50);
        assert_eq!(*fired.borrow(), 0);
        assert_eq!(clock.nanos(), 50);
        assert_eq!(clock.nanos_to_next_alarm(), 50);

        clock.tick(50);
        assert_eq!(*fired.borrow(), 1);
        assert_eq!(clock.nanos(), 100);
        assert_eq!(clock.nanos_to_next_alarm(), 0);
        assert!(!alarm.is_scheduled());
    }

    #[test]
    fn test_nanos_accumulates_and_never_decreases() {
        let clock = Clock::new(125_000_000);
        let mut sum = 0;
        for delta in [0, 8, 13, 0, 1000, 7] {
            clock.tick(delta);
            sum += delta;
            assert_eq!(clock.nanos(), sum);
        }
    }

    #[test]
    fn test_trigger_observes_its_own_deadline() {
        let clock = Clock::new(125_000_000);
        let seen = Rc::new(RefCell::new(0));
        let alarm = {
            let clock = clock.clone();
            let seen = Rc::clone(&seen);
            clock.clone().create_alarm(move || *seen.borrow_mut() = clock.nanos())
        };
        alarm.schedule(250);
        clock.tick(1000);
        assert_eq!(*seen.borrow(), 250);
        assert_eq!(clock.nanos(), 1000);
    }

    #[test]
    fn test_reentrant_schedule_fires_within_same_tick() {
        let clock = Clock::new(125_000_000);
        let log = Rc::new(RefCell::new(Vec::new()));

        let b = recording_alarm(&clock, &log, "b");
        let a = {
            let log = Rc::clone(&log);
            let b = b.clone();
            clock.create_alarm(move || {
                log.borrow_mut().push("a");
                b.schedule(50);
            })
        };
        a.schedule(100);

        // b's deadline (150) lands inside the same advance window.
        clock.tick(200);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert_eq!(clock.nanos(), 200);
    }

    #[test]
    fn test_periodic_self_reschedule() {
        let clock = Clock::new(125_000_000);
        let fired = Rc::new(RefCell::new(0u32));
        let slot: Rc<RefCell<Option<Alarm>>> = Rc::new(RefCell::new(None));
        let alarm = {
            let fired = Rc::clone(&fired);
            let slot = Rc::clone(&slot);
            clock.create_alarm(move || {
                *fired.borrow_mut() += 1;
                if let Some(a) = slot.borrow().as_ref() {
                    a.schedule(1_000_000);
                }
            })
        };
        alarm.schedule(1_000_000);
        *slot.borrow_mut() = Some(alarm);

        // A 1 ms periodic timer over a 10 ms window fires ten times.
        clock.tick(10_000_000);
        assert_eq!(*fired.borrow(), 10);
        assert_eq!(clock.nanos_to_next_alarm(), 1_000_000);
    }

    #[test]
    fn test_cancel_removes_pending_alarm() {
        let clock = Clock::new(125_000_000);
        let fired = Rc::new(RefCell::new(0));
        let alarm = {
            let fired = Rc::clone(&fired);
            clock.create_alarm(move || *fired.borrow_mut() += 1)
        };
        alarm.schedule(100);
        assert!(alarm.is_scheduled());
        alarm.cancel();
        assert!(!alarm.is_scheduled());

        clock.tick(1000);
        assert_eq!(*fired.borrow(), 0);

        // Cancelling an unscheduled alarm is a no-op.
        alarm.cancel();
        assert!(!alarm.is_scheduled());
    }

    #[test]
    fn test_reschedule_cancels_prior_occurrence() {
        let clock = Clock::new(125_000_000);
        let fired = Rc::new(RefCell::new(0));
        let alarm = {
            let fired = Rc::clone(&fired);
            clock.create_alarm(move || *fired.borrow_mut() += 1)
        };
        alarm.schedule(100);
        alarm.schedule(500);

        clock.tick(200);
        assert_eq!(*fired.borrow(), 0);
        assert_eq!(clock.nanos_to_next_alarm(), 300);

        clock.tick(400);
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn test_new_alarm_starts_unscheduled() {
        let clock = Clock::new(125_000_000);
        let alarm = clock.create_alarm(|| {});
        assert!(!alarm.is_scheduled());
        assert_eq!(clock.nanos_to_next_alarm(), 0);
        assert_eq!(clock.frequency(), 125_000_000);
    }
}

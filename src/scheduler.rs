use crate::clock::Clock;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Handle to a registered timer or signal handler.
///
/// `cancel` is idempotent and dropping the token cancels it.
pub struct CancelToken {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl CancelToken {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("active", &self.is_active())
            .finish()
    }
}

struct Timer {
    interval_micros: u64,
    next_fire: u64,
    callback: Rc<dyn Fn()>,
}

#[derive(Default)]
struct Sources {
    next_id: u64,
    timers: BTreeMap<u64, Timer>,
}

/// Single-threaded loop of periodic sources.
///
/// Callbacks run from [`MainLoop::dispatch`] on the caller's thread. A source
/// cancelled from inside another callback never fires again, even when it was
/// due in the same round.
#[derive(Clone)]
pub struct MainLoop {
    clock: Rc<dyn Clock>,
    sources: Rc<RefCell<Sources>>,
}

impl MainLoop {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            sources: Rc::new(RefCell::new(Sources::default())),
        }
    }

    /// Runs `callback` every `interval`, first after one full interval.
    pub fn schedule_periodic(&self, interval: Duration, callback: impl Fn() + 'static) -> CancelToken {
        let interval_micros = u64::try_from(interval.as_micros())
            .unwrap_or(u64::MAX)
            .max(1);
        let next_fire = self.clock.now_micros().saturating_add(interval_micros);

        let id = {
            let mut sources = self.sources.borrow_mut();
            let id = sources.next_id;
            sources.next_id += 1;
            sources.timers.insert(
                id,
                Timer {
                    interval_micros,
                    next_fire,
                    callback: Rc::new(callback),
                },
            );
            id
        };

        let weak: Weak<RefCell<Sources>> = Rc::downgrade(&self.sources);
        CancelToken::new(move || {
            if let Some(sources) = weak.upgrade() {
                // Drop the callback after the borrow ends; it may own tokens of its own.
                let removed = sources.borrow_mut().timers.remove(&id);
                drop(removed);
            }
        })
    }

    /// Earliest time any source is due, if any are registered.
    pub fn next_deadline(&self) -> Option<u64> {
        self.sources
            .borrow()
            .timers
            .values()
            .map(|t| t.next_fire)
            .min()
    }

    /// Time left until the next source is due, zero if one is overdue.
    pub fn time_until_next(&self) -> Option<Duration> {
        let now = self.clock.now_micros();
        self.next_deadline()
            .map(|deadline| Duration::from_micros(deadline.saturating_sub(now)))
    }

    pub fn source_count(&self) -> usize {
        self.sources.borrow().timers.len()
    }

    /// Fires every source due at the current clock time. Returns how many ran.
    pub fn dispatch(&self) -> usize {
        let now = self.clock.now_micros();
        let due: Vec<u64> = self
            .sources
            .borrow()
            .timers
            .iter()
            .filter(|(_, t)| t.next_fire <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut fired = 0;
        for id in due {
            let callback = {
                let mut sources = self.sources.borrow_mut();
                let Some(timer) = sources.timers.get_mut(&id) else {
                    continue;
                };
                timer.next_fire = timer.next_fire.saturating_add(timer.interval_micros);
                if timer.next_fire <= now {
                    // Late by more than a whole interval: skip missed fires.
                    timer.next_fire = now.saturating_add(timer.interval_micros);
                }
                timer.callback.clone()
            };
            callback();
            fired += 1;
        }
        fired
    }
}

impl fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("sources", &self.source_count())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

//! Timer queue
//!
//! The host timer facility `timeout` relies on. Timers live in a thread-wide
//! queue; the [`Engine`](crate::Engine) decides when they fire. The clock is
//! either wall time (optionally dilated by a rate) or a virtual clock that only
//! moves when stepped.

use crate::pq::MinPq;
use crate::queue::Job;
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// Clock driving the timer queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClockMode {
    #[default]
    Realtime,
    Virtual,
}

/// Handle returned by [`set_timeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

pub(crate) struct TimerQueue {
    mode: ClockMode,

    /// Time dilation anchors (realtime only).
    rate: f64,
    wall_anchor: Instant,
    logical_anchor: Duration,

    /// Virtual clock.
    virtual_now: Duration,

    timers: MinPq<Job>,
}

impl TimerQueue {
    fn new(mode: ClockMode, rate: f64) -> Self {
        Self {
            mode,
            rate: sanitize_rate(rate),
            wall_anchor: Instant::now(),
            logical_anchor: Duration::ZERO,
            virtual_now: Duration::ZERO,
            timers: MinPq::new(),
        }
    }

    fn now(&self) -> Duration {
        match self.mode {
            ClockMode::Virtual => self.virtual_now,
            ClockMode::Realtime => {
                let wall = self.wall_anchor.elapsed();
                self.logical_anchor + wall.mul_f64(self.rate)
            }
        }
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

thread_local! {
    static TIMERS: RefCell<TimerQueue> = RefCell::new(TimerQueue::new(ClockMode::Realtime, 1.0));
}

/// Replace this thread's timer queue with an empty one on a fresh clock.
pub(crate) fn reset(mode: ClockMode, rate: f64) {
    let old = TIMERS.with(|t| std::mem::replace(&mut *t.borrow_mut(), TimerQueue::new(mode, rate)));
    drop(old);
}

/// Run `job` once `delay` has elapsed on the timer clock.
pub fn set_timeout<F>(delay: Duration, job: F) -> TimerId
where
    F: FnOnce() + 'static,
{
    TIMERS.with(|t| {
        let mut t = t.borrow_mut();
        let deadline = t.now() + delay;
        TimerId(t.timers.push(deadline, Box::new(job)))
    })
}

/// Cancel a timer. Returns false if it already fired or was cleared.
pub fn clear_timeout(id: TimerId) -> bool {
    let removed = TIMERS.with(|t| t.borrow_mut().timers.remove(id.0));
    removed.is_some()
}

/// Current time on the timer clock.
pub fn now() -> Duration {
    TIMERS.with(|t| t.borrow().now())
}

pub fn mode() -> ClockMode {
    TIMERS.with(|t| t.borrow().mode)
}

pub(crate) fn rate() -> f64 {
    TIMERS.with(|t| t.borrow().rate)
}

/// Earliest live deadline, if any.
pub fn next_deadline() -> Option<Duration> {
    TIMERS.with(|t| t.borrow_mut().timers.peek_deadline())
}

pub fn has_pending_timers() -> bool {
    TIMERS.with(|t| !t.borrow().timers.is_empty())
}

/// Move the virtual clock forward. Never moves it backwards.
pub(crate) fn set_virtual_now(target: Duration) {
    TIMERS.with(|t| {
        let mut t = t.borrow_mut();
        if target > t.virtual_now {
            t.virtual_now = target;
        }
    });
}

/// Pop every timer sharing the earliest deadline, if that deadline is due at
/// `now`. Jobs come back in the order they were set.
pub(crate) fn take_due(now: Duration) -> Vec<Job> {
    TIMERS.with(|t| {
        let mut t = t.borrow_mut();
        let Some(deadline) = t.timers.peek_deadline() else {
            return Vec::new();
        };
        if deadline > now {
            return Vec::new();
        }

        let mut batch = Vec::new();
        while t.timers.peek_deadline() == Some(deadline) {
            if let Some((_, _, job)) = t.timers.pop() {
                batch.push(job);
            }
        }
        batch
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_virtual_clock_only_moves_when_set() {
        reset(ClockMode::Virtual, 1.0);
        assert_eq!(mode(), ClockMode::Virtual);
        assert_eq!(now(), Duration::ZERO);
        set_virtual_now(Duration::from_millis(30));
        assert_eq!(now(), Duration::from_millis(30));
        set_virtual_now(Duration::from_millis(10));
        assert_eq!(now(), Duration::from_millis(30));
    }

    #[test]
    fn test_take_due_batches_equal_deadlines() {
        reset(ClockMode::Virtual, 1.0);
        let order = Rc::new(RefCell::new(Vec::new()));
        for (delay, tag) in [(20, "late"), (10, "a"), (10, "b")] {
            let o = order.clone();
            set_timeout(Duration::from_millis(delay), move || o.borrow_mut().push(tag));
        }

        assert!(take_due(Duration::from_millis(5)).is_empty());
        assert_eq!(next_deadline(), Some(Duration::from_millis(10)));

        for job in take_due(Duration::from_millis(15)) {
            job();
        }
        assert_eq!(*order.borrow(), vec!["a", "b"]);
        assert_eq!(next_deadline(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_clear_timeout() {
        reset(ClockMode::Virtual, 1.0);
        let id = set_timeout(Duration::from_millis(1), || {});
        assert!(has_pending_timers());
        assert!(clear_timeout(id));
        assert!(!clear_timeout(id));
        assert!(!has_pending_timers());
        assert_eq!(next_deadline(), None);
    }

    #[test]
    fn test_invalid_rate_falls_back() {
        reset(ClockMode::Realtime, f64::NAN);
        assert_eq!(rate(), 1.0);
        reset(ClockMode::Realtime, -3.0);
        assert_eq!(rate(), 1.0);
        reset(ClockMode::Realtime, 4.0);
        assert_eq!(rate(), 4.0);
    }
}

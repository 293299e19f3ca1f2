//! Engine - realtime and virtual-clock drivers
//!
//! The engine ties the job queue to the timer queue. It stands in for the host
//! event loop: the queue asks it to drain "soon", and it fires timers as their
//! deadlines come up, draining the queue after every timer callback.
//! - Realtime: sleeps with spin_sleep until the next deadline
//! - Virtual: jumps the clock, or steps it explicitly with `advance_to`

use crate::diagnostics;
use crate::error::{EngineError, Failure};
use crate::queue;
use crate::timer::{self, ClockMode};
use crate::value::Value;
use spin_sleep::SpinSleeper;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Configuration for an engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub clock: ClockMode,
    /// Logical seconds per wall second (realtime only).
    pub rate: f64,
    /// Silence the unhandled-rejection warning.
    pub suppress_unhandled: bool,
    /// Upper bound on timeslices processed by a single `advance_to` or `run_until`.
    pub max_timeslices: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Realtime,
            rate: 1.0,
            suppress_unhandled: false,
            max_timeslices: 200_000,
        }
    }
}

/// Drives the calling thread's job queue and timers.
///
/// Creating an engine resets the thread's queue and timer state; keep one
/// engine per thread.
pub struct Engine {
    config: EngineConfig,
    sleeper: SpinSleeper,
    wakeups: Rc<Cell<u64>>,
}

impl Engine {
    /// Create a new engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        queue::reset();
        timer::reset(config.clock, config.rate);
        diagnostics::set_suppress_unhandled(config.suppress_unhandled);

        let wakeups = Rc::new(Cell::new(0));
        let w = wakeups.clone();
        queue::set_run_soon_hook(move || {
            w.set(w.get() + 1);
            trace!(wakeup = w.get(), "drain requested");
        });

        debug!(clock = ?config.clock, rate = config.rate, "engine started");
        Self {
            config,
            sleeper: SpinSleeper::default(),
            wakeups,
        }
    }

    /// Engine on a virtual clock starting at zero.
    pub fn with_virtual_clock() -> Self {
        Self::new(EngineConfig {
            clock: ClockMode::Virtual,
            ..Default::default()
        })
    }

    /// Engine on the wall clock.
    pub fn realtime() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time on the engine's clock.
    pub fn now(&self) -> Duration {
        timer::now()
    }

    /// How many times the queue asked for a drain.
    pub fn wakeups(&self) -> u64 {
        self.wakeups.get()
    }

    /// Drain the job queue without touching timers.
    pub fn run_until_stalled(&self) -> usize {
        queue::run_until_stalled()
    }

    /// Fire the timers due at `now` that share the earliest deadline.
    fn fire_timeslice(&self, now: Duration) -> usize {
        let batch = timer::take_due(now);
        let fired = batch.len();
        for job in batch {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                diagnostics::report_error(&Value::Error(Failure::from_panic(payload)));
            }
            queue::run_until_stalled();
        }
        fired
    }

    /// Run until no jobs and no timers remain.
    pub fn run_until_idle(&mut self) -> Result<(), EngineError> {
        self.run_until(|| false).map(|_| ())
    }

    /// Run until `is_done` holds or nothing is left to run.
    /// Returns whether `is_done` was satisfied.
    ///
    /// Fails once more than `max_timeslices` timeslices fire in one call.
    pub fn run_until<F>(&mut self, is_done: F) -> Result<bool, EngineError>
    where
        F: Fn() -> bool,
    {
        let limit = self.config.max_timeslices;
        let mut processed = 0;
        loop {
            self.run_until_stalled();

            if is_done() {
                return Ok(true);
            }

            let Some(next_t) = timer::next_deadline() else {
                return Ok(false);
            };

            let now = timer::now();
            if next_t <= now {
                self.fire_timeslice(now);
                processed += 1;
                if processed > limit {
                    return Err(EngineError::TimesliceLimit { limit });
                }
                continue;
            }

            match self.config.clock {
                ClockMode::Virtual => timer::set_virtual_now(next_t),
                ClockMode::Realtime => {
                    let dt_logical = next_t - now;
                    let dt_wall = dt_logical.div_f64(timer::rate());
                    self.sleeper.sleep(dt_wall);
                }
            }
        }
    }

    /// Advance the virtual clock to `target`.
    /// Processes all due timeslices, draining the queue between each.
    pub fn advance_to(&mut self, target: Duration) -> Result<(), EngineError> {
        if self.config.clock != ClockMode::Virtual {
            return Err(EngineError::ClockNotVirtual);
        }

        // Jobs queued before stepping may set their own timers.
        self.run_until_stalled();

        let limit = self.config.max_timeslices;
        let mut processed = 0;
        while let Some(next_t) = timer::next_deadline() {
            if next_t > target {
                break;
            }
            timer::set_virtual_now(next_t);
            self.fire_timeslice(next_t);

            processed += 1;
            if processed > limit {
                return Err(EngineError::TimesliceLimit { limit });
            }
        }

        timer::set_virtual_now(target);
        self.run_until_stalled();
        trace!(now = ?target, timeslices = processed, "advanced");
        Ok(())
    }

    /// Step the virtual clock by `dt`.
    pub fn advance_by(&mut self, dt: Duration) -> Result<(), EngineError> {
        let target = timer::now() + dt;
        self.advance_to(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::{Deferred, State};
    use crate::timer::set_timeout;
    use std::cell::RefCell;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_virtual_stepping() {
        let mut engine = Engine::with_virtual_clock();
        let log = Rc::new(RefCell::new(Vec::new()));

        for delay in [30, 10, 20] {
            let l = log.clone();
            set_timeout(ms(delay), move || l.borrow_mut().push(delay));
        }

        engine.advance_by(ms(15)).unwrap();
        assert_eq!(*log.borrow(), vec![10]);
        assert_eq!(engine.now(), ms(15));

        engine.advance_by(ms(15)).unwrap();
        assert_eq!(*log.borrow(), vec![10, 20, 30]);
    }

    #[test]
    fn test_queue_drains_after_each_timer() {
        let mut engine = Engine::with_virtual_clock();
        let log = Rc::new(RefCell::new(Vec::new()));

        let d = Deferred::new();
        let l = log.clone();
        d.then(move |v| {
            l.borrow_mut().push(format!("then {:?}", v));
            Ok(v)
        });

        let l = log.clone();
        let target = d.clone();
        set_timeout(ms(5), move || {
            l.borrow_mut().push("timer a".to_string());
            target.resolve(1);
        });
        let l = log.clone();
        set_timeout(ms(5), move || l.borrow_mut().push("timer b".to_string()));

        engine.run_until_idle().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["timer a".to_string(), "then 1".to_string(), "timer b".to_string()]
        );
        assert_eq!(engine.now(), ms(5));
    }

    #[test]
    fn test_run_until_stops_when_done() {
        let mut engine = Engine::with_virtual_clock();
        let d = Deferred::new();
        let target = d.clone();
        set_timeout(ms(40), move || target.resolve("late"));
        set_timeout(ms(100), || {});

        let probe = d.clone();
        assert!(engine.run_until(move || probe.state() != State::Pending).unwrap());
        assert_eq!(engine.now(), ms(40));
        assert!(timer::has_pending_timers());
    }

    #[test]
    fn test_wakeups_count_transitions() {
        let engine = Engine::with_virtual_clock();
        let d = Deferred::new();
        d.then(Ok);
        d.then(Ok);
        d.resolve(1);
        assert_eq!(engine.wakeups(), 1);
        engine.run_until_stalled();

        crate::queue::soon(|| {});
        assert_eq!(engine.wakeups(), 2);
    }

    #[test]
    fn test_advance_requires_virtual_clock() {
        let mut engine = Engine::realtime();
        assert_eq!(engine.advance_by(ms(1)), Err(EngineError::ClockNotVirtual));
    }

    #[test]
    fn test_runaway_timers_hit_limit() {
        fn rearm() {
            set_timeout(Duration::ZERO, rearm);
        }

        let mut engine = Engine::new(EngineConfig {
            clock: ClockMode::Virtual,
            max_timeslices: 50,
            ..Default::default()
        });
        rearm();
        assert_eq!(
            engine.advance_by(ms(1)),
            Err(EngineError::TimesliceLimit { limit: 50 })
        );
    }

    #[test]
    fn test_run_until_idle_stops_runaway_timers() {
        fn rearm() {
            set_timeout(Duration::ZERO, rearm);
        }

        let mut engine = Engine::new(EngineConfig {
            clock: ClockMode::Virtual,
            max_timeslices: 50,
            ..Default::default()
        });
        rearm();
        assert_eq!(
            engine.run_until_idle(),
            Err(EngineError::TimesliceLimit { limit: 50 })
        );

        // A bounded set of timers under the limit still completes.
        let fired = Rc::new(Cell::new(0));
        let mut engine = Engine::new(EngineConfig {
            clock: ClockMode::Virtual,
            max_timeslices: 50,
            ..Default::default()
        });
        for delay in 0..10 {
            let f = fired.clone();
            set_timeout(ms(delay), move || f.set(f.get() + 1));
        }
        assert_eq!(engine.run_until_idle(), Ok(()));
        assert_eq!(fired.get(), 10);
    }

    #[test]
    fn test_realtime_sleeps_until_deadline() {
        let mut engine = Engine::new(EngineConfig {
            rate: 10.0,
            ..Default::default()
        });
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        // 100ms logical at 10x is about 10ms of wall time.
        set_timeout(ms(100), move || f.set(true));

        let started = std::time::Instant::now();
        engine.run_until_idle().unwrap();
        assert!(fired.get());
        assert!(started.elapsed() >= ms(9));
    }
}

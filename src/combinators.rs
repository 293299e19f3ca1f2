//! Combinators and conveniences
//!
//! Settled constructors, `all`, and the `timeout` / `finally` continuations.

use crate::deferred::Deferred;
use crate::dispatch::handler;
use crate::error::Failure;
use crate::timer;
use crate::value::{Outcome, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// A deferred value resolved with `value` (adopting it if awaitable).
pub fn resolve(value: impl Into<Value>) -> Deferred {
    Deferred::resolved(value)
}

/// A deferred value rejected with `reason`.
pub fn reject(reason: impl Into<Value>) -> Deferred {
    Deferred::rejected(reason)
}

impl Deferred {
    pub fn resolved(value: impl Into<Value>) -> Deferred {
        let d = Deferred::new();
        d.resolve(value);
        d
    }

    /// The continuation list is allocated up front, so settling dispatches
    /// instead of scheduling an unhandled-rejection check.
    pub fn rejected(reason: impl Into<Value>) -> Deferred {
        let d = Deferred::new();
        d.reserve_continuations();
        d.reject(reason);
        d
    }

    /// Race this value against a timer.
    ///
    /// The returned value settles with this one's outcome, or rejects with
    /// [`Failure::Timeout`] (message `"Timeout"` unless overridden) if
    /// `duration` elapses first. This value itself is never affected.
    pub fn timeout(&self, duration: Duration, message: Option<&str>) -> Deferred {
        let racer = Deferred::new();
        let failure = Failure::timeout(message);

        let on_timer = racer.clone();
        let timer_id = timer::set_timeout(duration, move || on_timer.reject(failure));

        let (on_value, on_reason) = (racer.clone(), racer.clone());
        self.then_or(
            move |v| {
                timer::clear_timeout(timer_id);
                on_value.resolve(v);
                Ok(Value::Undefined)
            },
            move |r| {
                timer::clear_timeout(timer_id);
                on_reason.reject(r);
                Ok(Value::Undefined)
            },
        );
        racer
    }

    /// Run `f` on either outcome, like `then_or(f, f)`.
    ///
    /// The derived value settles with whatever `f` returns; a rejection that
    /// `f` returns `Ok` from becomes a fulfillment.
    pub fn finally<F>(&self, f: F) -> Deferred
    where
        F: Fn(Value) -> Outcome + 'static,
    {
        let f = Rc::new(f);
        let g = f.clone();
        self.then_with(
            Some(handler(move |v| (*f)(v))),
            Some(handler(move |r| (*g)(r))),
        )
    }
}

struct AllState {
    results: Vec<Value>,
    outstanding: usize,
}

/// Wait for every item.
///
/// Fulfills with a list ordered like the input once all items fulfill, or
/// rejects with the first rejection reason seen. Items that are not awaitable
/// count as already fulfilled with themselves.
pub fn all<I>(items: I) -> Deferred
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let items: Vec<Value> = items.into_iter().map(Into::into).collect();
    let aggregate = Deferred::new();
    if items.is_empty() {
        aggregate.resolve(Value::list(Vec::new()));
        return aggregate;
    }

    let state = Rc::new(RefCell::new(AllState {
        results: vec![Value::Undefined; items.len()],
        outstanding: items.len(),
    }));

    for (index, item) in items.into_iter().enumerate() {
        let source = match item {
            Value::Deferred(d) => d,
            other => Deferred::resolved(other),
        };

        let (state, on_value, on_reason) = (state.clone(), aggregate.clone(), aggregate.clone());
        source.then_or(
            move |v| {
                let done = {
                    let mut s = state.borrow_mut();
                    s.results[index] = v;
                    s.outstanding -= 1;
                    (s.outstanding == 0).then(|| std::mem::take(&mut s.results))
                };
                if let Some(results) = done {
                    on_value.resolve(Value::list(results));
                }
                Ok(Value::Undefined)
            },
            move |r| {
                on_reason.reject(r);
                Ok(Value::Undefined)
            },
        );
    }
    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::State;
    use crate::queue::run_until_stalled;

    #[test]
    fn test_resolved_and_rejected() {
        let d = resolve(100);
        assert_eq!(d.outcome(), Some(Value::from(100)));

        let d = reject("nope");
        assert_eq!(d.state(), State::Rejected);
        assert_eq!(d.outcome(), Some(Value::from("nope")));
    }

    #[test]
    fn test_all_empty_resolves_immediately() {
        let d = all(Vec::<Value>::new());
        assert_eq!(d.outcome(), Some(Value::list(vec![])));
    }

    #[test]
    fn test_all_orders_by_index() {
        let (a, b, c) = (Deferred::new(), Deferred::new(), Deferred::new());
        let d = all([a.clone(), b.clone(), c.clone()]);

        c.resolve("c");
        run_until_stalled();
        a.resolve("a");
        run_until_stalled();
        assert!(d.is_pending());
        b.resolve("b");
        run_until_stalled();

        assert_eq!(
            d.outcome(),
            Some(Value::list(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn test_all_passes_plain_values_through() {
        let p = Deferred::new();
        let d = all(vec![Value::from(&p), Value::from(123), Value::from("test"), Value::Null]);
        p.resolve(3);
        run_until_stalled();
        assert_eq!(
            d.outcome(),
            Some(Value::list(vec![3.into(), 123.into(), "test".into(), Value::Null]))
        );
    }

    #[test]
    fn test_all_first_rejection_wins() {
        let (a, b) = (Deferred::new(), Deferred::new());
        let d = all([a.clone(), b.clone()]);
        d.catch(Ok);
        b.reject("b failed");
        a.reject("a failed");
        run_until_stalled();
        assert_eq!(d.state(), State::Rejected);
        assert_eq!(d.outcome(), Some(Value::from("b failed")));
    }

    #[test]
    fn test_finally_runs_on_both_sides() {
        let hits = Rc::new(RefCell::new(Vec::new()));

        let h = hits.clone();
        let ok = resolve(true).finally(move |v| {
            h.borrow_mut().push(v);
            Ok(Value::from("cleaned"))
        });
        let h = hits.clone();
        let failed = reject("rejected").finally(move |r| {
            h.borrow_mut().push(r);
            Ok(Value::Undefined)
        });
        run_until_stalled();

        assert_eq!(*hits.borrow(), vec![Value::from(true), Value::from("rejected")]);
        assert_eq!(ok.outcome(), Some(Value::from("cleaned")));
        // The rejection is not re-raised after the handler returns Ok.
        assert_eq!(failed.state(), State::Fulfilled);
    }
}

//! Continuation dispatch
//!
//! Runs a registered handler against a settled outcome and feeds the result
//! into the derived deferred value. Missing handlers pass the outcome through
//! unchanged, which is what lets rejections bubble down a chain.

use crate::deferred::Deferred;
use crate::error::Failure;
use crate::value::{Outcome, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A one-shot continuation handler.
pub type Handler = Box<dyn FnOnce(Value) -> Outcome>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: FnOnce(Value) -> Outcome + 'static,
{
    Box::new(f)
}

/// Terminal state a dispatch runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Settlement {
    Fulfilled,
    Rejected,
}

/// Run `f`, turning a panic into a thrown [`Failure::Panicked`].
pub(crate) fn guarded<T, F>(f: F) -> Result<T, Value>
where
    F: FnOnce() -> Result<T, Value>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Value::Error(Failure::from_panic(payload))),
    }
}

/// A registered pair of handlers and the derived value it settles.
pub(crate) struct Continuation {
    on_fulfilled: Option<Handler>,
    on_rejected: Option<Handler>,
    derived: Deferred,
}

impl Continuation {
    pub(crate) fn new(
        on_fulfilled: Option<Handler>,
        on_rejected: Option<Handler>,
        derived: Deferred,
    ) -> Self {
        Self {
            on_fulfilled,
            on_rejected,
            derived,
        }
    }

    pub(crate) fn observes_rejection(&self) -> bool {
        self.on_rejected.is_some()
    }

    pub(crate) fn dispatch(self, settlement: Settlement, outcome: Value) {
        match settlement {
            Settlement::Fulfilled => self.dispatch_fulfilled(outcome),
            Settlement::Rejected => self.dispatch_rejected(outcome),
        }
    }

    fn dispatch_fulfilled(self, value: Value) {
        match self.on_fulfilled {
            Some(h) => settle_from(&self.derived, guarded(|| h(value))),
            None => self.derived.resolve(value),
        }
    }

    fn dispatch_rejected(self, reason: Value) {
        match self.on_rejected {
            Some(h) => settle_from(&self.derived, guarded(|| h(reason))),
            None => self.derived.reject(reason),
        }
    }
}

fn settle_from(derived: &Deferred, outcome: Outcome) {
    match outcome {
        Ok(v) => derived.resolve(v),
        Err(e) => derived.reject(e),
    }
}

/// Dispatch every record in registration order.
pub(crate) fn dispatch_all(records: Vec<Continuation>, settlement: Settlement, outcome: Value) {
    for record in records {
        record.dispatch(settlement, outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::State;

    #[test]
    fn test_guarded_converts_panic() {
        let r: Result<(), Value> = guarded(|| panic!("boom"));
        assert_eq!(r, Err(Value::Error(Failure::Panicked("boom".into()))));
    }

    #[test]
    fn test_missing_handler_passes_through() {
        let derived = Deferred::new();
        Continuation::new(None, None, derived.clone()).dispatch(Settlement::Fulfilled, 4.into());
        assert_eq!(derived.state(), State::Fulfilled);
        assert_eq!(derived.outcome(), Some(Value::from(4)));

        let derived = Deferred::new();
        derived.catch(|_| Ok(Value::Undefined));
        Continuation::new(None, None, derived.clone()).dispatch(Settlement::Rejected, "no".into());
        assert_eq!(derived.state(), State::Rejected);
        assert_eq!(derived.outcome(), Some(Value::from("no")));
    }

    #[test]
    fn test_handler_error_rejects_derived() {
        let derived = Deferred::new();
        derived.catch(|_| Ok(Value::Undefined));
        let record = Continuation::new(
            Some(handler(|_| Err(Value::error("thrown")))),
            None,
            derived.clone(),
        );
        record.dispatch(Settlement::Fulfilled, 1.into());
        assert_eq!(derived.outcome(), Some(Value::error("thrown")));
    }

    #[test]
    fn test_rejection_handler_recovers() {
        let derived = Deferred::new();
        let record = Continuation::new(
            None,
            Some(handler(|reason| Ok(Value::list(vec![reason])))),
            derived.clone(),
        );
        assert!(record.observes_rejection());
        record.dispatch(Settlement::Rejected, "why".into());
        assert_eq!(derived.state(), State::Fulfilled);
        assert_eq!(derived.outcome(), Some(Value::list(vec!["why".into()])));
    }

    #[test]
    fn test_handler_panic_rejects_derived() {
        let derived = Deferred::new();
        derived.catch(|_| Ok(Value::Undefined));
        let record = Continuation::new(Some(handler(|_| panic!("bad handler"))), None, derived.clone());
        record.dispatch(Settlement::Fulfilled, 1.into());
        assert_eq!(
            derived.outcome(),
            Some(Value::Error(Failure::Panicked("bad handler".into())))
        );
    }
}

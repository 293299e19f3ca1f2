//! Settlement state machine
//!
//! A [`Deferred`] settles exactly once. Continuations registered on it never
//! run inside the call that registers them or the call that settles it; every
//! dispatch is handed to the job queue.

use crate::diagnostics;
use crate::dispatch::{dispatch_all, guarded, handler, Continuation, Handler, Settlement};
use crate::error::{ConstructionError, Failure};
use crate::queue::soon;
use crate::value::{Callable, Outcome, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

static DEFERRED_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_deferred_id() -> u64 {
    DEFERRED_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Observable state of a deferred value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

impl From<Settlement> for State {
    fn from(s: Settlement) -> Self {
        match s {
            Settlement::Fulfilled => State::Fulfilled,
            Settlement::Rejected => State::Rejected,
        }
    }
}

struct Shared {
    id: u64,
    inner: RefCell<Inner>,
}

struct Inner {
    state: State,
    /// Meaningful once `state` is not `Pending`.
    outcome: Value,
    /// `None` until the first registration. Taken whole at settlement.
    continuations: Option<Vec<Continuation>>,
    handled: bool,
}

/// A value that has not produced its outcome yet.
///
/// Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct Deferred(Rc<Shared>);

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl Deferred {
    /// Create a pending instance.
    pub fn new() -> Self {
        Self(Rc::new(Shared {
            id: next_deferred_id(),
            inner: RefCell::new(Inner {
                state: State::Pending,
                outcome: Value::Undefined,
                continuations: None,
                handled: false,
            }),
        }))
    }

    /// Create an instance and hand its resolve/reject capabilities to `init`.
    ///
    /// If `init` returns `Err` or panics before settling the instance, the
    /// instance is rejected with that reason.
    pub fn with<F>(init: F) -> Self
    where
        F: FnOnce(Resolver, Resolver) -> Result<(), Value>,
    {
        let d = Self::new();
        let (resolve, reject) = (d.resolver(), d.rejecter());
        if let Err(reason) = guarded(|| init(resolve, reject)) {
            d.reject(reason);
        }
        d
    }

    /// Create an instance from a dynamic initializer.
    ///
    /// `Undefined` and `Null` mean "no initializer". A `Function` is called
    /// with a resolve callable and a reject callable. Any other value is not an
    /// initializer at all and fails synchronously.
    pub fn from_initializer(init: Value) -> Result<Self, ConstructionError> {
        match init {
            Value::Undefined | Value::Null => Ok(Self::new()),
            Value::Function(f) => Ok(Self::with(move |resolve, reject| {
                f.call(&[resolve.into_value(), reject.into_value()])
                    .map(|_| ())
            })),
            other => Err(ConstructionError::NotCallable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Capability that resolves this instance.
    pub fn resolver(&self) -> Resolver {
        Resolver {
            target: self.clone(),
            settlement: Settlement::Fulfilled,
        }
    }

    /// Capability that rejects this instance.
    pub fn rejecter(&self) -> Resolver {
        Resolver {
            target: self.clone(),
            settlement: Settlement::Rejected,
        }
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn state(&self) -> State {
        self.0.inner.borrow().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// The stored outcome, once settled.
    pub fn outcome(&self) -> Option<Value> {
        let inner = self.0.inner.borrow();
        match inner.state {
            State::Pending => None,
            _ => Some(inner.outcome.clone()),
        }
    }

    /// Whether a continuation is known to observe a rejection of this instance.
    pub fn is_handled(&self) -> bool {
        self.0.inner.borrow().handled
    }

    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Settle with `value`, adopting it first if it is awaitable.
    ///
    /// No-op once settled. Resolving with the instance itself rejects it with
    /// [`Failure::SelfResolution`].
    pub fn resolve(&self, value: impl Into<Value>) {
        let value = value.into();
        if !self.is_pending() {
            return;
        }

        if let Value::Deferred(other) = &value {
            if other.ptr_eq(self) {
                self.reject(Failure::SelfResolution);
                return;
            }
        }

        match value.probe_chain() {
            Err(reason) => self.reject(reason),
            Ok(Some(chain)) => self.adopt(chain, &value),
            Ok(None) => self.settle(Settlement::Fulfilled, value),
        }
    }

    /// Settle as rejected with `reason`. No-op once settled.
    pub fn reject(&self, reason: impl Into<Value>) {
        self.settle(Settlement::Rejected, reason.into());
    }

    /// Hand a fresh pair of one-shot resolvers to a chaining callable.
    /// Settlement is left to whichever resolver fires first.
    fn adopt(&self, chain: Callable, source: &Value) {
        trace!(deferred = self.id(), source = ?source, "adopting awaitable");
        let guard = AdoptionGuard::new();
        let on_value = {
            let (target, guard) = (self.clone(), guard.clone());
            Callable::unary(move |v| {
                if guard.consume() {
                    target.resolve(v);
                }
                Ok(Value::Undefined)
            })
        };
        let on_reason = {
            let (target, guard) = (self.clone(), guard.clone());
            Callable::unary(move |r| {
                if guard.consume() {
                    target.reject(r);
                }
                Ok(Value::Undefined)
            })
        };

        let args = [Value::Function(on_value), Value::Function(on_reason)];
        if let Err(reason) = guarded(|| chain.call(&args)) {
            if guard.consume() {
                self.reject(reason);
            }
        }
    }

    fn settle(&self, settlement: Settlement, outcome: Value) {
        let continuations = {
            let mut inner = self.0.inner.borrow_mut();
            if inner.state != State::Pending {
                return;
            }
            inner.state = settlement.into();
            inner.outcome = outcome.clone();
            inner.continuations.take()
        };
        trace!(deferred = self.id(), state = ?State::from(settlement), "settled");

        match (continuations, settlement) {
            (Some(records), _) => soon(move || dispatch_all(records, settlement, outcome)),
            (None, Settlement::Rejected) => {
                let me = self.clone();
                soon(move || diagnostics::check_unhandled(&me, &outcome));
            }
            (None, Settlement::Fulfilled) => {}
        }
    }

    /// Pre-allocate the continuation list. A rejection settled with an
    /// allocated (even empty) list dispatches instead of scheduling the
    /// unhandled-rejection check.
    pub(crate) fn reserve_continuations(&self) {
        self.0
            .inner
            .borrow_mut()
            .continuations
            .get_or_insert_with(Vec::new);
    }

    /// Register handlers and return the derived value they settle.
    ///
    /// Handlers always run from the job queue, even if this instance is
    /// already settled.
    pub fn then_with(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Deferred {
        let derived = Deferred::new();
        let record = Continuation::new(on_fulfilled, on_rejected, derived.clone());

        let settled = {
            let mut inner = self.0.inner.borrow_mut();
            if record.observes_rejection() {
                inner.handled = true;
            }
            match inner.state {
                State::Pending => {
                    inner.continuations.get_or_insert_with(Vec::new).push(record);
                    None
                }
                State::Fulfilled => {
                    inner.handled = true;
                    Some((Settlement::Fulfilled, inner.outcome.clone(), record))
                }
                State::Rejected => {
                    inner.handled = true;
                    Some((Settlement::Rejected, inner.outcome.clone(), record))
                }
            }
        };

        if let Some((settlement, outcome, record)) = settled {
            soon(move || record.dispatch(settlement, outcome));
        }
        derived
    }

    /// Register a fulfillment handler.
    pub fn then<F>(&self, on_fulfilled: F) -> Deferred
    where
        F: FnOnce(Value) -> Outcome + 'static,
    {
        self.then_with(Some(handler(on_fulfilled)), None)
    }

    /// Register both a fulfillment and a rejection handler.
    pub fn then_or<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred
    where
        F: FnOnce(Value) -> Outcome + 'static,
        R: FnOnce(Value) -> Outcome + 'static,
    {
        self.then_with(Some(handler(on_fulfilled)), Some(handler(on_rejected)))
    }

    /// Register a rejection handler.
    pub fn catch<R>(&self, on_rejected: R) -> Deferred
    where
        R: FnOnce(Value) -> Outcome + 'static,
    {
        self.then_with(None, Some(handler(on_rejected)))
    }

    /// Register dynamic handlers. Values that are not callable are ignored,
    /// so the outcome passes through on that side.
    pub fn then_value(&self, on_fulfilled: Value, on_rejected: Value) -> Deferred {
        self.then_with(callable_handler(on_fulfilled), callable_handler(on_rejected))
    }

    /// The chaining member native instances expose to the resolution procedure.
    pub(crate) fn chain_callable(&self) -> Callable {
        let me = self.clone();
        Callable::new(move |args| {
            let on_fulfilled = args.first().cloned().unwrap_or_default();
            let on_rejected = args.get(1).cloned().unwrap_or_default();
            Ok(Value::Deferred(me.then_value(on_fulfilled, on_rejected)))
        })
    }
}

fn callable_handler(v: Value) -> Option<Handler> {
    match v {
        Value::Function(f) => Some(handler(move |arg| f.call(&[arg]))),
        _ => None,
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.inner.try_borrow() {
            Ok(inner) => write!(f, "Deferred#{}({:?})", self.0.id, inner.state),
            Err(_) => write!(f, "Deferred#{}(<busy>)", self.0.id),
        }
    }
}

/// A resolve or reject capability bound to one instance.
#[derive(Clone)]
pub struct Resolver {
    target: Deferred,
    settlement: Settlement,
}

impl Resolver {
    /// Resolve or reject the bound instance. Ignored once it settled.
    pub fn call(&self, value: impl Into<Value>) {
        match self.settlement {
            Settlement::Fulfilled => self.target.resolve(value),
            Settlement::Rejected => self.target.reject(value),
        }
    }

    pub fn into_callable(self) -> Callable {
        Callable::unary(move |v| {
            self.call(v);
            Ok(Value::Undefined)
        })
    }

    pub fn into_value(self) -> Value {
        Value::Function(self.into_callable())
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("target", &self.target)
            .field("settlement", &self.settlement)
            .finish()
    }
}

/// One-shot token shared by the two resolvers of a single adoption.
#[derive(Clone)]
struct AdoptionGuard(Rc<Cell<GuardState>>);

#[derive(Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Unconsumed,
    Consumed,
}

impl AdoptionGuard {
    fn new() -> Self {
        Self(Rc::new(Cell::new(GuardState::Unconsumed)))
    }

    /// Returns true for the first caller only.
    fn consume(&self) -> bool {
        self.0.replace(GuardState::Consumed) == GuardState::Unconsumed
    }
}

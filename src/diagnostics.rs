//! Reporter hooks and the unhandled-rejection check
//!
//! Both reporters default to `tracing` events and can be swapped
//! independently. The unhandled-rejection check is best effort: two branches
//! registered on one pending instance, neither with a rejection handler, each
//! produce their own warning.

use crate::deferred::Deferred;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, warn};

/// Callback receiving a reason or error value.
pub type Reporter = Rc<dyn Fn(&Value)>;

struct Diagnostics {
    warn: Reporter,
    error: Reporter,
    suppress_unhandled: bool,
}

impl Diagnostics {
    fn defaults() -> Self {
        Self {
            warn: Rc::new(default_warn),
            error: Rc::new(default_error),
            suppress_unhandled: false,
        }
    }
}

fn default_warn(reason: &Value) {
    warn!(reason = ?reason, "rejection was never observed, attach a rejection handler");
}

fn default_error(err: &Value) {
    error!(error = ?err, "queued job failed");
}

thread_local! {
    static DIAGNOSTICS: RefCell<Diagnostics> = RefCell::new(Diagnostics::defaults());
}

/// Replace the reporter used for unhandled rejections.
pub fn set_warning_reporter<F>(f: F)
where
    F: Fn(&Value) + 'static,
{
    DIAGNOSTICS.with(|d| d.borrow_mut().warn = Rc::new(f));
}

/// Replace the reporter used for jobs and timer callbacks that panic.
pub fn set_error_reporter<F>(f: F)
where
    F: Fn(&Value) + 'static,
{
    DIAGNOSTICS.with(|d| d.borrow_mut().error = Rc::new(f));
}

/// Turn the unhandled-rejection warning off or back on.
pub fn set_suppress_unhandled(suppress: bool) {
    DIAGNOSTICS.with(|d| d.borrow_mut().suppress_unhandled = suppress);
}

pub fn suppress_unhandled() -> bool {
    DIAGNOSTICS.with(|d| d.borrow().suppress_unhandled)
}

/// Restore the tracing reporters and re-enable the warning.
pub fn reset_reporters() {
    DIAGNOSTICS.with(|d| *d.borrow_mut() = Diagnostics::defaults());
}

/// Runs from the queue after a rejection found no continuations.
pub(crate) fn check_unhandled(deferred: &Deferred, reason: &Value) {
    if deferred.is_handled() {
        return;
    }
    let reporter = DIAGNOSTICS.with(|d| {
        let d = d.borrow();
        (!d.suppress_unhandled).then(|| d.warn.clone())
    });
    if let Some(report) = reporter {
        report(reason);
    }
}

pub(crate) fn report_error(err: &Value) {
    let report = DIAGNOSTICS.with(|d| d.borrow().error.clone());
    report(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting_warnings() -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        set_warning_reporter(move |_| c.set(c.get() + 1));
        count
    }

    #[test]
    fn test_unhandled_is_reported() {
        let count = counting_warnings();
        let d = Deferred::new();
        d.reject("x");
        check_unhandled(&d, &Value::from("x"));
        assert_eq!(count.get(), 1);
        reset_reporters();
    }

    #[test]
    fn test_handled_is_quiet() {
        let count = counting_warnings();
        let d = Deferred::new();
        d.catch(Ok);
        check_unhandled(&d, &Value::from("x"));
        assert_eq!(count.get(), 0);
        reset_reporters();
    }

    #[test]
    fn test_suppression() {
        let count = counting_warnings();
        set_suppress_unhandled(true);
        assert!(suppress_unhandled());
        check_unhandled(&Deferred::new(), &Value::from("x"));
        assert_eq!(count.get(), 0);

        set_suppress_unhandled(false);
        check_unhandled(&Deferred::new(), &Value::from("x"));
        assert_eq!(count.get(), 1);
        reset_reporters();
        assert!(!suppress_unhandled());
    }

    #[test]
    fn test_error_reporter_override() {
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        set_error_reporter(move |e| *s.borrow_mut() = Some(e.clone()));
        report_error(&Value::error("bad job"));
        assert_eq!(*seen.borrow(), Some(Value::error("bad job")));
        reset_reporters();
    }
}

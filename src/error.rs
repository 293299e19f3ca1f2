//! Error taxonomy
//!
//! `Failure` values are rejection reasons the engine produces itself.
//! `ConstructionError` and `EngineError` are returned synchronously and never
//! travel through a deferred value.

use std::any::Any;
use thiserror::Error;

/// Message used by [`Deferred::timeout`](crate::Deferred::timeout) when the caller gives none.
pub const DEFAULT_TIMEOUT_MESSAGE: &str = "Timeout";

/// A rejection reason produced by the engine (or built by callers as an error value).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// A deferred value was resolved with itself.
    #[error("deferred value cannot be resolved with itself")]
    SelfResolution,

    /// The timer of a `timeout` racer fired first.
    #[error("{message}")]
    Timeout { message: String },

    /// A handler, initializer, foreign chaining member or job panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// A plain error value.
    #[error("{0}")]
    Message(String),
}

impl Failure {
    /// Build a plain error value.
    pub fn message(msg: impl Into<String>) -> Self {
        Failure::Message(msg.into())
    }

    /// Build a timeout error, falling back to the default message.
    pub fn timeout(message: Option<&str>) -> Self {
        Failure::Timeout {
            message: message.unwrap_or(DEFAULT_TIMEOUT_MESSAGE).to_string(),
        }
    }

    /// JS-style error name.
    pub fn name(&self) -> &'static str {
        match self {
            Failure::SelfResolution => "TypeError",
            Failure::Timeout { .. } | Failure::Panicked(_) | Failure::Message(_) => "Error",
        }
    }

    /// Convert a caught panic payload into a failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Failure::Panicked(msg)
    }
}

/// Raised synchronously when a deferred value cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("initializer must be callable, got {type_name}")]
    NotCallable { type_name: &'static str },
}

/// Errors from driving the host [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("the clock is realtime; only a virtual clock can be stepped")]
    ClockNotVirtual,

    #[error("stepping exceeded {limit} timeslices, timers are likely rescheduling forever")]
    TimesliceLimit { limit: usize },
}

//! Settle - deferred values on a single-threaded FIFO job queue
//!
//! A deferred value is settled exactly once, with:
//! - Continuations that always run from the job queue, never synchronously
//! - Recursive adoption of foreign awaitables through a runtime probe
//! - `all`, `timeout` and `finally` combinators
//! - Best-effort warnings for rejections nobody observed
//! - An engine that drives the queue and timers on a wall or virtual clock

pub mod error;
pub mod value;
pub mod queue;
pub mod dispatch;
pub mod deferred;
pub mod combinators;
pub mod diagnostics;
pub mod pq;
pub mod timer;
pub mod engine;


pub use combinators::{all, reject, resolve};
pub use deferred::{Deferred, Resolver, State};
pub use dispatch::{handler, Handler};
pub use engine::{Engine, EngineConfig};
pub use error::{ConstructionError, EngineError, Failure, DEFAULT_TIMEOUT_MESSAGE};
pub use queue::soon;
pub use timer::{clear_timeout, set_timeout, ClockMode, TimerId};
pub use value::{Awaitable, Callable, Outcome, Value};

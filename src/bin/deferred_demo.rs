//! Deferred Value Demo
//!
//! Walks through the engine's behavior on a realtime clock, logging every step.
//!
//! Usage:
//!   cargo run --bin deferred_demo -- --list            # List demo cases
//!   cargo run --bin deferred_demo -- --case 3          # Run case 3
//!   cargo run --bin deferred_demo -- --case 4 --rate 2 # Run case 4 at double speed
//!
//! Set RUST_LOG=settle=trace to see every settlement and adoption.
//!
//! Cases:
//!   1. Chained Transform  - A value doubled through a chain of continuations
//!   2. All                - Deferred, plain and rejected inputs combined
//!   3. Timeout (value)    - The value settles before the timer
//!   4. Timeout (timer)    - The timer fires before the value
//!   5. Foreign Adoption   - A hand-written awaitable adopted by a native one
//!   6. Unhandled          - A rejection nobody observes

use settle::{all, reject, resolve, set_timeout, Awaitable, Callable, Deferred, Engine, EngineConfig, EngineError, Value};
use std::env;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CASES: [&str; 6] = [
    "Chained Transform  - A value doubled through a chain of continuations",
    "All                - Deferred, plain and rejected inputs combined",
    "Timeout (value)    - The value settles 10ms in, the timer is set for 50ms",
    "Timeout (timer)    - The timer fires at 10ms, the value only at 50ms",
    "Foreign Adoption   - A hand-written awaitable adopted by a native one",
    "Unhandled          - A rejection nobody observes triggers a warning",
];

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Prints how far into the case we are, in wall time.
struct Stopwatch(Instant);

impl Stopwatch {
    fn start() -> Self {
        Self(Instant::now())
    }

    fn log(&self, what: impl std::fmt::Display) {
        println!("  [{:>6.1}ms] {}", self.0.elapsed().as_secs_f64() * 1000.0, what);
    }
}

fn new_engine(rate: f64) -> Engine {
    Engine::new(EngineConfig {
        rate,
        ..Default::default()
    })
}

// ============================================================================
// Case 1: Chained Transform
// ============================================================================

fn run_chained_transform(rate: f64) -> Result<(), EngineError> {
    println!("\n=== Case 1: Chained Transform ===");
    let mut engine = new_engine(rate);
    let clock = std::rc::Rc::new(Stopwatch::start());

    let p = Deferred::new();
    let c = clock.clone();
    p.then(|v| Ok(Value::from(v.as_int().unwrap_or_default() * 2)))
        .then(move |x| {
            c.log(format!("chain produced {:?}", x));
            Ok(x)
        });

    let target = p.clone();
    let c = clock.clone();
    set_timeout(ms(20), move || {
        c.log("resolving with 5");
        target.resolve(5);
        c.log("resolve returned, continuations still queued");
    });

    engine.run_until_idle()
}

// ============================================================================
// Case 2: All
// ============================================================================

fn run_all(rate: f64) -> Result<(), EngineError> {
    println!("\n=== Case 2: All ===");
    let mut engine = new_engine(rate);
    let clock = std::rc::Rc::new(Stopwatch::start());

    let slow = Deferred::new();
    let target = slow.clone();
    set_timeout(ms(30), move || target.resolve("slow"));

    let c = clock.clone();
    all(vec![Value::from(&slow), Value::from(resolve(1)), Value::from(2)]).then(move |v| {
        c.log(format!("all fulfilled with {:?}", v));
        Ok(Value::Undefined)
    });

    let c = clock.clone();
    all(vec![Value::from(resolve(1)), Value::from(2), Value::from(reject("x"))]).catch(move |r| {
        c.log(format!("all rejected with {}", r));
        Ok(Value::Undefined)
    });

    engine.run_until_idle()
}

// ============================================================================
// Case 3 and 4: Timeout
// ============================================================================

fn run_timeout(rate: f64, settle_after: u64, limit: u64) -> Result<(), EngineError> {
    let mut engine = new_engine(rate);
    let clock = std::rc::Rc::new(Stopwatch::start());

    let p = Deferred::new();
    let racer = p.timeout(ms(limit), None);

    let (c1, c2) = (clock.clone(), clock.clone());
    racer.then_or(
        move |v| {
            c1.log(format!("racer fulfilled with {:?}", v));
            Ok(Value::Undefined)
        },
        move |r| {
            c2.log(format!("racer rejected: {}", r));
            Ok(Value::Undefined)
        },
    );

    let c = clock.clone();
    p.then(move |v| {
        c.log(format!("original fulfilled with {:?}", v));
        Ok(Value::Undefined)
    });

    let target = p.clone();
    set_timeout(ms(settle_after), move || target.resolve(7));

    engine.run_until_idle()
}

// ============================================================================
// Case 5: Foreign Adoption
// ============================================================================

/// An awaitable that does not come from this crate: it only exposes a
/// chaining member that resolves after a delay of its own.
struct Delayed {
    value: &'static str,
    delay: Duration,
}

impl Awaitable for Delayed {
    fn chain_member(&self) -> Result<Value, Value> {
        let (value, delay) = (self.value, self.delay);
        let chain = Callable::new(move |args| {
            if let Some(Value::Function(on_value)) = args.first() {
                let on_value = on_value.clone();
                set_timeout(delay, move || {
                    let _ = on_value.call(&[Value::from(value)]);
                });
            }
            Ok(Value::Undefined)
        });
        Ok(Value::Function(chain))
    }
}

fn run_foreign_adoption(rate: f64) -> Result<(), EngineError> {
    println!("\n=== Case 5: Foreign Adoption ===");
    let mut engine = new_engine(rate);
    let clock = std::rc::Rc::new(Stopwatch::start());

    let foreign = Value::object(Delayed {
        value: "from a foreign awaitable",
        delay: ms(25),
    });
    let adopted = resolve(foreign);
    clock.log(format!("adopting, state is {:?}", adopted.state()));

    let c = clock.clone();
    adopted.then(move |v| {
        c.log(format!("adopted value: {}", v));
        Ok(Value::Undefined)
    });

    engine.run_until_idle()
}

// ============================================================================
// Case 6: Unhandled
// ============================================================================

fn run_unhandled(rate: f64) -> Result<(), EngineError> {
    println!("\n=== Case 6: Unhandled ===");
    let mut engine = new_engine(rate);
    let clock = Stopwatch::start();

    let p = Deferred::new();
    // A fulfillment-only link: the rejection passes through and is lost.
    p.then(Ok);
    let target = p.clone();
    set_timeout(ms(10), move || target.reject(Value::error("nobody is listening")));

    clock.log("rejecting in 10ms, expect a warning from the log output");
    engine.run_until_idle()
}

fn print_usage() {
    println!("Settle - Deferred Value Demo");
    println!("============================");
    println!();
    println!("Usage:");
    println!("  cargo run --bin deferred_demo -- --list          # List cases");
    println!("  cargo run --bin deferred_demo -- --case N        # Run case N");
    println!("  cargo run --bin deferred_demo -- --case N --rate X");
    println!();
    print_cases();
}

fn print_cases() {
    println!("Cases:");
    for (i, case) in CASES.iter().enumerate() {
        println!("  {}: {}", i + 1, case);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,settle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();

    let mut list_cases = false;
    let mut case: Option<usize> = None;
    let mut rate = 1.0;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list_cases = true;
            }
            "--case" | "-c" => {
                i += 1;
                if i < args.len() {
                    case = args[i].parse().ok();
                }
            }
            "--rate" | "-r" => {
                i += 1;
                if i < args.len() {
                    rate = args[i].parse().map_err(|_| format!("Invalid rate {}", args[i]))?;
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    if list_cases {
        print_cases();
        return Ok(());
    }

    let case = match case {
        Some(c) if (1..=CASES.len()).contains(&c) => c,
        Some(c) => {
            return Err(format!("Invalid case {}. Must be 1-{}.", c, CASES.len()).into());
        }
        None => {
            print_usage();
            return Err("Missing --case argument".into());
        }
    };

    match case {
        1 => run_chained_transform(rate)?,
        2 => run_all(rate)?,
        3 => {
            println!("\n=== Case 3: Timeout won by the value ===");
            run_timeout(rate, 10, 50)?;
        }
        4 => {
            println!("\n=== Case 4: Timeout won by the timer ===");
            run_timeout(rate, 50, 10)?;
        }
        5 => run_foreign_adoption(rate)?,
        6 => run_unhandled(rate)?,
        _ => unreachable!(),
    }

    println!("\nDemo complete.");
    Ok(())
}

//! Built-in task handlers
//!
//! Registered by every daemon so a fresh install can be exercised end to end
//! from the SDK.

use quiver_core::application::HandlerRegistry;
use quiver_core::domain::{ArgValue, TaskArgs};
use quiver_core::error::Result;
use quiver_core::port::TaskError;
use std::time::Duration;

/// Longest nap the `sleep` handler accepts
const MAX_SLEEP_MS: i64 = 60_000;

pub fn builtin_registry() -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("echo", |args: TaskArgs| async move { echo(args) })?;
    registry.register_fn("add", |args: TaskArgs| async move { add(args) })?;
    registry.register_fn("sleep", sleep)?;
    Ok(registry)
}

/// Returns its first positional argument
fn echo(args: TaskArgs) -> std::result::Result<ArgValue, TaskError> {
    Ok(args.arg(0).cloned().unwrap_or(ArgValue::Null))
}

/// Sums numeric positional arguments; integers stay integers
fn add(args: TaskArgs) -> std::result::Result<ArgValue, TaskError> {
    let mut int_sum: i64 = 0;
    let mut float_sum: Option<f64> = None;

    for (i, value) in args.args.iter().enumerate() {
        match value {
            ArgValue::Int(n) => {
                int_sum = int_sum
                    .checked_add(*n)
                    .ok_or_else(|| TaskError::permanent("OverflowError", "integer sum overflows"))?;
            }
            ArgValue::Float(f) => *float_sum.get_or_insert(0.0) += f,
            other => {
                return Err(TaskError::permanent(
                    "TypeError",
                    format!("argument {} is not a number: {:?}", i, other),
                ))
            }
        }
    }

    Ok(match float_sum {
        Some(f) => ArgValue::Float(f + int_sum as f64),
        None => ArgValue::Int(int_sum),
    })
}

/// Sleeps for `args[0]` milliseconds, returns the duration slept
async fn sleep(args: TaskArgs) -> std::result::Result<ArgValue, TaskError> {
    let ms = args
        .arg(0)
        .and_then(ArgValue::as_i64)
        .ok_or_else(|| TaskError::permanent("TypeError", "sleep expects an integer of milliseconds"))?;
    if !(0..=MAX_SLEEP_MS).contains(&ms) {
        return Err(TaskError::permanent(
            "ValueError",
            format!("sleep duration must be within 0..={} ms", MAX_SLEEP_MS),
        ));
    }

    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
    Ok(ArgValue::Int(ms))
}

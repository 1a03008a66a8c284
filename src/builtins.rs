//! The single standard-library function the Language ships with.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

/// `clock()` → wall-clock seconds as a double. The clock source is
/// implementation-defined per the external interface; `SystemTime` is the
/// natural idiomatic-Rust choice.
pub fn clock(args: &[Value]) -> Result<Value, String> {
  if !args.is_empty() {
    return Err(format!("Expected 0 arguments but got {}.", args.len()));
  }
  let elapsed = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map_err(|_| "system clock is before the Unix epoch".to_string())?;
  Ok(Value::Number(elapsed.as_secs_f64()))
}

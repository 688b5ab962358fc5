use std::time::Instant;

use once_cell::sync::OnceCell;

use crate::value::Value;

static START: OnceCell<Instant> = OnceCell::new();

pub fn install_clock_epoch() {
    let _ = START.set(Instant::now());
}

/// `clock()` — seconds elapsed since the VM was created.
pub fn clock(_args: &[Value]) -> Result<Value, String> {
    let start = START.get_or_init(Instant::now);
    Ok(Value::Number(start.elapsed().as_secs_f64()))
}

// ABOUTME: The `os` library, trimmed to the sandboxed clock/time subset —
// ABOUTME: no filesystem or process access (spec §4.5, Non-goals)

use super::{arg, native, set_global};
use crate::error::RuntimeError;
use crate::eval::{to_integer, Evaluator};
use crate::table::Table;
use crate::value::Value;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub fn register(eval: &Rc<Evaluator>) {
    let lib = Table::new();
    let lib = Rc::new(std::cell::RefCell::new(lib));
    let start = Instant::now();
    let _ = lib.borrow_mut().rawset(
        Value::string("clock"),
        native("clock", move |_args| Ok(vec![Value::Float(start.elapsed().as_secs_f64())])),
    );
    let _ = lib.borrow_mut().rawset(Value::string("time"), native("time", lua_time));
    let _ = lib.borrow_mut().rawset(Value::string("difftime"), native("difftime", lua_difftime));
    set_global(eval, "os", Value::Table(lib));
}

fn lua_time(_args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(vec![Value::Integer(secs)])
}

fn lua_difftime(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let t2 = to_integer(&arg(args, 0)).ok_or_else(|| RuntimeError::bad_argument(1, "difftime", "number"))?;
    let t1 = to_integer(&arg(args, 1)).ok_or_else(|| RuntimeError::bad_argument(2, "difftime", "number"))?;
    Ok(vec![Value::Float((t2 - t1) as f64)])
}

// ABOUTME: Standard-library kernel: base globals plus table/string/math/os
// ABOUTME: libraries installed into an Evaluator's global table (spec §4.5)

use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::{Function, NativeFunction, Value};
use std::rc::Rc;

pub mod base;
pub mod math_lib;
pub mod os_lib;
pub mod string_lib;
pub mod table_lib;

/// Installs every standard-library global into `eval`'s global table, and
/// wires the string metatable so `("x"):upper()` resolves through it.
pub fn register_stdlib(eval: &Rc<Evaluator>) {
    base::register(eval);
    table_lib::register(eval);
    let string_lib = string_lib::register(eval);
    eval.set_string_library(string_lib);
    math_lib::register(eval);
    os_lib::register(eval);
    set_global(eval, "_VERSION", Value::string(crate::config::LUA_VERSION));
}

/// Wraps a Rust closure as a script-callable builtin value.
pub(crate) fn native(
    name: &str,
    f: impl Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> + 'static,
) -> Value {
    Value::Function(Function::Native(Rc::new(NativeFunction {
        name: name.to_string(),
        func: Box::new(f),
    })))
}

/// Fetches positional argument `i`, defaulting to `nil` past the end —
/// Lua calls are never arity-checked by the caller.
pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Nil)
}

pub(crate) fn set_global(eval: &Evaluator, name: &str, value: Value) {
    let _ = eval.globals.borrow_mut().rawset(Value::string(name), value);
}

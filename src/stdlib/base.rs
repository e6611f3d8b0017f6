// ABOUTME: Global functions available without a library prefix: print, type,
// ABOUTME: pcall, iteration primitives, metatable access (spec §4.5)

use super::{arg, native, set_global};
use crate::error::RuntimeError;
use crate::eval::{coerce_number, str_to_number, Evaluator};
use crate::value::{format_float, Value};
use std::rc::Rc;

pub fn register(eval: &Rc<Evaluator>) {
    set_global(eval, "print", native_print(eval));
    set_global(eval, "type", native("type", |args| Ok(vec![Value::string(arg(args, 0).type_name())])));
    set_global(eval, "tostring", native_tostring(eval));
    set_global(eval, "tonumber", native("tonumber", lua_tonumber));
    set_global(eval, "assert", native("assert", lua_assert));
    set_global(eval, "error", native("error", lua_error));
    set_global(eval, "pcall", native_pcall(eval));
    set_global(eval, "xpcall", native_xpcall(eval));
    set_global(eval, "ipairs", native("ipairs", lua_ipairs));
    set_global(eval, "pairs", native_pairs(eval));
    set_global(eval, "next", native("next", lua_next));
    set_global(eval, "select", native("select", lua_select));
    set_global(eval, "rawget", native("rawget", lua_rawget));
    set_global(eval, "rawset", native("rawset", lua_rawset));
    set_global(eval, "rawlen", native("rawlen", lua_rawlen));
    set_global(eval, "rawequal", native("rawequal", lua_rawequal));
    set_global(eval, "setmetatable", native("setmetatable", lua_setmetatable));
    set_global(eval, "getmetatable", native("getmetatable", lua_getmetatable));
    set_global(eval, "unpack", native("unpack", |args| super::table_lib::unpack(args)));
}

fn native_print(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("print", move |args| {
        let mut parts = Vec::with_capacity(args.len());
        for a in args {
            parts.push(eval.tostring(a)?);
        }
        eval.write_output(&parts.join("\t"))?;
        eval.write_output("\n")?;
        Ok(vec![])
    })
}

fn native_tostring(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("tostring", move |args| Ok(vec![Value::string(eval.tostring(&arg(args, 0))?)]))
}

/// `tonumber(v [, base])`: plain numeral parsing, or string-in-arbitrary-base
/// when `base` is given (in which case `v` must be a string).
fn lua_tonumber(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let v = arg(args, 0);
    if args.len() >= 2 {
        let base = coerce_number(&arg(args, 1))
            .and_then(|n| crate::eval::to_integer(&n))
            .ok_or_else(|| RuntimeError::bad_argument(2, "tonumber", "number"))?;
        let s = match &v {
            Value::String(s) => String::from_utf8_lossy(s).trim().to_string(),
            _ => return Err(RuntimeError::bad_argument(1, "tonumber", "string")),
        };
        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1, s.strip_prefix('+').unwrap_or(&s)),
        };
        return Ok(vec![match i64::from_str_radix(digits, base as u32) {
            Ok(n) => Value::Integer(sign * n),
            Err(_) => Value::Nil,
        }]);
    }
    Ok(vec![match &v {
        Value::Integer(_) | Value::Float(_) => v,
        Value::String(s) => str_to_number(s).unwrap_or(Value::Nil),
        _ => Value::Nil,
    }])
}

fn lua_assert(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let v = arg(args, 0);
    if v.is_truthy() {
        return Ok(args.to_vec());
    }
    let message = match args.get(1) {
        Some(Value::String(s)) => String::from_utf8_lossy(s).into_owned(),
        Some(other) => format!("{other:?}"),
        None => "assertion failed!".to_string(),
    };
    Err(RuntimeError::new(message))
}

fn lua_error(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let message = match arg(args, 0) {
        Value::String(s) => String::from_utf8_lossy(&s).into_owned(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => format_float(f),
        Value::Nil => "nil".to_string(),
        other => format!("{}", other.type_name()),
    };
    Err(RuntimeError::new(message))
}

fn native_pcall(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("pcall", move |args| {
        if args.is_empty() {
            return Err(RuntimeError::bad_argument(1, "pcall", "value"));
        }
        let callee = args[0].clone();
        let call_args = args[1..].to_vec();
        match eval.call_value(callee, call_args) {
            Ok(mut results) => {
                let mut out = vec![Value::Boolean(true)];
                out.append(&mut results);
                Ok(out)
            }
            Err(e) if e.is_quota => Err(e),
            Err(e) => Ok(vec![Value::Boolean(false), Value::string(e.message)]),
        }
    })
}

fn native_xpcall(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("xpcall", move |args| {
        if args.len() < 2 {
            return Err(RuntimeError::bad_argument(2, "xpcall", "value"));
        }
        let callee = args[0].clone();
        let handler = args[1].clone();
        let call_args = args[2..].to_vec();
        match eval.call_value(callee, call_args) {
            Ok(mut results) => {
                let mut out = vec![Value::Boolean(true)];
                out.append(&mut results);
                Ok(out)
            }
            Err(e) if e.is_quota => Err(e),
            Err(e) => {
                let handled = eval.call_value(handler, vec![Value::string(e.message)])?;
                let mut out = vec![Value::Boolean(false)];
                out.extend(handled);
                Ok(out)
            }
        }
    })
}

/// Stateless `ipairs` iterator: `(table, i)` -> `(i+1, table[i+1])`, stopping
/// at the first nil element (spec §4.5; does not follow `__index`, matching
/// Lua 5.5's default base library semantics).
fn lua_ipairs(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let t = arg(args, 0);
    let iter = native("ipairs_iterator", |args| {
        let t = arg(args, 0);
        let i = crate::eval::to_integer(&arg(args, 1)).unwrap_or(0) + 1;
        let table = t.as_table().ok_or_else(|| RuntimeError::bad_argument(1, "ipairs", "table"))?;
        let v = table.borrow().rawget(&Value::Integer(i));
        if matches!(v, Value::Nil) {
            Ok(vec![Value::Nil])
        } else {
            Ok(vec![Value::Integer(i), v])
        }
    });
    Ok(vec![iter, t, Value::Integer(0)])
}

/// `pairs(t)`: honors `__pairs` if present, otherwise returns `(next, t, nil)`.
fn native_pairs(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("pairs", move |args| {
        let t = arg(args, 0);
        if let Some(mm) = eval.get_metamethod(&t, "__pairs") {
            return eval.call_value(mm, vec![t]);
        }
        Ok(vec![native("next", lua_next), t, Value::Nil])
    })
}

fn lua_next(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| RuntimeError::bad_argument(1, "next", "table"))?;
    let key = arg(args, 1);
    let key_ref = if matches!(key, Value::Nil) { None } else { Some(&key) };
    match table.borrow().next(key_ref)? {
        Some((k, v)) => Ok(vec![k, v]),
        None => Ok(vec![Value::Nil]),
    }
}

/// `select('#', ...)` or `select(n, ...)` (negative `n` counts from the end).
fn lua_select(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let rest = &args[1.min(args.len())..];
    match args.first() {
        Some(Value::String(s)) if &**s == b"#" => Ok(vec![Value::Integer(rest.len() as i64)]),
        Some(v) => {
            let n = crate::eval::to_integer(v).ok_or_else(|| RuntimeError::bad_argument(1, "select", "number"))?;
            let idx = if n < 0 {
                (rest.len() as i64 + n).max(0) as usize
            } else if n == 0 {
                return Err(RuntimeError::bad_argument(1, "select", "index out of range"));
            } else {
                (n - 1) as usize
            };
            Ok(rest.get(idx..).map(|s| s.to_vec()).unwrap_or_default())
        }
        None => Err(RuntimeError::bad_argument(1, "select", "number")),
    }
}

fn lua_rawget(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| RuntimeError::bad_argument(1, "rawget", "table"))?;
    Ok(vec![table.borrow().rawget(&arg(args, 1))])
}

fn lua_rawset(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| RuntimeError::bad_argument(1, "rawset", "table"))?;
    table.borrow_mut().rawset(arg(args, 1), arg(args, 2))?;
    Ok(vec![t])
}

fn lua_rawlen(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    match arg(args, 0) {
        Value::Table(t) => Ok(vec![Value::Integer(t.borrow_mut().length())]),
        Value::String(s) => Ok(vec![Value::Integer(s.len() as i64)]),
        _ => Err(RuntimeError::bad_argument(1, "rawlen", "table or string")),
    }
}

fn lua_rawequal(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![Value::Boolean(arg(args, 0) == arg(args, 1))])
}

fn lua_setmetatable(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| RuntimeError::bad_argument(1, "setmetatable", "table"))?;
    if let Some(mt) = &table.borrow().metatable {
        if !matches!(mt.borrow().rawget(&Value::string("__metatable")), Value::Nil) {
            return Err(RuntimeError::new("cannot change a protected metatable"));
        }
    }
    match arg(args, 1) {
        Value::Nil => table.borrow_mut().metatable = None,
        Value::Table(mt) => table.borrow_mut().metatable = Some(mt),
        _ => return Err(RuntimeError::bad_argument(2, "setmetatable", "nil or table")),
    }
    Ok(vec![t])
}

fn lua_getmetatable(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    match arg(args, 0) {
        Value::Table(t) => {
            let mt = t.borrow().metatable.clone();
            match mt {
                None => Ok(vec![Value::Nil]),
                Some(mt) => {
                    let protected = mt.borrow().rawget(&Value::string("__metatable"));
                    if matches!(protected, Value::Nil) {
                        Ok(vec![Value::Table(mt)])
                    } else {
                        Ok(vec![protected])
                    }
                }
            }
        }
        _ => Ok(vec![Value::Nil]),
    }
}

// ABOUTME: The `table` library: sequence manipulation, sorting, packing
// ABOUTME: (spec §4.5)

use super::{arg, native, set_global};
use crate::error::RuntimeError;
use crate::eval::{to_integer, Evaluator};
use crate::table::Table;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

pub fn register(eval: &Rc<Evaluator>) {
    let lib = Table::new();
    let lib = Rc::new(RefCell::new(lib));
    set(&lib, "insert", native("insert", lua_insert));
    set(&lib, "remove", native("remove", lua_remove));
    set(&lib, "concat", native_concat(eval));
    set(&lib, "sort", native_sort(eval));
    set(&lib, "move", native("move", lua_move));
    set(&lib, "pack", native("pack", lua_pack));
    set(&lib, "unpack", native("unpack", unpack));
    set_global(eval, "table", Value::Table(lib));
}

fn set(lib: &Rc<RefCell<Table>>, name: &str, value: Value) {
    let _ = lib.borrow_mut().rawset(Value::string(name), value);
}

fn want_table<'a>(args: &'a [Value], pos: usize, fname: &str) -> Result<&'a Rc<RefCell<Table>>, RuntimeError> {
    args.get(pos)
        .and_then(Value::as_table)
        .ok_or_else(|| RuntimeError::bad_argument(pos + 1, fname, "table"))
}

/// `table.insert(t, v)` appends; `table.insert(t, pos, v)` shifts the tail
/// right to make room.
fn lua_insert(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let table = want_table(args, 0, "insert")?;
    let len = table.borrow_mut().length();
    if args.len() <= 2 {
        let v = arg(args, 1);
        table.borrow_mut().rawset(Value::Integer(len + 1), v)?;
        return Ok(vec![]);
    }
    let pos = to_integer(&arg(args, 1)).ok_or_else(|| RuntimeError::bad_argument(2, "insert", "number"))?;
    if pos < 1 || pos > len + 1 {
        return Err(RuntimeError::new("bad argument #2 to 'insert' (position out of bounds)"));
    }
    let v = arg(args, 2);
    let mut i = len;
    while i >= pos {
        let moved = table.borrow().rawget(&Value::Integer(i));
        table.borrow_mut().rawset(Value::Integer(i + 1), moved)?;
        i -= 1;
    }
    table.borrow_mut().rawset(Value::Integer(pos), v)?;
    Ok(vec![])
}

/// `table.remove(t [, pos])`: defaults to the last element; shifts the tail
/// left to close the gap.
fn lua_remove(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let table = want_table(args, 0, "remove")?;
    let len = table.borrow_mut().length();
    let pos = if args.len() >= 2 {
        to_integer(&arg(args, 1)).ok_or_else(|| RuntimeError::bad_argument(2, "remove", "number"))?
    } else {
        len
    };
    if len == 0 {
        return Ok(vec![Value::Nil]);
    }
    if pos < 1 || pos > len + 1 {
        return Err(RuntimeError::new("bad argument #2 to 'remove' (position out of bounds)"));
    }
    let removed = table.borrow().rawget(&Value::Integer(pos));
    let mut i = pos;
    while i < len {
        let next = table.borrow().rawget(&Value::Integer(i + 1));
        table.borrow_mut().rawset(Value::Integer(i), next)?;
        i += 1;
    }
    table.borrow_mut().rawset(Value::Integer(len), Value::Nil)?;
    Ok(vec![removed])
}

fn native_concat(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("concat", move |args| {
        let table = want_table(args, 0, "concat")?;
        let sep: Vec<u8> = match arg(args, 1) {
            Value::Nil => Vec::new(),
            Value::String(s) => s.to_vec(),
            v => eval.tostring(&v)?.into_bytes(),
        };
        let len = table.borrow_mut().length();
        let i = if args.len() >= 3 {
            to_integer(&arg(args, 2)).unwrap_or(1)
        } else {
            1
        };
        let j = if args.len() >= 4 {
            to_integer(&arg(args, 3)).unwrap_or(len)
        } else {
            len
        };
        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut k = i;
        while k <= j {
            let v = table.borrow().rawget(&Value::Integer(k));
            match &v {
                Value::String(s) => parts.push(s.to_vec()),
                Value::Integer(_) | Value::Float(_) => parts.push(eval.tostring(&v)?.into_bytes()),
                _ => {
                    return Err(RuntimeError::new(format!(
                        "invalid value (at index {k}) in table for 'concat'"
                    )))
                }
            }
            k += 1;
        }
        Ok(vec![Value::string(parts.join(&sep[..]))])
    })
}

/// `table.sort(t [, comp])`: in-place sort over the sequence part. Uses the
/// default `<` operator or a caller-supplied comparator; a comparator error
/// aborts the sort and propagates (mirrors `sort_by`'s no-retry contract).
fn native_sort(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("sort", move |args| {
        let table = want_table(args, 0, "sort")?;
        let mut items = table.borrow().to_vec();
        let comparator = args.get(1).cloned();
        let mut err = None;
        items.sort_by(|a, b| {
            if err.is_some() {
                return std::cmp::Ordering::Equal;
            }
            let less = match &comparator {
                Some(Value::Nil) | None => default_less(&eval, a, b),
                Some(f) => eval
                    .call_value(f.clone(), vec![a.clone(), b.clone()])
                    .map(|r| r.into_iter().next().unwrap_or(Value::Nil).is_truthy()),
            };
            match less {
                Ok(true) => std::cmp::Ordering::Less,
                Ok(false) => std::cmp::Ordering::Greater,
                Err(e) => {
                    err = Some(e);
                    std::cmp::Ordering::Equal
                }
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        let mut t = table.borrow_mut();
        for (i, v) in items.into_iter().enumerate() {
            t.rawset(Value::Integer(i as i64 + 1), v)?;
        }
        Ok(vec![])
    })
}

fn default_less(_eval: &Evaluator, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    match (a, b) {
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Ok(as_f64(a) < as_f64(b))
        }
        (Value::String(x), Value::String(y)) => Ok(x < y),
        _ => Err(RuntimeError::type_error("compare two", a.type_name())),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

/// `table.move(a1, f, e, t [, a2])`: copies `a1[f..e]` to `a2[t..]`,
/// defaulting `a2` to `a1`.
fn lua_move(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let a1 = want_table(args, 0, "move")?;
    let f = to_integer(&arg(args, 1)).ok_or_else(|| RuntimeError::bad_argument(2, "move", "number"))?;
    let e = to_integer(&arg(args, 2)).ok_or_else(|| RuntimeError::bad_argument(3, "move", "number"))?;
    let t = to_integer(&arg(args, 3)).ok_or_else(|| RuntimeError::bad_argument(4, "move", "number"))?;
    let a2 = if args.len() >= 5 { want_table(args, 4, "move")?.clone() } else { a1.clone() };
    if e >= f {
        if t > f || !Rc::ptr_eq(a1, &a2) {
            let mut i = f;
            while i <= e {
                let v = a1.borrow().rawget(&Value::Integer(i));
                a2.borrow_mut().rawset(Value::Integer(t + (i - f)), v)?;
                i += 1;
            }
        } else {
            let mut i = e;
            while i >= f {
                let v = a1.borrow().rawget(&Value::Integer(i));
                a2.borrow_mut().rawset(Value::Integer(t + (i - f)), v)?;
                i -= 1;
            }
        }
    }
    Ok(vec![Value::Table(a2)])
}

fn lua_pack(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let mut t = Table::from_vec(args.to_vec());
    t.rawset(Value::string("n"), Value::Integer(args.len() as i64))?;
    Ok(vec![Value::table(t)])
}

/// Shared by `table.unpack` and the global `unpack` alias.
pub(crate) fn unpack(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let table = want_table(args, 0, "unpack")?;
    let i = if args.len() >= 2 {
        to_integer(&arg(args, 1)).unwrap_or(1)
    } else {
        1
    };
    let j = if args.len() >= 3 {
        to_integer(&arg(args, 2)).unwrap_or(0)
    } else {
        table.borrow_mut().length()
    };
    let mut result = Vec::new();
    let mut k = i;
    while k <= j {
        result.push(table.borrow().rawget(&Value::Integer(k)));
        k += 1;
    }
    Ok(result)
}

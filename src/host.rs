// ABOUTME: Host <-> script value marshalling and bidirectional callback
// ABOUTME: wrapping for the embedding API (spec §6)

use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::stdlib::native;
use crate::table::Table;
use crate::value::Value;
use serde_json::Value as Json;
use std::cell::RefCell;
use std::rc::Rc;

/// Converts a host JSON value into a script value. Objects and arrays
/// become tables; there is no script-side distinction between the two
/// until they round-trip back out (`to_host` below).
pub fn to_lua(value: &Json) -> Value {
    match value {
        Json::Null => Value::Nil,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::string(s.clone()),
        Json::Array(items) => {
            let mut t = Table::new();
            for (i, v) in items.iter().enumerate() {
                let _ = t.rawset(Value::Integer(i as i64 + 1), to_lua(v));
            }
            Value::table(t)
        }
        Json::Object(map) => {
            let mut t = Table::new();
            for (k, v) in map {
                let _ = t.rawset(Value::string(k.clone()), to_lua(v));
            }
            Value::table(t)
        }
    }
}

/// Converts a script value back into JSON for return to the host. A table
/// becomes a JSON array iff it is a "clean" sequence (spec §6): its
/// sequence length `n` is positive, `to_vec` captures exactly `n` values,
/// and iterating every key via `next` also yields exactly `n` entries (no
/// extra non-sequence keys hiding alongside the sequence part). Functions
/// have no JSON representation and surface as an error.
pub fn to_host(eval: &Rc<Evaluator>, value: &Value) -> Result<Json, RuntimeError> {
    match value {
        Value::Nil => Ok(Json::Null),
        Value::Boolean(b) => Ok(Json::Bool(*b)),
        Value::Integer(i) => Ok(Json::Number((*i).into())),
        Value::Float(f) => Ok(serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null)),
        Value::String(s) => Ok(Json::String(String::from_utf8_lossy(s).into_owned())),
        Value::Table(t) => table_to_host(eval, t),
        Value::Function(_) => Err(RuntimeError::new("cannot convert a function value to a host value")),
    }
}

fn table_to_host(eval: &Rc<Evaluator>, t: &Rc<RefCell<Table>>) -> Result<Json, RuntimeError> {
    let n = t.borrow_mut().length();
    let seq = t.borrow().to_vec();
    if n > 0 && seq.len() as i64 == n && count_keys(t)? == n {
        let mut items = Vec::with_capacity(seq.len());
        for v in seq {
            items.push(to_host(eval, &v)?);
        }
        return Ok(Json::Array(items));
    }
    let mut map = serde_json::Map::new();
    let mut key = None;
    loop {
        let next = t.borrow().next(key.as_ref())?;
        match next {
            None => break,
            Some((k, v)) => {
                let key_str = match &k {
                    Value::String(s) => String::from_utf8_lossy(s).into_owned(),
                    other => eval.tostring(other)?,
                };
                map.insert(key_str, to_host(eval, &v)?);
                key = Some(k);
            }
        }
    }
    Ok(Json::Object(map))
}

fn count_keys(t: &Rc<RefCell<Table>>) -> Result<i64, RuntimeError> {
    let mut count = 0i64;
    let mut key = None;
    loop {
        let next = t.borrow().next(key.as_ref())?;
        match next {
            None => return Ok(count),
            Some((k, _)) => {
                count += 1;
                key = Some(k);
            }
        }
    }
}

/// Wraps a host Rust closure as a script-callable `NativeFunction`: script
/// arguments are converted to JSON before the closure runs, and its JSON
/// result converted back to a single script value.
pub fn wrap_host_fn(
    _eval: &Rc<Evaluator>,
    name: &str,
    f: impl Fn(&[Json]) -> Json + 'static,
) -> Value {
    native(name, move |args: &[Value]| {
        let json_args: Vec<Json> = args.iter().map(host_value_to_json_best_effort).collect();
        Ok(vec![to_lua(&f(&json_args))])
    })
}

/// Best-effort conversion used only for *inbound* native-function arguments,
/// where a `RuntimeError` return is awkward inside a plain closure; a
/// function argument collapses to `Json::Null` rather than failing the call.
fn host_value_to_json_best_effort(v: &Value) -> Json {
    match v {
        Value::Nil => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(String::from_utf8_lossy(s).into_owned()),
        Value::Table(t) => {
            let n = t.borrow_mut().length();
            let seq = t.borrow().to_vec();
            if n > 0 && seq.len() as i64 == n {
                Json::Array(seq.iter().map(host_value_to_json_best_effort).collect())
            } else {
                let mut map = serde_json::Map::new();
                let mut key = None;
                loop {
                    let next = t.borrow().next(key.as_ref()).ok().flatten();
                    match next {
                        None => break,
                        Some((k, v)) => {
                            let key_str = match &k {
                                Value::String(s) => String::from_utf8_lossy(s).into_owned(),
                                Value::Integer(i) => i.to_string(),
                                other => format!("{other:?}"),
                            };
                            map.insert(key_str, host_value_to_json_best_effort(&v));
                            key = Some(k);
                        }
                    }
                }
                Json::Object(map)
            }
        }
        Value::Function(_) => Json::Null,
    }
}

/// Wraps a script function as a host-callable Rust closure: host arguments
/// convert to script values, the call runs under the session's quotas, and
/// the (single) return value converts back to JSON.
pub fn wrap_lua_fn(
    eval: &Rc<Evaluator>,
    func: Value,
) -> impl Fn(&[Json]) -> Result<Json, RuntimeError> {
    let eval = eval.clone();
    move |args: &[Json]| {
        let lua_args: Vec<Value> = args.iter().map(to_lua).collect();
        let result = eval.call_value(func.clone(), lua_args)?;
        match result.into_iter().next() {
            Some(v) => to_host(&eval, &v),
            None => Ok(Json::Null),
        }
    }
}

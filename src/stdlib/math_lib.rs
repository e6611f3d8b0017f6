// ABOUTME: The `math` library: numeric functions, constants, and the PRNG
// ABOUTME: (spec §4.5)

use super::{arg, native, set_global};
use crate::error::RuntimeError;
use crate::eval::{coerce_number, to_integer, Evaluator};
use crate::table::Table;
use crate::value::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

pub fn register(eval: &Rc<Evaluator>) {
    let lib = Rc::new(RefCell::new(Table::new()));
    set(&lib, "abs", native("abs", lua_abs));
    set(&lib, "floor", native("floor", lua_floor));
    set(&lib, "ceil", native("ceil", lua_ceil));
    set(&lib, "sqrt", native("sqrt", reg1("sqrt", f64::sqrt)));
    set(&lib, "sin", native("sin", reg1("sin", f64::sin)));
    set(&lib, "cos", native("cos", reg1("cos", f64::cos)));
    set(&lib, "tan", native("tan", reg1("tan", f64::tan)));
    set(&lib, "asin", native("asin", reg1("asin", f64::asin)));
    set(&lib, "acos", native("acos", reg1("acos", f64::acos)));
    set(&lib, "exp", native("exp", reg1("exp", f64::exp)));
    set(&lib, "log", native("log", lua_log));
    set(&lib, "atan", native("atan", lua_atan));
    set(&lib, "max", native("max", lua_max));
    set(&lib, "min", native("min", lua_min));
    set(&lib, "tointeger", native("tointeger", lua_tointeger));
    set(&lib, "type", native("type", lua_type));
    set(&lib, "fmod", native("fmod", lua_fmod));
    set(&lib, "modf", native("modf", lua_modf));

    let rng = Rc::new(RefCell::new(StdRng::from_entropy()));
    set(&lib, "random", native_random(rng.clone()));
    set(&lib, "randomseed", native_randomseed(rng));

    let _ = lib.borrow_mut().rawset(Value::string("pi"), Value::Float(std::f64::consts::PI));
    let _ = lib.borrow_mut().rawset(Value::string("huge"), Value::Float(f64::INFINITY));
    let _ = lib.borrow_mut().rawset(Value::string("maxinteger"), Value::Integer(i64::MAX));
    let _ = lib.borrow_mut().rawset(Value::string("mininteger"), Value::Integer(i64::MIN));

    set_global(eval, "math", Value::Table(lib));
}

fn set(lib: &Rc<RefCell<Table>>, name: &str, value: Value) {
    let _ = lib.borrow_mut().rawset(Value::string(name), value);
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn want_num(args: &[Value], pos: usize, fname: &str) -> Result<Value, RuntimeError> {
    args.get(pos)
        .and_then(coerce_number)
        .ok_or_else(|| RuntimeError::bad_argument(pos + 1, fname, "number"))
}

/// `math.abs`/`floor`/`ceil` preserve integer subtype; every other function
/// in this library always returns a float (spec §3.1 numeric subtyping).
fn lua_abs(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![match want_num(args, 0, "abs")? {
        Value::Integer(i) => Value::Integer(i.wrapping_abs()),
        Value::Float(f) => Value::Float(f.abs()),
        _ => unreachable!(),
    }])
}

fn lua_floor(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![match want_num(args, 0, "floor")? {
        v @ Value::Integer(_) => v,
        Value::Float(f) => float_to_result(f.floor()),
        _ => unreachable!(),
    }])
}

fn lua_ceil(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![match want_num(args, 0, "ceil")? {
        v @ Value::Integer(_) => v,
        Value::Float(f) => float_to_result(f.ceil()),
        _ => unreachable!(),
    }])
}

fn float_to_result(f: f64) -> Value {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

fn reg1(name: &'static str, f: fn(f64) -> f64) -> impl Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> {
    move |args| Ok(vec![Value::Float(f(as_f64(&want_num(args, 0, name)?)))])
}

fn lua_log(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let x = as_f64(&want_num(args, 0, "log")?);
    let result = if args.len() >= 2 {
        let base = as_f64(&want_num(args, 1, "log")?);
        x.log(base)
    } else {
        x.ln()
    };
    Ok(vec![Value::Float(result)])
}

fn lua_atan(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let y = as_f64(&want_num(args, 0, "atan")?);
    let result = if args.len() >= 2 {
        let x = as_f64(&want_num(args, 1, "atan")?);
        y.atan2(x)
    } else {
        y.atan()
    };
    Ok(vec![Value::Float(result)])
}

fn is_less(a: &Value, b: &Value) -> bool {
    as_f64(a) < as_f64(b)
}

fn lua_max(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let mut best = want_num(args, 0, "max")?;
    for i in 1..args.len() {
        let v = want_num(args, i, "max")?;
        if is_less(&best, &v) {
            best = v;
        }
    }
    Ok(vec![best])
}

fn lua_min(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let mut best = want_num(args, 0, "min")?;
    for i in 1..args.len() {
        let v = want_num(args, i, "min")?;
        if is_less(&v, &best) {
            best = v;
        }
    }
    Ok(vec![best])
}

/// Strict integer conversion: unlike `tonumber`, does not parse strings and
/// returns `nil` for any non-integral float.
fn lua_tointeger(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![match arg(args, 0) {
        Value::Integer(i) => Value::Integer(i),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Value::Integer(f as i64),
        _ => Value::Nil,
    }])
}

fn lua_type(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![match arg(args, 0) {
        Value::Integer(_) => Value::string("integer"),
        Value::Float(_) => Value::string("float"),
        _ => Value::Nil,
    }])
}

fn lua_fmod(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let a = want_num(args, 0, "fmod")?;
    let b = want_num(args, 1, "fmod")?;
    if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
        if *y == 0 {
            return Err(RuntimeError::bad_argument(2, "fmod", "zero"));
        }
        return Ok(vec![Value::Integer(x.wrapping_rem(*y))]);
    }
    Ok(vec![Value::Float(as_f64(&a) % as_f64(&b))])
}

fn lua_modf(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let x = as_f64(&want_num(args, 0, "modf")?);
    let int_part = x.trunc();
    Ok(vec![float_to_result(int_part), Value::Float(if x.is_infinite() { 0.0 } else { x - int_part })])
}

fn native_random(rng: Rc<RefCell<StdRng>>) -> Value {
    native("random", move |args| {
        Ok(vec![match args.len() {
            0 => Value::Float(rng.borrow_mut().gen::<f64>()),
            1 => {
                let m = to_integer(&arg(args, 0)).ok_or_else(|| RuntimeError::bad_argument(1, "random", "number"))?;
                if m < 1 {
                    return Err(RuntimeError::bad_argument(1, "random", "interval is empty"));
                }
                Value::Integer(rng.borrow_mut().gen_range(1..=m))
            }
            _ => {
                let lo = to_integer(&arg(args, 0)).ok_or_else(|| RuntimeError::bad_argument(1, "random", "number"))?;
                let hi = to_integer(&arg(args, 1)).ok_or_else(|| RuntimeError::bad_argument(2, "random", "number"))?;
                if lo > hi {
                    return Err(RuntimeError::bad_argument(2, "random", "interval is empty"));
                }
                Value::Integer(rng.borrow_mut().gen_range(lo..=hi))
            }
        }])
    })
}

fn native_randomseed(rng: Rc<RefCell<StdRng>>) -> Value {
    native("randomseed", move |args| {
        let seed = to_integer(&arg(args, 0)).unwrap_or(0);
        *rng.borrow_mut() = StdRng::seed_from_u64(seed as u64);
        Ok(vec![])
    })
}

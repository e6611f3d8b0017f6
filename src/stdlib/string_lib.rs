// ABOUTME: The `string` library: byte/char conversion, pattern matching, and
// ABOUTME: the C-printf-subset `format` (spec §4.5, §9)

use super::{arg, native};
use crate::error::RuntimeError;
use crate::eval::{to_integer, Evaluator};
use crate::pattern::{self, Capture};
use crate::table::Table;
use crate::value::{format_float, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub fn register(eval: &Rc<Evaluator>) -> Rc<RefCell<Table>> {
    let lib = Rc::new(RefCell::new(Table::new()));
    set(&lib, "byte", native("byte", lua_byte));
    set(&lib, "char", native("char", lua_char));
    set(&lib, "len", native("len", lua_len));
    set(&lib, "sub", native("sub", lua_sub));
    set(&lib, "rep", native("rep", lua_rep));
    set(&lib, "reverse", native("reverse", lua_reverse));
    set(&lib, "upper", native("upper", lua_upper));
    set(&lib, "lower", native("lower", lua_lower));
    set(&lib, "find", native("find", lua_find));
    set(&lib, "match", native("match", lua_match));
    set(&lib, "gmatch", native("gmatch", lua_gmatch));
    set(&lib, "gsub", native_gsub(eval));
    set(&lib, "format", native_format(eval));

    let metatable = Table::new();
    let metatable = Rc::new(RefCell::new(metatable));
    let _ = metatable
        .borrow_mut()
        .rawset(Value::string("__index"), Value::Table(lib.clone()));
    let _ = eval
        .globals
        .borrow_mut()
        .rawset(Value::string("string"), Value::Table(lib));
    metatable
}

fn set(lib: &Rc<RefCell<Table>>, name: &str, value: Value) {
    let _ = lib.borrow_mut().rawset(Value::string(name), value);
}

fn want_str(args: &[Value], pos: usize, fname: &str) -> Result<Rc<[u8]>, RuntimeError> {
    match args.get(pos) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Integer(i)) => Ok(Rc::from(i.to_string().into_bytes())),
        Some(Value::Float(f)) => Ok(Rc::from(format_float(*f).into_bytes())),
        _ => Err(RuntimeError::bad_argument(pos + 1, fname, "string")),
    }
}

/// Resolves `string.sub`-style `(i, j)` bounds to a half-open byte range.
fn sub_range(len: usize, i: i64, j: i64) -> (usize, usize) {
    let start = if i < 0 {
        ((len as i64 + i + 1).max(1)) as usize - 1
    } else if i == 0 {
        0
    } else {
        (i - 1) as usize
    };
    let end = if j < 0 {
        (len as i64 + j + 1).max(0) as usize
    } else {
        (j as usize).min(len)
    };
    if start >= end || start >= len {
        (0, 0)
    } else {
        (start, end)
    }
}

fn lua_byte(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "byte")?;
    let bytes: &[u8] = &s;
    let i = args.get(1).and_then(to_integer).unwrap_or(1);
    let j = args.get(2).and_then(to_integer).unwrap_or(i);
    let (start, end) = sub_range(bytes.len(), i, j);
    Ok(bytes[start..end].iter().map(|b| Value::Integer(*b as i64)).collect())
}

fn lua_char(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let mut bytes = Vec::with_capacity(args.len());
    for v in args {
        let n = to_integer(v).ok_or_else(|| RuntimeError::bad_argument(1, "char", "number"))?;
        bytes.push(n as u8);
    }
    Ok(vec![Value::string(bytes)])
}

fn lua_len(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "len")?;
    Ok(vec![Value::Integer(s.len() as i64)])
}

fn lua_sub(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "sub")?;
    let bytes: &[u8] = &s;
    let i = args.get(1).and_then(to_integer).unwrap_or(1);
    let j = args.get(2).and_then(to_integer).unwrap_or(-1);
    let (start, end) = sub_range(bytes.len(), i, j);
    Ok(vec![Value::string(&bytes[start..end])])
}

fn lua_rep(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "rep")?;
    let n = args.get(1).and_then(to_integer).unwrap_or(0);
    let sep: Vec<u8> = match args.get(2) {
        Some(Value::String(sep)) => sep.to_vec(),
        _ => Vec::new(),
    };
    if n <= 0 {
        return Ok(vec![Value::string("")]);
    }
    let parts: Vec<&[u8]> = vec![&s[..]; n as usize];
    Ok(vec![Value::string(parts.join(&sep[..]))])
}

fn lua_reverse(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "reverse")?;
    let mut bytes = s.to_vec();
    bytes.reverse();
    Ok(vec![Value::string(bytes)])
}

/// ASCII-only case folding (spec §4.5): Lua's `upper`/`lower` operate
/// byte-wise, not via Unicode case mapping, since strings are raw bytes.
fn lua_upper(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "upper")?;
    let bytes: Vec<u8> = s.iter().map(u8::to_ascii_uppercase).collect();
    Ok(vec![Value::string(bytes)])
}

fn lua_lower(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "lower")?;
    let bytes: Vec<u8> = s.iter().map(u8::to_ascii_lowercase).collect();
    Ok(vec![Value::string(bytes)])
}

/// `true` iff `pattern` contains an un-escaped `(` — distinguishes
/// `find`'s "append capture values" behavior from its plain two-return form
/// (`pattern.rs`'s `find` always synthesizes a whole-match capture, which
/// `find` itself must not surface unless the pattern asked for it).
fn pattern_has_captures(pattern: &[u8]) -> bool {
    let mut i = 0;
    while i < pattern.len() {
        if pattern[i] == b'%' {
            i += 2;
            continue;
        }
        if pattern[i] == b'(' {
            return true;
        }
        i += 1;
    }
    false
}

fn capture_values(src: &[u8], captures: &[Capture]) -> Vec<Value> {
    captures
        .iter()
        .map(|c| match c {
            Capture::Position(p) => Value::Integer(*p as i64),
            Capture::Range(s, e) => Value::string(&src[*s..*e]),
        })
        .collect()
}

fn init_offset(args: &[Value], pos: usize, len: usize) -> usize {
    let i = args.get(pos).and_then(to_integer).unwrap_or(1);
    if i > 0 {
        (i as usize - 1).min(len)
    } else if i == 0 {
        0
    } else {
        len.saturating_sub((-i) as usize)
    }
}

fn lua_find(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "find")?;
    let p = want_str(args, 1, "find")?;
    let plain = args.get(3).map(Value::is_truthy).unwrap_or(false);
    let src: &[u8] = &s;
    let pat: &[u8] = &p;
    let init = init_offset(args, 2, src.len());

    if plain || !pat.iter().any(|b| matches!(b, b'^'|b'$'|b'*'|b'+'|b'?'|b'.'|b'('|b'['|b'%'|b'-')) {
        let needle = pat;
        if needle.is_empty() {
            return Ok(vec![Value::Integer(init as i64 + 1), Value::Integer(init as i64)]);
        }
        return Ok(match src[init.min(src.len())..].windows(needle.len()).position(|w| w == needle) {
            Some(off) => {
                let start = init + off;
                vec![Value::Integer(start as i64 + 1), Value::Integer((start + needle.len()) as i64)]
            }
            None => vec![Value::Nil],
        });
    }

    match pattern::find(src, pat, init)? {
        None => Ok(vec![Value::Nil]),
        Some(m) => {
            let mut out = vec![Value::Integer(m.start as i64 + 1), Value::Integer(m.end as i64)];
            if pattern_has_captures(pat) {
                out.extend(capture_values(src, &m.captures));
            }
            Ok(out)
        }
    }
}

fn lua_match(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "match")?;
    let p = want_str(args, 1, "match")?;
    let src: &[u8] = &s;
    let init = init_offset(args, 2, src.len());
    match pattern::find(src, &p, init)? {
        None => Ok(vec![Value::Nil]),
        Some(m) => Ok(capture_values(src, &m.captures)),
    }
}

/// `gmatch` returns a closure that advances a shared cursor across calls —
/// the one genuinely stateful iterator in this library (every match
/// production necessarily depends on where the previous one ended).
fn lua_gmatch(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let s = want_str(args, 0, "gmatch")?;
    let p = want_str(args, 1, "gmatch")?;
    let pos = Rc::new(Cell::new(0usize));
    let iter = native("gmatch_iterator", move |_args| {
        let src: &[u8] = &s;
        let start = pos.get();
        if start > src.len() {
            return Ok(vec![Value::Nil]);
        }
        match pattern::find(src, &p, start)? {
            None => {
                pos.set(src.len() + 1);
                Ok(vec![Value::Nil])
            }
            Some(m) => {
                pos.set(if m.end > m.start { m.end } else { m.end + 1 });
                Ok(capture_values(src, &m.captures))
            }
        }
    });
    Ok(vec![iter])
}

/// `gsub(s, pattern, repl [, n])`: `repl` may be a string (with `%0`-`%9`
/// and `%%` backreferences), a table (indexed by the first capture), or a
/// function (called with the captures; a `nil`/`false` result keeps the
/// original match).
fn native_gsub(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("gsub", move |args| {
        let s = want_str(args, 0, "gsub")?;
        let p = want_str(args, 1, "gsub")?;
        let repl = arg(args, 2);
        let max_n = args.get(3).and_then(to_integer);
        let src: &[u8] = &s;

        let mut result = Vec::with_capacity(src.len());
        let mut pos = 0usize;
        let mut count = 0i64;
        while pos <= src.len() {
            if let Some(limit) = max_n {
                if count >= limit {
                    break;
                }
            }
            let Some(m) = pattern::find(src, &p, pos)? else {
                break;
            };
            result.extend_from_slice(&src[pos..m.start]);
            let whole = &src[m.start..m.end];
            let captures = capture_values(src, &m.captures);
            let replacement = gsub_replacement(&eval, &repl, whole, &captures)?;
            result.extend_from_slice(&replacement);
            count += 1;
            pos = if m.end > m.start {
                m.end
            } else {
                if m.end < src.len() {
                    result.push(src[m.end]);
                }
                m.end + 1
            };
        }
        if pos < src.len() {
            result.extend_from_slice(&src[pos..]);
        }
        Ok(vec![Value::string(result), Value::Integer(count)])
    })
}

fn gsub_replacement(
    eval: &Evaluator,
    repl: &Value,
    whole: &[u8],
    captures: &[Value],
) -> Result<Vec<u8>, RuntimeError> {
    match repl {
        Value::String(template) => Ok(expand_backrefs(template, whole, captures)),
        Value::Table(t) => {
            let key = captures.first().cloned().unwrap_or_else(|| Value::string(whole));
            let v = t.borrow().rawget(&key);
            Ok(gsub_scalar_result(eval, v, whole)?)
        }
        Value::Function(_) => {
            let call_args = if captures.is_empty() {
                vec![Value::string(whole)]
            } else {
                captures.to_vec()
            };
            let result = eval.call_value(repl.clone(), call_args)?.into_iter().next().unwrap_or(Value::Nil);
            Ok(gsub_scalar_result(eval, result, whole)?)
        }
        _ => Err(RuntimeError::bad_argument(3, "gsub", "string/function/table")),
    }
}

fn gsub_scalar_result(eval: &Evaluator, v: Value, whole: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    match v {
        Value::Nil | Value::Boolean(false) => Ok(whole.to_vec()),
        Value::String(s) => Ok(s.to_vec()),
        Value::Integer(_) | Value::Float(_) => Ok(eval.tostring(&v)?.into_bytes()),
        _ => Err(RuntimeError::new("invalid replacement value (a table/function)")),
    }
}

fn expand_backrefs(template: &[u8], whole: &[u8], captures: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(template.len());
    let mut i = 0;
    while i < template.len() {
        if template[i] == b'%' && i + 1 < template.len() {
            let d = template[i + 1];
            if d == b'%' {
                out.push(b'%');
                i += 2;
                continue;
            }
            if d == b'0' {
                out.extend_from_slice(whole);
                i += 2;
                continue;
            }
            if d.is_ascii_digit() {
                let idx = (d - b'1') as usize;
                if let Some(Value::String(s)) = captures.get(idx) {
                    out.extend_from_slice(s);
                } else if let Some(Value::Integer(n)) = captures.get(idx) {
                    out.extend_from_slice(n.to_string().as_bytes());
                }
                i += 2;
                continue;
            }
        }
        out.push(template[i]);
        i += 1;
    }
    out
}

// -- string.format ------------------------------------------------------

fn native_format(eval: &Rc<Evaluator>) -> Value {
    let eval = eval.clone();
    native("format", move |args| {
        let fmt = want_str(args, 0, "format")?;
        Ok(vec![Value::string(lua_format(&eval, &fmt, &args[1.min(args.len())..])?)])
    })
}

/// Pads a `%s` body to `spec.width` with spaces, preserving raw bytes (the
/// body may not be valid UTF-8).
fn pad_bytes(spec: &FormatSpec, mut body: Vec<u8>) -> Vec<u8> {
    let width = match spec.width {
        Some(w) if w > body.len() => w,
        _ => return body,
    };
    let pad_len = width - body.len();
    if spec.flags.contains('-') {
        body.extend(std::iter::repeat(b' ').take(pad_len));
        body
    } else {
        let mut out = vec![b' '; pad_len];
        out.append(&mut body);
        out
    }
}

struct FormatSpec {
    flags: String,
    width: Option<usize>,
    precision: Option<usize>,
    conv: u8,
}

fn parse_spec(fmt: &[u8], mut i: usize) -> (FormatSpec, usize) {
    let mut flags = String::new();
    while i < fmt.len() && matches!(fmt[i], b'-' | b'0' | b'+' | b' ' | b'#') {
        flags.push(fmt[i] as char);
        i += 1;
    }
    let mut width = None;
    let start = i;
    while i < fmt.len() && fmt[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        width = std::str::from_utf8(&fmt[start..i]).ok().and_then(|s| s.parse().ok());
    }
    let mut precision = None;
    if i < fmt.len() && fmt[i] == b'.' {
        i += 1;
        let pstart = i;
        while i < fmt.len() && fmt[i].is_ascii_digit() {
            i += 1;
        }
        precision = Some(std::str::from_utf8(&fmt[pstart..i]).ok().and_then(|s| s.parse().ok()).unwrap_or(0));
    }
    let conv = if i < fmt.len() { fmt[i] } else { b'%' };
    (FormatSpec { flags, width, precision, conv }, i + 1)
}

fn pad(spec: &FormatSpec, body: String, numeric: bool) -> String {
    let width = match spec.width {
        Some(w) if w > body.len() => w,
        _ => return body,
    };
    let left = spec.flags.contains('-');
    let zero = spec.flags.contains('0') && numeric && !left;
    let fill = if zero { '0' } else { ' ' };
    let pad_len = width - body.len();
    if left {
        format!("{body}{}", " ".repeat(pad_len))
    } else if zero && (body.starts_with('-') || body.starts_with('+')) {
        let (sign, rest) = body.split_at(1);
        format!("{sign}{}{rest}", fill.to_string().repeat(pad_len))
    } else {
        format!("{}{body}", fill.to_string().repeat(pad_len))
    }
}

fn apply_sign(spec: &FormatSpec, negative: bool, digits: String) -> String {
    if negative {
        format!("-{digits}")
    } else if spec.flags.contains('+') {
        format!("+{digits}")
    } else if spec.flags.contains(' ') {
        format!(" {digits}")
    } else {
        digits
    }
}

fn lua_format(eval: &Evaluator, fmt: &[u8], args: &[Value]) -> Result<Vec<u8>, RuntimeError> {
    let mut out = Vec::new();
    let mut argi = 0usize;
    let mut i = 0usize;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        if i + 1 < fmt.len() && fmt[i + 1] == b'%' {
            out.push(b'%');
            i += 2;
            continue;
        }
        let (spec, next) = parse_spec(fmt, i + 1);
        i = next;
        match spec.conv {
            b'd' | b'i' => {
                let v = arg(args, argi);
                argi += 1;
                let n = to_integer(&v).ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                let digits = format!("{}", n.unsigned_abs());
                let digits = match spec.precision {
                    Some(p) if p > digits.len() => "0".repeat(p - digits.len()) + &digits,
                    _ => digits,
                };
                out.extend_from_slice(pad(&spec, apply_sign(&spec, n < 0, digits), true).as_bytes());
            }
            b'u' => {
                let v = arg(args, argi);
                argi += 1;
                let n = to_integer(&v).ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                out.extend_from_slice(pad(&spec, format!("{}", n as u64), true).as_bytes());
            }
            b'x' | b'X' => {
                let v = arg(args, argi);
                argi += 1;
                let n = to_integer(&v).ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                let mut digits = if spec.conv == b'x' {
                    format!("{:x}", n as u64)
                } else {
                    format!("{:X}", n as u64)
                };
                if let Some(p) = spec.precision {
                    if p > digits.len() {
                        digits = "0".repeat(p - digits.len()) + &digits;
                    }
                }
                if spec.flags.contains('#') && n != 0 {
                    digits = format!("{}{digits}", if spec.conv == b'x' { "0x" } else { "0X" });
                }
                out.extend_from_slice(pad(&spec, digits, true).as_bytes());
            }
            b'o' => {
                let v = arg(args, argi);
                argi += 1;
                let n = to_integer(&v).ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                out.extend_from_slice(pad(&spec, format!("{:o}", n as u64), true).as_bytes());
            }
            b'c' => {
                let v = arg(args, argi);
                argi += 1;
                let n = to_integer(&v).ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                out.push(n as u8);
            }
            b'f' | b'F' => {
                let v = arg(args, argi);
                argi += 1;
                let n = crate::eval::coerce_number(&v)
                    .map(|n| as_f64(&n))
                    .ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                let prec = spec.precision.unwrap_or(6);
                let digits = format!("{:.*}", prec, n.abs());
                out.extend_from_slice(pad(&spec, apply_sign(&spec, n.is_sign_negative(), digits), true).as_bytes());
            }
            b'e' | b'E' => {
                let v = arg(args, argi);
                argi += 1;
                let n = crate::eval::coerce_number(&v)
                    .map(|n| as_f64(&n))
                    .ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                let prec = spec.precision.unwrap_or(6);
                let body = format_exp(n.abs(), prec, spec.conv == b'E');
                out.extend_from_slice(pad(&spec, apply_sign(&spec, n.is_sign_negative(), body), true).as_bytes());
            }
            b'g' | b'G' => {
                let v = arg(args, argi);
                argi += 1;
                let n = crate::eval::coerce_number(&v)
                    .map(|n| as_f64(&n))
                    .ok_or_else(|| RuntimeError::bad_argument(argi, "format", "number"))?;
                let prec = spec.precision.unwrap_or(6).max(1);
                let body = format_g_like(n.abs(), prec, spec.conv == b'G');
                out.extend_from_slice(pad(&spec, apply_sign(&spec, n.is_sign_negative(), body), true).as_bytes());
            }
            b's' => {
                let v = arg(args, argi);
                argi += 1;
                let mut bytes: Vec<u8> = match &v {
                    Value::String(s) => s.to_vec(),
                    other => eval.tostring(other)?.into_bytes(),
                };
                if let Some(p) = spec.precision {
                    bytes.truncate(p);
                }
                out.extend_from_slice(&pad_bytes(&spec, bytes));
            }
            b'q' => {
                let v = arg(args, argi);
                argi += 1;
                out.extend_from_slice(quote_string(eval, &v)?.as_bytes());
            }
            other => return Err(RuntimeError::new(format!("invalid conversion '%{}' to 'format'", other as char))),
        }
    }
    Ok(out)
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn format_exp(v: f64, prec: usize, upper: bool) -> String {
    let formatted = format!("{:.*e}", prec, v);
    let pos = formatted.find('e').unwrap();
    let (mantissa, exp_part) = formatted.split_at(pos);
    let exp_val: i32 = exp_part[1..].parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{}{:02}", if exp_val < 0 { "-" } else { "+" }, exp_val.abs())
}

fn format_g_like(v: f64, prec: usize, upper: bool) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let exp = v.abs().log10().floor() as i32;
    if exp < -4 || exp >= prec as i32 {
        trim_g_zeros(&format_exp(v, prec.saturating_sub(1), upper))
    } else {
        let decimals = (prec as i32 - 1 - exp).max(0) as usize;
        trim_g_zeros(&format!("{:.*}", decimals, v))
    }
}

fn trim_g_zeros(s: &str) -> String {
    if let Some(epos) = s.find(['e', 'E']) {
        let (mantissa, rest) = s.split_at(epos);
        format!("{}{rest}", trim_g_zeros(mantissa))
    } else if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

fn quote_string(eval: &Evaluator, v: &Value) -> Result<String, RuntimeError> {
    let bytes: Rc<[u8]> = match v {
        Value::String(s) => s.clone(),
        other => return Ok(eval.tostring(other)?),
    };
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for b in bytes.iter().copied() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0 => out.push_str("\\0"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{b}")),
        }
    }
    out.push('"');
    Ok(out)
}

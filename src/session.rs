// ABOUTME: The host-facing façade: a persistent scripting session with
// ABOUTME: global state, resource quotas, and host value exchange (spec §6)

use crate::config::Limits;
use crate::env::Environment;
use crate::error::Error;
use crate::eval::Evaluator;
use crate::host::{to_host, to_lua};
use crate::parser::parse;
use crate::stdlib::register_stdlib;
use crate::value::Value;
use serde_json::Value as Json;
use std::rc::Rc;

/// A sandboxed scripting session: one global table, one set of resource
/// quotas, reused across calls to `execute`/`eval` (spec §6). Each call
/// resets the instruction/output budgets but never the globals — a script
/// can build up state across calls the way a REPL does.
pub struct Session {
    eval: Rc<Evaluator>,
    env: Rc<Environment>,
}

impl Session {
    pub fn new(limits: Limits) -> Self {
        let eval = Rc::new(Evaluator::new(limits));
        register_stdlib(&eval);
        let env = Environment::new();
        Session { eval, env }
    }

    /// Runs a chunk of statements, returning whatever it wrote via `print`
    /// (spec §6 — `execute` surfaces captured output, not a return value).
    pub fn execute(&self, source: &str) -> Result<String, Error> {
        let block = parse(source)?;
        self.eval.reset_quotas();
        self.eval.exec_chunk(&block, &self.env)?;
        Ok(self.eval.take_output())
    }

    /// Evaluates a single expression and returns its value as JSON (spec
    /// §6 — `eval` surfaces a return value, not captured output).
    pub fn eval(&self, expression: &str) -> Result<Json, Error> {
        let source = format!("return ({expression})");
        let block = parse(&source)?;
        self.eval.reset_quotas();
        let mut results = self.eval.exec_chunk(&block, &self.env)?;
        let value = if results.is_empty() { Value::Nil } else { results.remove(0) };
        Ok(to_host(&self.eval, &value)?)
    }

    /// Binds a host value as a global, visible to subsequent `execute`/`eval`
    /// calls.
    pub fn set(&self, name: &str, value: Json) {
        let _ = self
            .eval
            .globals
            .borrow_mut()
            .rawset(Value::string(name), to_lua(&value));
    }

    /// Reads a global back out as a host value.
    pub fn get(&self, name: &str) -> Result<Json, Error> {
        let v = self.eval.globals.borrow().rawget(&Value::string(name));
        Ok(to_host(&self.eval, &v)?)
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new(Limits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_captures_print_output() {
        let session = Session::default();
        let out = session.execute("print('hello', 1 + 2)").unwrap();
        assert_eq!(out, "hello\t3");
    }

    #[test]
    fn eval_returns_host_value() {
        let session = Session::default();
        let v = session.eval("1 + 2").unwrap();
        assert_eq!(v, Json::from(3));
    }

    #[test]
    fn set_and_get_round_trip() {
        let session = Session::default();
        session.set("x", Json::from(42));
        let out = session.execute("x = x + 1").unwrap();
        assert_eq!(out, "");
        assert_eq!(session.get("x").unwrap(), Json::from(43));
    }

    #[test]
    fn quota_errors_surface_as_runtime_errors() {
        let session = Session::new(Limits {
            max_instructions: 50,
            ..Limits::default()
        });
        let err = session.execute("local i = 0\nwhile true do i = i + 1 end").unwrap_err();
        match err {
            Error::Runtime(e) => assert!(e.is_quota),
            other => panic!("expected runtime quota error, got {other:?}"),
        }
    }
}

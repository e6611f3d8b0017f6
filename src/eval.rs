// ABOUTME: Tree-walking evaluator: statement execution, expression
// ABOUTME: evaluation, metamethod dispatch, and resource quotas (spec §4.3, §5)

use crate::ast::{Block, BinOpKind, Expr, FunctionBody, Number, Stmt, UnOpKind};
use crate::config::Limits;
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::table::Table;
use crate::value::{format_float, Function, LuaClosure, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Non-local control transferred out of a statement or block. `Goto` is
/// deliberately absent: labels parse but raise at the point a `goto`
/// would need to jump (Open Question decision, DESIGN.md).
enum Flow {
    Normal,
    Break,
    Return(Vec<Value>),
}

/// Decrements the call-depth counter when a call frame unwinds, including
/// on an early `?` return.
/// Concat cap (spec §4.3): combined operand length beyond this raises
/// `string length overflow` rather than building an unbounded string.
const MAX_CONCAT_LEN: usize = 10 * 1024 * 1024;

struct CallGuard<'a>(&'a Cell<usize>);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

pub struct Evaluator {
    pub globals: Rc<RefCell<Table>>,
    limits: Limits,
    instructions: Cell<u64>,
    call_depth: Cell<usize>,
    output: RefCell<String>,
    string_meta: RefCell<Option<Rc<RefCell<Table>>>>,
}

impl Evaluator {
    pub fn new(limits: Limits) -> Self {
        Evaluator {
            globals: Rc::new(RefCell::new(Table::new())),
            limits,
            instructions: Cell::new(0),
            call_depth: Cell::new(0),
            output: RefCell::new(String::new()),
            string_meta: RefCell::new(None),
        }
    }

    /// Resets the per-call instruction/output budgets (spec §5). Call
    /// depth is always zero between calls since `CallGuard` unwinds it.
    pub fn reset_quotas(&self) {
        self.instructions.set(0);
        self.output.borrow_mut().clear();
    }

    pub fn set_string_library(&self, table: Rc<RefCell<Table>>) {
        *self.string_meta.borrow_mut() = Some(table);
    }

    /// Returns the accumulated `print` records, joined by `\n` with no
    /// trailing newline (spec §6): each record is written with its own
    /// trailing `\n` so the output budget counts it, and the final one is
    /// trimmed off here.
    pub fn take_output(&self) -> String {
        let s = std::mem::take(&mut *self.output.borrow_mut());
        match s.strip_suffix('\n') {
            Some(stripped) => stripped.to_string(),
            None => s,
        }
    }

    fn tick(&self) -> Result<(), RuntimeError> {
        let n = self.instructions.get() + 1;
        if n > self.limits.max_instructions {
            return Err(RuntimeError::quota("execution quota exceeded"));
        }
        self.instructions.set(n);
        Ok(())
    }

    pub fn write_output(&self, s: &str) -> Result<(), RuntimeError> {
        let mut out = self.output.borrow_mut();
        if out.len() + s.len() > self.limits.max_output_bytes {
            return Err(RuntimeError::quota("output limit exceeded"));
        }
        out.push_str(s);
        Ok(())
    }

    /// Runs a top-level chunk and returns whatever it `return`s.
    pub fn exec_chunk(&self, block: &Block, env: &Rc<Environment>) -> Result<Vec<Value>, RuntimeError> {
        match self.exec_block(block, env)? {
            Flow::Return(vals) => Ok(vals),
            _ => Ok(Vec::new()),
        }
    }

    fn exec_block(&self, block: &Block, env: &Rc<Environment>) -> Result<Flow, RuntimeError> {
        for stmt in &block.stmts {
            match self.exec_stmt(stmt, env)? {
                Flow::Normal => continue,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, env: &Rc<Environment>) -> Result<Flow, RuntimeError> {
        self.tick()?;
        match stmt {
            Stmt::Assign { targets, values, .. } => {
                let vals = self.eval_exprlist(values, env)?;
                let vals = adjust(vals, targets.len());
                for (target, value) in targets.iter().zip(vals) {
                    self.assign_target(target, value, env)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Local { names, values, attribs: _, .. } => {
                let vals = self.eval_exprlist(values, env)?;
                let vals = adjust(vals, names.len());
                for (name, value) in names.iter().zip(vals) {
                    env.define(name.clone(), value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Do(body) => self.exec_block(body, &Environment::with_parent(env.clone())),
            Stmt::While { condition, body, .. } => {
                while self.eval_expr(condition, env)?.is_truthy() {
                    self.tick()?;
                    match self.exec_block(body, &Environment::with_parent(env.clone()))? {
                        Flow::Break => break,
                        Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Repeat { body, condition, .. } => loop {
                self.tick()?;
                let scope = Environment::with_parent(env.clone());
                match self.exec_block(body, &scope)? {
                    Flow::Break => break Ok(Flow::Normal),
                    Flow::Normal => {
                        if self.eval_expr(condition, &scope)?.is_truthy() {
                            break Ok(Flow::Normal);
                        }
                    }
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            },
            Stmt::If { clauses } => {
                for (cond, body) in clauses {
                    let taken = match cond {
                        Some(c) => self.eval_expr(c, env)?.is_truthy(),
                        None => true,
                    };
                    if taken {
                        return self.exec_block(body, &Environment::with_parent(env.clone()));
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::NumericFor { name, start, stop, step, body, .. } => {
                self.exec_numeric_for(name, start, stop, step.as_ref(), body, env)
            }
            Stmt::GenericFor { names, iterators, body, .. } => {
                self.exec_generic_for(names, iterators, body, env)
            }
            Stmt::Return { values } => Ok(Flow::Return(self.eval_exprlist(values, env)?)),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Call(expr) => {
                self.eval_multi(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Goto { label, .. } => Err(RuntimeError::new(format!(
                "no visible label '{label}' for goto"
            ))),
            Stmt::Label(_) => Ok(Flow::Normal),
        }
    }

    fn exec_numeric_for(
        &self,
        name: &str,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &Block,
        env: &Rc<Environment>,
    ) -> Result<Flow, RuntimeError> {
        let start = numeric_for_value(&self.eval_expr(start, env)?, "initial")?;
        let stop = numeric_for_value(&self.eval_expr(stop, env)?, "limit")?;
        let step = match step {
            Some(e) => numeric_for_value(&self.eval_expr(e, env)?, "step")?,
            None => Value::Integer(1),
        };

        let all_int = matches!(
            (&start, &stop, &step),
            (Value::Integer(_), Value::Integer(_), Value::Integer(_))
        );

        if all_int {
            let (mut i, stop, step) = match (start, stop, step) {
                (Value::Integer(a), Value::Integer(b), Value::Integer(c)) => (a, b, c),
                _ => unreachable!(),
            };
            if step == 0 {
                return Err(RuntimeError::new("'for' step is zero"));
            }
            while (step > 0 && i <= stop) || (step < 0 && i >= stop) {
                self.tick()?;
                let scope = Environment::with_parent(env.clone());
                scope.define(name.to_string(), Value::Integer(i));
                match self.exec_block(body, &scope)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Normal => {}
                    ret @ Flow::Return(_) => return Ok(ret),
                }
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        } else {
            let mut i = as_f64(&start);
            let stop = as_f64(&stop);
            let step = as_f64(&step);
            if step == 0.0 {
                return Err(RuntimeError::new("'for' step is zero"));
            }
            while (step > 0.0 && i <= stop) || (step < 0.0 && i >= stop) {
                self.tick()?;
                let scope = Environment::with_parent(env.clone());
                scope.define(name.to_string(), Value::Float(i));
                match self.exec_block(body, &scope)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Normal => {}
                    ret @ Flow::Return(_) => return Ok(ret),
                }
                i += step;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_generic_for(
        &self,
        names: &[String],
        iterators: &[Expr],
        body: &Block,
        env: &Rc<Environment>,
    ) -> Result<Flow, RuntimeError> {
        let triple = adjust(self.eval_exprlist(iterators, env)?, 3);
        let iter_fn = triple[0].clone();
        let state = triple[1].clone();
        let mut control = triple[2].clone();

        loop {
            self.tick()?;
            let mut results = self.call_value(iter_fn.clone(), vec![state.clone(), control.clone()])?;
            results = adjust(results, names.len().max(1));
            if matches!(results[0], Value::Nil) {
                return Ok(Flow::Normal);
            }
            control = results[0].clone();
            let scope = Environment::with_parent(env.clone());
            for (name, value) in names.iter().zip(results) {
                scope.define(name.clone(), value);
            }
            match self.exec_block(body, &scope)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Normal => {}
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
    }

    fn assign_target(&self, target: &Expr, value: Value, env: &Rc<Environment>) -> Result<(), RuntimeError> {
        match target {
            Expr::Name(name) => {
                if !env.assign_existing(name, value.clone()) {
                    self.index_set(&Value::Table(self.globals.clone()), Value::string(name.clone()), value)?;
                }
                Ok(())
            }
            Expr::Index { table, key } => {
                let t = self.eval_expr(table, env)?;
                let k = self.eval_expr(key, env)?;
                self.index_set(&t, k, value)
            }
            Expr::Field { table, field } => {
                let t = self.eval_expr(table, env)?;
                self.index_set(&t, Value::string(field.clone()), value)
            }
            _ => Err(RuntimeError::new("cannot assign to this expression")),
        }
    }

    // -- Expressions ------------------------------------------------------

    pub fn eval_expr(&self, expr: &Expr, env: &Rc<Environment>) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::True => Ok(Value::Boolean(true)),
            Expr::False => Ok(Value::Boolean(false)),
            Expr::Number(Number::Integer(i)) => Ok(Value::Integer(*i)),
            Expr::Number(Number::Float(f)) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::VarArg | Expr::Call { .. } | Expr::MethodCall { .. } => {
                let mut vals = self.eval_multi(expr, env)?;
                Ok(if vals.is_empty() { Value::Nil } else { vals.remove(0) })
            }
            Expr::Name(name) => match env.get(name) {
                Some(v) => Ok(v),
                None => self.index_get(&Value::Table(self.globals.clone()), &Value::string(name.clone())),
            },
            Expr::Index { table, key } => {
                let t = self.eval_expr(table, env)?;
                let k = self.eval_expr(key, env)?;
                self.index_get(&t, &k)
            }
            Expr::Field { table, field } => {
                let t = self.eval_expr(table, env)?;
                self.index_get(&t, &Value::string(field.clone()))
            }
            Expr::BinOp { op, left, right } => self.eval_binop(*op, left, right, env),
            Expr::UnOp { op, operand } => {
                let v = self.eval_expr(operand, env)?;
                self.eval_unop(*op, &v)
            }
            Expr::Function(body) => Ok(self.make_closure(body, env)),
            Expr::Table(fields) => self.eval_table(fields, env),
            Expr::Paren(inner) => self.eval_expr(inner, env),
        }
    }

    fn eval_multi(&self, expr: &Expr, env: &Rc<Environment>) -> Result<Vec<Value>, RuntimeError> {
        match expr {
            Expr::Call { func, args } => {
                let callee = self.eval_expr(func, env)?;
                let argv = self.eval_exprlist(args, env)?;
                self.call_value(callee, argv)
            }
            Expr::MethodCall { obj, method, args } => {
                let recv = self.eval_expr(obj, env)?;
                let f = self.index_get(&recv, &Value::string(method.clone()))?;
                let mut argv = vec![recv];
                argv.extend(self.eval_exprlist(args, env)?);
                self.call_value(f, argv)
            }
            Expr::VarArg => env
                .varargs()
                .map_err(|_| RuntimeError::new("cannot use '...' outside a vararg function")),
            _ => Ok(vec![self.eval_expr(expr, env)?]),
        }
    }

    /// Evaluates an expression list with Lua's adjustment rule: every
    /// expression but the last collapses to one value; the last expands
    /// fully if it is a call/vararg (spec §3.2).
    fn eval_exprlist(&self, exprs: &[Expr], env: &Rc<Environment>) -> Result<Vec<Value>, RuntimeError> {
        let mut result = Vec::with_capacity(exprs.len());
        for (i, e) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() {
                result.extend(self.eval_multi(e, env)?);
            } else {
                result.push(self.eval_expr(e, env)?);
            }
        }
        Ok(result)
    }

    fn eval_table(&self, fields: &[(Option<Expr>, Expr)], env: &Rc<Environment>) -> Result<Value, RuntimeError> {
        let mut table = Table::new();
        let mut next_index: i64 = 1;
        for (i, (key, value_expr)) in fields.iter().enumerate() {
            match key {
                Some(key_expr) => {
                    let k = self.eval_expr(key_expr, env)?;
                    let v = self.eval_expr(value_expr, env)?;
                    table.rawset(k, v)?;
                }
                None if i + 1 == fields.len() => {
                    for v in self.eval_multi(value_expr, env)? {
                        table.rawset(Value::Integer(next_index), v)?;
                        next_index += 1;
                    }
                }
                None => {
                    let v = self.eval_expr(value_expr, env)?;
                    table.rawset(Value::Integer(next_index), v)?;
                    next_index += 1;
                }
            }
        }
        Ok(Value::table(table))
    }

    fn make_closure(&self, body: &Rc<FunctionBody>, env: &Rc<Environment>) -> Value {
        let closure = LuaClosure {
            params: body.params.clone(),
            has_varargs: body.has_varargs,
            body: body.body.clone(),
            closure: env.clone(),
            name: RefCell::new(body.name.clone().unwrap_or_else(|| "?".to_string())),
        };
        Value::Function(Function::Lua(Rc::new(closure)))
    }

    // -- Calls --------------------------------------------------------

    pub fn call_value(&self, callee: Value, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        let depth = self.call_depth.get() + 1;
        if depth > self.limits.max_call_depth {
            return Err(RuntimeError::quota("stack overflow"));
        }
        self.call_depth.set(depth);
        let _guard = CallGuard(&self.call_depth);

        match &callee {
            Value::Function(Function::Native(n)) => (n.func)(&args),
            Value::Function(Function::Lua(closure)) => self.call_lua_closure(closure, args),
            _ => match self.get_metamethod(&callee, "__call") {
                Some(mm) => {
                    let mut call_args = Vec::with_capacity(args.len() + 1);
                    call_args.push(callee.clone());
                    call_args.extend(args);
                    self.call_value(mm, call_args)
                }
                None => Err(RuntimeError::new(format!(
                    "attempt to call a {} value",
                    callee.type_name()
                ))),
            },
        }
    }

    fn call_lua_closure(&self, closure: &Rc<LuaClosure>, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        let nparams = closure.params.len();
        let varargs = closure.has_varargs.then(|| {
            if args.len() > nparams {
                args[nparams..].to_vec()
            } else {
                Vec::new()
            }
        });
        let call_env = Environment::with_function_root(closure.closure.clone(), varargs);
        for (i, name) in closure.params.iter().enumerate() {
            call_env.define(name.clone(), args.get(i).cloned().unwrap_or(Value::Nil));
        }
        match self.exec_block(&closure.body, &call_env)? {
            Flow::Return(vals) => Ok(vals),
            _ => Ok(Vec::new()),
        }
    }

    // -- Indexing / metamethods ----------------------------------------

    pub fn get_metamethod(&self, v: &Value, name: &str) -> Option<Value> {
        let mt = match v {
            Value::Table(t) => t.borrow().metatable.clone(),
            _ => None,
        }?;
        let handler = mt.borrow().rawget(&Value::string(name));
        if matches!(handler, Value::Nil) {
            None
        } else {
            Some(handler)
        }
    }

    pub fn index_get(&self, obj: &Value, key: &Value) -> Result<Value, RuntimeError> {
        match obj {
            Value::Table(t) => {
                let raw = t.borrow().rawget(key);
                if !matches!(raw, Value::Nil) {
                    return Ok(raw);
                }
                let meta = t.borrow().metatable.clone();
                match meta {
                    None => Ok(Value::Nil),
                    Some(mt) => {
                        let handler = mt.borrow().rawget(&Value::string("__index"));
                        match handler {
                            Value::Nil => Ok(Value::Nil),
                            Value::Function(_) => Ok(self
                                .call_value(handler, vec![obj.clone(), key.clone()])?
                                .into_iter()
                                .next()
                                .unwrap_or(Value::Nil)),
                            other => self.index_get(&other, key),
                        }
                    }
                }
            }
            Value::String(_) => match &*self.string_meta.borrow() {
                Some(lib) => self.index_get(&Value::Table(lib.clone()), key),
                None => Ok(Value::Nil),
            },
            other => Err(RuntimeError::type_error("index", other.type_name())),
        }
    }

    pub fn index_set(&self, obj: &Value, key: Value, value: Value) -> Result<(), RuntimeError> {
        match obj {
            Value::Table(t) => {
                let exists = !matches!(t.borrow().rawget(&key), Value::Nil);
                if exists {
                    return t.borrow_mut().rawset(key, value);
                }
                let meta = t.borrow().metatable.clone();
                if let Some(mt) = meta {
                    let handler = mt.borrow().rawget(&Value::string("__newindex"));
                    match handler {
                        Value::Nil => {}
                        Value::Function(_) => {
                            self.call_value(handler, vec![obj.clone(), key, value])?;
                            return Ok(());
                        }
                        other => return self.index_set(&other, key, value),
                    }
                }
                t.borrow_mut().rawset(key, value)
            }
            other => Err(RuntimeError::type_error("index", other.type_name())),
        }
    }

    pub fn tostring(&self, v: &Value) -> Result<String, RuntimeError> {
        if let Some(mm) = self.get_metamethod(v, "__tostring") {
            let result = self.call_value(mm, vec![v.clone()])?;
            return match result.into_iter().next() {
                Some(Value::String(s)) => Ok(String::from_utf8_lossy(&s).into_owned()),
                Some(other) => self.tostring(&other),
                None => Ok("nil".to_string()),
            };
        }
        Ok(match v {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => String::from_utf8_lossy(s).into_owned(),
            Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            Value::Function(Function::Lua(c)) => format!("function: {:p}", Rc::as_ptr(c)),
            Value::Function(Function::Native(n)) => format!("function: builtin: {}", n.name),
        })
    }

    // -- Operators ------------------------------------------------------

    fn eval_binop(&self, op: BinOpKind, left: &Expr, right: &Expr, env: &Rc<Environment>) -> Result<Value, RuntimeError> {
        match op {
            BinOpKind::And => {
                let l = self.eval_expr(left, env)?;
                if !l.is_truthy() {
                    Ok(l)
                } else {
                    self.eval_expr(right, env)
                }
            }
            BinOpKind::Or => {
                let l = self.eval_expr(left, env)?;
                if l.is_truthy() {
                    Ok(l)
                } else {
                    self.eval_expr(right, env)
                }
            }
            _ => {
                let l = self.eval_expr(left, env)?;
                let r = self.eval_expr(right, env)?;
                match op {
                    BinOpKind::Eq => Ok(Value::Boolean(self.lua_equals(&l, &r)?)),
                    BinOpKind::Ne => Ok(Value::Boolean(!self.lua_equals(&l, &r)?)),
                    BinOpKind::Lt => Ok(Value::Boolean(self.lua_lt(&l, &r)?)),
                    BinOpKind::Gt => Ok(Value::Boolean(self.lua_lt(&r, &l)?)),
                    BinOpKind::Le => Ok(Value::Boolean(self.lua_le(&l, &r)?)),
                    BinOpKind::Ge => Ok(Value::Boolean(self.lua_le(&r, &l)?)),
                    BinOpKind::Concat => self.concat(&l, &r),
                    BinOpKind::BAnd | BinOpKind::BOr | BinOpKind::BXor | BinOpKind::Shl | BinOpKind::Shr => {
                        self.bitwise(op, &l, &r)
                    }
                    _ => self.arith(op, &l, &r),
                }
            }
        }
    }

    fn arith(&self, op: BinOpKind, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        if let (Some(ln), Some(rn)) = (coerce_number(l), coerce_number(r)) {
            return Ok(match op {
                BinOpKind::Add => numeric_binop(&ln, &rn, i64::wrapping_add, |a, b| a + b),
                BinOpKind::Sub => numeric_binop(&ln, &rn, i64::wrapping_sub, |a, b| a - b),
                BinOpKind::Mul => numeric_binop(&ln, &rn, i64::wrapping_mul, |a, b| a * b),
                BinOpKind::Div => Value::Float(as_f64(&ln) / as_f64(&rn)),
                BinOpKind::Pow => Value::Float(as_f64(&ln).powf(as_f64(&rn))),
                BinOpKind::IDiv => return self.idiv(&ln, &rn),
                BinOpKind::Mod => return self.lmod(&ln, &rn),
                _ => unreachable!("non-arithmetic op routed to arith()"),
            });
        }
        if let Some(mm) = self
            .get_metamethod(l, metamethod_name(op))
            .or_else(|| self.get_metamethod(r, metamethod_name(op)))
        {
            let res = self.call_value(mm, vec![l.clone(), r.clone()])?;
            return Ok(res.into_iter().next().unwrap_or(Value::Nil));
        }
        let bad = if coerce_number(l).is_none() { l } else { r };
        Err(RuntimeError::type_error("perform arithmetic on", bad.type_name()))
    }

    fn idiv(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match (l, r) {
            (Value::Integer(a), Value::Integer(b)) => {
                if *b == 0 {
                    return Err(RuntimeError::new("attempt to perform 'n//0'"));
                }
                Ok(Value::Integer(int_floordiv(*a, *b)))
            }
            _ => Ok(Value::Float((as_f64(l) / as_f64(r)).floor())),
        }
    }

    fn lmod(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match (l, r) {
            (Value::Integer(a), Value::Integer(b)) => {
                if *b == 0 {
                    return Err(RuntimeError::new("attempt to perform 'n%%0'"));
                }
                Ok(Value::Integer(int_floormod(*a, *b)))
            }
            _ => {
                let (a, b) = (as_f64(l), as_f64(r));
                let r = a % b;
                Ok(Value::Float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }))
            }
        }
    }

    fn bitwise(&self, op: BinOpKind, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        if let (Some(a), Some(b)) = (to_integer(l), to_integer(r)) {
            return Ok(Value::Integer(match op {
                BinOpKind::BAnd => a & b,
                BinOpKind::BOr => a | b,
                BinOpKind::BXor => a ^ b,
                BinOpKind::Shl => lua_shl(a, b),
                BinOpKind::Shr => lua_shl(a, -b),
                _ => unreachable!(),
            }));
        }
        if let Some(mm) = self
            .get_metamethod(l, metamethod_name(op))
            .or_else(|| self.get_metamethod(r, metamethod_name(op)))
        {
            let res = self.call_value(mm, vec![l.clone(), r.clone()])?;
            return Ok(res.into_iter().next().unwrap_or(Value::Nil));
        }
        Err(RuntimeError::new("number has no integer representation"))
    }

    fn concat(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        if let (Some(ls), Some(rs)) = (concat_str(l), concat_str(r)) {
            if ls.len() + rs.len() > MAX_CONCAT_LEN {
                return Err(RuntimeError::new("string length overflow"));
            }
            let mut buf = ls;
            buf.extend_from_slice(&rs);
            return Ok(Value::string(buf));
        }
        if let Some(mm) = self
            .get_metamethod(l, "__concat")
            .or_else(|| self.get_metamethod(r, "__concat"))
        {
            let res = self.call_value(mm, vec![l.clone(), r.clone()])?;
            return Ok(res.into_iter().next().unwrap_or(Value::Nil));
        }
        let bad = if concat_str(l).is_none() { l } else { r };
        Err(RuntimeError::type_error("concatenate", bad.type_name()))
    }

    pub fn lua_equals(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        if l == r {
            return Ok(true);
        }
        if let (Value::Table(_), Value::Table(_)) = (l, r) {
            if let Some(mm) = self.get_metamethod(l, "__eq").or_else(|| self.get_metamethod(r, "__eq")) {
                let res = self.call_value(mm, vec![l.clone(), r.clone()])?;
                return Ok(res.into_iter().next().unwrap_or(Value::Nil).is_truthy());
            }
        }
        Ok(false)
    }

    fn lua_lt(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        match (l, r) {
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                Ok(as_f64(l) < as_f64(r))
            }
            (Value::String(a), Value::String(b)) => Ok(a < b),
            _ => self.compare_metamethod("__lt", l, r),
        }
    }

    fn lua_le(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        match (l, r) {
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                Ok(as_f64(l) <= as_f64(r))
            }
            (Value::String(a), Value::String(b)) => Ok(a <= b),
            _ => self.compare_metamethod("__le", l, r),
        }
    }

    fn compare_metamethod(&self, name: &str, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        if let Some(mm) = self.get_metamethod(l, name).or_else(|| self.get_metamethod(r, name)) {
            let res = self.call_value(mm, vec![l.clone(), r.clone()])?;
            Ok(res.into_iter().next().unwrap_or(Value::Nil).is_truthy())
        } else {
            Err(RuntimeError::new(format!(
                "attempt to compare {} with {}",
                l.type_name(),
                r.type_name()
            )))
        }
    }

    pub fn lua_len(&self, v: &Value) -> Result<Value, RuntimeError> {
        match v {
            Value::String(s) => Ok(Value::Integer(s.len() as i64)),
            Value::Table(t) => {
                if let Some(mm) = self.get_metamethod(v, "__len") {
                    let res = self.call_value(mm, vec![v.clone()])?;
                    return Ok(res.into_iter().next().unwrap_or(Value::Nil));
                }
                Ok(Value::Integer(t.borrow_mut().length()))
            }
            other => Err(RuntimeError::type_error("get length of", other.type_name())),
        }
    }

    fn eval_unop(&self, op: UnOpKind, v: &Value) -> Result<Value, RuntimeError> {
        match op {
            UnOpKind::Not => Ok(Value::Boolean(!v.is_truthy())),
            UnOpKind::Len => self.lua_len(v),
            UnOpKind::Neg => match coerce_number(v) {
                Some(Value::Integer(i)) => Ok(Value::Integer(i.wrapping_neg())),
                Some(Value::Float(f)) => Ok(Value::Float(-f)),
                _ => {
                    if let Some(mm) = self.get_metamethod(v, "__unm") {
                        let res = self.call_value(mm, vec![v.clone(), v.clone()])?;
                        Ok(res.into_iter().next().unwrap_or(Value::Nil))
                    } else {
                        Err(RuntimeError::type_error("perform arithmetic on", v.type_name()))
                    }
                }
            },
            UnOpKind::BNot => match to_integer(v) {
                Some(i) => Ok(Value::Integer(!i)),
                None => {
                    if let Some(mm) = self.get_metamethod(v, "__bnot") {
                        let res = self.call_value(mm, vec![v.clone(), v.clone()])?;
                        Ok(res.into_iter().next().unwrap_or(Value::Nil))
                    } else {
                        Err(RuntimeError::new("number has no integer representation"))
                    }
                }
            },
        }
    }
}

fn adjust(mut vals: Vec<Value>, n: usize) -> Vec<Value> {
    vals.resize(n, Value::Nil);
    vals
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn numeric_binop(l: &Value, r: &Value, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Value {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => Value::Integer(int_op(*a, *b)),
        _ => Value::Float(float_op(as_f64(l), as_f64(r))),
    }
}

fn int_floordiv(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

fn int_floormod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

fn lua_shl(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> (-n)) as i64
    }
}

/// Coerces a value to a number for arithmetic, following Lua's rule that
/// numeric strings are accepted in arithmetic context (not just `tonumber`).
pub fn coerce_number(v: &Value) -> Option<Value> {
    match v {
        Value::Integer(_) | Value::Float(_) => Some(v.clone()),
        Value::String(s) => str_to_number(s),
        _ => None,
    }
}

pub fn to_integer(v: &Value) -> Option<i64> {
    match coerce_number(v)? {
        Value::Integer(i) => Some(i),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(f as i64),
        _ => None,
    }
}

/// Parses a Lua numeral the way `tonumber`/arithmetic coercion do: leading
/// sign, decimal or `0x`-prefixed hex, optional fractional part. A byte
/// string that isn't valid UTF-8 is never a valid Lua numeral, so it simply
/// fails to parse rather than needing a lossy conversion.
pub fn str_to_number(s: &[u8]) -> Option<Value> {
    let s = std::str::from_utf8(s).ok()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(r) => (-1i64, r),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        if let Ok(i) = i64::from_str_radix(hex, 16) {
            return Some(Value::Integer(sign * i));
        }
        if let Ok(u) = u64::from_str_radix(hex, 16) {
            return Some(Value::Integer((sign as i128 * u as i128) as i64));
        }
        return None;
    }
    if let Ok(i) = rest.parse::<i64>() {
        return Some(Value::Integer(sign * i));
    }
    rest.parse::<f64>().ok().map(|f| Value::Float(sign as f64 * f))
}

fn concat_str(v: &Value) -> Option<Vec<u8>> {
    match v {
        Value::String(s) => Some(s.to_vec()),
        Value::Integer(i) => Some(i.to_string().into_bytes()),
        Value::Float(f) => Some(format_float(*f).into_bytes()),
        _ => None,
    }
}

fn numeric_for_value(v: &Value, which: &str) -> Result<Value, RuntimeError> {
    coerce_number(v).ok_or_else(|| RuntimeError::new(format!("'for' {which} value must be a number")))
}

fn metamethod_name(op: BinOpKind) -> &'static str {
    match op {
        BinOpKind::Add => "__add",
        BinOpKind::Sub => "__sub",
        BinOpKind::Mul => "__mul",
        BinOpKind::Div => "__div",
        BinOpKind::IDiv => "__idiv",
        BinOpKind::Mod => "__mod",
        BinOpKind::Pow => "__pow",
        BinOpKind::BAnd => "__band",
        BinOpKind::BOr => "__bor",
        BinOpKind::BXor => "__bxor",
        BinOpKind::Shl => "__shl",
        BinOpKind::Shr => "__shr",
        _ => unreachable!("metamethod_name called for non-arithmetic op"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(src: &str) -> Result<Vec<Value>, RuntimeError> {
        let block = parse(src).expect("parse");
        let eval = Evaluator::new(Limits::default());
        let env = Environment::new();
        eval.exec_chunk(&block, &env)
    }

    #[test]
    fn arithmetic_and_return() {
        let result = run("return 1 + 2 * 3").unwrap();
        assert_eq!(result, vec![Value::Integer(7)]);
    }

    #[test]
    fn local_assignment_and_shadowing() {
        let result = run("local x = 10\ndo local x = 20 end\nreturn x").unwrap();
        assert_eq!(result, vec![Value::Integer(10)]);
    }

    #[test]
    fn global_assignment_persists() {
        let result = run("x = 5\nreturn x").unwrap();
        assert_eq!(result, vec![Value::Integer(5)]);
    }

    #[test]
    fn numeric_for_accumulates() {
        let result = run("local sum = 0\nfor i = 1, 5 do sum = sum + i end\nreturn sum").unwrap();
        assert_eq!(result, vec![Value::Integer(15)]);
    }

    #[test]
    fn function_call_and_closures() {
        let result = run(
            r#"
            local function make_counter()
              local n = 0
              return function()
                n = n + 1
                return n
              end
            end
            local c = make_counter()
            c()
            c()
            return c()
            "#,
        )
        .unwrap();
        assert_eq!(result, vec![Value::Integer(3)]);
    }

    #[test]
    fn table_constructor_and_index() {
        let result = run("local t = {10, 20, 30}\nreturn t[2], #t").unwrap();
        assert_eq!(result, vec![Value::Integer(20), Value::Integer(3)]);
    }

    #[test]
    fn metatable_add_dispatches() {
        let result = run(
            r#"
            local mt = {__add = function(a, b) return a.v + b.v end}
            local a = setmetatable({v = 1}, mt)
            local b = setmetatable({v = 2}, mt)
            return a + b
            "#,
        )
        .unwrap();
        assert_eq!(result, vec![Value::Integer(3)]);
    }

    #[test]
    fn string_concat_coerces_numbers() {
        let result = run(r#"return "n=" .. 5"#).unwrap();
        assert_eq!(result, vec![Value::string("n=5")]);
    }

    #[test]
    fn instruction_quota_is_enforced() {
        let block = parse("local i = 0\nwhile true do i = i + 1 end").unwrap();
        let eval = Evaluator::new(Limits {
            max_instructions: 100,
            ..Limits::default()
        });
        let env = Environment::new();
        let err = eval.exec_chunk(&block, &env).unwrap_err();
        assert!(err.is_quota);
    }

    #[test]
    fn floor_division_and_modulo_match_lua_rules() {
        let result = run("return -7 // 2, -7 % 2").unwrap();
        assert_eq!(result, vec![Value::Integer(-4), Value::Integer(1)]);
    }
}

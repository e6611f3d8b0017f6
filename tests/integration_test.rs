// ABOUTME: End-to-end tests against the host-facing `Session` façade,
// ABOUTME: covering the spec's worked scenarios and cross-cutting invariants

use lua_sandbox::config::Limits;
use lua_sandbox::error::Error;
use lua_sandbox::session::Session;
use serde_json::json;

fn session() -> Session {
    Session::default()
}

// -- spec §8 end-to-end scenarios ---------------------------------------

#[test]
fn scenario_numeric_for_prints_each_iteration() {
    let out = session().execute("for i = 1, 3 do print(i) end").unwrap();
    assert_eq!(out, "1\n2\n3");
}

#[test]
fn scenario_varargs_collect_into_table() {
    let out = session()
        .execute("local function f(...) local t = {...} return #t end\nprint(f(10,20,30))")
        .unwrap();
    assert_eq!(out, "3");
}

#[test]
fn scenario_recursive_factorial() {
    let out = session()
        .execute("function fact(n) if n<=1 then return 1 end return n*fact(n-1) end\nprint(fact(10))")
        .unwrap();
    assert_eq!(out, "3628800");
}

#[test]
fn scenario_metamethod_add_dispatches_on_tables() {
    let out = session()
        .execute(
            r#"
            local mt = {__add = function(a,b) return a.v+b.v end}
            local x = setmetatable({v=10}, mt)
            local y = setmetatable({v=20}, mt)
            print(x+y)
            "#,
        )
        .unwrap();
    assert_eq!(out, "30");
}

#[test]
fn scenario_gsub_with_word_capture_and_count() {
    let out = session()
        .execute(r#"print(string.gsub("hello world", "(%w+)", "%1-%1"))"#)
        .unwrap();
    assert_eq!(out, "hello-hello world-world\t2");
}

#[test]
fn string_char_of_a_high_byte_is_a_single_byte_string() {
    let out = session().execute("print(#string.char(200))").unwrap();
    assert_eq!(out, "1");
}

#[test]
fn hex_and_decimal_escapes_survive_sub_and_reverse_as_raw_bytes() {
    let out = session()
        .execute(
            r#"
            local s = "\xC8\200"
            print(#s, #string.sub(s, 1, 1), #string.reverse(s))
            "#,
        )
        .unwrap();
    assert_eq!(out, "2\t1\t2");
}

#[test]
fn format_percent_s_preserves_raw_bytes() {
    let out = session().execute(r#"print(#string.format("%s", string.char(200)))"#).unwrap();
    assert_eq!(out, "1");
}

#[test]
fn table_concat_preserves_raw_bytes_of_string_elements() {
    let out = session()
        .execute("local t = {string.char(200), string.char(201)}\nprint(#table.concat(t))")
        .unwrap();
    assert_eq!(out, "2");
}

#[test]
fn scenario_instruction_quota_surfaces_as_runtime_error() {
    let session = Session::new(Limits {
        max_instructions: 1000,
        ..Limits::default()
    });
    let err = session.execute("while true do end").unwrap_err();
    match err {
        Error::Runtime(e) => {
            assert!(e.is_quota);
            assert_eq!(e.message, "execution quota exceeded");
        }
        other => panic!("expected a quota RuntimeError, got {other:?}"),
    }
}

// -- universally-quantified invariants (spec §8) -------------------------

#[test]
fn numeric_cross_type_equality() {
    let s = session();
    assert_eq!(s.eval("1 == 1.0").unwrap(), json!(true));
    assert_eq!(s.eval("1.5 ~= 1").unwrap(), json!(true));
    assert_eq!(s.eval("0.0 == -0.0").unwrap(), json!(true));
    assert_eq!(s.eval("0/0 ~= 0/0").unwrap(), json!(true));
}

#[test]
fn sequence_table_length_and_ipairs_agree() {
    let s = session();
    let out = s
        .execute(
            r#"
            local t = {10, 20, 30}
            local seen = {}
            for i, v in ipairs(t) do seen[i] = v end
            print(#t, #seen, seen[1], seen[2], seen[3])
            "#,
        )
        .unwrap();
    assert_eq!(out, "3\t3\t10\t20\t30");
}

#[test]
fn floor_div_and_mod_reconstruct_dividend() {
    let out = session()
        .execute("local a, b = 17, 5\nprint((a // b) * b + (a % b) == a)")
        .unwrap();
    assert_eq!(out, "true");
    let out = session()
        .execute("local a, b = -17, 5\nprint((a // b) * b + (a % b) == a)")
        .unwrap();
    assert_eq!(out, "true");
}

#[test]
fn short_circuit_and_never_evaluates_rhs() {
    // If the RHS of `and` were evaluated, `error("x")` would raise and this
    // would return an Err instead of `false`.
    let out = session().execute("print(false and error('x'))").unwrap();
    assert_eq!(out, "false");
}

#[test]
fn rawset_rawget_round_trip_and_nil_deletes() {
    let s = session();
    let out = s
        .execute(
            r#"
            local t = {}
            rawset(t, "k", "v")
            print(rawget(t, "k"))
            rawset(t, "k", nil)
            print(rawget(t, "k"))
            "#,
        )
        .unwrap();
    assert_eq!(out, "v\nnil");
}

// -- host bridge round-trips ----------------------------------------------

#[test]
fn set_get_round_trips_scalars() {
    let s = session();
    for v in [json!(42), json!(3.5), json!("hi"), json!(true), json!(null)] {
        s.set("x", v.clone());
        assert_eq!(s.get("x").unwrap(), v);
    }
}

#[test]
fn set_get_round_trips_array() {
    let s = session();
    s.set("arr", json!([1, 2, 3]));
    assert_eq!(s.get("arr").unwrap(), json!([1, 2, 3]));
    assert_eq!(s.eval("#arr").unwrap(), json!(3));
}

#[test]
fn set_get_round_trips_object() {
    let s = session();
    s.set("obj", json!({"name": "ada", "age": 36}));
    let out = s.eval("obj.name").unwrap();
    assert_eq!(out, json!("ada"));
    assert_eq!(s.get("obj").unwrap(), json!({"name": "ada", "age": 36}));
}

#[test]
fn table_pack_unpack_round_trips() {
    let out = session()
        .execute("local a, b, c = table.unpack(table.pack(1, 2, 3))\nprint(a, b, c)")
        .unwrap();
    assert_eq!(out, "1\t2\t3");
}

#[test]
fn host_defined_function_is_callable_from_script() {
    let out = session()
        .execute("function double(n) return n * 2 end\nprint(double(21))")
        .unwrap();
    assert_eq!(out, "42");
}

// -- closures, scoping, control flow --------------------------------------

#[test]
fn closures_capture_per_iteration_loop_variable() {
    let out = session()
        .execute(
            r#"
            local fns = {}
            for i = 1, 3 do
              fns[i] = function() return i end
            end
            print(fns[1](), fns[2](), fns[3]())
            "#,
        )
        .unwrap();
    assert_eq!(out, "1\t2\t3");
}

#[test]
fn local_redeclaration_sees_outer_binding_on_rhs() {
    let out = session().execute("local x = 10\nlocal x = x + 1\nprint(x)").unwrap();
    assert_eq!(out, "11");
}

#[test]
fn generic_for_over_pairs_visits_every_key() {
    let out = session()
        .execute(
            r#"
            local t = {a = 1, b = 2, c = 3}
            local sum = 0
            for k, v in pairs(t) do sum = sum + v end
            print(sum)
            "#,
        )
        .unwrap();
    assert_eq!(out, "6");
}

#[test]
fn break_exits_innermost_loop_only() {
    let out = session()
        .execute(
            r#"
            local count = 0
            for i = 1, 3 do
              for j = 1, 3 do
                if j == 2 then break end
                count = count + 1
              end
            end
            print(count)
            "#,
        )
        .unwrap();
    assert_eq!(out, "3");
}

#[test]
fn repeat_until_sees_body_scope_in_condition() {
    let out = session()
        .execute(
            r#"
            local n = 0
            repeat
              local done = n >= 3
              n = n + 1
            until done
            print(n)
            "#,
        )
        .unwrap();
    assert_eq!(out, "4");
}

#[test]
fn multi_assignment_evaluates_rhs_before_any_assignment() {
    let out = session().execute("local a, b = 1, 2\na, b = b, a\nprint(a, b)").unwrap();
    assert_eq!(out, "2\t1");
}

#[test]
fn method_call_passes_implicit_self() {
    let out = session()
        .execute(
            r#"
            local obj = {v = 5}
            function obj:get() return self.v end
            print(obj:get())
            "#,
        )
        .unwrap();
    assert_eq!(out, "5");
}

#[test]
fn string_method_call_resolves_through_string_metatable() {
    let out = session().execute(r#"print(("hello"):upper())"#).unwrap();
    assert_eq!(out, "HELLO");
}

// -- errors / pcall / quotas ----------------------------------------------

#[test]
fn pcall_catches_runtime_error_and_returns_message() {
    let out = session()
        .execute(
            r#"
            local ok, msg = pcall(function() error("boom") end)
            print(ok, msg)
            "#,
        )
        .unwrap();
    assert_eq!(out, "false\tboom");
}

#[test]
fn pcall_returns_results_on_success() {
    let out = session()
        .execute("local ok, a, b = pcall(function() return 1, 2 end)\nprint(ok, a, b)")
        .unwrap();
    assert_eq!(out, "true\t1\t2");
}

#[test]
fn xpcall_runs_handler_with_message() {
    let out = session()
        .execute(
            r#"
            local ok, handled = xpcall(function() error("oops") end, function(m) return "handled:" .. m end)
            print(ok, handled)
            "#,
        )
        .unwrap();
    assert_eq!(out, "false\thandled:oops");
}

#[test]
fn quota_errors_propagate_past_pcall() {
    let session = Session::new(Limits {
        max_instructions: 50,
        ..Limits::default()
    });
    let err = session
        .execute("local ok = pcall(function() local i = 0 while true do i = i + 1 end end)")
        .unwrap_err();
    match err {
        Error::Runtime(e) => assert!(e.is_quota),
        other => panic!("expected quota error to escape pcall, got {other:?}"),
    }
}

#[test]
fn call_depth_quota_is_a_runtime_error() {
    let session = Session::new(Limits {
        max_call_depth: 10,
        ..Limits::default()
    });
    let err = session
        .execute("local function rec(n) return rec(n + 1) end\nrec(0)")
        .unwrap_err();
    match err {
        Error::Runtime(e) => {
            assert!(e.is_quota);
            assert_eq!(e.message, "stack overflow");
        }
        other => panic!("expected stack overflow quota error, got {other:?}"),
    }
}

#[test]
fn output_quota_is_a_runtime_error() {
    let session = Session::new(Limits {
        max_output_bytes: 5,
        ..Limits::default()
    });
    let err = session.execute("print('this is way too long to fit')").unwrap_err();
    match err {
        Error::Runtime(e) => {
            assert!(e.is_quota);
            assert_eq!(e.message, "output limit exceeded");
        }
        other => panic!("expected output quota error, got {other:?}"),
    }
}

#[test]
fn syntax_error_carries_line_number() {
    let err = session().execute("local x = \nif x then end end").unwrap_err();
    match err {
        Error::Syntax(e) => assert!(e.to_string().starts_with("[string]:")),
        other => panic!("expected a SyntaxError, got {other:?}"),
    }
}

#[test]
fn calling_a_nil_value_is_a_runtime_error() {
    let err = session().execute("local f = nil\nf()").unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
}

#[test]
fn indexing_a_nil_value_is_a_runtime_error() {
    let err = session().execute("local t = nil\nreturn t.x").unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
}

#[test]
fn goto_is_parsed_but_fails_at_execution() {
    let err = session().execute("goto done\n::done::\nprint(1)").unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
}

// -- globals persist across calls on the same session ---------------------

#[test]
fn globals_persist_across_execute_calls() {
    let s = session();
    s.execute("counter = 0").unwrap();
    s.execute("counter = counter + 1").unwrap();
    s.execute("counter = counter + 1").unwrap();
    assert_eq!(s.eval("counter").unwrap(), json!(2));
}

#[test]
fn instruction_quota_resets_between_calls() {
    let s = Session::new(Limits {
        max_instructions: 200,
        ..Limits::default()
    });
    // Each call independently fits under the budget even though, summed,
    // they would exceed it.
    for _ in 0..5 {
        s.execute("local x = 0\nfor i = 1, 20 do x = x + i end").unwrap();
    }
}

// -- sandboxed surface: absent globals -------------------------------------

#[test]
fn filesystem_and_module_globals_are_absent() {
    let s = session();
    for name in ["io", "load", "loadstring", "dofile", "require", "debug", "coroutine"] {
        let out = s.execute(&format!("print(type({name}))")).unwrap();
        assert_eq!(out, "nil", "expected {name} to be absent");
    }
}

#[test]
fn os_execute_is_not_part_of_the_sandboxed_os_subset() {
    assert_eq!(session().eval("os.execute").unwrap(), json!(null));
}

#[test]
fn version_global_matches_spec() {
    assert_eq!(session().eval("_VERSION").unwrap(), json!("Lua 5.5"));
}

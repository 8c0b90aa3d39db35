//! End-to-end interpreter tests: full source programs in, captured
//! program output (and interpreter verdicts) out.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use glipt_runtime::{InterpretError, Vm};

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_with(
    source: &str,
    setup: impl FnOnce(&mut Vm),
) -> (String, Result<(), InterpretError>) {
    let buf = SharedBuf::default();
    let mut vm = Vm::new();
    vm.set_output(Box::new(buf.clone()));
    setup(&mut vm);
    let result = vm.interpret(source);
    // A successful run leaves no residue on the VM.
    if result.is_ok() {
        assert_eq!(vm.stack_len(), 0, "stack not empty after run");
        assert_eq!(vm.frame_count(), 0, "frames not empty after run");
        assert_eq!(vm.open_upvalue_count(), 0, "open upvalues left behind");
    }
    (buf.contents(), result)
}

fn run(source: &str) -> (String, Result<(), InterpretError>) {
    run_with(source, |_| {})
}

fn run_ok(source: &str) -> String {
    let (output, result) = run(source);
    result.expect("expected successful run");
    output
}

fn run_err(source: &str) -> String {
    let (_, result) = run(source);
    match result {
        Err(InterpretError::Runtime(message)) => message,
        other => panic!("expected runtime error, got {other:?}"),
    }
}

// ---- Basics ----

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(run_ok("print(1 + 2 * 3)\n"), "7\n");
    assert_eq!(run_ok("print((1 + 2) * 3)\n"), "9\n");
    assert_eq!(run_ok("print(10 % 3)\n"), "1\n");
    assert_eq!(run_ok("print(-4 + 1)\n"), "-3\n");
    assert_eq!(run_ok("print(7 / 2)\n"), "3.5\n");
}

#[test]
fn string_concatenation() {
    assert_eq!(run_ok("print(\"foo\" + \"bar\")\n"), "foobar\n");
}

#[test]
fn comparison_and_logic() {
    assert_eq!(run_ok("print(1 < 2 and 2 <= 2)\n"), "true\n");
    assert_eq!(run_ok("print(1 > 2 or 3 >= 4)\n"), "false\n");
    assert_eq!(run_ok("print(not nil)\n"), "true\n");
    assert_eq!(run_ok("print(1 == 1.0)\n"), "true\n");
    assert_eq!(run_ok("print(\"a\" != \"b\")\n"), "true\n");
}

#[test]
fn truthiness_rules() {
    // nil, false and zero are falsey; empty containers are truthy.
    assert_eq!(run_ok("print(bool(0))\n"), "false\n");
    assert_eq!(run_ok("print(bool(nil))\n"), "false\n");
    assert_eq!(run_ok("print(bool(\"\"))\n"), "true\n");
    assert_eq!(run_ok("print(bool([]))\n"), "true\n");
    assert_eq!(run_ok("print(bool({}))\n"), "true\n");
}

#[test]
fn short_circuit_leaves_operand_value() {
    assert_eq!(run_ok("print(nil and 1)\n"), "nil\n");
    assert_eq!(run_ok("print(2 or 1)\n"), "2\n");
    assert_eq!(run_ok("print(false or \"fallback\")\n"), "fallback\n");
}

#[test]
fn global_binding_round_trips() {
    assert_eq!(run_ok("let x = 41\nx = x + 1\nprint(x)\n"), "42\n");
    assert_eq!(run_ok("y = 10\nprint(y)\n"), "10\n");
}

#[test]
fn compound_assignment_forms() {
    let source = "let x = 8\nx += 2\nx -= 1\nx *= 4\nx /= 2\nprint(x)\n";
    assert_eq!(run_ok(source), "18\n");
}

#[test]
fn top_level_block_bindings_escape_to_globals() {
    let source = "if true {\n  y = 5\n}\nprint(y)\n";
    assert_eq!(run_ok(source), "5\n");
}

#[test]
fn function_blocks_rebind_locals() {
    let source = "fn f() {\n  let x = 1\n  if true {\n    x = 2\n  }\n  return x\n}\nprint(f())\n";
    assert_eq!(run_ok(source), "2\n");
}

// ---- Control flow ----

#[test]
fn if_else_chains() {
    let source = "fn grade(n) {\n  if n > 90 {\n    return \"a\"\n  } else if n > 80 {\n    return \"b\"\n  } else {\n    return \"c\"\n  }\n}\nprint(grade(95))\nprint(grade(85))\nprint(grade(10))\n";
    assert_eq!(run_ok(source), "a\nb\nc\n");
}

#[test]
fn while_loop_with_break_and_continue() {
    let source = "let total = 0\nlet i = 0\nwhile true {\n  i = i + 1\n  if i > 10 {\n    break\n  }\n  if i % 2 == 0 {\n    continue\n  }\n  total = total + i\n}\nprint(total)\n";
    assert_eq!(run_ok(source), "25\n");
}

#[test]
fn for_loop_over_list_and_range() {
    assert_eq!(
        run_ok("let out = 0\nfor x in [1, 2, 3] {\n  out = out + x\n}\nprint(out)\n"),
        "6\n"
    );
    assert_eq!(
        run_ok("let out = 0\nfor i in 0..5 {\n  out = out + i\n}\nprint(out)\n"),
        "10\n"
    );
}

#[test]
fn nested_loops_restore_break_targets() {
    let source = "let hits = 0\nfor i in 0..3 {\n  for j in 0..3 {\n    if j == 1 {\n      break\n    }\n    hits = hits + 1\n  }\n}\nprint(hits)\n";
    assert_eq!(run_ok(source), "3\n");
}

// ---- Functions & closures ----

#[test]
fn closure_counter_counts_up() {
    let source = "fn make_counter() { let n = 0; fn step() { n = n + 1; return n }; return step }\nlet c = make_counter(); print(c()); print(c()); print(c())\n";
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn counters_are_independent() {
    let source = "fn make_counter() { let n = 0; fn step() { n = n + 1; return n }; return step }\nlet a = make_counter()\nlet b = make_counter()\nprint(a())\nprint(a())\nprint(b())\n";
    assert_eq!(run_ok(source), "1\n2\n1\n");
}

#[test]
fn closures_share_the_same_captured_slot() {
    let source = "fn pair() {\n  let n = 0\n  fn inc() { n = n + 1; return n }\n  fn get() { return n }\n  return [inc, get]\n}\nlet p = pair()\np[0]()\np[0]()\nprint(p[1]())\n";
    assert_eq!(run_ok(source), "2\n");
}

#[test]
fn lambdas_and_immediate_invocation() {
    assert_eq!(run_ok("let double = fn(x) { x * 2 }\nprint(double(21))\n"), "42\n");
    assert_eq!(run_ok("print(fn(x) { x + 1 }(41))\n"), "42\n");
}

#[test]
fn function_body_returns_final_expression() {
    assert_eq!(run_ok("fn f(x) { x * x }\nprint(f(7))\n"), "49\n");
}

#[test]
fn pipe_desugars_to_a_call() {
    let source = "fn double(x) { x * 2 }\nprint(5 | double)\nprint(5 | double | double)\n";
    assert_eq!(run_ok(source), "10\n20\n");
}

#[test]
fn recursion_works_through_globals() {
    let source = "fn fib(n) {\n  if n < 2 {\n    return n\n  }\n  return fib(n - 1) + fib(n - 2)\n}\nprint(fib(10))\n";
    assert_eq!(run_ok(source), "55\n");
}

// ---- Match ----

#[test]
fn match_with_wildcard_fallback() {
    let source = "fn f(x) { match x { 1 -> \"one\", 2 -> \"two\", _ -> \"other\" } }\nprint(f(2)); print(f(99))\n";
    assert_eq!(run_ok(source), "two\nother\n");
}

#[test]
fn match_without_matching_arm_yields_nil() {
    let source = "let r = match 5 { 1 -> \"one\" }\nprint(r)\n";
    assert_eq!(run_ok(source), "nil\n");
}

#[test]
fn match_subject_evaluates_once() {
    let source = "let calls = 0\nfn subject() { calls = calls + 1; return 2 }\nlet r = match subject() { 1 -> \"a\", 2 -> \"b\", 3 -> \"c\" }\nprint(r)\nprint(calls)\n";
    assert_eq!(run_ok(source), "b\n1\n");
}

#[test]
fn match_on_strings() {
    let source = "fn color(name) { match name { \"red\" -> 1, \"green\" -> 2, _ -> 0 } }\nprint(color(\"green\"))\n";
    assert_eq!(run_ok(source), "2\n");
}

// ---- Lists, maps, strings ----

#[test]
fn list_indexing_and_length() {
    assert_eq!(run_ok("let l = [10, 20, 30]\nprint(l[0])\nprint(l[-1])\nprint(l.length)\n"), "10\n30\n3\n");
    assert_eq!(run_ok("let l = [1, 2, 3]\nl[1] = 99\nprint(l[1])\n"), "99\n");
}

#[test]
fn map_keys_properties_and_assignment() {
    let source = "let m = {name: \"glipt\", \"count\": 2}\nprint(m.name)\nprint(m[\"count\"])\nm.count = 3\nprint(m.count)\nm[\"extra\"] = true\nprint(m.extra)\nprint(m.missing)\n";
    assert_eq!(run_ok(source), "glipt\n2\n3\ntrue\nnil\n");
}

#[test]
fn string_indexing_and_length() {
    assert_eq!(run_ok("let s = \"hello\"\nprint(s[0])\nprint(s[-1])\nprint(s.length)\n"), "h\no\n5\n");
}

#[test]
fn builtin_collection_helpers() {
    assert_eq!(run_ok("let l = [1]\nappend(l, 2)\nprint(len(l))\nprint(pop(l))\nprint(len(l))\n"), "2\n2\n1\n");
    assert_eq!(run_ok("print(contains([1, 2, 3], 2))\nprint(contains(\"hello\", \"ell\"))\nprint(contains({a: 1}, \"a\"))\n"), "true\ntrue\ntrue\n");
    assert_eq!(run_ok("print(sort([3, 1, 2]))\n"), "[1, 2, 3]\n");
    assert_eq!(run_ok("print(join([\"a\", \"b\", 3], \"-\"))\n"), "a-b-3\n");
    assert_eq!(run_ok("print(keys({only: 1}))\nprint(values({only: 1}))\n"), "[only]\n[1]\n");
}

#[test]
fn builtin_string_helpers() {
    assert_eq!(run_ok("print(split(\"a,b,c\", \",\"))\n"), "[a, b, c]\n");
    assert_eq!(run_ok("print(trim(\"  pad  \"))\n"), "pad\n");
    assert_eq!(run_ok("print(replace(\"aXbXc\", \"X\", \"-\"))\n"), "a-b-c\n");
    assert_eq!(run_ok("print(upper(\"abc\") + lower(\"DEF\"))\n"), "ABCdef\n");
    assert_eq!(run_ok("print(starts_with(\"prefix\", \"pre\"))\nprint(ends_with(\"prefix\", \"fix\"))\n"), "true\ntrue\n");
}

#[test]
fn conversions_and_type_names() {
    assert_eq!(run_ok("print(num(\"3.5\"))\nprint(num(\"7 apples\"))\nprint(num(\"nope\"))\n"), "3.5\n7\nnil\n");
    assert_eq!(run_ok("print(str(42) + \"!\")\nprint(str(true))\n"), "42!\ntrue\n");
    assert_eq!(run_ok("print(type(1))\nprint(type(\"s\"))\nprint(type([]))\nprint(type({}))\nprint(type(print))\nprint(type(nil))\n"), "number\nstring\nlist\nmap\nfunction\nnil\n");
}

#[test]
fn string_interning_is_observable_through_contains() {
    // Byte-identical strings built through different paths compare equal.
    assert_eq!(run_ok("print(contains([\"abc\"], \"ab\" + \"c\"))\n"), "true\n");
}

#[test]
fn format_fills_placeholders() {
    assert_eq!(
        run_ok("print(format(\"{} + {} = {}\", 1, 2, 3))\n"),
        "1 + 2 = 3\n"
    );
}

// ---- F-strings ----

#[test]
fn fstring_coerces_interpolations_with_str() {
    assert_eq!(run_ok("let n = 3; print(f\"x={n+1}\")\n"), "x=4\n");
}

#[test]
fn fstring_mixes_literals_and_expressions() {
    let source = "let who = \"world\"\nprint(f\"hello {who}, {1 + 1} times\")\n";
    assert_eq!(run_ok(source), "hello world, 2 times\n");
}

#[test]
fn fstring_nested_braces() {
    assert_eq!(run_ok("print(f\"v={ {a: 1}[\"a\"] }\")\n"), "v=1\n");
}

// ---- Higher-order natives ----

#[test]
fn map_filter_reduce_with_lambdas() {
    assert_eq!(
        run_ok("print(map_fn([1, 2, 3], fn(x) { x * 10 }))\n"),
        "[10, 20, 30]\n"
    );
    assert_eq!(
        run_ok("print(filter([1, 2, 3, 4], fn(x) { x % 2 == 0 }))\n"),
        "[2, 4]\n"
    );
    assert_eq!(
        run_ok("print(reduce([1, 2, 3], fn(a, b) { a + b }, 0))\n"),
        "6\n"
    );
    assert_eq!(
        run_ok("print(reduce([4, 5], fn(a, b) { a + b }))\n"),
        "9\n"
    );
}

#[test]
fn range_builtin_with_step() {
    assert_eq!(run_ok("print(range(0, 10, 3))\n"), "[0, 3, 6, 9]\n");
    assert_eq!(run_ok("print(range(3, 0, -1))\n"), "[3, 2, 1]\n");
}

// ---- Error handling ----

#[test]
fn permission_denial_is_catchable() {
    let source = "on failure { print(error.type) }\nfs.remove(\"/etc/passwd\")\n";
    assert_eq!(run_ok(source), "permission\n");
}

#[test]
fn handler_receives_error_map() {
    let source = "on failure { print(error.type + \": \" + error.message) }\nenv(\"SECRET\")\n";
    assert_eq!(
        run_ok(source),
        "permission: Permission denied: env \"SECRET\"\n"
    );
}

#[test]
fn handler_unwinds_function_to_a_return_value() {
    let source = "fn risky() {\n  on failure { return -1 }\n  exec \"some-command\"\n  return 0\n}\nprint(risky())\n";
    assert_eq!(run_ok(source), "-1\n");
}

#[test]
fn mid_function_handler_protects_only_the_tail() {
    let source = "fn f() {\n  let before = \"ran\"\n  print(before)\n  on failure { return \"caught\" }\n  env(\"X\")\n  return \"unreached\"\n}\nprint(f())\n";
    assert_eq!(run_ok(source), "ran\ncaught\n");
}

#[test]
fn raising_inside_a_handler_bubbles_outward() {
    let source = "on failure { print(\"outer \" + error.type) }\non failure {\n  print(\"inner\")\n  env(\"Y\")\n}\nenv(\"X\")\n";
    assert_eq!(run_ok(source), "inner\nouter permission\n");
}

#[test]
fn popped_handler_no_longer_fires() {
    // The protected region completes, so the handler is gone by the time
    // the error raises: the run fails.
    let source = "on failure { print(\"never\") }\nprint(\"body\")\n";
    assert_eq!(run_ok(source), "body\n");
}

#[test]
fn uncaught_errors_terminate_with_the_message() {
    let message = run_err("env(\"UNGRANTED\")\n");
    assert!(message.contains("Permission denied: env"), "got: {message}");
}

#[test]
fn allow_grants_are_glob_matched() {
    let source = "allow env \"PATH*\"\non failure { print(\"denied\") }\nprint(type(env(\"PATH\")))\n";
    assert_eq!(run_ok(source), "string\n");
}

#[test]
fn internal_faults_are_not_catchable() {
    let message = run_err("on failure { print(\"nope\") }\nlet x = 1 / 0\n");
    assert!(message.contains("Division by zero."), "got: {message}");
}

#[test]
fn fault_messages_carry_a_stack_trace() {
    let message = run_err("fn inner() { return missing_var }\nfn outer() { return inner() }\nouter()\n");
    assert!(message.contains("Undefined variable 'missing_var'."), "got: {message}");
    assert!(message.contains("in inner()"), "got: {message}");
    assert!(message.contains("in outer()"), "got: {message}");
    assert!(message.contains("in script"), "got: {message}");
}

#[test]
fn arity_mismatches_fault() {
    let message = run_err("fn f(a, b) { return a }\nf(1)\n");
    assert!(message.contains("Expected 2 arguments but got 1."), "got: {message}");
    let message = run_err("len(1, 2)\n");
    assert!(message.contains("Expected 1 arguments but got 2."), "got: {message}");
}

#[test]
fn calling_a_non_function_faults() {
    let message = run_err("let x = 5\nx()\n");
    assert!(message.contains("Can only call functions."), "got: {message}");
}

#[test]
fn compile_errors_are_reported_with_location() {
    let (_, result) = run("let = 5\n");
    match result {
        Err(InterpretError::Compile(message)) => {
            assert!(message.contains("[line 1"), "got: {message}");
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

// ---- JSON ----

#[test]
fn json_round_trip_through_script() {
    let source = "print(to_json(parse_json(\"[1,2,{\\\"k\\\":null}]\")))\n";
    assert_eq!(run_ok(source), "[1,2,{\"k\":null}]\n");
}

#[test]
fn json_values_are_ordinary_values() {
    let source = "let doc = parse_json(\"{\\\"items\\\":[1,2,3]}\")\nprint(doc.items[1])\nprint(len(doc.items))\n";
    assert_eq!(run_ok(source), "2\n3\n");
}

// ---- Subprocesses ----

#[test]
fn exec_requires_permission_and_captures_output() {
    let source = "allow exec \"echo*\"\nlet r = exec \"echo hi\"\nprint(r.output)\nprint(r.exitCode)\n";
    assert_eq!(run_ok(source), "hi\n0\n");
}

#[test]
fn exec_statement_sugar() {
    let source = "allow exec \"*\"\non failure { print(\"failed \" + error.type) }\nexec \"false\"\nprint(\"unreached\")\n";
    assert_eq!(run_ok(source), "failed exec\n");
}

#[test]
fn parallel_exec_runs_all_commands() {
    let source = "allow exec \"echo*\"\nlet results = parallel_exec([\"echo one\", \"echo two\"])\nprint(results[0].output)\nprint(results[1].output)\nprint(results[0].exitCode)\n";
    assert_eq!(run_ok(source), "one\ntwo\n0\n");
}

#[test]
fn parallel_exec_checks_permissions_up_front() {
    let source = "on failure { print(error.type) }\nparallel_exec([\"echo ok\", \"rm -rf /tmp/nope\"])\n";
    assert_eq!(run_ok(source), "permission\n");
}

// ---- GC ----

#[test]
fn stress_gc_reproduces_normal_outputs() {
    let scenarios: &[(&str, &str)] = &[
        (
            "fn make_counter() { let n = 0; fn step() { n = n + 1; return n }; return step }\nlet c = make_counter(); print(c()); print(c()); print(c())\n",
            "1\n2\n3\n",
        ),
        (
            "fn f(x) { match x { 1 -> \"one\", 2 -> \"two\", _ -> \"other\" } }\nprint(f(2)); print(f(99))\n",
            "two\nother\n",
        ),
        (
            "on failure { print(error.type) }\nfs.remove(\"/etc/passwd\")\n",
            "permission\n",
        ),
        ("let n = 3; print(f\"x={n+1}\")\n", "x=4\n"),
    ];

    for (source, expected) in scenarios {
        let (output, result) = run_with(source, |vm| vm.set_gc_stress(true));
        result.expect("stress run failed");
        assert_eq!(&output, expected, "source: {source}");
    }
}

#[test]
fn stress_gc_survives_allocation_heavy_code() {
    let source = "let acc = []\nfor i in 0..50 {\n  append(acc, str(i) + \"-\" + str(i * 2))\n}\nprint(len(acc))\nprint(acc[49])\n";
    let (output, result) = run_with(source, |vm| vm.set_gc_stress(true));
    result.expect("stress run failed");
    assert_eq!(output, "50\n49-98\n");
}

// ---- Modules (standard library surface) ----

#[test]
fn math_module_functions_and_constants() {
    assert_eq!(run_ok("print(math.floor(3.7))\nprint(math.ceil(3.2))\nprint(math.abs(-5))\n"), "3\n4\n5\n");
    assert_eq!(run_ok("print(math.pow(2, 10))\nprint(math.sqrt(81))\n"), "1024\n9\n");
    assert_eq!(run_ok("print(math.min(3, 7))\nprint(math.max(3, 7))\n"), "3\n7\n");
    assert_eq!(run_ok("print(math.PI > 3.14 and math.PI < 3.15)\n"), "true\n");
    assert_eq!(run_ok("let r = math.rand()\nprint(r >= 0 and r < 1)\n"), "true\n");
    assert_eq!(run_ok("let n = math.rand_int(5, 5)\nprint(n)\n"), "5\n");
}

#[test]
fn bit_module_operations() {
    assert_eq!(run_ok("print(bit.and(12, 10))\nprint(bit.or(12, 10))\nprint(bit.xor(12, 10))\n"), "8\n14\n6\n");
    assert_eq!(run_ok("print(bit.lshift(1, 4))\nprint(bit.rshift(256, 4))\n"), "16\n16\n");
    assert_eq!(run_ok("print(bit.not(0))\n"), "4294967295\n");
    assert_eq!(run_ok("print(bit.lshift(1, 40))\n"), "0\n");
}

#[test]
fn re_module_matching() {
    assert_eq!(run_ok("print(re.match(\"^a+$\", \"aaa\"))\nprint(re.match(\"^a+$\", \"ab\"))\n"), "true\nfalse\n");
    assert_eq!(
        run_ok("let m = re.search(\"(b+)c\", \"abbc\")\nprint(m.matched)\nprint(m.start)\nprint(m.groups[0])\n"),
        "bbc\n1\nbb\n"
    );
    assert_eq!(run_ok("print(re.find_all(\"[0-9]+\", \"a1b22c333\"))\n"), "[1, 22, 333]\n");
    assert_eq!(run_ok("print(re.replace(\"[0-9]+\", \"a1b22\", \"#\"))\n"), "a#b#\n");
    assert_eq!(run_ok("print(re.split(\",+\", \"a,b,,c\"))\n"), "[a, b, c]\n");
}

#[test]
fn re_module_raises_typed_errors() {
    let source = "on failure { print(error.type) }\nre.match(\"(unclosed\", \"x\")\n";
    assert_eq!(run_ok(source), "regex\n");
    let source = "on failure { print(error.type) }\nre.match(1, \"x\")\n";
    assert_eq!(run_ok(source), "type\n");
}

#[test]
fn sys_module_basics() {
    assert_eq!(run_ok("print(sys.pid() > 0)\n"), "true\n");
    assert_eq!(run_ok("print(sys.cpu_count() >= 1)\n"), "true\n");
    assert_eq!(run_ok("print(type(sys.platform()))\nprint(type(sys.arch()))\n"), "string\nstring\n");
    assert_eq!(run_ok("print(sys.time() > 1000000000)\n"), "true\n");
    assert_eq!(run_ok("print(sys.args())\n"), "[]\n");
}

#[test]
fn sys_args_reflect_script_arguments() {
    let (output, result) = run_with("print(sys.args())\n", |vm| {
        vm.script_args = vec!["alpha".into(), "beta".into()];
    });
    result.unwrap();
    assert_eq!(output, "[alpha, beta]\n");
}

#[test]
fn proc_module_basics() {
    assert_eq!(run_ok("print(proc.pid() > 0)\nprint(proc.running(proc.pid()))\n"), "true\ntrue\n");
    let source = "allow exec \"*\"\nlet r = proc.exec(\"printf 'a\\\\nb'\")\nprint(r.code)\nprint(r.output)\n";
    assert_eq!(run_ok(source), "0\na\nb\n");
}

#[test]
fn proc_exec_timeout_is_enforced() {
    let source = "allow exec \"*\"\non failure { print(error.type) }\nproc.exec(\"sleep 5\", 0.1)\nprint(\"unreached\")\n";
    let start = std::time::Instant::now();
    assert_eq!(run_ok(source), "exec\n");
    assert!(start.elapsed() < std::time::Duration::from_secs(4));
}

#[test]
fn proc_retry_retries_until_success() {
    let source = "allow exec \"*\"\nlet calls = 0\nfn flaky() {\n  calls = calls + 1\n  if calls < 3 {\n    exec \"false\"\n  }\n  return calls\n}\nprint(proc.retry(5, 0, flaky))\n";
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn proc_retry_exhaustion_raises_retry_error() {
    let source = "on failure { print(error.type) }\nproc.retry(2, 0, fn() { env(\"NOPE\") })\n";
    assert_eq!(run_ok(source), "permission\n");
}

//! Whole-program integration tests: each case runs a complete `.ish`
//! source string through the public `eval_source` entry point, exercising
//! lexer, parser, and evaluator together end to end.

use ishlang::{eval_source, Env, Error, Value};

fn run(source: &str) -> Value {
    let env = Env::new();
    eval_source(source, &env).unwrap()
}

#[test]
fn fibonacci_recursive_function() {
    let out = run(
        "(defun fib (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))
         (fib 6)",
    );
    assert_eq!(out, Value::Int(8));
}

#[test]
fn struct_instance_member_get_and_set() {
    let out = run(
        "(struct Point (x y))
         (var p (makeinstance Point (x 1) (y 2)))
         (memset p x (+ (memget p x) (memget p y)))
         (memget p x)",
    );
    assert_eq!(out, Value::Int(3));
}

#[test]
fn closure_captures_enclosing_variable() {
    let out = run(
        "(defun makeAdder (n) (lambda (x) (+ x n)))
         (var addFive (makeAdder 5))
         (addFive 10)",
    );
    assert_eq!(out, Value::Int(15));
}

#[test]
fn loop_with_compound_assignment_sums_to_ten() {
    let out = run(
        "(var total 0)
         (loop (var i 0) (< i 5) (+= i 1) (+= total i))
         total",
    );
    assert_eq!(out, Value::Int(10));
}

#[test]
fn array_and_hashmap_builtins_round_trip() {
    let out = run(
        "(var a (array 3 1 4 1 5))
         (arrsort a)
         (var h (hashmap))
         (hmset h \"len\" (arrlen a))
         (hmget h \"len\")",
    );
    assert_eq!(out, Value::Int(5));
}

#[test]
fn string_builtins_find_and_concatenate() {
    let out = run(
        "(var s (clone \"hello\"))
         (strcat s \" world\")
         (strfind s 'w')",
    );
    assert_eq!(out, Value::Int(6));
}

#[test]
fn range_foreach_accumulates() {
    let out = run(
        "(var acc 0)
         (foreach x (range 1 6) (= acc (+ acc x)))
         acc",
    );
    assert_eq!(out, Value::Int(15));
}

#[test]
fn real_division_by_tiny_nonzero_raises_div_by_zero() {
    let env = Env::new();
    let err = eval_source("(/ 1.0 0.0000000000001)", &env).unwrap_err();
    assert!(matches!(err, Error::DivByZero));
}

#[test]
fn break_unwinds_out_of_loop_body() {
    let out = run(
        "(var i 0)
         (loop (< i 100) (block (= i (+ i 1)) (if (== i 3) (break))))
         i",
    );
    assert_eq!(out, Value::Int(3));
}

#[test]
fn unbound_symbol_is_an_error_not_a_panic() {
    let env = Env::new();
    match eval_source("(+ undefinedVar 1)", &env) {
        Err(Error::UnknownSymbol(name)) => assert_eq!(name, "undefinedVar"),
        other => panic!("expected UnknownSymbol, got {other:?}"),
    }
}

#[test]
fn module_import_exposes_prefixed_bindings() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mathutil.ish"), "(defun square (n) (* n n))").unwrap();

    let prev = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let result = (|| {
        let env = Env::new();
        eval_source("(import mathutil)", &env)?;
        env.get("mathutil.square")
    })();
    std::env::set_current_dir(prev).unwrap();

    assert!(matches!(result, Ok(Value::Closure(_))));
}

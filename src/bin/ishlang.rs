//! Thin driver: loads a `.ish` file given as the first argument, or else
//! runs a line-oriented REPL over stdin. Argument parsing, REPL help text,
//! and the test-file splitter are deliberately out of the core's scope —
//! this binary is just enough to exercise it.

use std::io::{self, BufRead, Write};

use ishlang::error::Signal;
use ishlang::{Env, Error, Parser};

const MODULE_PATH_VAR: &str = "ISHLANG_PATH";

fn main() {
    let env = Env::new();
    if let Ok(path) = std::env::var(MODULE_PATH_VAR) {
        env.module_store().borrow_mut().add_paths(&path);
    }

    let args: Vec<String> = std::env::args().collect();
    let ok = match args.get(1) {
        Some(filename) => run_file(filename, &env),
        None => repl(&env),
    };
    std::process::exit(if ok { 0 } else { 1 });
}

fn run_file(filename: &str, env: &Env) -> bool {
    let mut parser = Parser::new();
    let result = parser.read_file(filename, &mut |code| {
        if let Err(sig) = code.eval(env) {
            report_signal(sig);
        }
        Ok(())
    });
    if let Err(e) = result {
        eprintln!("{e}");
        return false;
    }
    true
}

fn repl(env: &Env) -> bool {
    let stdin = io::stdin();
    let mut parser = Parser::new();
    loop {
        print!("{} ", if parser.has_incomplete_expr() { ".." } else { ">>" });
        let _ = io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }

        let outcome = parser.read_multi(&line, &mut |code| {
            match code.eval(env) {
                Ok(v) => println!("{v}"),
                Err(sig) => report_signal(sig),
            }
            Ok(())
        });
        if let Err(e) = outcome {
            eprintln!("{e}");
            parser.clear_incomplete_expr();
        }
    }
    true
}

fn report_signal(sig: Signal) {
    match sig {
        Signal::Error(e) => eprintln!("{e}"),
        Signal::Break => eprintln!("{}", Error::invalid_expression("break outside loop")),
    }
}

use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result, bail};
use opal::error::OpalError;
use opal::interpreter::Interpreter;
use opal::{lexer, parser, typechecker};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input_path = args.next();
    if args.next().is_some() {
        bail!("Only one input file is supported");
    }

    let source = if let Some(path) = &input_path {
        fs::read_to_string(path).with_context(|| format!("Reading {path}"))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    };

    match run(&source) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}

/// Full pipeline: any stage failing skips the stages after it. The exit
/// code is the `int` returned by the program's `main`.
fn run(source: &str) -> Result<i32, OpalError> {
    let tokens = lexer::tokenize(source)?;
    let program = parser::parse_tokens(tokens)?;
    typechecker::check(&program)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut interpreter = Interpreter::new(stdin.lock(), stdout.lock());
    interpreter.run(&program)
}

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use finch_core::{Scanner, Token};
use log::debug;

use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;

/// One interpreter plus the shared error channel. The driver consults
/// `had_error` and `had_runtime_error` after each `run` to pick its exit
/// code; the REPL additionally calls `reset` between lines.
pub struct Session {
    interpreter: Interpreter,
    next_index: usize,
    pub had_error: bool,
    pub had_runtime_error: bool,
}

impl Session {
    pub fn new() -> Self {
        Session::with_output(Rc::new(RefCell::new(io::stdout())))
    }

    pub fn with_output(stdout: Rc<RefCell<dyn Write>>) -> Self {
        Session {
            interpreter: Interpreter::new(stdout),
            next_index: 0,
            had_error: false,
            had_runtime_error: false,
        }
    }

    /// Runs one complete program (a script, or a single REPL line) against
    /// the session's interpreter state. Static errors suppress evaluation.
    pub fn run(&mut self, source: &str) {
        let mut scanner = Scanner::new();
        let mut stream = scanner.scan_tokens(source);
        let mut tokens: Vec<Token> = stream.by_ref().collect();

        if let Some(err) = stream.error() {
            self.report(&Error::from(err.clone()));
            self.had_error = true;
            return;
        }

        // Token indices restart at zero on every scan; re-base them so the
        // depths recorded for earlier REPL lines keep their identity in the
        // interpreter's side-table.
        for token in &mut tokens {
            token.idx.0 += self.next_index;
        }
        self.next_index += tokens.len();
        debug!("scanned {} token(s)", tokens.len());

        let mut parser = Parser::new(&tokens);
        let parsed = match parser.parse() {
            Ok(parsed) => parsed,
            Err(errs) => {
                for err in &errs {
                    self.report(err);
                }
                self.had_error = true;
                return;
            }
        };

        let mut resolver = Resolver::new(&mut self.interpreter);
        let resolved = match resolver.resolve(parsed) {
            Ok(resolved) => resolved,
            Err(errs) => {
                for err in &errs {
                    self.report(err);
                }
                self.had_error = true;
                return;
            }
        };

        if let Err(err) = self.interpreter.interpret(&resolved) {
            self.report(&err);
            self.had_runtime_error = true;
        }
    }

    /// Clears both error flags. The REPL calls this before every new line
    /// so one bad input doesn't poison the next.
    pub fn reset(&mut self) {
        self.had_error = false;
        self.had_runtime_error = false;
    }

    fn report(&self, err: &Error) {
        eprintln!("{}", err);
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

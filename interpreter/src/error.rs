use finch_core::{Token, Type};
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum Error {
    #[error("[line {line}] Error: {msg}")]
    ScanError { line: usize, msg: String },

    #[error("[line {line}] Error{location}: {msg}")]
    ParseError {
        token: Token,

        // line and location are copied out of the token; thiserror doesn't
        // support field access (e.g. {token.line}) in error strings
        line: usize,
        location: String,
        msg: String,
    },

    #[error("[line {line}] Error{location}: {msg}")]
    ResolveError {
        token: Token,
        line: usize,
        location: String,
        msg: String,
    },

    #[error("[line {line}] Error{location}: {msg}")]
    RuntimeError {
        token: Token,
        line: usize,
        location: String,
        msg: String,
    },

    // The three control-flow signals. These unwind the evaluator like
    // errors but are always caught by the matching construct; the resolver
    // rejects programs where no such construct exists.
    #[error("return")]
    Return(ReturnValue),

    #[error("break")]
    Break(Token),

    #[error("continue")]
    Continue(Token),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ReturnValue {
    pub(crate) value: Value,
}

fn locate(token: &Token) -> String {
    if token.ty == Type::Eof {
        String::from(" at end")
    } else {
        format!(" at '{}'", token.lexeme)
    }
}

impl Error {
    pub(crate) fn parser_error(token: &Token, msg: &str) -> Self {
        Error::ParseError {
            line: token.line,
            location: locate(token),
            token: token.clone(),
            msg: String::from(msg),
        }
    }

    pub(crate) fn resolve_error(token: &Token, msg: &str) -> Self {
        Error::ResolveError {
            line: token.line,
            location: locate(token),
            token: token.clone(),
            msg: String::from(msg),
        }
    }

    pub(crate) fn runtime_error(token: &Token, msg: &str) -> Self {
        Error::RuntimeError {
            line: token.line,
            location: locate(token),
            token: token.clone(),
            msg: String::from(msg),
        }
    }

    pub(crate) fn return_value(value: Value) -> Self {
        Error::Return(ReturnValue { value })
    }
}

impl From<finch_core::Error> for Error {
    fn from(err: finch_core::Error) -> Self {
        Error::ScanError {
            line: err.line(),
            msg: err.to_string(),
        }
    }
}

use std::fmt;

use thiserror::Error;

use crate::token::Token;

/// Pipeline stage an error originated from. Stages downstream of a failing
/// stage never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lexer,
    Syntax,
    Semantic,
    Runtime,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Lexer => "lexer",
            Stage::Syntax => "syntax",
            Stage::Semantic => "semantic",
            Stage::Runtime => "runtime",
        };
        write!(f, "{name}")
    }
}

/// Structured error carried through the whole pipeline. Position is present
/// whenever a token was in hand at the failure site.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{stage} error: {message}{}", position_suffix(.line, .column))]
pub struct OpalError {
    pub stage: Stage,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

fn position_suffix(line: &Option<u32>, column: &Option<u32>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" at line {line}, column {column}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}

impl OpalError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(stage: Stage, message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            stage,
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    pub fn at_token(stage: Stage, message: impl Into<String>, token: &Token) -> Self {
        Self::at(stage, message, token.line, token.column)
    }
}

pub type OpalResult<T> = Result<T, OpalError>;

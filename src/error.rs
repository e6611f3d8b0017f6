// ABOUTME: Error types for the lexer, parser, evaluator and host façade

use thiserror::Error;

/// A lex-time failure: unterminated string/long-string, malformed number,
/// unknown escape, or a stray character. Always carries the source line.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[string]:{line}: {message}")]
pub struct LexError {
    pub line: u32,
    pub message: String,
}

impl LexError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A parse-time grammar violation. Carries the source line of the offending
/// token.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[string]:{line}: {message}")]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A runtime failure raised by the evaluator or the standard library.
///
/// `is_quota` marks the three budget-exhaustion cases (instruction quota,
/// call-depth overflow, output overflow); the spec recommends these
/// propagate past `pcall`/`xpcall` rather than be caught like ordinary
/// errors, so `pcall`'s implementation checks this flag.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub is_quota: bool,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_quota: false,
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_quota: true,
        }
    }

    pub fn type_error(op: &str, kind: &str) -> Self {
        Self::new(format!("attempt to perform {op} on a {kind} value"))
    }

    pub fn bad_argument(position: usize, function: &str, expected: &str) -> Self {
        Self::new(format!(
            "bad argument #{position} to '{function}' ({expected} expected)"
        ))
    }
}

/// Top-level error returned by the host-facing `Session` façade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lex_error_formats_with_line() {
        let e = LexError::new(3, "unfinished string");
        assert_eq!(e.to_string(), "[string]:3: unfinished string");
    }

    #[test]
    fn runtime_error_quota_flag() {
        let e = RuntimeError::quota("execution quota exceeded");
        assert!(e.is_quota);
        assert_eq!(e.message, "execution quota exceeded");
    }

    #[test]
    fn error_from_runtime_preserves_message() {
        let re = RuntimeError::new("attempt to call a nil value");
        let err: Error = re.clone().into();
        assert_eq!(err.to_string(), re.to_string());
    }
}

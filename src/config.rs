// ABOUTME: Version info, banner text, and default resource quotas

pub const VERSION: &str = "1.0.0";
pub const LUA_VERSION: &str = "Lua 5.5";
pub const WELCOME_MESSAGE: &str = "lua-llm-sandbox v1.0";
pub const WELCOME_SUBTITLE: &str = "A sandboxed Lua 5.5-compatible interpreter in Rust";

/// Resource quotas enforced by the evaluator (spec §5): instruction count,
/// call depth, and output bytes. Every budget resets per `execute`/`eval`
/// call; session globals persist across calls.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_instructions: u64,
    pub max_call_depth: usize,
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_instructions: 1_000_000,
            max_call_depth: 200,
            max_output_bytes: 1_000_000,
        }
    }
}

pub const HELP_TEXT: &str = r#"
Available commands:
  .quit or .exit       - Exit the REPL
  .help                - Show this help message

Type any Lua statement or expression to evaluate it. Use Ctrl-D or .quit to exit.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_spec() {
        let limits = Limits::default();
        assert_eq!(limits.max_instructions, 1_000_000);
        assert_eq!(limits.max_call_depth, 200);
        assert_eq!(limits.max_output_bytes, 1_000_000);
    }
}

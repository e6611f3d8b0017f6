use clap::Parser;
use lua_sandbox::config::{self, Limits, HELP_TEXT, WELCOME_MESSAGE, WELCOME_SUBTITLE};
use lua_sandbox::highlighter::LuaHelper;
use lua_sandbox::session::Session;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};
use std::path::PathBuf;

/// A sandboxed Lua 5.5-compatible interpreter
#[derive(Parser, Debug)]
#[command(name = "lua-llm-sandbox")]
#[command(version = config::VERSION)]
#[command(about = "A sandboxed Lua 5.5-compatible interpreter")]
#[command(long_about = "A tree-walking Lua interpreter with quota-bounded execution: \
instruction count, call depth, and output bytes are all capped.")]
struct CliArgs {
    /// Script file to execute (optional - if not provided, starts the REPL)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Maximum number of evaluator instructions per execute/eval call
    #[arg(long = "max-instructions", value_name = "N")]
    max_instructions: Option<u64>,

    /// Maximum call stack depth
    #[arg(long = "max-call-depth", value_name = "N")]
    max_call_depth: Option<usize>,

    /// Maximum bytes of accumulated `print` output
    #[arg(long = "max-output-bytes", value_name = "N")]
    max_output_bytes: Option<usize>,
}

impl CliArgs {
    fn limits(&self) -> Limits {
        let defaults = Limits::default();
        Limits {
            max_instructions: self.max_instructions.unwrap_or(defaults.max_instructions),
            max_call_depth: self.max_call_depth.unwrap_or(defaults.max_call_depth),
            max_output_bytes: self.max_output_bytes.unwrap_or(defaults.max_output_bytes),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let session = Session::new(args.limits());

    if let Some(script_path) = args.script {
        run_script(&session, &script_path)?;
        return Ok(());
    }

    run_repl(&session)
}

fn run_script(session: &Session, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read script file {}: {e}", path.display()))?;
    match session.execute(&source) {
        Ok(output) => {
            print!("{output}");
            Ok(())
        }
        Err(e) => Err(format!("{e}").into()),
    }
}

fn run_repl(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::builder().auto_add_history(true).build();
    let mut rl = Editor::with_config(config).map_err(|e| format!("failed to initialize REPL: {e}"))?;
    rl.set_helper(Some(LuaHelper::new()));

    let history_file = ".lua_history";
    let _ = rl.load_history(history_file);

    println!("{WELCOME_MESSAGE}");
    println!("{WELCOME_SUBTITLE}");

    loop {
        match rl.readline("lua> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    ".quit" | ".exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    ".help" => {
                        println!("{HELP_TEXT}");
                        continue;
                    }
                    ".clear" => {
                        print!("\x1B[2J\x1B[H");
                        continue;
                    }
                    _ => {}
                }
                eval_line(session, trimmed);
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(history_file);
    Ok(())
}

/// Mirrors the reference `lua` REPL's heuristic: try the line as an
/// expression first (printing its value), and fall back to executing it as
/// a chunk of statements (printing captured `print` output) when that
/// fails to parse.
fn eval_line(session: &Session, line: &str) {
    if let Ok(value) = session.eval(line) {
        if !value.is_null() {
            println!("{value}");
        }
        return;
    }
    match session.execute(line) {
        Ok(output) => print!("{output}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}

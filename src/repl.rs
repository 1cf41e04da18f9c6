// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive REPL for the Orbit module loader.
//!
//! Every line that is not a dot-command is a module identifier to require.

use orbit_loader::{Loader, LoaderError, ModuleStatus};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use serde_json::Value;
use std::borrow::Cow;
use std::path::PathBuf;

/// REPL configuration constants
const HISTORY_FILE: &str = ".orbit_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// REPL commands that can be executed with a dot prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Version,
    Resolve,
    Root,
    Cache,
}

impl ReplCommand {
    /// Parse a REPL command from input string
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let input = input.trim();
        let rest = input.strip_prefix('.')?;

        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());

        match cmd.as_str() {
            "help" | "h" | "?" => Some((ReplCommand::Help, arg)),
            "exit" | "quit" | "q" => Some((ReplCommand::Exit, arg)),
            "clear" => Some((ReplCommand::Clear, arg)),
            "version" | "v" => Some((ReplCommand::Version, arg)),
            "resolve" | "r" => Some((ReplCommand::Resolve, arg)),
            "root" => Some((ReplCommand::Root, arg)),
            "cache" => Some((ReplCommand::Cache, arg)),
            _ => None,
        }
    }

    /// Get all available commands for help/completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".resolve <id>", "Print the canonical location of a module"),
            (".root [<url>]", "Show or change the module root"),
            (".cache", "List loaded modules"),
            (".clear", "Forget every loaded module"),
            (".version", "Show version information"),
            (".help", "Show this help message"),
            (".exit", "Exit the REPL"),
        ]
    }
}

/// Helper struct for rustyline that provides completion and hints
struct OrbitHelper {
    /// Dot-commands for completion
    commands: Vec<&'static str>,
}

impl OrbitHelper {
    fn new() -> Self {
        let commands = ReplCommand::all_commands()
            .iter()
            .filter_map(|(usage, _)| usage.split_whitespace().next())
            .collect();
        Self { commands }
    }

    fn matches<'a>(&'a self, word: &'a str) -> impl Iterator<Item = &'static str> + 'a {
        self.commands
            .iter()
            .copied()
            .filter(move |cmd| word.starts_with('.') && cmd.starts_with(word))
    }
}

impl Completer for OrbitHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only the command word completes
        let word = &line[..pos];
        if word.contains(char::is_whitespace) {
            return Ok((pos, vec![]));
        }

        let matches = self
            .matches(word)
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd[word.len()..].to_string(),
            })
            .collect();

        Ok((pos, matches))
    }
}

impl Hinter for OrbitHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if pos < line.len() || line.len() < 2 || line.contains(char::is_whitespace) {
            return None;
        }

        self.matches(line)
            .find(|cmd| cmd.len() > line.len())
            .map(|cmd| (&cmd[line.len()..]).dimmed().to_string())
    }
}

impl Highlighter for OrbitHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) if ReplCommand::parse(cmd).is_some() => {
                Cow::Owned(format!("{} {}", cmd.magenta(), rest))
            }
            None if ReplCommand::parse(line).is_some() => Cow::Owned(line.magenta().to_string()),
            _ => Cow::Borrowed(line),
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Validator for OrbitHelper {}

impl Helper for OrbitHelper {}

/// The interactive REPL for the Orbit module loader
pub struct Repl {
    loader: Loader,
    editor: Editor<OrbitHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Create a new REPL instance
    pub fn new(loader: Loader) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(OrbitHelper::new()));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orbit")
            .join(HISTORY_FILE);

        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let _ = editor.load_history(&history_path);

        Ok(Self {
            loader,
            editor,
            history_path,
        })
    }

    /// Run the REPL main loop
    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();

        loop {
            let prompt = format!("{} ", "orbit>".bright_green().bold());

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();

                    if trimmed.is_empty() {
                        continue;
                    }

                    if let Some((cmd, arg)) = ReplCommand::parse(trimmed) {
                        match self.execute_command(cmd, arg) {
                            CommandResult::Continue => continue,
                            CommandResult::Exit => break,
                        }
                    }

                    if trimmed.starts_with('.') && !trimmed.starts_with("./") && !trimmed.starts_with("../") {
                        eprintln!(
                            "{}: unknown command {} (try {})",
                            "Error".red().bold(),
                            trimmed.cyan(),
                            ".help".cyan()
                        );
                        continue;
                    }

                    self.require_and_print(trimmed);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&self.history_path);
        Ok(())
    }

    fn print_banner(&self) {
        println!(
            "{} {} (root {})",
            "orbit".cyan().bold(),
            orbit_loader::VERSION.yellow(),
            self.loader.root().dimmed()
        );
        println!("Type {} for help, {} to exit", ".help".green(), ".exit".green());
        println!();
    }

    fn execute_command(&mut self, cmd: ReplCommand, arg: Option<&str>) -> CommandResult {
        match cmd {
            ReplCommand::Help => self.print_help(),
            ReplCommand::Exit => return CommandResult::Exit,
            ReplCommand::Clear => {
                self.loader.clear_cache();
                println!("{}", "Module cache cleared".dimmed());
            }
            ReplCommand::Version => {
                println!("{}: {}", "Orbit".bright_cyan().bold(), orbit_loader::VERSION.yellow());
            }
            ReplCommand::Resolve => match arg {
                Some(id) => match self.loader.require().resolve(id) {
                    Ok(location) => println!("{}", location.as_str().green()),
                    Err(e) => print_error(&e),
                },
                None => missing_argument(".resolve", "a module identifier"),
            },
            ReplCommand::Root => match arg {
                Some(root) => {
                    self.loader.set_root(root);
                    println!("{} {}", "Module root:".dimmed(), root.cyan());
                }
                None => println!("{}", self.loader.root().cyan()),
            },
            ReplCommand::Cache => self.print_cache(),
        }
        CommandResult::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "REPL Commands:".white().bold());
        println!();

        for (cmd, desc) in ReplCommand::all_commands() {
            println!("  {:16} {}", cmd.cyan(), desc.dimmed());
        }

        println!();
        println!(
            "  {}",
            "Any other input is a module identifier to require.".dimmed()
        );
        println!();
    }

    fn print_cache(&self) {
        let cache = self.loader.cache();
        if cache.is_empty() {
            println!("{}", "(no modules loaded)".dimmed());
            return;
        }
        for module in cache.modules() {
            let status = match module.status() {
                ModuleStatus::Loaded => "loaded".green().to_string(),
                ModuleStatus::Evaluating => "evaluating".yellow().to_string(),
                ModuleStatus::Failed => "failed".red().to_string(),
            };
            println!("  {} {}", module.filename(), status);
        }
    }

    fn require_and_print(&mut self, id: &str) {
        match self.loader.require().require(id) {
            Ok(exports) => println!("{}", format_value(&exports.get())),
            Err(e) => print_error(&e),
        }
    }
}

/// Result of executing a REPL command
enum CommandResult {
    Continue,
    Exit,
}

/// Render exports as indented JSON with scalar coloring
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".blue().to_string(),
        Value::Bool(b) => b.to_string().yellow().to_string(),
        Value::Number(n) => n.to_string().yellow().to_string(),
        Value::String(s) => format!("'{}'", s).green().to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

fn missing_argument(command: &str, what: &str) {
    eprintln!(
        "{}: {} {}",
        "Error".red().bold(),
        command.cyan(),
        format!("requires {what}").dimmed()
    );
}

/// Print a formatted error message
fn print_error(error: &LoaderError) {
    let kind = match error {
        LoaderError::MalformedIdentifier { .. } => "MalformedIdentifier",
        LoaderError::FetchFailed { .. } => "FetchFailed",
        LoaderError::Execution { .. } => "ExecutionError",
        LoaderError::InvalidJson { .. } => "InvalidJson",
        LoaderError::Runtime(_) => "RuntimeError",
        LoaderError::Config(_) => "ConfigError",
    };
    eprintln!("{}: {}", kind.red().bold(), error);
}

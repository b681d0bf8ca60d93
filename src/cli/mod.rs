//! Interactive REPL (Read-Eval-Print Loop) on top of the event loop
//!
//! Every entry is evaluated with [`EventLoop::run`], so timers scheduled by an
//! entry fire before the next prompt.

use crate::runtime::{EventLoop, LoopConfig, LoopError, LoopResult};
use boa_engine::Source;
use colored::Colorize;
use crossbeam::channel::bounded;
use std::io::{self, BufRead, Write};

/// REPL configuration
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string
    pub prompt: String,
    /// Continuation prompt for multiline input
    pub continuation_prompt: String,
    /// Whether to show the result of each evaluation
    pub show_result: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "nodeloop> ".to_string(),
            continuation_prompt: "... ".to_string(),
            show_result: true,
        }
    }
}

/// Interactive REPL for CommonJS code
pub struct Repl {
    event_loop: EventLoop,
    config: ReplConfig,
    line_count: usize,
}

impl Repl {
    /// Create a REPL over a loop with the default configuration
    pub fn new() -> LoopResult<Self> {
        Self::with_config(LoopConfig::default(), ReplConfig::default())
    }

    pub fn with_config(loop_config: LoopConfig, config: ReplConfig) -> LoopResult<Self> {
        Ok(Self {
            event_loop: EventLoop::with_config(loop_config)?,
            config,
            line_count: 0,
        })
    }

    fn print_banner(&self) {
        println!(
            "Welcome to {} v{}",
            "nodeloop".cyan().bold(),
            env!("CARGO_PKG_VERSION").green()
        );
        println!("Type {} for help, {} to exit", ".help".yellow(), ".exit".yellow());
        println!();
    }

    fn print_help(&self) {
        println!("{}", "Available commands:".bold());
        println!("  {}    - Show this help message", ".help".yellow());
        println!("  {}   - Clear the screen", ".clear".yellow());
        println!("  {}    - Exit the REPL", ".exit".yellow());
        println!("  {}    - Show runtime info", ".info".yellow());
        println!();
        println!("{}", "Tips:".bold());
        println!("  - require() resolves relative to the current directory");
        println!("  - Multi-line input: leave a bracket open or end the line with \\");
        println!();
    }

    fn print_info(&self) {
        println!("{}", "Runtime Information:".bold());
        println!("  Engine: Boa JavaScript Engine v0.21");
        println!("  Runtime: nodeloop v{}", env!("CARGO_PKG_VERSION"));
        println!();
    }

    /// Check if input is complete (not waiting for more lines)
    fn is_complete(&self, input: &str) -> bool {
        let open_braces = input.matches('{').count();
        let close_braces = input.matches('}').count();
        let open_parens = input.matches('(').count();
        let close_parens = input.matches(')').count();
        let open_brackets = input.matches('[').count();
        let close_brackets = input.matches(']').count();

        open_braces <= close_braces
            && open_parens <= close_parens
            && open_brackets <= close_brackets
            && !input.trim().ends_with('\\')
    }

    /// Process a REPL command (starts with .); false means exit
    fn process_command(&mut self, command: &str) -> bool {
        match command.trim() {
            ".exit" | ".quit" | ".q" => return false,
            ".help" | ".h" => self.print_help(),
            ".clear" | ".cls" => {
                print!("\x1B[2J\x1B[1;1H");
                let _ = io::stdout().flush();
            }
            ".info" => self.print_info(),
            cmd => {
                println!(
                    "{}: Unknown command '{}'. Type .help for available commands.",
                    "Error".red(),
                    cmd
                );
            }
        }
        true
    }

    /// Evaluate `code` on the loop and return the display form of its value
    pub fn evaluate(&mut self, code: &str) -> LoopResult<Option<String>> {
        self.line_count += 1;
        let path = format!("repl_{}.js", self.line_count);
        let code = code.trim_end_matches('\\').to_string();
        let show_result = self.config.show_result;

        let (tx, rx) = bounded(1);
        self.event_loop.run(move |context| {
            let source = Source::from_bytes(code.as_bytes()).with_path(std::path::Path::new(&path));
            let value = context.eval(source)?;
            if show_result && !value.is_undefined() {
                let _ = tx.send(value.display().to_string());
            }
            Ok(())
        })?;
        Ok(rx.try_recv().ok())
    }

    /// Run the interactive REPL
    pub fn run(&mut self) -> io::Result<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut input_buffer = String::new();
        let mut in_multiline = false;

        loop {
            let prompt = if in_multiline {
                &self.config.continuation_prompt
            } else {
                &self.config.prompt
            };
            print!("{}", prompt.cyan());
            stdout.flush()?;

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    // EOF
                    println!();
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    println!("{}: Failed to read input: {}", "Error".red(), e);
                    continue;
                }
            }

            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if line.is_empty() && !in_multiline {
                continue;
            }

            if line.starts_with('.') && !in_multiline {
                if !self.process_command(line) {
                    break;
                }
                continue;
            }

            if in_multiline {
                input_buffer.push('\n');
            }
            input_buffer.push_str(line);

            if !self.is_complete(&input_buffer) {
                in_multiline = true;
                continue;
            }

            if !input_buffer.trim().is_empty() {
                match self.evaluate(&input_buffer) {
                    Ok(Some(result)) => println!("{} {}", "=>".green(), result),
                    Ok(None) => {}
                    Err(LoopError::Script(message)) => println!("{}", message.red()),
                    Err(e) => {
                        println!("{}: {}", "Error".red(), e);
                        break;
                    }
                }
            }
            input_buffer.clear();
            in_multiline = false;
        }

        println!("{}", "Goodbye!".cyan());
        Ok(())
    }
}

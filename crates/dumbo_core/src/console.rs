use std::collections::VecDeque;
use std::io::{self, BufRead, Stdin, StdinLock, Stdout, Write};

use anyhow::{Context, Result, bail};

/// Operator-facing terminal: output plus "read one token" input.
pub trait Console {
    fn show(&mut self, text: &str) -> Result<()>;

    /// Print `prompt` without a newline and return the next whitespace-delimited token.
    fn read_token(&mut self, prompt: &str) -> Result<String>;
}

pub struct TerminalConsole<R: BufRead, W: Write> {
    input: R,
    output: W,
    pending: VecDeque<String>,
}

impl TerminalConsole<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        let stdin: Stdin = io::stdin();
        Self::new(stdin.lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalConsole<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            pending: VecDeque::new(),
        }
    }
}

impl<R: BufRead, W: Write> Console for TerminalConsole<R, W> {
    fn show(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}").context("failed to write to terminal")?;
        Ok(())
    }

    fn read_token(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{prompt}").context("failed to write to terminal")?;
        self.output.flush().context("failed to flush terminal")?;

        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("failed to read from terminal")?;
            if read == 0 {
                bail!("input closed while waiting for an answer");
            }
            self.pending
                .extend(line.split_whitespace().map(ToString::to_string));
        }
    }
}

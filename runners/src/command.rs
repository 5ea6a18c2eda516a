//! Command lines handed to a [`CommandExecutor`](crate::executor::CommandExecutor).
//!
//! Commands declared in the manifest are plain strings. They are split with a
//! small quote-aware tokenizer rather than a shell, so no expansion, piping or
//! redirection happens.

use crate::{RunnerError, RunnerResult};
use std::fmt;

/// A program plus its arguments, with an optional label used when echoing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub label: Option<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            label: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Parse a configured command string such as `npm run "test:unit" -- --ci`.
    pub fn parse(command: &str) -> RunnerResult<Self> {
        let mut parts = tokenize(command).into_iter();
        let program = parts.next().ok_or(RunnerError::EmptyCommand)?;
        Ok(Self::new(program).args(parts))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Split a command string on spaces and tabs, honouring single and double quotes.
///
/// A quote of the other kind inside an open quoted section is kept literally.
/// Quotes themselves are dropped. An empty token is only produced for an
/// explicitly quoted empty argument such as `""`.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut open_quote: Option<char> = None;

    for c in command.chars() {
        match c {
            '"' | '\'' => match open_quote {
                Some(q) if q == c => open_quote = None,
                Some(_) => current.push(c),
                None => {
                    open_quote = Some(c);
                    quoted = true;
                }
            },
            ' ' | '\t' if open_quote.is_none() => {
                if !current.is_empty() || quoted {
                    parts.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() || quoted {
        parts.push(current);
    }

    parts
}

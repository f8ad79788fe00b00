//! Sandboxed user scripts.
//!
//! A script is a list of statements, one per line, tokenised shell-style:
//!
//! ```text
//! # comment
//! status "some text"          show a status message
//! command nextTab             run a built-in command
//! background profileName      call a background function; result in $result
//! fail "reason"               abort with an error
//! ```
//!
//! Scripts only reach the outside world through [`ScriptHost`].

use thiserror::Error;

use crate::actions::CommandId;
use crate::ipc::UserScript;

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("line {line}: unbalanced quotes")]
    Syntax { line: usize },
    #[error("line {line}: unknown statement '{statement}'")]
    UnknownStatement { line: usize, statement: String },
    #[error("line {line}: {statement} needs an argument")]
    MissingArgument { line: usize, statement: &'static str },
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("command {command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("background call '{function}' failed: {message}")]
    Background { function: String, message: String },
    #[error("{0}")]
    Raised(String),
}

/// The helpers a running script may use.
pub trait ScriptHost {
    fn status(&mut self, text: &str);
    fn command(&mut self, command: CommandId) -> Result<(), ScriptError>;
    fn execute_in_background(
        &mut self,
        function: &str,
        args: &[String],
    ) -> Result<String, ScriptError>;
}

pub fn run(script: &UserScript, host: &mut dyn ScriptHost) -> Result<(), ScriptError> {
    let mut result = String::new();
    for (idx, raw) in script.body.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens: Vec<String> = shlex::split(trimmed)
            .ok_or(ScriptError::Syntax { line })?
            .into_iter()
            .map(|t| t.replace("$result", &result))
            .collect();
        let Some((head, args)) = tokens.split_first() else {
            continue;
        };
        match head.as_str() {
            "status" => host.status(&args.join(" ")),
            "command" => {
                let name = args.first().ok_or(ScriptError::MissingArgument {
                    line,
                    statement: "command",
                })?;
                let command = name
                    .parse::<CommandId>()
                    .map_err(|_| ScriptError::UnknownCommand(name.clone()))?;
                host.command(command)?;
            }
            "background" => {
                let (function, rest) = args.split_first().ok_or(ScriptError::MissingArgument {
                    line,
                    statement: "background",
                })?;
                result = host.execute_in_background(function, rest)?;
            }
            "fail" => return Err(ScriptError::Raised(args.join(" "))),
            other => {
                return Err(ScriptError::UnknownStatement {
                    line,
                    statement: other.to_string(),
                });
            }
        }
    }
    Ok(())
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Acquisition of input values.
//!
//! The resolver never talks to a terminal directly. It asks an
//! [`InputProvider`], which is either interactive ([`TerminalProvider`]) or
//! answers from fixed values and defaults ([`StaticProvider`]).

use std::borrow::Cow;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::{Completer, Helper, Hinter, Validator};
use tokio::process::Command;
use tracing::debug;

use crate::error::InputError;

/// Default bound on command inputs.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Ask for a free-form string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub id: String,
    pub message: String,
    pub default: Option<String>,
    pub password: bool,
}

/// Ask for one of several options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickRequest {
    pub id: String,
    pub message: String,
    pub options: Vec<String>,
    pub default_index: Option<usize>,
}

/// Run a shell command and use its trimmed stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub id: String,
    pub command: String,
    pub timeout: Duration,
}

/// Source of input values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InputProvider: Send + Sync {
    async fn prompt(&self, request: &PromptRequest) -> Result<String, InputError>;

    async fn pick(&self, request: &PickRequest) -> Result<String, InputError>;

    async fn run_command(&self, request: &CommandRequest) -> Result<String, InputError>;
}

/// Run `command` through the platform shell.
pub async fn run_shell_command(request: &CommandRequest) -> Result<String, InputError> {
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(&request.command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        cmd
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(input = %request.id, command = %request.command, "Running input command");
    let output = tokio::time::timeout(request.timeout, cmd.output())
        .await
        .map_err(|_| InputError::CommandTimeout {
            id: request.id.clone(),
            timeout_secs: request.timeout.as_secs(),
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(InputError::Command {
            id: request.id.clone(),
            message: format!("{} ({})", stderr.trim(), output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Answers from preset values, then defaults. Never blocks.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    values: HashMap<String, String>,
    run_commands: bool,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset the answer for an input id.
    pub fn with_value(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(id.into(), value.into());
        self
    }

    /// Execute command inputs instead of failing them.
    pub fn with_commands(mut self) -> Self {
        self.run_commands = true;
        self
    }
}

#[async_trait]
impl InputProvider for StaticProvider {
    async fn prompt(&self, request: &PromptRequest) -> Result<String, InputError> {
        self.values
            .get(&request.id)
            .cloned()
            .or_else(|| request.default.clone())
            .ok_or_else(|| InputError::NoValue(request.id.clone()))
    }

    async fn pick(&self, request: &PickRequest) -> Result<String, InputError> {
        if let Some(value) = self.values.get(&request.id) {
            if request.options.contains(value) {
                return Ok(value.clone());
            }
        }
        request
            .default_index
            .and_then(|i| request.options.get(i))
            .cloned()
            .ok_or_else(|| InputError::NoValue(request.id.clone()))
    }

    async fn run_command(&self, request: &CommandRequest) -> Result<String, InputError> {
        if let Some(value) = self.values.get(&request.id) {
            return Ok(value.clone());
        }
        if self.run_commands {
            run_shell_command(request).await
        } else {
            Err(InputError::NoValue(request.id.clone()))
        }
    }
}

#[derive(Completer, Helper, Hinter, Validator)]
struct MaskingHelper;

impl Highlighter for MaskingHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Owned("*".repeat(line.chars().count()))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

/// Interactive provider reading from the controlling terminal.
#[derive(Debug, Clone, Default)]
pub struct TerminalProvider;

impl TerminalProvider {
    pub fn new() -> Self {
        Self
    }

    fn read_line(prompt: String, password: bool) -> Result<Option<String>, InputError> {
        use rustyline::error::ReadlineError;

        let result = if password {
            let mut editor = rustyline::Editor::<MaskingHelper, rustyline::history::DefaultHistory>::new()
                .map_err(|e| InputError::IoError(e.to_string()))?;
            editor.set_helper(Some(MaskingHelper));
            editor.readline(&prompt)
        } else {
            let mut editor =
                rustyline::DefaultEditor::new().map_err(|e| InputError::IoError(e.to_string()))?;
            editor.readline(&prompt)
        };

        match result {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => Ok(None),
            Err(e) => Err(InputError::IoError(e.to_string())),
        }
    }

    async fn read_line_async(prompt: String, password: bool) -> Result<Option<String>, InputError> {
        tokio::task::spawn_blocking(move || Self::read_line(prompt, password))
            .await
            .map_err(|e| InputError::IoError(e.to_string()))?
    }
}

#[async_trait]
impl InputProvider for TerminalProvider {
    async fn prompt(&self, request: &PromptRequest) -> Result<String, InputError> {
        let mut prompt = format!("\n{} ", request.message.bold());
        if let Some(default) = &request.default {
            prompt.push_str(&format!("[default: {}] ", default.dimmed()));
        }

        match Self::read_line_async(prompt, request.password).await? {
            Some(value) if value.is_empty() => Ok(request.default.clone().unwrap_or_default()),
            Some(value) => Ok(value),
            None => request
                .default
                .clone()
                .ok_or_else(|| InputError::Cancelled(request.id.clone())),
        }
    }

    async fn pick(&self, request: &PickRequest) -> Result<String, InputError> {
        if request.options.is_empty() {
            return Ok(String::new());
        }
        let default = request
            .default_index
            .filter(|i| *i < request.options.len());

        println!("\n{}", request.message.bold());
        for (index, option) in request.options.iter().enumerate() {
            println!("  {} {}", format!("{:>3}", index).cyan(), option);
        }

        loop {
            let tip = match default {
                Some(i) => format!("Enter a number (default {}): ", i),
                None => "Enter a number: ".to_string(),
            };
            let Some(line) = Self::read_line_async(tip, false).await? else {
                return default
                    .map(|i| request.options[i].clone())
                    .ok_or_else(|| InputError::Cancelled(request.id.clone()));
            };

            let line = line.trim();
            if line.is_empty() {
                if let Some(i) = default {
                    return Ok(request.options[i].clone());
                }
                continue;
            }
            match line.parse::<usize>() {
                Ok(i) if i < request.options.len() => return Ok(request.options[i].clone()),
                Ok(_) => println!("{}", "Index out of range, please retry".yellow()),
                Err(_) => println!("{}", "Please enter a valid number".yellow()),
            }
        }
    }

    async fn run_command(&self, request: &CommandRequest) -> Result<String, InputError> {
        run_shell_command(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_request(id: &str, default: Option<&str>) -> PromptRequest {
        PromptRequest {
            id: id.to_string(),
            message: id.to_string(),
            default: default.map(str::to_string),
            password: false,
        }
    }

    #[tokio::test]
    async fn test_static_prompt() {
        let provider = StaticProvider::new().with_value("token", "abc");
        assert_eq!(provider.prompt(&prompt_request("token", None)).await.unwrap(), "abc");
        assert_eq!(
            provider.prompt(&prompt_request("other", Some("d"))).await.unwrap(),
            "d"
        );
        assert!(matches!(
            provider.prompt(&prompt_request("other", None)).await,
            Err(InputError::NoValue(_))
        ));
    }

    #[tokio::test]
    async fn test_static_pick_ignores_unknown_option() {
        let provider = StaticProvider::new().with_value("region", "mars");
        let request = PickRequest {
            id: "region".to_string(),
            message: String::new(),
            options: vec!["eu".to_string(), "us".to_string()],
            default_index: Some(1),
        };
        assert_eq!(provider.pick(&request).await.unwrap(), "us");
    }

    #[tokio::test]
    async fn test_static_command_requires_opt_in() {
        let request = CommandRequest {
            id: "host".to_string(),
            command: "echo hi".to_string(),
            timeout: COMMAND_TIMEOUT,
        };
        assert!(StaticProvider::new().run_command(&request).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_shell_command() {
        let request = CommandRequest {
            id: "greeting".to_string(),
            command: "echo '  hello  '".to_string(),
            timeout: COMMAND_TIMEOUT,
        };
        assert_eq!(run_shell_command(&request).await.unwrap(), "hello");

        let failing = CommandRequest {
            id: "bad".to_string(),
            command: "echo oops >&2; exit 3".to_string(),
            timeout: COMMAND_TIMEOUT,
        };
        let err = run_shell_command(&failing).await.unwrap_err();
        assert!(matches!(err, InputError::Command { ref message, .. } if message.contains("oops")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_shell_command_timeout() {
        let request = CommandRequest {
            id: "slow".to_string(),
            command: "sleep 5".to_string(),
            timeout: Duration::from_millis(100),
        };
        assert!(matches!(
            run_shell_command(&request).await,
            Err(InputError::CommandTimeout { .. })
        ));
    }
}

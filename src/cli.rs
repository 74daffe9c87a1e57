// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Output format for non-interactive and piped runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Colorized, human-oriented rendering.
    #[default]
    Rich,
    /// Plain text, no ANSI codes — suitable for logs and pipes.
    Plain,
    /// One JSON object per turn event.
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "loom", version, about = "An interactive, tool-augmented coding agent")]
pub struct Args {
    /// Initial prompt. If present, one non-interactive turn runs and the
    /// process exits; otherwise the REPL starts.
    pub prompt: Option<String>,

    /// Backend and model, e.g. `anthropic/claude-sonnet`.
    #[arg(long)]
    pub model: Option<String>,

    /// Name of the session to create or resume. Absent creates a new
    /// ephemeral (non-persisted-by-name) session.
    #[arg(long)]
    pub session: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormatArg::Rich)]
    pub output_format: OutputFormatArg,

    /// Display thinking tokens when the backend supports them.
    #[arg(long, default_value_t = false)]
    pub enable_thinking: bool,

    /// Upper bound on thinking tokens per turn.
    #[arg(long)]
    pub thinking_budget: Option<u32>,

    /// Workspace root passed to the path validator. Defaults to the
    /// current directory.
    #[arg(long)]
    pub working_directory: Option<PathBuf>,

    /// Load MCP server definitions from this file.
    #[arg(long)]
    pub mcp_config: Option<PathBuf>,

    /// Skip the session store; session state lives in memory only.
    #[arg(long, default_value_t = false)]
    pub no_persist: bool,
}

/// Process exit codes, per the external interface contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    RuntimeError = 1,
    UserInterrupt = 2,
    ConfigError = 3,
}

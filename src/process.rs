use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command as PCommand, Stdio};

/// A child process to launch: program, argv, env overrides, stdin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<String>,
    /// Values masked when the command is displayed or logged.
    pub secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
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

    /// Argument whose value must never be printed.
    pub fn secret_arg(mut self, a: impl Into<String>) -> Self {
        let a = a.into();
        if !a.is_empty() {
            self.secrets.push(a.clone());
        }
        self.args.push(a);
        self
    }

    pub fn env(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.env.insert(k.into(), v.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, s| acc.replace(s.as_str(), "***"))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = self.program.clone();
        for a in &self.args {
            line.push(' ');
            if a.is_empty() || a.contains(char::is_whitespace) {
                line.push_str(&format!("{:?}", a));
            } else {
                line.push_str(a);
            }
        }
        f.write_str(&self.redact(&line))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    /// `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Launches child processes. Orchestrators talk to this instead of
/// `std::process` so they can run against a fake in tests.
pub trait CommandRunner {
    /// Run to completion, capturing output. A non-zero exit is not an error.
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutcome>;

    /// Run and require a zero exit code.
    fn run_checked(&self, cmd: &CommandSpec) -> Result<CommandOutcome> {
        let out = self.run(cmd)?;
        if !out.success() {
            let stderr = cmd.redact(out.stderr.trim());
            bail!("command failed ({}): {}\n{}", exit_label(out.code), cmd, stderr);
        }
        Ok(out)
    }
}

pub fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "terminated by signal".to_string(),
    }
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutcome> {
        tracing::debug!(command = %cmd, "spawning");

        let mut child = PCommand::new(&cmd.program);
        child
            .args(&cmd.args)
            .envs(&cmd.env)
            .stdin(if cmd.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &cmd.cwd {
            child.current_dir(dir);
        }

        let mut proc = match child.spawn() {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("`{}` not found. Install it first and make sure it is on PATH", cmd.program)
            }
            Err(e) => return Err(e.into()),
        };

        if let (Some(input), Some(mut stdin)) = (&cmd.stdin, proc.stdin.take()) {
            stdin.write_all(input.as_bytes())?;
        }

        let out = proc.wait_with_output()?;
        let outcome = CommandOutcome {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        };
        tracing::debug!(command = %cmd, code = ?outcome.code, "finished");
        Ok(outcome)
    }
}

/// Fail early with a readable message when a required tool is missing.
pub fn ensure_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| anyhow::anyhow!("`{}` not found in PATH", name))
}

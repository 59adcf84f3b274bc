//! External command execution

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::ControlError;

/// A command line to run
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,

    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,

    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `program arg1 arg2 ...`, for logs and matching
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Turn a failed run into a provider error carrying its output
    pub fn into_provider_error(self, message: impl Into<String>) -> ControlError {
        ControlError::ProviderError {
            message: message.into(),
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Runs external tools. Implemented by [`SystemRunner`] and by test fakes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ControlError>;

    /// Run to completion, forwarding each output line to `lines` as it arrives
    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        lines: mpsc::UnboundedSender<String>,
    ) -> Result<CommandOutput, ControlError>;
}

/// Runs commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        command
    }

    async fn write_stdin(
        child: &mut tokio::process::Child,
        spec: &CommandSpec,
    ) -> Result<(), ControlError> {
        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ControlError> {
        debug!("Running: {}", spec.display());
        let mut child = Self::command(spec).spawn()?;
        Self::write_stdin(&mut child, spec).await?;

        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ControlError::Timeout(format!(
                    "{} did not finish within {:?}",
                    spec.program, spec.timeout
                ))
            })??;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        lines: mpsc::UnboundedSender<String>,
    ) -> Result<CommandOutput, ControlError> {
        debug!("Running (streaming): {}", spec.display());
        let mut child = Self::command(spec).spawn()?;
        Self::write_stdin(&mut child, spec).await?;

        let stdout_task = tokio::spawn(forward_lines(child.stdout.take(), lines.clone()));
        let stderr_task = tokio::spawn(forward_lines(child.stderr.take(), lines));

        let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ControlError::Timeout(format!(
                    "{} did not finish within {:?}",
                    spec.program, spec.timeout
                )));
            }
        };

        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
        })
    }
}

async fn forward_lines<R>(reader: Option<R>, tx: mpsc::UnboundedSender<String>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    // lossy, so undecodable bytes cannot end the stream
    let mut collected = Vec::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                let _ = tx.send(line.clone());
                collected.push(line);
            }
            Err(e) => {
                debug!("Stopped reading process output: {}", e);
                break;
            }
        }
    }
    collected.join("\n")
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    /// Replays canned outputs by command prefix and records every call
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Mutex<Vec<(String, Result<CommandOutput, String>)>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Commands starting with `prefix` return `output`; later rules win
        pub fn on(&self, prefix: &str, output: CommandOutput) -> &Self {
            self.rules
                .lock()
                .unwrap()
                .push((prefix.to_string(), Ok(output)));
            self
        }

        /// Commands starting with `prefix` fail to spawn
        pub fn missing(&self, prefix: &str) -> &Self {
            self.rules
                .lock()
                .unwrap()
                .push((prefix.to_string(), Err(format!("{}: not found", prefix))));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(CommandSpec::display).collect()
        }

        pub fn specs(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, spec: &CommandSpec) -> Result<CommandOutput, ControlError> {
            self.calls.lock().unwrap().push(spec.clone());
            let display = spec.display();
            let rules = self.rules.lock().unwrap();
            match rules.iter().rev().find(|(prefix, _)| display.starts_with(prefix)) {
                Some((_, Ok(output))) => Ok(output.clone()),
                Some((_, Err(e))) => Err(ControlError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    e.clone(),
                ))),
                None => Ok(CommandOutput::ok("")),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ControlError> {
            self.answer(spec)
        }

        async fn run_streaming(
            &self,
            spec: &CommandSpec,
            lines: mpsc::UnboundedSender<String>,
        ) -> Result<CommandOutput, ControlError> {
            let output = self.answer(spec)?;
            for line in output.stdout.lines().chain(output.stderr.lines()) {
                let _ = lines.send(line.to_string());
            }
            Ok(output)
        }
    }
}

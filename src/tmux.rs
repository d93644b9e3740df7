use crate::debug_log::DebugLog;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use semver::{Version, VersionReq};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::process::Command;

const MIN_TMUX_VERSION: &str = ">=3.1.0";

static VERSION_CHECK: OnceLock<Result<Version, String>> = OnceLock::new();

/// Captured result of one tmux invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Failure category, or `None` when the command succeeded.
    pub fn failure(&self) -> Option<MuxFailure> {
        if self.success() {
            None
        } else {
            Some(MuxFailure::classify(self.code, &self.stderr))
        }
    }

    /// Text to show a user when the command failed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("tmux exited with status {}", self.code)
        } else {
            stderr.to_string()
        }
    }
}

/// Why a tmux command failed.
///
/// tmux reports everything through exit status 1 and a message on stderr, so
/// this is the one place that inspects message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxFailure {
    /// `move-window`/`new-window` targeted an occupied index.
    #[error("window index in use: {0}")]
    IndexInUse(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("window not found: {0}")]
    WindowNotFound(String),
    #[error("no tmux server running")]
    NoServer,
    #[error("tmux exited with status {code}: {message}")]
    Other { code: i32, message: String },
}

impl MuxFailure {
    pub fn classify(code: i32, stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        if lower.contains("index in use") {
            MuxFailure::IndexInUse(message)
        } else if lower.contains("no server running") || lower.contains("error connecting to") {
            MuxFailure::NoServer
        } else if lower.contains("can't find session") || lower.contains("session not found") {
            MuxFailure::SessionNotFound(message)
        } else if lower.contains("can't find window") || lower.contains("window not found") {
            MuxFailure::WindowNotFound(message)
        } else {
            MuxFailure::Other { code, message }
        }
    }

    pub fn is_index_in_use(&self) -> bool {
        matches!(self, MuxFailure::IndexInUse(_))
    }
}

/// Process boundary to the tmux binary.
#[async_trait]
pub trait TmuxRunner: Send + Sync {
    /// Run `tmux <args>` capturing stdout and stderr.
    async fn output(&self, args: &[String]) -> Result<CommandOutput>;

    /// Run `tmux <args>` attached to this process's terminal.
    async fn interactive(&self, args: &[String]) -> Result<CommandOutput>;
}

/// The real `tmux` executable.
#[derive(Clone, Copy, Default)]
pub struct TmuxCli;

#[async_trait]
impl TmuxRunner for TmuxCli {
    async fn output(&self, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .await
            .context("failed to run tmux. Is tmux installed?")?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn interactive(&self, args: &[String]) -> Result<CommandOutput> {
        let status = Command::new("tmux")
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .context("failed to run tmux attach")?;

        Ok(CommandOutput {
            code: status.code().unwrap_or(-1),
            ..CommandOutput::default()
        })
    }
}

/// Logged gateway through which every tmux call is made.
///
/// No retries happen here; callers own their retry policy.
#[derive(Clone)]
pub struct Tmux {
    runner: Arc<dyn TmuxRunner>,
    log: Arc<DebugLog>,
}

impl Tmux {
    pub fn new(runner: Arc<dyn TmuxRunner>, log: Arc<DebugLog>) -> Self {
        Self { runner, log }
    }

    pub fn system(log: Arc<DebugLog>) -> Self {
        Self::new(Arc::new(TmuxCli), log)
    }

    pub fn log(&self) -> &Arc<DebugLog> {
        &self.log
    }

    /// Run a tmux command. Failures are always logged; successes only when
    /// `log_success` is set, since existence probes fail routinely.
    pub async fn run(&self, args: &[&str], log_success: bool) -> Result<CommandOutput> {
        let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let output = self.runner.output(&argv).await?;
        if log_success || !output.success() {
            self.log.command(&argv, &output);
        }
        Ok(output)
    }

    /// Run a tmux command that takes over the terminal (attach).
    pub async fn run_interactive(&self, args: &[&str]) -> Result<CommandOutput> {
        let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let output = self.runner.interactive(&argv).await?;
        self.log.command(&argv, &output);
        Ok(output)
    }

    /// `display-message -p`, returning the trimmed text or `None` on failure.
    pub async fn display(&self, target: Option<&str>, format: &str) -> Result<Option<String>> {
        let mut args = vec!["display-message"];
        if let Some(target) = target {
            args.push("-t");
            args.push(target);
        }
        args.push("-p");
        args.push(format);

        let output = self.run(&args, false).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(output.stdout_trimmed().to_string()))
    }

    /// `list-windows`/`list-panes` style listing, one formatted line per item.
    pub async fn list(&self, command: &str, target: Option<&str>, format: &str) -> Result<Option<Vec<String>>> {
        let mut args = vec![command];
        if let Some(target) = target {
            args.push("-t");
            args.push(target);
        }
        args.push("-F");
        args.push(format);

        let output = self.run(&args, false).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(
            output
                .stdout
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
        ))
    }

    /// Check tmux version meets minimum requirements.
    /// This is cached after the first check.
    pub async fn check_version(&self) -> Result<Version> {
        if let Some(result) = VERSION_CHECK.get() {
            return result.clone().map_err(|e| anyhow!("{}", e));
        }

        let result = self.tmux_version().await.and_then(|version| {
            let req = VersionReq::parse(MIN_TMUX_VERSION).context("invalid version requirement")?;
            if req.matches(&version) {
                Ok(version)
            } else {
                Err(anyhow!(
                    "tmux version {} is too old. tmux-mngr requires tmux {} or later.\n\
                     \n\
                     To upgrade tmux:\n\
                     • Homebrew: brew upgrade tmux\n\
                     • Debian/Ubuntu: sudo apt install tmux\n\
                     • Source: https://github.com/tmux/tmux/wiki/Installing",
                    version,
                    MIN_TMUX_VERSION.trim_start_matches(">=")
                ))
            }
        });

        let cached = result.as_ref().map(Clone::clone).map_err(|e| e.to_string());
        let _ = VERSION_CHECK.set(cached);
        result
    }

    async fn tmux_version(&self) -> Result<Version> {
        let output = self.run(&["-V"], false).await?;
        if !output.success() {
            return Err(anyhow!("tmux -V failed: {}", output.diagnostic()));
        }
        parse_tmux_version(output.stdout_trimmed())
    }
}

/// Normalize `tmux 3.3a`, `tmux next-3.5` or `tmux 3.4` into a semver version.
pub fn parse_tmux_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let rest = trimmed.strip_prefix("tmux ").unwrap_or(trimmed);
    let rest = rest.strip_prefix("next-").unwrap_or(rest);

    let numeric: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric.split('.').filter(|p| !p.is_empty());

    let major = parts
        .next()
        .and_then(|p| p.parse::<u64>().ok())
        .ok_or_else(|| anyhow!("failed to parse tmux version: {}", trimmed))?;
    let minor = parts.next().and_then(|p| p.parse::<u64>().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse::<u64>().ok()).unwrap_or(0);

    Ok(Version::new(major, minor, patch))
}

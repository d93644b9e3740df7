use crate::tmux::CommandOutput;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Per-run debug log.
///
/// Created once in `main`, shared by reference with every component that
/// talks to tmux, and finalized explicitly when the run ends. Entries are
/// mirrored to `tracing`; the markdown file is only written when enabled.
pub struct DebugLog {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
    started: DateTime<Local>,
}

impl DebugLog {
    /// Open a timestamped log file under `<base_dir>/.ai/logs/`.
    pub fn create(base_dir: &Path) -> Result<Self> {
        let started = Local::now();
        let logs_dir = base_dir.join(".ai").join("logs");
        fs::create_dir_all(&logs_dir)
            .with_context(|| format!("failed to create log directory: {}", logs_dir.display()))?;

        let path = logs_dir.join(format!("debug_{}.md", started.format("%Y%m%d_%H%M%S")));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open debug log: {}", path.display()))?;

        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let argv: Vec<String> = std::env::args().collect();
        writeln!(file, "# tmux-mngr Debug Log\n")?;
        writeln!(file, "**Started**: {}", started.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file, "**Command**: {}", argv.join(" "))?;
        writeln!(file, "**Working Dir**: {}", cwd)?;
        writeln!(file, "**Environment**:")?;
        for var in ["TMUX_PANE", "TMUX", "USER"] {
            let value = std::env::var(var).unwrap_or_else(|_| "Not set".to_string());
            writeln!(file, "- {}: {}", var, value)?;
        }
        writeln!(file)?;

        Ok(Self {
            path: Some(path),
            file: Mutex::new(Some(file)),
            started,
        })
    }

    /// A log that only forwards to `tracing`.
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
            started: Local::now(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log(&self, category: &str, message: impl AsRef<str>) {
        self.log_with(category, message, &[]);
    }

    pub fn log_with(&self, category: &str, message: impl AsRef<str>, details: &[(&str, String)]) {
        let message = message.as_ref();
        tracing::debug!(category, details = ?details, "{message}");

        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        let Some(file) = guard.as_mut() else {
            return;
        };

        let mut entry = format!(
            "## [{}] {}: {}\n\n",
            Local::now().format("%H:%M:%S%.3f"),
            category,
            message
        );
        if !details.is_empty() {
            entry.push_str("**Details**:\n");
            for (key, value) in details {
                entry.push_str(&format!("- {}: {}\n", key, value));
            }
            entry.push('\n');
        }
        // A debug log that cannot be written must never fail the run.
        let _ = file.write_all(entry.as_bytes());
    }

    /// Record one tmux invocation and its result.
    pub fn command(&self, argv: &[String], output: &CommandOutput) {
        let category = if output.success() {
            "TMUX_SUCCESS"
        } else {
            "TMUX_ERROR"
        };
        self.log_with(
            category,
            "Tmux command executed",
            &[
                ("command", format!("tmux {}", argv.join(" "))),
                ("return_code", output.code.to_string()),
                ("stdout", or_empty(&output.stdout)),
                ("stderr", or_empty(&output.stderr)),
            ],
        );
    }

    pub fn error(&self, err: &anyhow::Error, context: &str) {
        tracing::warn!(context, "{err:#}");
        self.log_with(
            "ERROR",
            format!("Error occurred: {}", err),
            &[
                ("context", context.to_string()),
                ("chain", format!("{:#}", err)),
                ("debug", format!("{:?}", err)),
            ],
        );
    }

    /// Write the closing summary. Further entries are dropped.
    pub fn finalize(&self) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        let Some(mut file) = guard.take() else {
            return;
        };

        let ended = Local::now();
        let seconds = (ended - self.started).num_milliseconds() as f64 / 1000.0;
        let summary = format!(
            "## Session Summary\n\n**Ended**: {}\n**Duration**: {:.2} seconds\n**Log file**: {}\n",
            ended.format("%Y-%m-%d %H:%M:%S"),
            seconds,
            self.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );
        let _ = file.write_all(summary.as_bytes());
        let _ = file.flush();
    }
}

fn or_empty(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "(empty)".to_string()
    } else {
        trimmed.to_string()
    }
}

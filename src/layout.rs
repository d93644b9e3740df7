use crate::tmux::Tmux;
use crate::types::{LayoutKind, WindowTarget};
use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// What a pane is for. The builder knows positions; collaborators know content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneRole {
    Notes,
    Monitor,
    Assistant,
    TaskFile,
}

impl fmt::Display for PaneRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaneRole::Notes => "notes",
            PaneRole::Monitor => "monitor",
            PaneRole::Assistant => "assistant",
            PaneRole::TaskFile => "task file",
        };
        f.write_str(name)
    }
}

/// Supplies the shell command line started in each pane.
pub trait PaneContent: Send + Sync {
    fn command(&self, role: PaneRole) -> Result<String>;
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to split {target}: {message}")]
    Split { target: String, message: String },
    #[error("failed to start {role} pane: {message}")]
    Launch { role: PaneRole, message: String },
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

/// Builds the fixed pane topologies inside an existing window.
///
/// A failed step stops the build; panes created so far are left in place.
pub struct LayoutBuilder {
    tmux: Tmux,
    start_dir: PathBuf,
    bottom_height: u8,
}

impl LayoutBuilder {
    pub fn new(tmux: Tmux, start_dir: impl Into<PathBuf>, bottom_height: u8) -> Self {
        Self {
            tmux,
            start_dir: start_dir.into(),
            bottom_height: bottom_height.clamp(1, 99),
        }
    }

    pub async fn setup(
        &self,
        kind: LayoutKind,
        target: &WindowTarget,
        content: &dyn PaneContent,
    ) -> Result<(), LayoutError> {
        match kind {
            LayoutKind::TwoPane => self.setup_two_pane(target, content).await,
            LayoutKind::ThreePane => self.setup_three_pane(target, content).await,
        }
    }

    /// `0` notes (top left), `1` monitor (bottom left), `2` assistant (right).
    pub async fn setup_three_pane(
        &self,
        target: &WindowTarget,
        content: &dyn PaneContent,
    ) -> Result<(), LayoutError> {
        self.log("Setting up three-pane layout", target);

        self.split(&target.to_string(), "-h", None).await?;
        let height = format!("{}%", self.bottom_height);
        self.split(&target.pane(0), "-v", Some(&height)).await?;

        self.launch(target, 0, PaneRole::Notes, content).await?;
        self.launch(target, 1, PaneRole::Monitor, content).await?;
        self.launch(target, 2, PaneRole::Assistant, content).await?;
        self.select_pane(target, 2).await
    }

    /// `0` task file (left), `1` assistant (right, selected).
    pub async fn setup_two_pane(
        &self,
        target: &WindowTarget,
        content: &dyn PaneContent,
    ) -> Result<(), LayoutError> {
        self.log("Setting up two-pane layout", target);

        self.split(&target.to_string(), "-h", None).await?;

        self.launch(target, 0, PaneRole::TaskFile, content).await?;
        self.launch(target, 1, PaneRole::Assistant, content).await?;
        self.select_pane(target, 1).await
    }

    fn log(&self, message: &str, target: &WindowTarget) {
        self.tmux.log().log_with(
            "LAYOUT",
            message,
            &[("target", target.to_string()), ("start_dir", self.start_dir.display().to_string())],
        );
    }

    async fn split(&self, pane: &str, direction: &str, size: Option<&str>) -> Result<(), LayoutError> {
        let start_dir = self.start_dir.to_string_lossy().to_string();
        let mut args = vec!["split-window", direction, "-t", pane];
        if let Some(size) = size {
            args.extend(["-l", size]);
        }
        args.extend(["-c", start_dir.as_str()]);

        let output = self.tmux.run(&args, true).await?;
        if !output.success() {
            return Err(LayoutError::Split {
                target: pane.to_string(),
                message: output.diagnostic(),
            });
        }
        Ok(())
    }

    async fn launch(
        &self,
        target: &WindowTarget,
        pane: usize,
        role: PaneRole,
        content: &dyn PaneContent,
    ) -> Result<(), LayoutError> {
        let command = content.command(role).map_err(|err| LayoutError::Launch {
            role,
            message: format!("{:#}", err),
        })?;

        let pane_target = target.pane(pane);
        let output = self
            .tmux
            .run(&["send-keys", "-t", &pane_target, &command, "Enter"], true)
            .await?;
        if !output.success() {
            return Err(LayoutError::Launch {
                role,
                message: output.diagnostic(),
            });
        }
        Ok(())
    }

    async fn select_pane(&self, target: &WindowTarget, pane: usize) -> Result<(), LayoutError> {
        let pane_target = target.pane(pane);
        let output = self.tmux.run(&["select-pane", "-t", &pane_target], true).await?;
        if !output.success() {
            // Focus is cosmetic; the layout itself is complete.
            self.tmux
                .log()
                .log("LAYOUT", format!("Could not select {}: {}", pane_target, output.diagnostic()));
        }
        Ok(())
    }
}

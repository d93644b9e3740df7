use crate::allocator::WindowAllocator;
use crate::types::{LOG_WINDOW, USAGE_WINDOW};
use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// `cc-mngr-<key>` with an optional numeric counter.
static MANAGED_WINDOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cc-mngr-([a-zA-Z0-9_]+)(?:-\d+)?$").expect("invalid regex"));

/// The three invocation contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Not inside tmux and the session is absent: full bootstrap.
    OutsideTmuxNoSession,
    /// Not inside tmux and the session exists: add a window and attach.
    OutsideTmuxHasSession,
    /// Inside tmux: transform the current window.
    InsideTmux,
}

impl Scenario {
    pub fn label(self) -> &'static str {
        match self {
            Scenario::OutsideTmuxNoSession => "outside_tmux_no_session",
            Scenario::OutsideTmuxHasSession => "outside_tmux_has_session",
            Scenario::InsideTmux => "inside_tmux",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn detect_scenario(inside_mux: bool, session_exists: bool) -> Scenario {
    match (inside_mux, session_exists) {
        (true, _) => Scenario::InsideTmux,
        (false, true) => Scenario::OutsideTmuxHasSession,
        (false, false) => Scenario::OutsideTmuxNoSession,
    }
}

pub fn is_managed_window(name: &str) -> bool {
    MANAGED_WINDOW.is_match(name)
}

/// Project key embedded in a managed window name; any counter suffix is dropped.
pub fn extract_project_from_window(name: &str) -> Option<String> {
    MANAGED_WINDOW
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Multiplexer environment of this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxEnv {
    /// `TMUX_PANE`, the caller's pane id.
    pub pane: Option<String>,
}

impl MuxEnv {
    pub fn from_env() -> Self {
        Self {
            pane: std::env::var("TMUX_PANE").ok().filter(|p| !p.is_empty()),
        }
    }

    pub fn inside(pane: impl Into<String>) -> Self {
        Self {
            pane: Some(pane.into()),
        }
    }

    pub fn outside() -> Self {
        Self::default()
    }

    pub fn is_inside(&self) -> bool {
        self.pane.is_some()
    }
}

/// A session's windows grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionWindows {
    pub managed: Vec<String>,
    pub has_usage_window: bool,
    pub has_log_window: bool,
    pub other: Vec<String>,
}

impl SessionWindows {
    pub fn classify<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut windows = Self::default();
        for name in names {
            let name = name.into();
            if is_managed_window(&name) {
                windows.managed.push(name);
            } else if name == USAGE_WINDOW {
                windows.has_usage_window = true;
            } else if name == LOG_WINDOW {
                windows.has_log_window = true;
            } else {
                windows.other.push(name);
            }
        }
        windows
    }
}

/// Diagnostic snapshot printed by `mngr status`.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioInfo {
    pub scenario: Scenario,
    pub inside_tmux: bool,
    pub session_name: String,
    pub session_exists: bool,
    pub current_session: Option<String>,
    pub current_window: Option<String>,
    pub is_managed_window: bool,
    pub extracted_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_windows: Option<SessionWindows>,
}

pub struct ScenarioDetector {
    allocator: WindowAllocator,
    env: MuxEnv,
}

impl ScenarioDetector {
    pub fn new(allocator: WindowAllocator, env: MuxEnv) -> Self {
        Self { allocator, env }
    }

    pub fn env(&self) -> &MuxEnv {
        &self.env
    }

    pub async fn detect(&self) -> Scenario {
        let inside = self.env.is_inside();
        let exists = if inside {
            false
        } else {
            self.allocator.session_exists().await
        };
        let scenario = detect_scenario(inside, exists);

        self.allocator.tmux().log().log_with(
            "SCENARIO",
            format!("Detected scenario: {}", scenario),
            &[
                ("inside_tmux", inside.to_string()),
                ("session_exists", exists.to_string()),
                ("tmux_pane", self.env.pane.clone().unwrap_or_default()),
            ],
        );
        scenario
    }

    async fn current(&self, format: &str) -> Result<Option<String>> {
        let Some(pane) = self.env.pane.as_deref() else {
            return Ok(None);
        };
        self.allocator.tmux().display(Some(pane), format).await
    }

    pub async fn current_window_name(&self) -> Result<Option<String>> {
        self.current("#{window_name}").await
    }

    pub async fn current_session_name(&self) -> Result<Option<String>> {
        self.current("#{session_name}").await
    }

    /// Window names of the managed session; empty when it does not exist.
    pub async fn session_windows(&self) -> Result<SessionWindows> {
        let session = self.allocator.session();
        let names = self.allocator.window_names(session).await?.unwrap_or_default();
        Ok(SessionWindows::classify(names))
    }

    pub async fn scenario_info(&self) -> Result<ScenarioInfo> {
        let scenario = self.detect().await;
        let session_exists = self.allocator.session_exists().await;
        let current_window = self.current_window_name().await?;
        let current_session = self.current_session_name().await?;

        let session_windows = if scenario != Scenario::OutsideTmuxNoSession {
            Some(self.session_windows().await?)
        } else {
            None
        };

        Ok(ScenarioInfo {
            scenario,
            inside_tmux: self.env.is_inside(),
            session_name: self.allocator.session().to_string(),
            session_exists,
            is_managed_window: current_window.as_deref().is_some_and(is_managed_window),
            extracted_project: current_window.as_deref().and_then(extract_project_from_window),
            current_session,
            current_window,
            session_windows,
        })
    }
}

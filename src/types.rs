use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Prefix reserved for orchestrator-managed project windows.
pub const MANAGED_WINDOW_PREFIX: &str = "cc-mngr-";
/// Auxiliary window running the usage monitor.
pub const USAGE_WINDOW: &str = "ccusage";
/// Auxiliary window holding the daily log.
pub const LOG_WINDOW: &str = "mngr-log";

pub fn managed_window_name(project_key: &str) -> String {
    format!("{}{}", MANAGED_WINDOW_PREFIX, project_key)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub directory: PathBuf,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todoist_project: Option<TodoistProjects>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Project {
    /// First entry of a comma-separated category list.
    pub fn primary_category(&self) -> &str {
        self.category
            .split(',')
            .map(str::trim)
            .find(|c| !c.is_empty())
            .unwrap_or("General")
    }

    pub fn todoist_display(&self) -> String {
        match &self.todoist_project {
            Some(TodoistProjects::One(name)) => name.clone(),
            Some(TodoistProjects::Many(names)) if !names.is_empty() => names.join(", "),
            _ => "Inbox".to_string(),
        }
    }
}

fn default_category() -> String {
    "General".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TodoistProjects {
    One(String),
    Many(Vec<String>),
}

/// Pane arrangement used for project windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    /// task file | assistant
    #[default]
    TwoPane,
    /// notes / monitor | assistant
    ThreePane,
}

/// Where a new window lands in the session's index range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Inserted before the current first window.
    Leftmost,
    /// Appended after the current last window.
    #[default]
    Append,
    /// First free index in the high parking range.
    Parking,
}

/// Index-based window address (`session:index`).
///
/// Windows are renumbered by `move-window`/`kill-window` on other windows, so a
/// target is only trustworthy until the next mutating call. Not `Clone`:
/// operations that can renumber windows consume it, and callers re-resolve
/// through a [`WindowHandle`] afterwards.
#[derive(Debug, PartialEq, Eq)]
pub struct WindowTarget {
    session: String,
    index: u32,
}

impl WindowTarget {
    pub fn new(session: impl Into<String>, index: u32) -> Self {
        Self {
            session: session.into(),
            index,
        }
    }

    /// Parse `session:index` as printed by `#{session_name}:#{window_index}`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (session, index) = raw.trim().rsplit_once(':')?;
        if session.is_empty() {
            return None;
        }
        let index = index.parse().ok()?;
        Some(Self::new(session, index))
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Address of a pane inside this window.
    pub fn pane(&self, pane: usize) -> String {
        format!("{}:{}.{}", self.session, self.index, pane)
    }
}

impl fmt::Display for WindowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.index)
    }
}

/// Name-based window address; safe to resolve repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    pub session: String,
    pub name: String,
}

impl WindowHandle {
    pub fn new(session: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            name: name.into(),
        }
    }

    /// tmux target with an exact-name match.
    pub fn target(&self) -> String {
        format!("{}:={}", self.session, self.name)
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.name)
    }
}

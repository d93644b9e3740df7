use crate::allocator::{unique_name_among, WindowAllocator, DEFAULT_READY_RETRIES};
use crate::config::{Config, Settings};
use crate::debug_log::DebugLog;
use crate::launch::{editor_command, ProjectPanes, Workspace};
use crate::layout::{LayoutBuilder, LayoutError};
use crate::project::{validate_project, ProjectError, ProjectSelector, Projects};
use crate::scenario::{MuxEnv, Scenario, ScenarioDetector, ScenarioInfo};
use crate::tmux::Tmux;
use crate::types::{
    managed_window_name, Placement, Project, WindowHandle, WindowTarget, LOG_WINDOW, USAGE_WINDOW,
};
use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Throwaway first window of a freshly created session.
const PLACEHOLDER_WINDOW: &str = "mngr-init";

#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("failed to create session '{session}': {message}")]
    SessionCreate { session: String, message: String },
    #[error("failed to create project window '{0}'")]
    WindowCreate(String),
    #[error("window {0} is not ready for pane operations")]
    NotReady(String),
    #[error("failed to set up layout: {0}")]
    Layout(LayoutError),
    #[error("could not determine the current window")]
    CurrentWindow,
    #[error("failed to clear current window: {0}")]
    Clear(String),
    #[error("failed to attach to session '{session}': {message}")]
    Attach { session: String, message: String },
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl From<LayoutError> for OrchestrateError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::Fault(err) => OrchestrateError::Fault(err),
            other => OrchestrateError::Layout(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No project was chosen.
    Cancelled,
    Completed {
        scenario: Scenario,
        project: String,
        window: WindowHandle,
    },
}

/// One way of creating the project window. Tried in order until one yields
/// a verified target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingStrategy {
    /// The collision-free `cc-mngr-<key>[-n]` name.
    Unique(String),
    /// The bare `cc-mngr-<key>` even though a window already carries it.
    Unsuffixed(String),
    /// Let tmux name the window, then rename and verify.
    AutoNamed(String),
}

impl NamingStrategy {
    pub fn window_name(&self) -> &str {
        match self {
            NamingStrategy::Unique(name)
            | NamingStrategy::Unsuffixed(name)
            | NamingStrategy::AutoNamed(name) => name,
        }
    }

    async fn create(&self, allocator: &WindowAllocator, placement: Placement) -> Result<Option<WindowTarget>> {
        match self {
            NamingStrategy::Unique(name) | NamingStrategy::Unsuffixed(name) => {
                allocator.create_window_safe(name, None, placement).await
            }
            NamingStrategy::AutoNamed(name) => allocator.create_auto_named(name, placement).await,
        }
    }
}

/// The unique name first, then exactly one fallback.
pub fn naming_strategies(unique: &str, base: &str) -> Vec<NamingStrategy> {
    let fallback = if unique != base {
        NamingStrategy::Unsuffixed(base.to_string())
    } else {
        NamingStrategy::AutoNamed(unique.to_string())
    };
    vec![NamingStrategy::Unique(unique.to_string()), fallback]
}

/// A verified project window: its name handle and stable `@id`.
struct ProjectWindow {
    handle: WindowHandle,
    id: String,
}

pub struct Orchestrator {
    settings: Settings,
    projects: Projects,
    workspace: Workspace,
    allocator: WindowAllocator,
    layout: LayoutBuilder,
    detector: ScenarioDetector,
    log: Arc<DebugLog>,
}

impl Orchestrator {
    pub fn new(tmux: Tmux, config: Config, env: MuxEnv) -> Self {
        let Config { settings, projects } = config;
        let base = settings.base_path();
        let log = tmux.log().clone();
        let allocator = WindowAllocator::new(tmux.clone(), settings.session_name.clone(), &base);
        let layout = LayoutBuilder::new(tmux, &base, settings.pane_height_bottom);
        let detector = ScenarioDetector::new(allocator.clone(), env);

        Self {
            workspace: Workspace::new(base),
            settings,
            projects,
            allocator,
            layout,
            detector,
            log,
        }
    }

    /// Base delay for window readiness polling.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.allocator = self.allocator.with_retry_delay(delay);
        self
    }

    pub fn projects(&self) -> &Projects {
        &self.projects
    }

    pub async fn scenario_info(&self) -> Result<ScenarioInfo> {
        self.detector.scenario_info().await
    }

    /// Detect the scenario, pick and validate a project, then run the
    /// matching procedure. Nothing in tmux is changed before validation passes.
    ///
    /// The selector runs on a blocking thread so an interrupt can still
    /// abort the run while it waits for input.
    pub async fn run<S>(&self, preset: Option<&str>, mut selector: S) -> Result<RunOutcome, OrchestrateError>
    where
        S: ProjectSelector + Send + 'static,
    {
        let scenario = self.detector.detect().await;

        let key = match preset {
            Some(key) => {
                self.log.log("PROJECT", format!("Using preset project: {}", key));
                key.to_string()
            }
            None => match self.select_project(move |projects| selector.select(projects)).await? {
                Some(key) => key,
                None => {
                    self.log.log("PROJECT", "No project selected");
                    return Ok(RunOutcome::Cancelled);
                }
            },
        };
        self.log.log_with(
            "PROJECT",
            format!("Selected project: {}", key),
            &[("available", self.projects.keys().cloned().collect::<Vec<_>>().join(", "))],
        );

        let project = validate_project(&self.projects, &key)?.clone();
        fs::create_dir_all(self.workspace.base_dir()).with_context(|| {
            format!("failed to create base directory: {}", self.workspace.base_dir().display())
        })?;

        let window = match scenario {
            Scenario::OutsideTmuxNoSession => self.bootstrap_session(&key, &project).await?,
            Scenario::OutsideTmuxHasSession => self.add_to_session(&key, &project).await?,
            Scenario::InsideTmux => self.transform_current_window(&key, &project).await?,
        };

        Ok(RunOutcome::Completed {
            scenario,
            project: key,
            window,
        })
    }

    async fn select_project<F>(&self, select: F) -> Result<Option<String>>
    where
        F: FnOnce(&Projects) -> Result<Option<String>> + Send + 'static,
    {
        let projects = self.projects.clone();
        tokio::task::spawn_blocking(move || select(&projects))
            .await
            .context("project selection did not complete")?
    }

    /// Outside tmux, no session: create the session and auxiliary windows,
    /// add the project window, drop the placeholder and attach.
    async fn bootstrap_session(&self, key: &str, project: &Project) -> Result<WindowHandle, OrchestrateError> {
        let session = self.settings.session_name.clone();
        println!("Starting {} in a new '{}' session", project.name, session);

        let start_dir = self.workspace.base_dir().to_string_lossy().to_string();
        let created = self
            .allocator
            .tmux()
            .run(
                &["new-session", "-d", "-s", &session, "-n", PLACEHOLDER_WINDOW, "-c", &start_dir],
                true,
            )
            .await?;
        if !created.success() {
            return Err(OrchestrateError::SessionCreate {
                session,
                message: created.diagnostic(),
            });
        }

        self.create_usage_window().await?;
        self.create_log_window().await?;
        let window = self.create_project_window(key, project).await?;

        // Renumbers every remaining window; indices taken before this are stale.
        let placeholder = WindowHandle::new(&session, PLACEHOLDER_WINDOW);
        if !self.allocator.kill_window_named(&placeholder).await? {
            self.warn(format!("could not remove placeholder window {}", placeholder));
        }

        self.attach(&window).await?;
        Ok(window.handle)
    }

    /// Outside tmux, session present: add the project window and attach.
    async fn add_to_session(&self, key: &str, project: &Project) -> Result<WindowHandle, OrchestrateError> {
        println!(
            "Adding {} to the existing '{}' session",
            project.name, self.settings.session_name
        );
        let window = self.create_project_window(key, project).await?;
        self.attach(&window).await?;
        Ok(window.handle)
    }

    async fn create_usage_window(&self) -> Result<()> {
        let created = self
            .allocator
            .create_command_window(USAGE_WINDOW, &self.settings.monitor_command, Placement::Append)
            .await?;
        if created.is_none() {
            self.warn("failed to create usage monitor window");
        }
        Ok(())
    }

    async fn create_log_window(&self) -> Result<()> {
        let log_file = match self.workspace.daily_log_file(Local::now().date_naive()) {
            Ok(path) => path,
            Err(err) => {
                self.log.error(&err, "daily log file");
                self.warn(format!("failed to prepare daily log: {:#}", err));
                return Ok(());
            }
        };
        let command = editor_command(&self.settings.editor, &log_file);
        let created = self
            .allocator
            .create_command_window(LOG_WINDOW, &command, Placement::Append)
            .await?;
        if created.is_none() {
            self.warn("failed to create log window");
        }
        Ok(())
    }

    /// Create, verify and lay out the project window in the managed session.
    async fn create_project_window(&self, key: &str, project: &Project) -> Result<ProjectWindow, OrchestrateError> {
        let base = managed_window_name(key);
        let unique = self.allocator.unique_window_name(key).await;
        let placement = self.settings.placement;

        let mut created = None;
        for strategy in naming_strategies(&unique, &base) {
            self.log.log_with(
                "CREATE_PROJECT_WINDOW",
                "Trying naming strategy",
                &[("strategy", format!("{:?}", strategy))],
            );
            if let Some(target) = strategy.create(&self.allocator, placement).await? {
                created = Some((strategy, target));
                break;
            }
        }
        let Some((strategy, target)) = created else {
            return Err(OrchestrateError::WindowCreate(unique));
        };
        println!("   → created window {} at {}", strategy.window_name(), target);

        let Some(id) = self.allocator.verify_window_ready(&target, DEFAULT_READY_RETRIES).await else {
            return Err(OrchestrateError::NotReady(target.to_string()));
        };

        let panes = ProjectPanes::new(&self.settings, &self.workspace, project, key);
        self.layout.setup(self.settings.layout, &target, &panes).await?;

        Ok(ProjectWindow {
            handle: WindowHandle::new(target.session(), strategy.window_name()),
            id,
        })
    }

    /// Focus the project window by id, since its name may be shared, then attach.
    async fn attach(&self, window: &ProjectWindow) -> Result<(), OrchestrateError> {
        let tmux = self.allocator.tmux();
        let handle = &window.handle;
        let selected = tmux.run(&["select-window", "-t", &window.id], true).await?;
        if !selected.success() {
            self.warn(format!("could not focus {}: {}", handle, selected.diagnostic()));
        }

        let attached = tmux.run_interactive(&["attach-session", "-t", &handle.session]).await?;
        if !attached.success() {
            return Err(OrchestrateError::Attach {
                session: handle.session.clone(),
                message: attached.diagnostic(),
            });
        }
        Ok(())
    }

    /// Inside tmux: turn the caller's window into the project window.
    ///
    /// Each phase turns unexpected faults into a logged, user-facing error.
    async fn transform_current_window(&self, key: &str, project: &Project) -> Result<WindowHandle, OrchestrateError> {
        println!("Transforming the current window for {}", project.name);
        let own_pane = self
            .detector
            .env()
            .pane
            .clone()
            .ok_or(OrchestrateError::CurrentWindow)?;

        println!("   → clearing current window");
        if !self
            .phase("clear current window", self.clear_current_window(&own_pane))
            .await?
        {
            return Err(OrchestrateError::Clear("could not list panes".to_string()));
        }

        let name = self
            .phase("rename current window", self.rename_current_window(&own_pane, key))
            .await?;

        let target = self
            .phase(
                "resolve current window",
                self.allocator.current_window_target(Some(&own_pane)),
            )
            .await?
            .ok_or(OrchestrateError::CurrentWindow)?;

        if self
            .allocator
            .verify_window_ready(&target, DEFAULT_READY_RETRIES)
            .await
            .is_none()
        {
            return Err(OrchestrateError::NotReady(target.to_string()));
        }

        println!("   → building project layout");
        let panes = ProjectPanes::new(&self.settings, &self.workspace, project, key);
        self.layout.setup(self.settings.layout, &target, &panes).await?;

        let handle = WindowHandle::new(target.session(), name);
        if self.settings.park_transformed_window {
            let moved = self
                .phase("move window to rightmost", self.allocator.move_window_to_rightmost(target))
                .await?;
            match moved {
                Some(target) => self.log.log("TRANSFORM", format!("Window parked at {}", target)),
                None => self.warn("could not move window to the rightmost position"),
            }
        }

        println!("Current window is now {}", handle.name);
        Ok(handle)
    }

    /// Await one phase, converting a fault into a logged `OrchestrateError`.
    async fn phase<T>(
        &self,
        phase: &str,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T, OrchestrateError> {
        self.log.log("TRANSFORM", format!("Starting: {}", phase));
        work.await.map_err(|err| {
            self.log.error(&err, phase);
            OrchestrateError::Fault(anyhow!("{} failed: {:#}", phase, err))
        })
    }

    /// Kill every pane except the caller's own, then clear it. The caller's
    /// pane is running this process, so it never receives an interrupt.
    /// Returns `false` when the window's panes could not be listed.
    async fn clear_current_window(&self, own_pane: &str) -> Result<bool> {
        let tmux = self.allocator.tmux();
        let Some(panes) = tmux.list("list-panes", Some(own_pane), "#{pane_id}").await? else {
            return Ok(false);
        };

        for pane in panes.iter().filter(|p| p.as_str() != own_pane) {
            let killed = tmux.run(&["kill-pane", "-t", pane], true).await?;
            if !killed.success() {
                self.log.log_with(
                    "CLEAR",
                    format!("Failed to kill pane {}", pane),
                    &[("stderr", killed.diagnostic())],
                );
            }
        }

        let cleared = tmux.run(&["send-keys", "-t", own_pane, "clear", "Enter"], true).await?;
        if !cleared.success() {
            self.log.log("CLEAR", format!("Failed to clear pane: {}", cleared.diagnostic()));
        }
        Ok(true)
    }

    /// Rename to `cc-mngr-<key>`, suffixed if another window in the same
    /// session already has that name. Returns the window's resulting name.
    ///
    /// Other windows are told apart by id: one of them may share the current
    /// window's name.
    async fn rename_current_window(&self, own_pane: &str, key: &str) -> Result<String> {
        let tmux = self.allocator.tmux();
        let current = tmux.display(Some(own_pane), "#{window_name}").await?.unwrap_or_default();
        let own_id = tmux.display(Some(own_pane), "#{window_id}").await?;
        let session = tmux.display(Some(own_pane), "#{session_name}").await?;

        let others: HashSet<String> = match session.as_deref() {
            Some(session) => self
                .allocator
                .windows(session)
                .await?
                .unwrap_or_default()
                .into_iter()
                .filter(|(id, _)| Some(id) != own_id.as_ref())
                .map(|(_, name)| name)
                .collect(),
            None => HashSet::new(),
        };

        let name = unique_name_among(key, &others);
        if self.allocator.rename_window(Some(own_pane), &name).await? {
            Ok(name)
        } else {
            self.warn(format!("could not rename window, keeping '{}'", current));
            Ok(current)
        }
    }

    fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.log.log("WARNING", message);
        eprintln!("Warning: {}", message);
    }
}

use crate::debug_log::DebugLog;
use crate::tmux::Tmux;
use crate::types::{managed_window_name, Placement, WindowHandle, WindowTarget};
use anyhow::Result;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// First index of the high "parking" range.
pub const PARKING_START_INDEX: u32 = 1001;

/// Indices tried, in order, when moving a window to the far right.
/// The search is bounded: when all are taken the move fails.
pub const RIGHTMOST_CANDIDATES: [u32; 5] = [999, 1000, 1001, 1002, 1003];

pub const DEFAULT_READY_RETRIES: u32 = 5;

const TARGET_FORMAT: &str = "#{session_name}:#{window_index}";

/// Creates, verifies and positions windows in the managed session.
///
/// Every operation that cannot establish a verified target returns `None`;
/// `Err` is reserved for faults such as tmux not being runnable.
#[derive(Clone)]
pub struct WindowAllocator {
    tmux: Tmux,
    session: String,
    start_dir: PathBuf,
    retry_delay: Duration,
}

impl WindowAllocator {
    pub fn new(tmux: Tmux, session: impl Into<String>, start_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmux,
            session: session.into(),
            start_dir: start_dir.into(),
            retry_delay: Duration::from_millis(100),
        }
    }

    /// Base delay for readiness polling; attempt `n` waits `n * delay`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn tmux(&self) -> &Tmux {
        &self.tmux
    }

    fn log(&self) -> &Arc<DebugLog> {
        self.tmux.log()
    }

    /// Whether the managed session exists. A probe that cannot run counts as absent.
    pub async fn session_exists(&self) -> bool {
        self.has_session(&self.session).await
    }

    async fn has_session(&self, session: &str) -> bool {
        match self.tmux.run(&["has-session", "-t", session], false).await {
            Ok(output) => output.success(),
            Err(err) => {
                self.log().error(&err, "has-session probe");
                false
            }
        }
    }

    pub async fn window_names(&self, session: &str) -> Result<Option<Vec<String>>> {
        self.tmux.list("list-windows", Some(session), "#{window_name}").await
    }

    /// `(window_id, window_name)` for every window in `session`. Names may
    /// repeat; ids never do.
    pub async fn windows(&self, session: &str) -> Result<Option<Vec<(String, String)>>> {
        let lines = self
            .tmux
            .list("list-windows", Some(session), "#{window_id} #{window_name}")
            .await?;
        Ok(lines.map(|lines| {
            lines
                .iter()
                .filter_map(|line| line.split_once(' '))
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect()
        }))
    }

    /// `cc-mngr-<key>`, or the smallest free `-<n>` variant.
    /// An unreadable window list degrades to the unsuffixed name.
    pub async fn unique_window_name(&self, project_key: &str) -> String {
        match self.window_names(&self.session).await {
            Ok(Some(names)) => {
                let existing: HashSet<String> = names.into_iter().collect();
                unique_name_among(project_key, &existing)
            }
            Ok(None) => managed_window_name(project_key),
            Err(err) => {
                self.log().error(&err, "list window names");
                managed_window_name(project_key)
            }
        }
    }

    /// Smallest unused window index `>= start` in `session`.
    pub async fn find_next_available_index(&self, session: &str, start: u32) -> Result<u32> {
        let indices: BTreeSet<u32> = self
            .tmux
            .list("list-windows", Some(session), "#{window_index}")
            .await?
            .unwrap_or_default()
            .iter()
            .filter_map(|line| line.parse().ok())
            .collect();

        let index = next_free_index(&indices, start);
        self.log().log_with(
            "FIND_INDEX",
            format!("Next available index: {}", index),
            &[("existing", format!("{:?}", indices))],
        );
        Ok(index)
    }

    /// Create a named window and verify it.
    pub async fn create_window_safe(
        &self,
        name: &str,
        session_target: Option<&str>,
        placement: Placement,
    ) -> Result<Option<WindowTarget>> {
        self.create_verified(Some(name), session_target, placement, None).await
    }

    /// Create a named window running `command` as its initial process.
    pub async fn create_command_window(
        &self,
        name: &str,
        command: &str,
        placement: Placement,
    ) -> Result<Option<WindowTarget>> {
        self.create_verified(Some(name), None, placement, Some(command)).await
    }

    /// Create a window with tmux's automatic name, then rename and verify it.
    pub async fn create_auto_named(&self, name: &str, placement: Placement) -> Result<Option<WindowTarget>> {
        let Some(target) = self.create_raw(None, &self.session, placement, None).await? else {
            return Ok(None);
        };
        if !self.rename_window(Some(&target.to_string()), name).await? {
            return Ok(None);
        }
        self.verify_name(target, name).await
    }

    async fn create_verified(
        &self,
        name: Option<&str>,
        session_target: Option<&str>,
        placement: Placement,
        command: Option<&str>,
    ) -> Result<Option<WindowTarget>> {
        let session = session_target.unwrap_or(self.session.as_str()).to_string();
        self.log().log_with(
            "CREATE_WINDOW_SAFE",
            "Creating window",
            &[
                ("name", name.unwrap_or("(auto)").to_string()),
                ("session", session.clone()),
                ("placement", format!("{:?}", placement)),
            ],
        );

        if !self.has_session(&session).await {
            self.log().log("CREATE_WINDOW_SAFE", format!("Target session {} does not exist", session));
            return Ok(None);
        }

        let Some(target) = self.create_raw(name, &session, placement, command).await? else {
            return Ok(None);
        };
        match name {
            Some(name) => self.verify_name(target, name).await,
            None => Ok(Some(target)),
        }
    }

    async fn create_raw(
        &self,
        name: Option<&str>,
        session: &str,
        placement: Placement,
        command: Option<&str>,
    ) -> Result<Option<WindowTarget>> {
        let (position_flag, anchor) = match placement {
            Placement::Leftmost => (Some("-b"), format!("{}:^", session)),
            Placement::Append => (Some("-a"), format!("{}:$", session)),
            Placement::Parking => {
                let index = self.find_next_available_index(session, PARKING_START_INDEX).await?;
                (None, format!("{}:{}", session, index))
            }
        };
        let start_dir = self.start_dir.to_string_lossy().to_string();

        let mut args = vec!["new-window"];
        if let Some(flag) = position_flag {
            args.push(flag);
        }
        args.extend(["-t", anchor.as_str()]);
        if let Some(name) = name {
            args.extend(["-n", name]);
        }
        args.extend(["-c", start_dir.as_str(), "-d", "-P", "-F", TARGET_FORMAT]);
        if let Some(command) = command {
            args.push(command);
        }

        let output = self.tmux.run(&args, true).await?;
        if !output.success() {
            self.log().log_with(
                "CREATE_WINDOW_SAFE",
                "Window creation failed",
                &[("stderr", output.diagnostic())],
            );
            return Ok(None);
        }

        let target = WindowTarget::parse(output.stdout_trimmed());
        if target.is_none() {
            self.log().log_with(
                "CREATE_WINDOW_SAFE",
                "Could not parse created window target",
                &[("stdout", output.stdout.clone())],
            );
        }
        Ok(target)
    }

    /// A target whose live name differs from `expected` is a failed creation.
    async fn verify_name(&self, target: WindowTarget, expected: &str) -> Result<Option<WindowTarget>> {
        let actual = self
            .tmux
            .display(Some(&target.to_string()), "#{window_name}")
            .await?;

        match actual {
            Some(actual) if actual == expected => {
                self.log().log(
                    "CREATE_WINDOW_SAFE",
                    format!("Window verification successful: {} at {}", expected, target),
                );
                Ok(Some(target))
            }
            Some(actual) => {
                self.log().log_with(
                    "CREATE_WINDOW_SAFE",
                    "Window name mismatch",
                    &[("expected", expected.to_string()), ("actual", actual), ("target", target.to_string())],
                );
                Ok(None)
            }
            None => {
                self.log().log(
                    "CREATE_WINDOW_SAFE",
                    format!("Cannot access created window {}", target),
                );
                Ok(None)
            }
        }
    }

    /// Poll until the window answers queries, backing off `n * delay`.
    /// Returns the window's `@id`, which stays valid across renumbering.
    pub async fn verify_window_ready(&self, target: &WindowTarget, max_retries: u32) -> Option<String> {
        let target_arg = target.to_string();
        for attempt in 0..max_retries {
            match self.tmux.display(Some(&target_arg), "#{window_id}").await {
                Ok(Some(id)) if !id.is_empty() => return Some(id),
                Ok(_) => {}
                Err(err) => {
                    self.log().error(&err, "window readiness probe");
                    return None;
                }
            }
            if attempt + 1 < max_retries {
                tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
            }
        }
        self.log().log(
            "VERIFY_READY",
            format!("Window {} not ready after {} attempts", target_arg, max_retries),
        );
        None
    }

    /// Move a window to the first free candidate index.
    ///
    /// "Index in use" moves on to the next candidate; any other failure stops
    /// immediately. Exhausting the candidates is a failure.
    pub async fn move_window_to_rightmost(&self, target: WindowTarget) -> Result<Option<WindowTarget>> {
        let source = target.to_string();
        let session = target.session().to_string();

        for index in RIGHTMOST_CANDIDATES {
            let destination = format!("{}:{}", session, index);
            let output = self
                .tmux
                .run(&["move-window", "-s", &source, "-t", &destination], true)
                .await?;

            match output.failure() {
                None => {
                    self.log().log("MOVE_WINDOW", format!("Window moved to {}", destination));
                    return Ok(Some(WindowTarget::new(session, index)));
                }
                Some(failure) if failure.is_index_in_use() => {
                    self.log().log("MOVE_WINDOW", format!("Index {} in use, trying next", index));
                }
                Some(failure) => {
                    self.log().log_with(
                        "MOVE_WINDOW",
                        "Move window error",
                        &[("failure", failure.to_string())],
                    );
                    return Ok(None);
                }
            }
        }

        self.log().log("MOVE_WINDOW", "All candidate indices in use");
        Ok(None)
    }

    /// Re-resolve a name handle to a fresh index target.
    pub async fn resolve(&self, handle: &WindowHandle) -> Result<Option<WindowTarget>> {
        let live = self.tmux.display(Some(&handle.target()), TARGET_FORMAT).await?;
        Ok(live.as_deref().and_then(WindowTarget::parse))
    }

    /// Live `session:index` of the window holding `pane` (or the current pane).
    pub async fn current_window_target(&self, pane: Option<&str>) -> Result<Option<WindowTarget>> {
        let live = self.tmux.display(pane, TARGET_FORMAT).await?;
        Ok(live.as_deref().and_then(WindowTarget::parse))
    }

    pub async fn rename_window(&self, target: Option<&str>, name: &str) -> Result<bool> {
        let mut args = vec!["rename-window"];
        if let Some(target) = target {
            args.extend(["-t", target]);
        }
        args.push(name);
        Ok(self.tmux.run(&args, true).await?.success())
    }

    /// Kill a window by exact name. Other windows may be renumbered.
    pub async fn kill_window_named(&self, handle: &WindowHandle) -> Result<bool> {
        let target = handle.target();
        Ok(self.tmux.run(&["kill-window", "-t", &target], true).await?.success())
    }
}

pub fn unique_name_among(project_key: &str, existing: &HashSet<String>) -> String {
    let base = managed_window_name(project_key);
    if !existing.contains(&base) {
        return base;
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{}-{}", base, counter);
        if !existing.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

pub fn next_free_index(existing: &BTreeSet<u32>, start: u32) -> u32 {
    let mut index = start;
    while existing.contains(&index) {
        index += 1;
    }
    index
}

//! Shell commands for pane content, and the files they open.

use crate::config::Settings;
use crate::layout::{PaneContent, PaneRole};
use crate::types::Project;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use shell_escape::unix::escape;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

const SYSTEM_PROMPT_TEMPLATE: &str = "system_prompt_template.md";
const MESSAGE_TEMPLATE: &str = "assistant_message_template.md";

/// Directory tree holding task notes, daily logs, templates and contexts.
#[derive(Debug, Clone)]
pub struct Workspace {
    base_dir: PathBuf,
}

impl Workspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn task_file_relative(key: &str) -> String {
        format!("tasks/task_{}.md", key)
    }

    /// `tasks/task_<key>.md`, created with a header when missing.
    pub fn task_file(&self, key: &str, project: &Project) -> Result<PathBuf> {
        let path = self.base_dir.join(Self::task_file_relative(key));
        if !path.exists() {
            let header = format!(
                "# {} - Task Notes\n\nProject: {}\nCategory: {}\nCreated: {}\n\n## Tasks\n\n",
                project.name,
                project.name,
                project.primary_category(),
                Local::now().format("%Y-%m-%d")
            );
            write_new(&path, &header)?;
        }
        Ok(path)
    }

    /// `logs/<date>.md`, created when missing.
    pub fn daily_log_file(&self, date: NaiveDate) -> Result<PathBuf> {
        let day = date.format("%Y-%m-%d").to_string();
        let path = self.base_dir.join("logs").join(format!("{}.md", day));
        if !path.exists() {
            write_new(&path, &format!("# Daily Log - {}\n\n", day))?;
        }
        Ok(path)
    }

    pub fn template(&self, name: &str) -> Result<Option<String>> {
        read_optional(&self.base_dir.join("templates").join(name))
    }

    pub fn context_file(&self, key: &str) -> PathBuf {
        self.base_dir.join("contexts").join(format!("context_{}.md", key))
    }

    pub fn mcp_config(&self) -> PathBuf {
        self.base_dir.join("mcp_config.json")
    }
}

fn write_new(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("failed to read {}", path.display()))
}

fn quote(raw: &str) -> String {
    escape(Cow::Borrowed(raw)).into_owned()
}

pub fn editor_command(editor: &str, path: &Path) -> String {
    format!("{} {}", editor, quote(&path.to_string_lossy()))
}

/// Fill `{name}` placeholders; unknown placeholders are left as written.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{}}}", key), value)
    })
}

/// Builder for the assistant pane's command line.
pub struct AssistantCommand<'a> {
    settings: &'a Settings,
    workspace: &'a Workspace,
    project: &'a Project,
    key: &'a str,
}

impl<'a> AssistantCommand<'a> {
    pub fn new(settings: &'a Settings, workspace: &'a Workspace, project: &'a Project, key: &'a str) -> Self {
        Self {
            settings,
            workspace,
            project,
            key,
        }
    }

    pub fn build(&self) -> Result<String> {
        let mut parts = vec![
            self.settings.assistant_command.clone(),
            "--model".to_string(),
            quote(&self.settings.assistant_model),
        ];

        let mcp = self.workspace.mcp_config();
        if mcp.exists() {
            parts.push("--mcp-config".to_string());
            parts.push(quote(&mcp.to_string_lossy()));
            parts.push("--strict-mcp-config".to_string());
        }

        if self.project.directory.is_dir() {
            parts.push("--add-dir".to_string());
            parts.push(quote(&self.project.directory.to_string_lossy()));
        } else {
            tracing::warn!(
                directory = %self.project.directory.display(),
                "project directory missing, skipping --add-dir"
            );
        }

        let task_file = self.workspace.task_file(self.key, self.project)?;
        parts.push("--append-system-prompt".to_string());
        parts.push(quote(&self.system_prompt()?));
        parts.push(quote(&self.initial_message(&task_file)?));

        Ok(parts.join(" "))
    }

    fn system_prompt(&self) -> Result<String> {
        let Some(template) = self.workspace.template(SYSTEM_PROMPT_TEMPLATE)? else {
            return Ok(format!(
                "You are assisting with the project {} ({}) in {}. Task notes live in {}.",
                self.project.name,
                self.project.primary_category(),
                self.project.directory.display(),
                Workspace::task_file_relative(self.key)
            ));
        };

        let context_path = self.workspace.context_file(self.key);
        let context = read_optional(&context_path)?
            .unwrap_or_else(|| format!("Context file not found: {}", context_path.display()));
        let directory = self.project.directory.display().to_string();
        let todoist = self.project.todoist_display();
        let task_file = Workspace::task_file_relative(self.key);
        let today = today();

        Ok(fill_template(
            &template,
            &[
                ("project_name", self.project.name.as_str()),
                ("category", self.project.category.as_str()),
                ("directory", directory.as_str()),
                ("todoist_project", todoist.as_str()),
                ("task_file_path", task_file.as_str()),
                ("current_date", today.as_str()),
                ("context_content", context.as_str()),
            ],
        ))
    }

    fn initial_message(&self, task_file: &Path) -> Result<String> {
        let task_file_relative = Workspace::task_file_relative(self.key);
        let Some(template) = self.workspace.template(MESSAGE_TEMPLATE)? else {
            return Ok(format!(
                "Starting new session for {}. Task file: {}",
                self.project.name, task_file_relative
            ));
        };

        let task_content = read_optional(task_file)?
            .map(|text| text.trim().to_string())
            .unwrap_or_else(|| "(Task file not found - will be created)".to_string());
        let directory = self.project.directory.display().to_string();
        let today = today();

        Ok(fill_template(
            &template,
            &[
                ("project_name", self.project.name.as_str()),
                ("category", self.project.category.as_str()),
                ("directory", directory.as_str()),
                ("task_file_path", task_file_relative.as_str()),
                ("task_file_content", task_content.as_str()),
                ("current_date", today.as_str()),
            ],
        ))
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Pane content for one project window.
pub struct ProjectPanes<'a> {
    settings: &'a Settings,
    workspace: &'a Workspace,
    project: &'a Project,
    key: &'a str,
}

impl<'a> ProjectPanes<'a> {
    pub fn new(settings: &'a Settings, workspace: &'a Workspace, project: &'a Project, key: &'a str) -> Self {
        Self {
            settings,
            workspace,
            project,
            key,
        }
    }
}

impl PaneContent for ProjectPanes<'_> {
    fn command(&self, role: PaneRole) -> Result<String> {
        match role {
            PaneRole::Notes | PaneRole::TaskFile => {
                let path = self.workspace.task_file(self.key, self.project)?;
                Ok(editor_command(&self.settings.editor, &path))
            }
            PaneRole::Monitor => Ok(self.settings.monitor_command.clone()),
            PaneRole::Assistant => {
                AssistantCommand::new(self.settings, self.workspace, self.project, self.key).build()
            }
        }
    }
}

use crate::types::{LayoutKind, Placement, Project};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{value, DocumentMut, Item, Table};

const DEFAULT_SESSION: &str = "mngr";
const DEFAULT_BASE_DIR: &str = "~/.local/share/tmux-mngr";

const EXAMPLE_CONFIG: &str = r#"# tmux-mngr configuration

[settings]
session_name = "mngr"
editor = "nvim"
assistant_command = "claude"
assistant_model = "sonnet"
monitor_command = "ccusage blocks --live -t 150000"
# Height of the lower-left pane in the three-pane layout, in percent.
pane_height_bottom = 20
# Holds tasks/, logs/, templates/ and contexts/.
base_dir = "~/.local/share/tmux-mngr"
# "two-pane" or "three-pane"
layout = "two-pane"
# "append", "leftmost" or "parking"
placement = "append"
park_transformed_window = true
debug_log = true

# [projects.example]
# name = "Example Project"
# directory = "~/code/example"
# category = "Projects"
# todoist_project = "Inbox"
# description = "What this project is about"
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub session_name: String,
    pub editor: String,
    pub assistant_command: String,
    pub assistant_model: String,
    pub monitor_command: String,
    pub pane_height_bottom: u8,
    pub base_dir: String,
    pub layout: LayoutKind,
    pub placement: Placement,
    pub park_transformed_window: bool,
    pub debug_log: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_SESSION.to_string(),
            editor: "nvim".to_string(),
            assistant_command: "claude".to_string(),
            assistant_model: "sonnet".to_string(),
            monitor_command: "ccusage blocks --live -t 150000".to_string(),
            pane_height_bottom: 20,
            base_dir: DEFAULT_BASE_DIR.to_string(),
            layout: LayoutKind::default(),
            placement: Placement::default(),
            park_transformed_window: true,
            debug_log: true,
        }
    }
}

impl Settings {
    /// `base_dir` with a leading `~` expanded.
    pub fn base_path(&self) -> PathBuf {
        expand_home(&self.base_dir)
    }

    /// The `debug_log` setting, overridden by `MNGR_DEBUG` when it parses.
    pub fn debug_log_enabled(&self) -> bool {
        env::var("MNGR_DEBUG")
            .ok()
            .and_then(|raw| parse_flag(&raw))
            .unwrap_or(self.debug_log)
    }
}

/// Result of [`Config::ensure_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigStatus {
    pub created: bool,
    pub has_projects: bool,
}

enum SettingKind {
    Text,
    Integer,
    Flag,
}

fn setting_kind(key: &str) -> Option<SettingKind> {
    match key {
        "session_name" | "editor" | "assistant_command" | "assistant_model" | "monitor_command"
        | "base_dir" | "layout" | "placement" => Some(SettingKind::Text),
        "pane_height_bottom" => Some(SettingKind::Integer),
        "park_transformed_window" | "debug_log" => Some(SettingKind::Flag),
        _ => None,
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        for project in config.projects.values_mut() {
            project.directory = expand_home(&project.directory.to_string_lossy());
        }
        Ok(config)
    }

    /// `MNGR_CONFIG`, else `$XDG_CONFIG_HOME/tmux-mngr/config.toml`.
    pub fn path() -> PathBuf {
        if let Ok(path) = env::var("MNGR_CONFIG") {
            return PathBuf::from(path);
        }
        if let Ok(dir) = env::var("XDG_CONFIG_HOME") {
            return Path::new(&dir).join("tmux-mngr").join("config.toml");
        }

        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home)
            .join(".config")
            .join("tmux-mngr")
            .join("config.toml")
    }

    pub fn ensure_exists() -> Result<ConfigStatus> {
        Self::ensure_exists_at(&Self::path())
    }

    /// Write the example configuration when `path` is missing.
    pub fn ensure_exists_at(path: &Path) -> Result<ConfigStatus> {
        let created = if path.exists() {
            false
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
            }
            fs::write(path, EXAMPLE_CONFIG)
                .with_context(|| format!("failed to write config file: {}", path.display()))?;
            true
        };

        let config = Self::load_from(path)?;
        Ok(ConfigStatus {
            created,
            has_projects: !config.projects.is_empty(),
        })
    }

    pub fn set_value(key: &str, raw: &str) -> Result<Option<String>> {
        Self::set_value_at(&Self::path(), key, raw)
    }

    /// Update one `[settings]` key in place, keeping the rest of the file
    /// (comments included) untouched. Returns the previous value.
    pub fn set_value_at(path: &Path, key: &str, raw: &str) -> Result<Option<String>> {
        let key = key.strip_prefix("settings.").unwrap_or(key);
        let kind = setting_kind(key).ok_or_else(|| {
            anyhow!(
                "unknown setting '{}'. Available: session_name, editor, assistant_command, \
                 assistant_model, monitor_command, pane_height_bottom, base_dir, layout, \
                 placement, park_transformed_window, debug_log",
                key
            )
        })?;

        let contents = if path.exists() {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?
        } else {
            String::new()
        };
        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        if !doc.contains_key("settings") {
            doc["settings"] = Item::Table(Table::new());
        }
        let settings = doc["settings"]
            .as_table_mut()
            .ok_or_else(|| anyhow!("'settings' in {} is not a table", path.display()))?;

        let old = settings
            .get(key)
            .and_then(Item::as_value)
            .map(|v| v.to_string().trim().trim_matches('"').to_string());

        settings[key] = match kind {
            SettingKind::Text => value(raw),
            SettingKind::Integer => {
                let number: i64 = raw
                    .parse()
                    .with_context(|| format!("'{}' expects a whole number, got '{}'", key, raw))?;
                value(number)
            }
            SettingKind::Flag => {
                let flag = parse_flag(raw)
                    .ok_or_else(|| anyhow!("'{}' expects true or false, got '{}'", key, raw))?;
                value(flag)
            }
        };

        let updated = doc.to_string();
        if let Err(err) = toml::from_str::<Config>(&updated) {
            bail!("invalid value for '{}': {}", key, err.message());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
        }
        fs::write(path, updated)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(old)
    }

    pub fn display(&self) -> String {
        let s = &self.settings;
        let mut lines = vec![
            format!("Config file: {}", Self::path().display()),
            String::new(),
            "[settings]".to_string(),
            format!("session_name            = {}", s.session_name),
            format!("editor                  = {}", s.editor),
            format!("assistant_command       = {}", s.assistant_command),
            format!("assistant_model         = {}", s.assistant_model),
            format!("monitor_command         = {}", s.monitor_command),
            format!("pane_height_bottom      = {}", s.pane_height_bottom),
            format!("base_dir                = {}", s.base_path().display()),
            format!("layout                  = {:?}", s.layout),
            format!("placement               = {:?}", s.placement),
            format!("park_transformed_window = {}", s.park_transformed_window),
            format!("debug_log               = {}", s.debug_log_enabled()),
            String::new(),
            format!("projects: {}", self.projects.len()),
        ];
        for (key, project) in &self.projects {
            lines.push(format!("  {:<16} {}", key, project.name));
        }
        lines.join("\n")
    }

    pub fn info() -> String {
        let path = Self::path();
        let state = if path.exists() { "exists" } else { "not found" };
        format!("Config file: {} ({})", path.display(), state)
    }
}

/// `1|true|yes|on` and `0|false|no|off`, case-insensitive.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Ok(home) = env::var("HOME") {
            return Path::new(&home).join(raw.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

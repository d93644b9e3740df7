//! In-memory tmux server for tests.
//!
//! Models sessions, windows (index, name, id), panes, `renumber-windows`
//! on kill, index collisions, scripted failures and runner faults, and
//! records every argv.

use crate::debug_log::DebugLog;
use crate::tmux::{CommandOutput, Tmux, TmuxRunner};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct FakePane {
    pub id: u32,
    /// Initial command plus every `send-keys` line.
    pub sent: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FakeWindow {
    pub id: u32,
    pub index: u32,
    pub name: String,
    pub panes: Vec<FakePane>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub sessions: BTreeMap<String, Vec<FakeWindow>>,
    /// Pane id of the caller when running "inside tmux".
    pub current_pane: Option<u32>,
    pub calls: Vec<Vec<String>>,
    pub attached: Vec<String>,
    pub renumber_on_kill: bool,
    /// Name given to the next created window regardless of `-n`.
    pub name_override: Option<String>,
    /// Number of `#{window_id}` probes that fail before succeeding.
    pub unready_polls: u32,
    /// Scripted failures keyed by subcommand, consumed in order.
    pub failures: HashMap<String, Vec<String>>,
    /// Like `failures`, but the runner itself errors instead of tmux exiting non-zero.
    pub faults: HashMap<String, Vec<String>>,
    next_window_id: u32,
    next_pane_id: u32,
}

#[derive(Clone, Default)]
pub struct FakeTmux {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTmux {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state().renumber_on_kill = true;
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn gateway(&self) -> Tmux {
        Tmux::new(Arc::new(self.clone()), Arc::new(DebugLog::disabled()))
    }

    /// Add a session whose windows carry the given indices and names.
    pub fn with_session(self, session: &str, windows: &[(u32, &str)]) -> Self {
        {
            let mut state = self.state();
            let mut created = Vec::new();
            for (index, name) in windows {
                let window = state.make_window(*index, name, None);
                created.push(window);
            }
            created.sort_by_key(|w| w.index);
            state.sessions.insert(session.to_string(), created);
        }
        self
    }

    /// Make the first pane of `session:index` the caller's pane.
    pub fn with_current(self, session: &str, index: u32) -> Self {
        {
            let mut state = self.state();
            let pane = state
                .sessions
                .get(session)
                .and_then(|ws| ws.iter().find(|w| w.index == index))
                .map(|w| w.panes[0].id);
            state.current_pane = pane;
        }
        self
    }

    /// `TMUX_PANE`-style id of the caller's pane.
    pub fn current_pane_id(&self) -> Option<String> {
        self.state().current_pane.map(|id| format!("%{}", id))
    }

    pub fn fail_next(&self, subcommand: &str, stderr: &str) {
        self.state()
            .failures
            .entry(subcommand.to_string())
            .or_default()
            .push(stderr.to_string());
    }

    pub fn fault_next(&self, subcommand: &str, message: &str) {
        self.state()
            .faults
            .entry(subcommand.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn window_names(&self, session: &str) -> Vec<String> {
        self.state()
            .sessions
            .get(session)
            .map(|ws| ws.iter().map(|w| w.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn window(&self, session: &str, name: &str) -> Option<FakeWindow> {
        self.state()
            .sessions
            .get(session)
            .and_then(|ws| ws.iter().find(|w| w.name == name).cloned())
    }

    pub fn calls_for(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(subcommand))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TmuxRunner for FakeTmux {
    async fn output(&self, args: &[String]) -> Result<CommandOutput> {
        self.state().run(args)
    }

    async fn interactive(&self, args: &[String]) -> Result<CommandOutput> {
        self.state().run(args)
    }
}

struct Parsed {
    flags: HashMap<char, Option<String>>,
    positional: Vec<String>,
}

impl Parsed {
    fn new(args: &[String], with_value: &str) -> Self {
        let mut flags = HashMap::new();
        let mut positional = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let flag = arg
                .strip_prefix('-')
                .filter(|rest| rest.len() == 1 && positional.is_empty())
                .and_then(|rest| rest.chars().next());
            match flag {
                Some(c) if with_value.contains(c) => {
                    flags.insert(c, iter.next().cloned());
                }
                Some(c) => {
                    flags.insert(c, None);
                }
                None => positional.push(arg.clone()),
            }
        }
        Self { flags, positional }
    }

    fn value(&self, flag: char) -> Option<&str> {
        self.flags.get(&flag).and_then(|v| v.as_deref())
    }

    fn has(&self, flag: char) -> bool {
        self.flags.contains_key(&flag)
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn err(stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code: 1,
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

/// Resolved location: session, window position, optional pane position.
type Location = (String, usize, Option<usize>);

impl FakeState {
    fn make_window(&mut self, index: u32, name: &str, command: Option<&str>) -> FakeWindow {
        self.next_window_id += 1;
        self.next_pane_id += 1;
        FakeWindow {
            id: self.next_window_id,
            index,
            name: name.to_string(),
            panes: vec![FakePane {
                id: self.next_pane_id,
                sent: command.map(|c| vec![c.to_string()]).unwrap_or_default(),
            }],
        }
    }

    fn run(&mut self, args: &[String]) -> Result<CommandOutput> {
        let subcommand = args.first().cloned().unwrap_or_default();
        if let Some(queue) = self.faults.get_mut(&subcommand) {
            if !queue.is_empty() {
                self.calls.push(args.to_vec());
                return Err(anyhow!(queue.remove(0)));
            }
        }
        Ok(self.execute(args))
    }

    fn execute(&mut self, args: &[String]) -> CommandOutput {
        self.calls.push(args.to_vec());
        let Some(subcommand) = args.first() else {
            return err("no command");
        };
        if let Some(queue) = self.failures.get_mut(subcommand) {
            if !queue.is_empty() {
                return err(queue.remove(0));
            }
        }
        let rest = &args[1..];
        match subcommand.as_str() {
            "-V" => ok("tmux 3.4\n"),
            "has-session" => self.has_session(rest),
            "new-session" => self.new_session(rest),
            "new-window" => self.new_window(rest),
            "display-message" => self.display_message(rest),
            "list-windows" => self.list_windows(rest),
            "list-panes" => self.list_panes(rest),
            "split-window" => self.split_window(rest),
            "select-pane" | "select-window" => self.select(rest),
            "send-keys" => self.send_keys(rest),
            "rename-window" => self.rename_window(rest),
            "move-window" => self.move_window(rest),
            "kill-window" => self.kill_window(rest),
            "kill-pane" => self.kill_pane(rest),
            "attach-session" => self.attach(rest),
            other => err(format!("unknown command: {}", other)),
        }
    }

    fn current_location(&self) -> Option<(String, usize, usize)> {
        let pane_id = self.current_pane?;
        for (session, windows) in &self.sessions {
            for (w, window) in windows.iter().enumerate() {
                if let Some(p) = window.panes.iter().position(|p| p.id == pane_id) {
                    return Some((session.clone(), w, p));
                }
            }
        }
        None
    }

    fn locate(&self, target: Option<&str>) -> Option<Location> {
        let target = match target {
            None => "",
            Some(t) => t,
        };
        if target.is_empty() {
            let (session, w, p) = self.current_location()?;
            return Some((session, w, Some(p)));
        }
        if let Some(id) = target.strip_prefix('%') {
            let id: u32 = id.parse().ok()?;
            return self.sessions.iter().find_map(|(session, windows)| {
                windows.iter().enumerate().find_map(|(w, window)| {
                    let p = window.panes.iter().position(|p| p.id == id)?;
                    Some((session.clone(), w, Some(p)))
                })
            });
        }
        if let Some(id) = target.strip_prefix('@') {
            let id: u32 = id.parse().ok()?;
            return self.sessions.iter().find_map(|(session, windows)| {
                let w = windows.iter().position(|window| window.id == id)?;
                Some((session.clone(), w, None))
            });
        }
        if let Some(pane) = target.strip_prefix('.') {
            let (session, w, _) = self.current_location()?;
            let pane: usize = pane.parse().ok()?;
            let window = &self.sessions.get(&session)?[w];
            return (pane < window.panes.len()).then_some((session, w, Some(pane)));
        }

        let (session, window_part) = match target.split_once(':') {
            Some((s, rest)) => (s.to_string(), rest),
            None => (target.to_string(), ""),
        };
        let windows = self.sessions.get(&session)?;
        if windows.is_empty() {
            return None;
        }

        let (window_part, pane) = match window_part.rsplit_once('.') {
            Some((w, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (w, Some(p.parse::<usize>().ok()?))
            }
            _ => (window_part, None),
        };

        let position = match window_part {
            "" | "^" => Some(0),
            "$" => Some(windows.len() - 1),
            // Exact names must be unambiguous, as in tmux.
            w if w.starts_with('=') => {
                let mut matches = windows.iter().enumerate().filter(|(_, x)| x.name == w[1..]);
                match (matches.next(), matches.next()) {
                    (Some((position, _)), None) => Some(position),
                    _ => None,
                }
            }
            w if w.chars().all(|c| c.is_ascii_digit()) => {
                let index: u32 = w.parse().ok()?;
                windows.iter().position(|x| x.index == index)
            }
            w => windows.iter().position(|x| x.name == w),
        }?;

        if let Some(pane) = pane {
            if pane >= windows[position].panes.len() {
                return None;
            }
        }
        Some((session, position, pane))
    }

    fn format(&self, format: &str, session: &str, w: usize, p: Option<usize>) -> String {
        let window = &self.sessions[session][w];
        let pane = p.unwrap_or(0);
        format
            .replace("#{session_name}", session)
            .replace("#{window_index}", &window.index.to_string())
            .replace("#{window_name}", &window.name)
            .replace("#{window_id}", &format!("@{}", window.id))
            .replace("#{pane_index}", &pane.to_string())
            .replace("#{pane_id}", &format!("%{}", window.panes[pane].id))
    }

    fn has_session(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "t");
        let session = parsed.value('t').unwrap_or_default();
        if self.sessions.contains_key(session) {
            ok("")
        } else {
            err(format!("can't find session: {}", session))
        }
    }

    fn new_session(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "sncF");
        let session = parsed.value('s').unwrap_or("0").to_string();
        if self.sessions.contains_key(&session) {
            return err(format!("duplicate session: {}", session));
        }
        let name = parsed.value('n').unwrap_or("zsh").to_string();
        let command = parsed.positional.first().map(String::as_str);
        let window = self.make_window(0, &name, command);
        self.sessions.insert(session, vec![window]);
        ok("")
    }

    fn new_window(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "tncF");
        let target = parsed.value('t').unwrap_or("");
        let (session, window_part) = match target.split_once(':') {
            Some((s, w)) => (s.to_string(), w.to_string()),
            None => (target.to_string(), String::new()),
        };
        let Some(windows) = self.sessions.get(&session) else {
            return err(format!("can't find session: {}", session));
        };

        let index = if parsed.has('a') || parsed.has('b') {
            let Some((_, position, _)) = self.locate(Some(target)) else {
                return err(format!("can't find window: {}", window_part));
            };
            let anchor = windows[position].index;
            let index = if parsed.has('a') { anchor + 1 } else { anchor };
            let windows = self.sessions.get_mut(&session).unwrap();
            if windows.iter().any(|w| w.index == index) {
                for w in windows.iter_mut().filter(|w| w.index >= index) {
                    w.index += 1;
                }
            }
            index
        } else if !window_part.is_empty() {
            let Ok(index) = window_part.parse::<u32>() else {
                return err(format!("bad window index: {}", window_part));
            };
            if windows.iter().any(|w| w.index == index) {
                return err(format!("create window failed: index in use: {}", index));
            }
            index
        } else {
            windows.iter().map(|w| w.index + 1).max().unwrap_or(0)
        };

        let name = self
            .name_override
            .take()
            .or_else(|| parsed.value('n').map(str::to_string))
            .unwrap_or_else(|| "zsh".to_string());
        let command = parsed.positional.first().map(String::as_str);
        let window = self.make_window(index, &name, command);
        let windows = self.sessions.get_mut(&session).unwrap();
        windows.push(window);
        windows.sort_by_key(|w| w.index);
        let position = windows.iter().position(|w| w.index == index).unwrap();

        if parsed.has('P') {
            let format = parsed.value('F').unwrap_or("#{session_name}:#{window_index}");
            let line = self.format(format, &session, position, None);
            return ok(format!("{}\n", line));
        }
        ok("")
    }

    fn display_message(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "tF");
        let target = parsed.value('t');
        let format = parsed.positional.first().cloned().unwrap_or_default();
        if format.contains("#{window_id}") && self.unready_polls > 0 {
            self.unready_polls -= 1;
            return err(format!("can't find window: {}", target.unwrap_or("")));
        }
        match self.locate(target) {
            Some((session, w, p)) => ok(format!("{}\n", self.format(&format, &session, w, p))),
            None => err(format!("can't find window: {}", target.unwrap_or(""))),
        }
    }

    fn list_windows(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "tF");
        let session = parsed.value('t').unwrap_or_default().to_string();
        let Some(windows) = self.sessions.get(&session) else {
            return err(format!("can't find session: {}", session));
        };
        let format = parsed.value('F').unwrap_or("#{window_index}: #{window_name}");
        let lines: Vec<String> = (0..windows.len())
            .map(|w| self.format(format, &session, w, None))
            .collect();
        ok(lines.join("\n") + "\n")
    }

    fn list_panes(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "tF");
        let Some((session, w, _)) = self.locate(parsed.value('t')) else {
            return err("can't find pane");
        };
        let format = parsed.value('F').unwrap_or("#{pane_index}");
        let count = self.sessions[&session][w].panes.len();
        let lines: Vec<String> = (0..count)
            .map(|p| self.format(format, &session, w, Some(p)))
            .collect();
        ok(lines.join("\n") + "\n")
    }

    fn split_window(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "tlpc");
        let Some((session, w, p)) = self.locate(parsed.value('t')) else {
            return err(format!("can't find pane: {}", parsed.value('t').unwrap_or("")));
        };
        self.next_pane_id += 1;
        let pane = FakePane {
            id: self.next_pane_id,
            sent: Vec::new(),
        };
        let window = &mut self.sessions.get_mut(&session).unwrap()[w];
        window.panes.insert(p.unwrap_or(0) + 1, pane);
        ok("")
    }

    fn select(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "t");
        match self.locate(parsed.value('t')) {
            Some(_) => ok(""),
            None => err(format!("can't find window: {}", parsed.value('t').unwrap_or(""))),
        }
    }

    fn send_keys(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "t");
        let Some((session, w, p)) = self.locate(parsed.value('t')) else {
            return err(format!("can't find pane: {}", parsed.value('t').unwrap_or("")));
        };
        let line = parsed.positional.join(" ");
        let window = &mut self.sessions.get_mut(&session).unwrap()[w];
        window.panes[p.unwrap_or(0)].sent.push(line);
        ok("")
    }

    fn rename_window(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "t");
        let Some(name) = parsed.positional.first().cloned() else {
            return err("usage: rename-window [-t target-window] new-name");
        };
        let Some((session, w, _)) = self.locate(parsed.value('t')) else {
            return err(format!("can't find window: {}", parsed.value('t').unwrap_or("")));
        };
        self.sessions.get_mut(&session).unwrap()[w].name = name;
        ok("")
    }

    fn move_window(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "st");
        let Some((session, w, _)) = self.locate(parsed.value('s')) else {
            return err(format!("can't find window: {}", parsed.value('s').unwrap_or("")));
        };
        let destination = parsed.value('t').unwrap_or_default();
        let (dest_session, dest_index) = match destination.split_once(':') {
            Some((s, i)) => (s.to_string(), i),
            None => (session.clone(), destination),
        };
        let Ok(dest_index) = dest_index.parse::<u32>() else {
            return err(format!("bad window index: {}", dest_index));
        };
        if !self.sessions.contains_key(&dest_session) {
            return err(format!("can't find session: {}", dest_session));
        }
        if self.sessions[&dest_session].iter().any(|x| x.index == dest_index) {
            return err(format!("index in use: {}", dest_index));
        }
        let mut window = self.sessions.get_mut(&session).unwrap().remove(w);
        window.index = dest_index;
        let windows = self.sessions.get_mut(&dest_session).unwrap();
        windows.push(window);
        windows.sort_by_key(|x| x.index);
        ok("")
    }

    fn kill_window(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "t");
        let Some((session, w, _)) = self.locate(parsed.value('t')) else {
            return err(format!("can't find window: {}", parsed.value('t').unwrap_or("")));
        };
        let windows = self.sessions.get_mut(&session).unwrap();
        windows.remove(w);
        if windows.is_empty() {
            self.sessions.remove(&session);
        } else if self.renumber_on_kill {
            for (i, window) in windows.iter_mut().enumerate() {
                window.index = i as u32;
            }
        }
        ok("")
    }

    fn kill_pane(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "t");
        let Some((session, w, p)) = self.locate(parsed.value('t')) else {
            return err(format!("can't find pane: {}", parsed.value('t').unwrap_or("")));
        };
        let window = &mut self.sessions.get_mut(&session).unwrap()[w];
        window.panes.remove(p.unwrap_or(0));
        ok("")
    }

    fn attach(&mut self, rest: &[String]) -> CommandOutput {
        let parsed = Parsed::new(rest, "t");
        let target = parsed.value('t').unwrap_or_default().to_string();
        match self.locate(Some(&target)) {
            Some(_) => {
                self.attached.push(target);
                ok("")
            }
            None => err(format!("can't find session: {}", target)),
        }
    }
}

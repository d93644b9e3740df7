use crate::types::Project;
use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use thiserror::Error;

pub type Projects = BTreeMap<String, Project>;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project '{0}' is not configured")]
    Unknown(String),
    #[error("project '{0}' has an empty name")]
    EmptyName(String),
    #[error("project directory does not exist: {}", .1.display())]
    MissingDirectory(String, PathBuf),
}

pub fn validate_project<'a>(projects: &'a Projects, key: &str) -> Result<&'a Project, ProjectError> {
    let project = projects
        .get(key)
        .ok_or_else(|| ProjectError::Unknown(key.to_string()))?;
    if project.name.trim().is_empty() {
        return Err(ProjectError::EmptyName(key.to_string()));
    }
    if !project.directory.is_dir() {
        return Err(ProjectError::MissingDirectory(
            key.to_string(),
            project.directory.clone(),
        ));
    }
    Ok(project)
}

/// Chooses a project key, or `None` when the user backs out.
pub trait ProjectSelector {
    fn select(&mut self, projects: &Projects) -> Result<Option<String>>;
}

/// Numbered prompt: `1..=n` picks a project, `n + 1` exits.
pub struct PromptSelector<R, W> {
    input: R,
    output: W,
}

impl PromptSelector<BufReader<io::Stdin>, io::Stdout> {
    /// Prompt on the terminal. `Send`, so it can run off the async runtime.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> ProjectSelector for PromptSelector<R, W> {
    fn select(&mut self, projects: &Projects) -> Result<Option<String>> {
        let keys: Vec<&String> = projects.keys().collect();

        writeln!(self.output, "\nSelect project focus\n")?;
        writeln!(self.output, "Available projects:")?;
        for (i, key) in keys.iter().enumerate() {
            writeln!(self.output, "  {}. {}", i + 1, projects[*key].name)?;
        }
        writeln!(self.output, "  {}. Exit", keys.len() + 1)?;

        loop {
            write!(self.output, "\nSelect project (number): ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let Ok(choice) = line.trim().parse::<usize>() else {
                return Ok(None);
            };

            if choice == keys.len() + 1 {
                return Ok(None);
            }
            if (1..=keys.len()).contains(&choice) {
                return Ok(Some(keys[choice - 1].clone()));
            }
            writeln!(self.output, "Invalid choice. Please try again.")?;
        }
    }
}

pub fn list_projects(projects: &Projects) -> String {
    let mut lines = vec!["Available projects:".to_string()];
    for (key, project) in projects {
        let status = if validate_project(projects, key).is_ok() {
            "✓".green()
        } else {
            "✗".red()
        };
        lines.push(format!("  {} {}: {}", status, key, project.name));
    }
    lines.join("\n")
}

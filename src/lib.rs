//! tmux-mngr - scenario-aware tmux workspace orchestrator
//!
//! This library provides:
//! - A logged gateway for every tmux command, with typed failure categories
//! - Verified window creation, placement and relocation
//! - Fixed pane layouts for project windows
//! - Detection of the caller's tmux context and the three setup procedures

pub mod allocator;
pub mod config;
pub mod debug_log;
pub mod launch;
pub mod layout;
pub mod orchestrator;
pub mod project;
pub mod scenario;
pub mod tmux;
pub mod types;

#[cfg(test)]
mod fake_tmux;

//! tmux collaborator: session/window/pane enumeration and keystroke
//! delivery, invoked as external processes.

pub mod resolver;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::TmuxError;

pub use resolver::{ResolvedTarget, TargetResolver};

/// Seam to the terminal multiplexer. Implemented by [`ProcessTmux`] in
/// production and by stubs in tests.
#[async_trait]
pub trait TmuxClient: Send + Sync {
    /// Whether a session with this exact name exists.
    async fn has_session(&self, session: &str) -> bool;

    /// Session attached to the invoking terminal, if any.
    async fn current_session(&self) -> Option<String>;

    /// Window indexes of a session, in tmux order.
    async fn list_windows(&self, session: &str) -> Result<Vec<String>, TmuxError>;

    /// Pane indexes of a window, in tmux order.
    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<String>, TmuxError>;

    /// Send keystrokes to a pane address (`session:window.pane`). `keys`
    /// may be literal text or a key name like `Enter`.
    async fn send_keys(&self, target: &str, keys: &str) -> Result<(), TmuxError>;

    /// Capture the visible content of a pane (current pane when `None`).
    async fn capture_pane(&self, pane: Option<&str>) -> Result<String, TmuxError>;
}

/// `TmuxClient` backed by the `tmux` binary.
///
/// Subprocess calls carry no timeout; a hung tmux stalls only the delivery
/// task that issued it.
#[derive(Debug, Default, Clone)]
pub struct ProcessTmux;

impl ProcessTmux {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let output = Command::new("tmux").args(args).output().await?;
        if !output.status.success() {
            return Err(TmuxError::CommandFailed {
                command: args.first().unwrap_or(&"tmux").to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TmuxClient for ProcessTmux {
    async fn has_session(&self, session: &str) -> bool {
        self.run(&["has-session", "-t", session]).await.is_ok()
    }

    async fn current_session(&self) -> Option<String> {
        // Only meaningful when we are ourselves inside tmux.
        std::env::var("TMUX").ok()?;
        let out = self
            .run(&["display-message", "-p", "#{session_name}"])
            .await
            .ok()?;
        let name = out.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<String>, TmuxError> {
        let out = self
            .run(&["list-windows", "-t", session, "-F", "#{window_index}"])
            .await?;
        Ok(non_empty_lines(&out))
    }

    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<String>, TmuxError> {
        let target = format!("{session}:{window}");
        let out = self
            .run(&["list-panes", "-t", &target, "-F", "#{pane_index}"])
            .await?;
        Ok(non_empty_lines(&out))
    }

    async fn send_keys(&self, target: &str, keys: &str) -> Result<(), TmuxError> {
        self.run(&["send-keys", "-t", target, keys]).await?;
        Ok(())
    }

    async fn capture_pane(&self, pane: Option<&str>) -> Result<String, TmuxError> {
        match pane {
            Some(p) => self.run(&["capture-pane", "-p", "-t", p]).await,
            None => self.run(&["capture-pane", "-p"]).await,
        }
    }
}

fn non_empty_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_parsing_drops_blanks() {
        assert_eq!(non_empty_lines("0\n1\n\n2\n"), vec!["0", "1", "2"]);
        assert!(non_empty_lines("\n\n").is_empty());
        assert!(non_empty_lines("").is_empty());
    }
}

//! Target resolution: logical device/session name → concrete pane address.
//!
//! Session precedence, first success wins:
//! 1. explicit `[tmux].target_session` other than `"current"`
//! 2. `[device_mapping]` entry (skipped with a warning when the mapped
//!    session does not exist)
//! 3. a session literally named after the device
//! 4. `[tmux].default_target_session`, if set and existing
//! 5. the session attached to the invoking terminal
//!
//! Window/pane: a mapping-supplied value overrides the configured default;
//! unset or `"first"` resolves by live query to the first index.

use std::collections::BTreeMap;

use crate::config::{DeviceMapping, TmuxConfig};
use crate::error::ResolveError;
use crate::tmux::TmuxClient;

/// Concrete pane address, computed per delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub session: String,
    pub window: String,
    pub pane: String,
}

impl ResolvedTarget {
    /// tmux target spec, `session:window.pane`.
    pub fn spec(&self) -> String {
        format!("{}:{}.{}", self.session, self.window, self.pane)
    }
}

/// Resolves logical names against live tmux state and the configuration.
pub struct TargetResolver<'a> {
    tmux: &'a dyn TmuxClient,
    config: &'a TmuxConfig,
    mapping: &'a BTreeMap<String, DeviceMapping>,
}

struct SessionChoice {
    session: String,
    mapped_window: Option<String>,
    mapped_pane: Option<String>,
}

impl<'a> TargetResolver<'a> {
    pub fn new(
        tmux: &'a dyn TmuxClient,
        config: &'a TmuxConfig,
        mapping: &'a BTreeMap<String, DeviceMapping>,
    ) -> Self {
        Self {
            tmux,
            config,
            mapping,
        }
    }

    /// Resolve a full pane address for an optional device/session name.
    pub async fn resolve(&self, device: Option<&str>) -> Result<ResolvedTarget, ResolveError> {
        let choice = self.resolve_session(device).await?;

        let window_setting = choice
            .mapped_window
            .or_else(|| self.config.target_window.clone());
        let pane_setting = choice
            .mapped_pane
            .or_else(|| self.config.target_pane.clone());

        let window = match window_setting.as_deref() {
            None | Some("first") => self.first_window(&choice.session).await,
            Some(w) => w.to_string(),
        };
        let pane = match pane_setting.as_deref() {
            None | Some("first") => self.first_pane(&choice.session, &window).await,
            Some(p) => p.to_string(),
        };

        Ok(ResolvedTarget {
            session: choice.session,
            window,
            pane,
        })
    }

    async fn resolve_session(&self, device: Option<&str>) -> Result<SessionChoice, ResolveError> {
        // 1. Explicit global session overrides everything.
        if self.config.target_session != "current" && !self.config.target_session.is_empty() {
            return Ok(SessionChoice {
                session: self.config.target_session.clone(),
                mapped_window: None,
                mapped_pane: None,
            });
        }

        // 2. Device mapping, when the mapped session actually exists.
        if let Some(device) = device {
            if let Some(mapping) = self.mapping.get(device) {
                let session = mapping.session();
                if self.tmux.has_session(session).await {
                    tracing::debug!(device, session, "Using mapped tmux session");
                    return Ok(SessionChoice {
                        session: session.to_string(),
                        mapped_window: mapping.window().map(str::to_string),
                        mapped_pane: mapping.pane().map(str::to_string),
                    });
                }
                tracing::warn!(
                    device,
                    session,
                    "Mapped tmux session does not exist; trying fallbacks"
                );
            }

            // 3. Session named after the device.
            if self.config.use_device_name_as_session && self.tmux.has_session(device).await {
                tracing::debug!(device, "Using tmux session named after device");
                return Ok(SessionChoice {
                    session: device.to_string(),
                    mapped_window: None,
                    mapped_pane: None,
                });
            }
        }

        // 4. Configured default session.
        if let Some(default) = self.config.default_target_session.as_deref() {
            if default != "current" {
                if self.tmux.has_session(default).await {
                    tracing::debug!(session = default, "Using default tmux session");
                    return Ok(SessionChoice {
                        session: default.to_string(),
                        mapped_window: None,
                        mapped_pane: None,
                    });
                }
                tracing::warn!(session = default, "Default tmux session does not exist");
            }
        }

        // 5. The session this process is attached to.
        if let Some(current) = self.tmux.current_session().await {
            tracing::debug!(session = %current, "Using current tmux session");
            return Ok(SessionChoice {
                session: current,
                mapped_window: None,
                mapped_pane: None,
            });
        }

        Err(match device {
            Some(d) => ResolveError::NoSessionForDevice {
                device: d.to_string(),
            },
            None => ResolveError::NoSession,
        })
    }

    async fn first_window(&self, session: &str) -> String {
        match self.tmux.list_windows(session).await {
            Ok(windows) if !windows.is_empty() => windows[0].clone(),
            _ => "0".to_string(),
        }
    }

    async fn first_pane(&self, session: &str, window: &str) -> String {
        match self.tmux.list_panes(session, window).await {
            Ok(panes) if !panes.is_empty() => panes[0].clone(),
            _ => "0".to_string(),
        }
    }
}

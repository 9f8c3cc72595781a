//! Configuration types for the push-tmux document.
//!
//! These mirror the on-disk TOML surface (`[tmux]`, `[device_mapping]`,
//! `[slash_commands.*]`, `[triggers.*]`). Loading is a thin
//! read-and-deserialize; layering/merging of multiple documents is out of
//! scope for the core.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Full configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tmux: TmuxConfig,
    pub device_mapping: BTreeMap<String, DeviceMapping>,
    pub slash_commands: BTreeMap<String, SlashCommandConfig>,
    pub slash_commands_settings: SlashSettings,
    pub triggers: BTreeMap<String, TriggerConfig>,
}

impl Config {
    /// Read and deserialize a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load `config.toml` from the working directory, falling back to
    /// defaults when the file does not exist.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = Path::new("config.toml");
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// `[tmux]` section: delivery target defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TmuxConfig {
    /// Explicit global session. The sentinel `"current"` means "not set";
    /// any other value short-circuits the resolution chain.
    pub target_session: String,
    /// Fallback session tried after mapping and same-named-session steps.
    pub default_target_session: Option<String>,
    /// Whether a session named after the device may be used.
    pub use_device_name_as_session: bool,
    /// Window within the session; `"first"` resolves by live query.
    pub target_window: Option<String>,
    /// Pane within the window; `"first"` resolves by live query.
    pub target_pane: Option<String>,
    /// Pause between sending the text and the Enter key, in seconds.
    pub enter_delay: f64,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            target_session: "current".to_string(),
            default_target_session: None,
            use_device_name_as_session: true,
            target_window: None,
            target_pane: None,
            enter_delay: 0.5,
        }
    }
}

/// `[device_mapping]` entry: either a bare session name or a full address.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DeviceMapping {
    Session(String),
    Address {
        session: String,
        window: Option<String>,
        pane: Option<String>,
    },
}

impl DeviceMapping {
    pub fn session(&self) -> &str {
        match self {
            DeviceMapping::Session(s) => s,
            DeviceMapping::Address { session, .. } => session,
        }
    }

    pub fn window(&self) -> Option<&str> {
        match self {
            DeviceMapping::Session(_) => None,
            DeviceMapping::Address { window, .. } => window.as_deref(),
        }
    }

    pub fn pane(&self) -> Option<&str> {
        match self {
            DeviceMapping::Session(_) => None,
            DeviceMapping::Address { pane, .. } => pane.as_deref(),
        }
    }
}

/// `[slash_commands.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlashCommandConfig {
    pub template: String,
    pub defaults: BTreeMap<String, String>,
    pub allowed_devices: Vec<String>,
    pub disabled: bool,
    pub target_session: Option<String>,
    pub delay_seconds: Option<u64>,
}

/// `[slash_commands_settings]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlashSettings {
    /// When a message names an unregistered command, fall through and treat
    /// it as ordinary text instead of dropping it.
    pub fallback_undefined: bool,
}

impl Default for SlashSettings {
    fn default() -> Self {
        Self {
            fallback_undefined: true,
        }
    }
}

/// `[triggers.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    #[serde(rename = "match")]
    pub matcher: MatchConfig,
    pub conditions: ConditionsConfig,
    pub action: ActionConfig,
}

/// `[triggers.<name>.match]` sub-table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub pattern: String,
    /// Treat `pattern` as a regex (default) or a literal substring.
    pub regex: bool,
    pub case_sensitive: bool,
    /// Source-device allow-list; empty means any device.
    pub from_devices: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            regex: true,
            case_sensitive: false,
            from_devices: Vec::new(),
        }
    }
}

/// `[triggers.<name>.conditions]` sub-table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConditionsConfig {
    /// Minimum seconds between firings; 0 disables.
    pub cooldown: u64,
    /// Firings allowed per hour bucket; 0 disables.
    pub max_per_hour: u32,
    /// Fire at most once per process lifetime.
    pub execute_once: bool,
}

/// `[triggers.<name>.action]` sub-table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub template: String,
    pub target_device: Option<String>,
    pub target_session: Option<String>,
    /// Exact-match rename table applied to target values before transforms.
    pub mapping: BTreeMap<String, String>,
    /// Transform chain specs, applied left-to-right.
    pub transforms: Vec<String>,
    pub delay_seconds: Option<u64>,
}

/// Device name for this host: `$DEVICE_NAME` or the working directory name.
pub fn local_device_name() -> String {
    if let Ok(name) = std::env::var("DEVICE_NAME") {
        if !name.is_empty() {
            return name;
        }
    }
    std::env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "push-tmux".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.tmux.target_session, "current");
        assert!(cfg.tmux.use_device_name_as_session);
        assert_eq!(cfg.tmux.enter_delay, 0.5);
        assert!(cfg.slash_commands_settings.fallback_undefined);
        assert!(cfg.triggers.is_empty());
    }

    #[test]
    fn parses_full_document() {
        let cfg: Config = toml::from_str(
            r#"
            [tmux]
            target_session = "work"
            default_target_session = "main"
            enter_delay = 0.1

            [device_mapping]
            phone = "mobile"
            tablet = { session = "dev", window = "2", pane = "1" }

            [slash_commands.timer]
            template = "echo \"{message}\""
            delay_seconds = 10
            [slash_commands.timer.defaults]
            message = "Time!"

            [slash_commands_settings]
            fallback_undefined = false

            [triggers.deploy]
            [triggers.deploy.match]
            pattern = 'deploy (\w+) to (\w+)'
            [triggers.deploy.conditions]
            cooldown = 60
            max_per_hour = 10
            [triggers.deploy.action]
            template = "deploy.sh {group1} {group2}"
            transforms = ["lower"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.tmux.target_session, "work");
        assert_eq!(cfg.tmux.default_target_session.as_deref(), Some("main"));
        assert_eq!(cfg.device_mapping["phone"].session(), "mobile");
        assert_eq!(cfg.device_mapping["tablet"].session(), "dev");
        assert_eq!(cfg.device_mapping["tablet"].window(), Some("2"));
        assert_eq!(cfg.device_mapping["tablet"].pane(), Some("1"));
        assert_eq!(cfg.slash_commands["timer"].delay_seconds, Some(10));
        assert_eq!(cfg.slash_commands["timer"].defaults["message"], "Time!");
        assert!(!cfg.slash_commands_settings.fallback_undefined);

        let deploy = &cfg.triggers["deploy"];
        assert!(deploy.matcher.regex);
        assert!(!deploy.matcher.case_sensitive);
        assert_eq!(deploy.conditions.cooldown, 60);
        assert_eq!(deploy.conditions.max_per_hour, 10);
        assert_eq!(deploy.action.transforms, vec!["lower"]);
    }

    #[test]
    fn mapping_entry_accepts_bare_string() {
        let cfg: Config = toml::from_str(
            r#"
            [device_mapping]
            laptop = "desk"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device_mapping["laptop"].session(), "desk");
        assert_eq!(cfg.device_mapping["laptop"].window(), None);
    }
}

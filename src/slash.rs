//! Slash-command parsing and template expansion.
//!
//! `/name key:value key=value positional…` tokenizes into a command name and
//! a flat argument map; leftover whitespace tokens become `arg0`, `arg1`, ….
//! Built-ins are recognized before registered commands. Every branch yields
//! an explicit [`SlashOutcome`] so routing decisions are observable.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{Config, SlashCommandConfig};
use crate::template;

/// Cap on user-supplied delays: 24 hours.
pub const MAX_DELAY_SECONDS: u64 = 86_400;

static ARG_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)[:=](\S+)").expect("static regex"));

/// Commands handled directly by the router instead of template expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinCommand {
    /// `/capture [pane]` — capture pane content and reply to the sender.
    Capture { pane: Option<String> },
}

/// A registered command ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashInvocation {
    pub name: String,
    pub command: String,
    pub target_session: Option<String>,
    pub delay_seconds: Option<u64>,
}

/// Why a slash command was dropped (skips, not errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Unknown,
    DeviceNotAllowed,
    Disabled,
    MissingArgument(String),
}

/// Result of offering a message to the slash engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashOutcome {
    /// Not slash syntax at all.
    NotSlash,
    /// Unregistered command with fallback enabled: treat as plain text.
    Fallthrough,
    /// Slash command that will not run; dropped with a diagnostic.
    Rejected { command: String, reason: RejectReason },
    Builtin(BuiltinCommand),
    Expanded(SlashInvocation),
}

/// Parse slash syntax into (name, argument map), or `None` for plain text.
pub fn parse_message(message: &str) -> Option<(String, BTreeMap<String, String>)> {
    let rest = message.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    let args_str = parts.next().unwrap_or_default();

    let mut args = BTreeMap::new();
    for caps in ARG_PAIR.captures_iter(args_str) {
        args.insert(caps[1].to_string(), caps[2].to_string());
    }

    // Whatever is left after removing key:value pairs becomes positionals.
    let remaining = ARG_PAIR.replace_all(args_str, "");
    for (i, token) in remaining.split_whitespace().enumerate() {
        args.insert(format!("arg{i}"), token.to_string());
    }

    Some((name.to_string(), args))
}

/// Expands registered slash commands against a configuration snapshot.
pub struct SlashEngine {
    commands: BTreeMap<String, SlashCommandConfig>,
    fallback_undefined: bool,
}

impl SlashEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            commands: config.slash_commands.clone(),
            fallback_undefined: config.slash_commands_settings.fallback_undefined,
        }
    }

    /// Offer a message; `device_name` is the routing target checked against
    /// per-command allow-lists.
    pub fn evaluate(&self, message: &str, device_name: &str) -> SlashOutcome {
        let Some((name, args)) = parse_message(message) else {
            return SlashOutcome::NotSlash;
        };

        if name == "capture" {
            return SlashOutcome::Builtin(BuiltinCommand::Capture {
                pane: args.get("arg0").cloned(),
            });
        }

        let Some(cfg) = self.commands.get(&name) else {
            if self.fallback_undefined {
                return SlashOutcome::Fallthrough;
            }
            return SlashOutcome::Rejected {
                command: name,
                reason: RejectReason::Unknown,
            };
        };

        if !cfg.allowed_devices.is_empty() && !cfg.allowed_devices.iter().any(|d| d == device_name)
        {
            return SlashOutcome::Rejected {
                command: name,
                reason: RejectReason::DeviceNotAllowed,
            };
        }
        if cfg.disabled {
            return SlashOutcome::Rejected {
                command: name,
                reason: RejectReason::Disabled,
            };
        }

        // Parsed arguments override defaults.
        let mut merged = cfg.defaults.clone();
        merged.extend(args.clone());

        let command = match template::expand(&cfg.template, &merged) {
            Ok(cmd) => cmd,
            Err(e) => {
                return SlashOutcome::Rejected {
                    command: name,
                    reason: RejectReason::MissingArgument(e.0),
                };
            }
        };

        let target_session = args
            .get("session")
            .cloned()
            .or_else(|| cfg.target_session.clone());
        let delay_seconds = parse_delay(args.get("delay").map(String::as_str), cfg.delay_seconds);

        SlashOutcome::Expanded(SlashInvocation {
            name,
            command,
            target_session,
            delay_seconds,
        })
    }
}

/// Resolve the effective delay from a `delay` argument and the command's
/// configured default. Non-numeric → default, negative → 0, above the 24 h
/// cap → capped, fractional → truncated.
pub fn parse_delay(arg: Option<&str>, default: Option<u64>) -> Option<u64> {
    let Some(arg) = arg else {
        return default;
    };
    if arg.is_empty() {
        return default;
    }
    let Ok(value) = arg.parse::<f64>() else {
        return default;
    };
    // "nan"/"inf" parse as floats but are not usable delays.
    if !value.is_finite() {
        return default;
    }
    if value < 0.0 {
        return Some(0);
    }
    if value > MAX_DELAY_SECONDS as f64 {
        return Some(MAX_DELAY_SECONDS);
    }
    Some(value as u64)
}

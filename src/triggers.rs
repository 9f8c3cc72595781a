//! Pattern-triggered actions with cooldown and rate limiting.
//!
//! Every trigger is evaluated against every message (no short-circuit
//! between triggers) and each evaluation yields an explicit outcome, so skip
//! reasons are observable in logs and tests. Runtime state (cooldowns, hour
//! buckets, once-markers) is owned by the engine instance, never global.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::{Config, TriggerConfig};
use crate::template;
use crate::transform::{self, Transform};

/// One trigger, compiled from configuration.
#[derive(Debug)]
pub struct TriggerDefinition {
    pub name: String,
    matcher: PatternMatcher,
    from_devices: Vec<String>,
    template: String,
    target_device: Option<String>,
    target_session: Option<String>,
    mapping: BTreeMap<String, String>,
    transforms: Vec<Transform>,
    cooldown_seconds: u64,
    max_per_hour: u32,
    execute_once: bool,
    delay_seconds: Option<u64>,
}

#[derive(Debug)]
enum PatternMatcher {
    /// `None` means the pattern was empty or failed to compile; such a
    /// trigger never matches.
    Regex(Option<Regex>),
    Literal {
        pattern: String,
        case_sensitive: bool,
    },
}

/// Captures from a successful match.
struct MatchData {
    full: String,
    groups: Vec<Option<String>>,
    named: Vec<(String, Option<String>)>,
}

impl TriggerDefinition {
    fn compile(name: &str, cfg: &TriggerConfig) -> Self {
        let matcher = if cfg.matcher.regex {
            let compiled = if cfg.matcher.pattern.is_empty() {
                None
            } else {
                let pattern = if cfg.matcher.case_sensitive {
                    cfg.matcher.pattern.clone()
                } else {
                    format!("(?i){}", cfg.matcher.pattern)
                };
                match Regex::new(&pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(trigger = name, %e, "Invalid trigger pattern; trigger will never match");
                        None
                    }
                }
            };
            PatternMatcher::Regex(compiled)
        } else {
            PatternMatcher::Literal {
                pattern: cfg.matcher.pattern.clone(),
                case_sensitive: cfg.matcher.case_sensitive,
            }
        };

        Self {
            name: name.to_string(),
            matcher,
            from_devices: cfg.matcher.from_devices.clone(),
            template: cfg.action.template.clone(),
            target_device: cfg.action.target_device.clone(),
            target_session: cfg.action.target_session.clone(),
            mapping: cfg.action.mapping.clone(),
            transforms: transform::parse_chain(&cfg.action.transforms),
            cooldown_seconds: cfg.conditions.cooldown,
            max_per_hour: cfg.conditions.max_per_hour,
            execute_once: cfg.conditions.execute_once,
            delay_seconds: cfg.action.delay_seconds,
        }
    }

    fn try_match(&self, message: &str) -> Option<MatchData> {
        match &self.matcher {
            PatternMatcher::Regex(Some(re)) => re.captures(message).map(|caps| {
                let full = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
                let groups = (1..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                    .collect();
                let named = re
                    .capture_names()
                    .flatten()
                    .map(|n| (n.to_string(), caps.name(n).map(|m| m.as_str().to_string())))
                    .collect();
                MatchData { full, groups, named }
            }),
            PatternMatcher::Regex(None) => None,
            PatternMatcher::Literal {
                pattern,
                case_sensitive,
            } => {
                if pattern.is_empty() {
                    return None;
                }
                let hit = if *case_sensitive {
                    message.contains(pattern.as_str())
                } else {
                    message.to_lowercase().contains(&pattern.to_lowercase())
                };
                hit.then(|| MatchData {
                    full: pattern.clone(),
                    groups: Vec::new(),
                    named: Vec::new(),
                })
            }
        }
    }

    /// Mapping lookup (pass-through when unmapped), then the transform
    /// chain with the trigger variables in scope.
    fn rewrite_target(&self, value: String, vars: &BTreeMap<String, String>) -> String {
        let mapped = self.mapping.get(&value).cloned().unwrap_or(value);
        transform::apply_chain_with(&mapped, &self.transforms, vars)
    }
}

/// Action descriptor emitted by a fired trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerAction {
    pub command: String,
    pub target_device: Option<String>,
    pub target_session: Option<String>,
    pub delay_seconds: Option<u64>,
}

impl TriggerAction {
    /// Logical target name for resolution: session wins over device.
    pub fn target(&self) -> Option<&str> {
        self.target_session
            .as_deref()
            .or(self.target_device.as_deref())
    }
}

/// Why a trigger did not fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SourceNotAllowed,
    NoMatch,
    Cooldown,
    HourlyLimit,
    AlreadyFired,
    /// Matched and counted, but the action template failed to expand.
    ExpansionFailed(String),
}

/// Result of evaluating one trigger against one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Fired(TriggerAction),
    Skipped(SkipReason),
}

/// Named evaluation, one per configured trigger per message.
#[derive(Debug, Clone)]
pub struct TriggerEvaluation {
    pub name: String,
    pub outcome: TriggerOutcome,
}

/// Per-trigger execution bookkeeping, process-lifetime only.
#[derive(Debug, Default)]
struct TriggerRuntimeState {
    last_fired: Option<DateTime<Utc>>,
    hour_counts: HashMap<i64, u32>,
    fired_once: bool,
}

/// Evaluates the trigger set and owns the rate/cooldown tracker.
pub struct TriggerEngine {
    triggers: Vec<TriggerDefinition>,
    state: HashMap<String, TriggerRuntimeState>,
}

impl TriggerEngine {
    /// Compile triggers from a configuration snapshot, in name order.
    pub fn new(config: &Config) -> Self {
        let triggers = config
            .triggers
            .iter()
            .map(|(name, cfg)| TriggerDefinition::compile(name, cfg))
            .collect();
        Self {
            triggers,
            state: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Evaluate every trigger against a message at the current wall clock.
    pub fn evaluate(&mut self, message: &str, source_device: &str) -> Vec<TriggerEvaluation> {
        self.evaluate_at(message, source_device, Utc::now())
    }

    /// Evaluate with an explicit clock (tests drive this directly).
    pub fn evaluate_at(
        &mut self,
        message: &str,
        source_device: &str,
        now: DateTime<Utc>,
    ) -> Vec<TriggerEvaluation> {
        let mut results = Vec::with_capacity(self.triggers.len());

        for idx in 0..self.triggers.len() {
            let outcome = self.evaluate_one(idx, message, source_device, now);
            let name = self.triggers[idx].name.clone();
            if let TriggerOutcome::Skipped(reason) = &outcome {
                if *reason != SkipReason::NoMatch {
                    tracing::debug!(trigger = %name, ?reason, "Trigger skipped");
                }
            }
            results.push(TriggerEvaluation { name, outcome });
        }

        results
    }

    fn evaluate_one(
        &mut self,
        idx: usize,
        message: &str,
        source_device: &str,
        now: DateTime<Utc>,
    ) -> TriggerOutcome {
        let trigger = &self.triggers[idx];

        if !trigger.from_devices.is_empty()
            && !trigger.from_devices.iter().any(|d| d == source_device)
        {
            return TriggerOutcome::Skipped(SkipReason::SourceNotAllowed);
        }

        let Some(captures) = trigger.try_match(message) else {
            return TriggerOutcome::Skipped(SkipReason::NoMatch);
        };

        if let Some(reason) = self.check_conditions(idx, now) {
            return TriggerOutcome::Skipped(reason);
        }

        // Count the firing before expansion: a permanently-failing action
        // must still be rate-limited.
        self.record_firing(idx, now);

        let trigger = &self.triggers[idx];
        let vars = build_variables(message, source_device, &captures, now);

        let command = match template::expand(&trigger.template, &vars) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(trigger = %trigger.name, %e, "Action template expansion failed");
                return TriggerOutcome::Skipped(SkipReason::ExpansionFailed(e.0));
            }
        };

        let target_device = trigger
            .target_device
            .as_ref()
            .map(|t| trigger.rewrite_target(expand_or_raw(t, &vars), &vars));
        let target_session = trigger
            .target_session
            .as_ref()
            .map(|t| trigger.rewrite_target(expand_or_raw(t, &vars), &vars));

        TriggerOutcome::Fired(TriggerAction {
            command,
            target_device,
            target_session,
            delay_seconds: trigger.delay_seconds,
        })
    }

    fn check_conditions(&mut self, idx: usize, now: DateTime<Utc>) -> Option<SkipReason> {
        let trigger = &self.triggers[idx];
        let state = self.state.entry(trigger.name.clone()).or_default();

        if trigger.cooldown_seconds > 0 {
            if let Some(last) = state.last_fired {
                let elapsed = (now - last).num_seconds();
                if elapsed < trigger.cooldown_seconds as i64 {
                    return Some(SkipReason::Cooldown);
                }
            }
        }

        if trigger.max_per_hour > 0 {
            let bucket = hour_bucket(now);
            // Lazy prune: drop buckets older than the previous hour.
            state.hour_counts.retain(|b, _| *b + 1 >= bucket);
            if state.hour_counts.get(&bucket).copied().unwrap_or(0) >= trigger.max_per_hour {
                return Some(SkipReason::HourlyLimit);
            }
        }

        if trigger.execute_once && state.fired_once {
            return Some(SkipReason::AlreadyFired);
        }

        None
    }

    fn record_firing(&mut self, idx: usize, now: DateTime<Utc>) {
        let trigger = &self.triggers[idx];
        let state = self.state.entry(trigger.name.clone()).or_default();
        state.last_fired = Some(now);
        *state.hour_counts.entry(hour_bucket(now)).or_insert(0) += 1;
        state.fired_once = true;
    }
}

fn hour_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(3600)
}

/// Expand a target template, keeping the raw value when a variable is
/// missing (only the field being expanded is affected).
fn expand_or_raw(template: &str, vars: &BTreeMap<String, String>) -> String {
    template::expand(template, vars).unwrap_or_else(|_| template.to_string())
}

fn build_variables(
    message: &str,
    source_device: &str,
    captures: &MatchData,
    now: DateTime<Utc>,
) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("message".to_string(), message.to_string());
    vars.insert("source_device".to_string(), source_device.to_string());
    vars.insert("timestamp".to_string(), now.to_rfc3339());
    vars.insert("date".to_string(), now.format("%Y-%m-%d").to_string());
    vars.insert("time".to_string(), now.format("%H:%M:%S").to_string());
    vars.insert("match".to_string(), captures.full.clone());
    vars.insert("match_text".to_string(), captures.full.clone());

    for (i, group) in captures.groups.iter().enumerate() {
        vars.insert(
            format!("group{}", i + 1),
            group.clone().unwrap_or_default(),
        );
    }
    for (name, value) in &captures.named {
        vars.insert(name.clone(), value.clone().unwrap_or_default());
    }

    vars
}

//! Push routing: filter incoming pushes, run them through the slash and
//! trigger engines, and hand the surviving text to the delivery scheduler.
//!
//! Order per message: slash first (a `/command` is never also trigger
//! input), then triggers, then plain forwarding when nothing fired.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::builtin;
use crate::config::Config;
use crate::delivery::DeliveryScheduler;
use crate::pushbullet::{Push, PushApi, PushHandler};
use crate::slash::{BuiltinCommand, SlashEngine, SlashOutcome};
use crate::tmux::TmuxClient;
use crate::triggers::{TriggerEngine, TriggerOutcome};

pub struct Router {
    api: Arc<dyn PushApi>,
    tmux: Arc<dyn TmuxClient>,
    scheduler: DeliveryScheduler,
    slash: SlashEngine,
    triggers: Mutex<TriggerEngine>,
    /// iden → nickname, refreshed from the API on a miss.
    devices: Mutex<HashMap<String, String>>,
}

impl Router {
    pub fn new(config: Arc<Config>, api: Arc<dyn PushApi>, tmux: Arc<dyn TmuxClient>) -> Self {
        let scheduler = DeliveryScheduler::new(tmux.clone(), config.clone());
        let slash = SlashEngine::new(&config);
        let triggers = Mutex::new(TriggerEngine::new(&config));
        Self {
            api,
            tmux,
            scheduler,
            slash,
            triggers,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Nickname for a device iden, refreshing the cache once on a miss.
    async fn device_name(&self, iden: &str) -> Option<String> {
        {
            let cache = self.devices.lock().await;
            if let Some(name) = cache.get(iden) {
                return Some(name.clone());
            }
        }
        match self.api.list_devices().await {
            Ok(devices) => {
                let mut cache = self.devices.lock().await;
                for device in devices {
                    cache.insert(device.iden, device.nickname);
                }
                cache.get(iden).cloned()
            }
            Err(err) => {
                tracing::warn!(error = %err, "Device list refresh failed");
                None
            }
        }
    }

    /// Route one message addressed at `device_name`. `reply_to` is the
    /// sending device's iden, used by built-ins that answer back.
    pub async fn process_message(
        &self,
        message: &str,
        device_name: &str,
        source_name: &str,
        reply_to: Option<&str>,
    ) {
        match self.slash.evaluate(message, device_name) {
            SlashOutcome::Builtin(BuiltinCommand::Capture { pane }) => {
                if let Err(err) =
                    builtin::handle_capture(&*self.api, &*self.tmux, pane.as_deref(), reply_to)
                        .await
                {
                    tracing::error!(error = %err, "Pane capture failed");
                }
                return;
            }
            SlashOutcome::Expanded(inv) => {
                tracing::info!(command = %inv.name, "Running slash command");
                let target = inv
                    .target_session
                    .clone()
                    .unwrap_or_else(|| device_name.to_string());
                self.dispatch(inv.command, Some(target), inv.delay_seconds)
                    .await;
                return;
            }
            SlashOutcome::Rejected { command, reason } => {
                tracing::warn!(command = %command, ?reason, "Slash command dropped");
                return;
            }
            SlashOutcome::NotSlash | SlashOutcome::Fallthrough => {}
        }

        let evaluations = {
            let mut engine = self.triggers.lock().await;
            engine.evaluate(message, source_name)
        };
        let mut any_fired = false;
        for eval in evaluations {
            if let TriggerOutcome::Fired(action) = eval.outcome {
                any_fired = true;
                tracing::info!(trigger = %eval.name, "Trigger fired");
                let target = action
                    .target()
                    .map(str::to_string)
                    .unwrap_or_else(|| device_name.to_string());
                self.dispatch(action.command, Some(target), action.delay_seconds)
                    .await;
            }
        }
        if any_fired {
            return;
        }

        self.dispatch(message.to_string(), Some(device_name.to_string()), None)
            .await;
    }

    /// Deliver now, or schedule when a positive delay is set. Scheduled
    /// deliveries run detached.
    async fn dispatch(&self, command: String, device: Option<String>, delay: Option<u64>) {
        match delay {
            Some(d) if d > 0 => {
                let _ = self.scheduler.schedule(d, command, device);
            }
            _ => {
                if let Err(err) = self.scheduler.deliver(&command, device.as_deref()).await {
                    tracing::error!(error = %err, "Delivery failed");
                }
            }
        }
    }
}

#[async_trait]
impl PushHandler for Router {
    async fn on_push(&self, push: Push) {
        if push.kind != "note" {
            tracing::debug!(kind = %push.kind, "Ignoring non-note push");
            return;
        }
        let Some(target_iden) = push.target_device_iden.as_deref() else {
            tracing::debug!("Ignoring broadcast push without target device");
            return;
        };
        let Some(body) = push.body.as_deref().filter(|b| !b.trim().is_empty()) else {
            tracing::debug!("Ignoring push with empty body");
            return;
        };

        let Some(device_name) = self.device_name(target_iden).await else {
            tracing::warn!(iden = target_iden, "Unknown target device; push dropped");
            return;
        };
        let source_name = match push.source_device_iden.as_deref() {
            Some(iden) => self
                .device_name(iden)
                .await
                .unwrap_or_else(|| "unknown".to_string()),
            None => "unknown".to_string(),
        };

        tracing::info!(
            device = %device_name,
            source = %source_name,
            "Processing push"
        );
        self.process_message(body, &device_name, &source_name, push.source_device_iden.as_deref())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, TmuxError};
    use crate::pushbullet::Device;
    use std::sync::Mutex as StdMutex;

    struct StubApi {
        devices: Vec<Device>,
        notes: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PushApi for StubApi {
        async fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
            Ok(self.devices.clone())
        }
        async fn list_pushes_since(&self, _m: f64, _l: usize) -> Result<Vec<Push>, ApiError> {
            Ok(Vec::new())
        }
        async fn send_note(
            &self,
            title: &str,
            body: &str,
            _target: Option<&str>,
        ) -> Result<(), ApiError> {
            self.notes
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingTmux {
        sent: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TmuxClient for RecordingTmux {
        async fn has_session(&self, _s: &str) -> bool {
            true
        }
        async fn current_session(&self) -> Option<String> {
            None
        }
        async fn list_windows(&self, _s: &str) -> Result<Vec<String>, TmuxError> {
            Ok(vec!["0".to_string()])
        }
        async fn list_panes(&self, _s: &str, _w: &str) -> Result<Vec<String>, TmuxError> {
            Ok(vec!["0".to_string()])
        }
        async fn send_keys(&self, target: &str, keys: &str) -> Result<(), TmuxError> {
            self.sent
                .lock()
                .unwrap()
                .push((target.to_string(), keys.to_string()));
            Ok(())
        }
        async fn capture_pane(&self, _p: Option<&str>) -> Result<String, TmuxError> {
            Ok("pane text".to_string())
        }
    }

    fn router(config_toml: &str) -> (Arc<Router>, Arc<RecordingTmux>, Arc<StubApi>) {
        let config: Config = toml::from_str(config_toml).unwrap();
        let api = Arc::new(StubApi {
            devices: vec![
                Device {
                    iden: "d1".to_string(),
                    nickname: "laptop".to_string(),
                    active: true,
                },
                Device {
                    iden: "d2".to_string(),
                    nickname: "phone".to_string(),
                    active: true,
                },
            ],
            notes: StdMutex::new(Vec::new()),
        });
        let tmux = Arc::new(RecordingTmux::default());
        let router = Arc::new(Router::new(Arc::new(config), api.clone(), tmux.clone()));
        (router, tmux, api)
    }

    fn note(body: &str) -> Push {
        Push {
            iden: Some("p1".to_string()),
            kind: "note".to_string(),
            body: Some(body.to_string()),
            target_device_iden: Some("d1".to_string()),
            source_device_iden: Some("d2".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plain_note_is_typed_into_the_device_session() {
        let (router, tmux, _) = router("");
        router.on_push(note("ls -la")).await;

        let sent = tmux.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                ("laptop:0.0".to_string(), "ls -la".to_string()),
                ("laptop:0.0".to_string(), "Enter".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn non_note_and_bodyless_pushes_are_ignored() {
        let (router, tmux, _) = router("");

        let mut link = note("http://x");
        link.kind = "link".to_string();
        router.on_push(link).await;

        router.on_push(note("   ")).await;

        let mut broadcast = note("hi");
        broadcast.target_device_iden = None;
        router.on_push(broadcast).await;

        assert!(tmux.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slash_command_expands_instead_of_forwarding() {
        let (router, tmux, _) = router(
            r#"
            [slash_commands.build]
            template = "cargo build --release"
            "#,
        );
        router.on_push(note("/build")).await;

        let sent = tmux.sent.lock().unwrap();
        assert_eq!(sent[0].1, "cargo build --release");
    }

    #[tokio::test]
    async fn rejected_slash_command_is_dropped_silently() {
        let (router, tmux, _) = router(
            r#"
            [slash_commands.secret]
            template = "x"
            allowed_devices = ["phone"]
            "#,
        );
        // Push targets "laptop", which is not on the allow-list.
        router.on_push(note("/secret")).await;
        assert!(tmux.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fired_trigger_replaces_plain_forwarding() {
        let (router, tmux, _) = router(
            r#"
            [triggers.deploy.match]
            pattern = 'deploy (\w+)'
            [triggers.deploy.action]
            template = "deploy.sh {group1}"
            "#,
        );
        router.on_push(note("deploy staging")).await;

        let sent = tmux.sent.lock().unwrap();
        // Only the trigger action, not the raw message.
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "deploy.sh staging");
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_message_falls_back_to_forwarding() {
        let (router, tmux, _) = router(
            r#"
            [triggers.deploy.match]
            pattern = "deploy"
            [triggers.deploy.action]
            template = "deploy.sh"
            "#,
        );
        router.on_push(note("just a note")).await;
        assert_eq!(tmux.sent.lock().unwrap()[0].1, "just a note");
    }

    #[tokio::test]
    async fn capture_builtin_replies_to_source_device() {
        let (router, tmux, api) = router("");
        router.on_push(note("/capture")).await;

        // Nothing typed into tmux; a note went back instead.
        assert!(tmux.sent.lock().unwrap().is_empty());
        let notes = api.notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].1, "pane text");
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_target_session_overrides_device_session() {
        let (router, tmux, _) = router(
            r#"
            [triggers.t.match]
            pattern = "alert"
            [triggers.t.action]
            template = "handle-alert"
            target_session = "ops"
            "#,
        );
        router.on_push(note("alert: disk full")).await;
        assert_eq!(tmux.sent.lock().unwrap()[0].0, "ops:0.0");
    }
}

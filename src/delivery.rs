//! Keystroke delivery: resolve a target pane, type the text, press Enter.
//!
//! Delayed deliveries are independent spawned tasks; the target is resolved
//! when the timer fires, not when it is scheduled, so a session created in
//! the meantime is picked up.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::Config;
use crate::error::Error;
use crate::tmux::{TargetResolver, TmuxClient};

#[derive(Clone)]
pub struct DeliveryScheduler {
    tmux: Arc<dyn TmuxClient>,
    config: Arc<Config>,
}

impl DeliveryScheduler {
    pub fn new(tmux: Arc<dyn TmuxClient>, config: Arc<Config>) -> Self {
        Self { tmux, config }
    }

    /// Resolve the target for `device` and type `message` followed by Enter.
    pub async fn deliver(&self, message: &str, device: Option<&str>) -> Result<(), Error> {
        let resolver =
            TargetResolver::new(&*self.tmux, &self.config.tmux, &self.config.device_mapping);
        let target = resolver.resolve(device).await?;
        let spec = target.spec();
        tracing::info!(target = %spec, "Delivering message");

        self.tmux.send_keys(&spec, message).await?;
        // A negative or non-finite configured delay collapses to no pause.
        let pause = Duration::try_from_secs_f64(self.config.tmux.enter_delay)
            .unwrap_or(Duration::ZERO);
        sleep(pause).await;
        self.tmux.send_keys(&spec, "Enter").await?;
        Ok(())
    }

    /// Deliver after `delay_seconds`, without blocking the caller. Each
    /// scheduled delivery runs on its own task; failures are logged, never
    /// propagated.
    pub fn schedule(
        &self,
        delay_seconds: u64,
        message: String,
        device: Option<String>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tracing::info!(delay_seconds, "Delivery scheduled");
            sleep(Duration::from_secs(delay_seconds)).await;
            if let Err(err) = scheduler.deliver(&message, device.as_deref()).await {
                tracing::error!(error = %err, "Scheduled delivery failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TmuxError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records send-keys calls; every session name exists.
    #[derive(Default)]
    struct RecordingTmux {
        sent: Mutex<Vec<(String, String)>>,
        current: Mutex<Option<String>>,
    }

    #[async_trait]
    impl TmuxClient for RecordingTmux {
        async fn has_session(&self, _session: &str) -> bool {
            true
        }
        async fn current_session(&self) -> Option<String> {
            self.current.lock().unwrap().clone()
        }
        async fn list_windows(&self, _session: &str) -> Result<Vec<String>, TmuxError> {
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
        async fn capture_pane(&self, _pane: Option<&str>) -> Result<String, TmuxError> {
            Ok(String::new())
        }
    }

    fn scheduler(tmux: Arc<RecordingTmux>) -> DeliveryScheduler {
        DeliveryScheduler::new(tmux, Arc::new(Config::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_text_then_enter() {
        let tmux = Arc::new(RecordingTmux::default());
        scheduler(tmux.clone())
            .deliver("hello world", Some("dev"))
            .await
            .unwrap();

        let sent = tmux.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                ("dev:0.0".to_string(), "hello world".to_string()),
                ("dev:0.0".to_string(), "Enter".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn negative_enter_delay_collapses_to_zero() {
        let tmux = Arc::new(RecordingTmux::default());
        let mut config = Config::default();
        config.tmux.enter_delay = -1.0;
        let sched = DeliveryScheduler::new(tmux.clone(), Arc::new(config));

        sched.deliver("hi", Some("dev")).await.unwrap();
        let sent = tmux.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1, "Enter");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_delivery_waits_the_full_delay() {
        let tmux = Arc::new(RecordingTmux::default());
        let handle = scheduler(tmux.clone()).schedule(30, "later".to_string(), Some("dev".into()));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(tmux.sent.lock().unwrap().is_empty());

        handle.await.unwrap();
        assert_eq!(tmux.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_deliveries_run_independently() {
        let tmux = Arc::new(RecordingTmux::default());
        let sched = scheduler(tmux.clone());
        let slow = sched.schedule(60, "slow".to_string(), Some("dev".into()));
        let fast = sched.schedule(10, "fast".to_string(), Some("dev".into()));

        fast.await.unwrap();
        {
            let sent = tmux.sent.lock().unwrap();
            assert_eq!(sent[0].1, "fast");
            assert_eq!(sent.len(), 2);
        }
        slow.await.unwrap();
        assert_eq!(tmux.sent.lock().unwrap()[2].1, "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn target_resolved_when_the_timer_fires() {
        // No session exists at scheduling time; the current session appears
        // while the timer runs.
        #[derive(Default)]
        struct LateTmux {
            inner: RecordingTmux,
            exists: Mutex<bool>,
        }

        #[async_trait]
        impl TmuxClient for LateTmux {
            async fn has_session(&self, _session: &str) -> bool {
                *self.exists.lock().unwrap()
            }
            async fn current_session(&self) -> Option<String> {
                None
            }
            async fn list_windows(&self, s: &str) -> Result<Vec<String>, TmuxError> {
                self.inner.list_windows(s).await
            }
            async fn list_panes(&self, s: &str, w: &str) -> Result<Vec<String>, TmuxError> {
                self.inner.list_panes(s, w).await
            }
            async fn send_keys(&self, t: &str, k: &str) -> Result<(), TmuxError> {
                self.inner.send_keys(t, k).await
            }
            async fn capture_pane(&self, p: Option<&str>) -> Result<String, TmuxError> {
                self.inner.capture_pane(p).await
            }
        }

        let tmux = Arc::new(LateTmux::default());
        let sched = DeliveryScheduler::new(tmux.clone(), Arc::new(Config::default()));
        let handle = sched.schedule(20, "hi".to_string(), Some("dev".into()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        *tmux.exists.lock().unwrap() = true;

        handle.await.unwrap();
        assert_eq!(tmux.inner.sent.lock().unwrap()[0].0, "dev:0.0");
    }
}

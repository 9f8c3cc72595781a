//! Normalized Pushbullet records and the REST seam consumed by the core.
//!
//! The wire shapes are loose (optional fields, extra keys); they are pinned
//! down into fixed structs here so nothing downstream branches on
//! representation.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ApiError;

/// A registered device.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub iden: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub active: bool,
}

/// One push payload. Identity is `iden` when present; pushes without an
/// iden are never deduplicated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Push {
    #[serde(default)]
    pub iden: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub source_device_iden: Option<String>,
    #[serde(default)]
    pub target_device_iden: Option<String>,
    /// Server-side modification timestamp (epoch seconds).
    #[serde(default)]
    pub modified: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub dismissed: bool,
}

fn default_true() -> bool {
    true
}

impl Push {
    /// Whether this push should still be acted on.
    pub fn is_actionable(&self) -> bool {
        self.active && !self.dismissed
    }
}

/// The three REST operations the core consumes.
#[async_trait]
pub trait PushApi: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, ApiError>;

    /// Pushes modified strictly after `modified_after`, newest last.
    async fn list_pushes_since(
        &self,
        modified_after: f64,
        limit: usize,
    ) -> Result<Vec<Push>, ApiError>;

    /// Send a note push, optionally targeted at one device.
    async fn send_note(
        &self,
        title: &str,
        body: &str,
        target_device_iden: Option<&str>,
    ) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_deserializes_from_sparse_json() {
        let push: Push = serde_json::from_str(r#"{"type":"note","body":"hi"}"#).unwrap();
        assert_eq!(push.kind, "note");
        assert_eq!(push.body.as_deref(), Some("hi"));
        assert_eq!(push.iden, None);
        assert!(push.active);
        assert!(!push.dismissed);
        assert!(push.is_actionable());
    }

    #[test]
    fn dismissed_push_is_not_actionable() {
        let push: Push =
            serde_json::from_str(r#"{"type":"note","dismissed":true}"#).unwrap();
        assert!(!push.is_actionable());
    }

    #[test]
    fn device_defaults_fill_missing_fields() {
        let device: Device = serde_json::from_str(r#"{"iden":"d1"}"#).unwrap();
        assert_eq!(device.iden, "d1");
        assert_eq!(device.nickname, "");
        assert!(!device.active);
    }
}

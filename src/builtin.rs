//! Built-in slash commands handled by the daemon itself.

use crate::error::Error;
use crate::pushbullet::PushApi;
use crate::tmux::TmuxClient;

/// Replies above this length are cut so the note stays readable on a phone.
const CAPTURE_LIMIT_CHARS: usize = 4096;

/// `/capture [pane]`: capture pane content and send it back to the device
/// that asked for it.
pub async fn handle_capture(
    api: &dyn PushApi,
    tmux: &dyn TmuxClient,
    pane: Option<&str>,
    reply_to: Option<&str>,
) -> Result<(), Error> {
    let content = tmux.capture_pane(pane).await?;
    let body = truncate_chars(&content, CAPTURE_LIMIT_CHARS);
    let title = match pane {
        Some(p) => format!("Captured from {p}"),
        None => "Captured from current pane".to_string(),
    };
    tracing::info!(pane = pane.unwrap_or("current"), "Sending pane capture");
    api.send_note(&title, &body, reply_to).await?;
    Ok(())
}

/// Char-boundary-safe truncation with a trailing marker.
fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}\n...(truncated)")
}

//! Error types for push-tmux.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pushbullet API error: {0}")]
    Api(#[from] ApiError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("tmux error: {0}")]
    Tmux(#[from] TmuxError),

    #[error("{0}")]
    Resolve(#[from] ResolveError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// REST collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Websocket listener errors.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectsExhausted { attempts: u32 },
}

/// tmux subprocess errors.
#[derive(Debug, thiserror::Error)]
pub enum TmuxError {
    #[error("Failed to run tmux: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("tmux {command} exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// Target-resolution failure, reported per delivery.
///
/// The message names the three remediation options so the diagnostic is
/// actionable from the listener log alone.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(
        "No tmux session found for device '{device}'. Either: \
         1) create a tmux session named '{device}', \
         2) add a [device_mapping] entry for it, or \
         3) set [tmux].default_target_session"
    )]
    NoSessionForDevice { device: String },

    #[error(
        "No tmux session found. Either: \
         1) create a tmux session, \
         2) add a [device_mapping] entry, or \
         3) set [tmux].default_target_session"
    )]
    NoSession,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

//! Pushbullet collaborators: REST client and websocket listener.

pub mod api;
pub mod client;
pub mod listener;

pub use api::{Device, Push, PushApi};
pub use client::PushbulletClient;
pub use listener::{ConnectionState, ListenerHandle, PushHandler, PushListener};

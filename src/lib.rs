//! push-tmux: routes Pushbullet pushes into tmux panes.
//!
//! A websocket listener receives push events, a router runs each note
//! through the slash-command and trigger engines, and the delivery
//! scheduler types the surviving text into a resolved tmux pane.

pub mod builtin;
pub mod config;
pub mod delivery;
pub mod error;
pub mod pushbullet;
pub mod router;
pub mod slash;
pub mod template;
pub mod tmux;
pub mod transform;
pub mod triggers;

pub use error::{Error, Result};

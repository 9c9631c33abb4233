//! mcrelay: bridge between a Minecraft server and a chat channel.
//!
//! Tails the server log, turns lines into typed events, gates them on the
//! server's lifecycle and posts them to a Telegram chat. Messages written in
//! the chat go back into the game over RCON.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;
pub mod shutdown;

pub mod classifier;
pub mod event;
pub mod lifecycle;
pub mod tailer;
pub mod vanish;

pub mod channel;
pub mod rcon;
pub mod relay;

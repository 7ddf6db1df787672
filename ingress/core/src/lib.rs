#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

/// Internal numeric identity of a registered game server.
pub type ServerId = u32;

/// Identity of a server token record.
pub type TokenId = u32;

/// Identity of a player in the downstream player service. Engine-local slot
/// ids are `i32` and may be negative; resolved player ids are positive.
pub type PlayerId = i64;

pub mod actions;
pub mod auth;
pub mod classify;
pub mod config;
pub mod contract;
pub mod event;
pub mod limiter;
pub mod memory;
pub mod net;
pub mod parser;
pub mod pipeline;
pub mod state;
pub mod token;

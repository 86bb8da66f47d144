//! Serve a markdown README over SSH as a scrollable full-screen view.
//!
//! Every connection gets its own [`session::SessionDriver`]: the document is
//! resolved ([`content`]), rendered for the client's width and colour support
//! ([`markdown`]) and scrolled by key presses ([`viewport`]) until the client
//! quits or disconnects.

pub mod config;
pub mod content;
pub mod error;
pub mod handler;
pub mod input;
pub mod logging;
pub mod markdown;
pub mod server;
pub mod session;
pub mod signals;
pub mod style;
pub mod terminal;
pub mod viewport;
pub mod wrap;

//! # telefeed
//!
//! Streaming client runtime for the Telegram Bot API update feed.
//! Docs: <https://core.telegram.org/bots/api>
//!
//! The crate is built around three layers:
//!
//! - [`api`] — an authenticated API client that parses response envelopes as
//!   a token stream and hands `result` payloads to consumers without
//!   materializing them.
//! - [`stream`] — a long-polling driver turning repeated `getUpdates` calls
//!   into a bounded update channel, and a multiplexer fanning that channel
//!   out to dynamically subscribed consumers.
//! - [`model`] — thin typed mirrors of the Bot API payload objects for
//!   callers that want decoded updates instead of raw JSON.

pub mod api;
pub mod logging;
pub mod model;
pub mod retry;
pub mod stream;

mod error;
mod pool;

pub use error::Error;

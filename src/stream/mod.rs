//! Update streaming: the long-poll driver and the update multiplexer.
//!
//! [`LongPollStreamer`] turns repeated `getUpdates` calls into a bounded
//! channel of decoded updates. [`Mux`] fans one such channel out to
//! dynamically subscribed consumers filtering by update type or by slash
//! command.

mod longpoll;
mod mux;


pub use longpoll::{LongPollOptions, LongPollStreamer, DEFAULT_LIMIT, DEFAULT_TIMEOUT};
pub use mux::{Mux, SubKey, SubscriptionOpts};

use crate::api::types::UpdateInfo;
use crate::Error;
use serde_json::value::RawValue;
use std::sync::Arc;

/// Decodes the payload of a single update into the caller's representation.
/// A decoder must fully consume the payload value it is given.
///
/// Implemented for any matching `Fn`, so plain functions and closures work:
/// [`decode_raw`] keeps the raw payload, [`crate::model::decode_update`]
/// produces typed models.
pub trait UpdateDecoder<T> {
    fn decode(&self, info: UpdateInfo, payload: &RawValue) -> Result<T, Error>;
}

impl<T, F> UpdateDecoder<T> for F
where
    F: Fn(UpdateInfo, &RawValue) -> Result<T, Error>,
{
    fn decode(&self, info: UpdateInfo, payload: &RawValue) -> Result<T, Error> {
        self(info, payload)
    }
}

/// An update carrying its raw payload. Cloning shares the payload, which is
/// read-only once published.
#[derive(Debug, Clone)]
pub struct Update {
    pub info: UpdateInfo,
    pub content: Arc<RawValue>,
}

/// Update decoder keeping the payload as shared raw JSON. This is the input
/// representation the [`Mux`] routes on.
pub fn decode_raw(info: UpdateInfo, payload: &RawValue) -> Result<Update, Error> {
    let content = RawValue::from_string(payload.get().to_owned())?;
    Ok(Update {
        info,
        content: Arc::from(content),
    })
}

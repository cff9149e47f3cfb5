//! Bot API client with streaming response parsing.
//!
//! [`Client`] wraps communication with the Telegram Bot API: request
//! serialization, authorization, and envelope validation. The `result` of a
//! response is never buffered into an intermediate value; consumers read it
//! straight out of the decoded token stream.

mod parsing;
pub mod types;


use crate::pool::ScratchBuf;
use crate::Error;
use dashmap::DashMap;
use parsing::{ResultConsumer, TypedConsumer, UpdatesConsumer};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use std::marker::PhantomData;
use std::time::Duration;

pub use parsing::parse_update_type;
pub use types::{GetUpdatesRequest, SendMessageRequest, UpdateInfo, UpdateType};

/// Extra slack on top of the long-poll timeout before the HTTP request
/// itself is considered dead.
const HTTP_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Options for constructing a [`Client`].
#[derive(Default)]
pub struct ClientOpts {
    /// HTTP client to use instead of a freshly constructed one.
    pub http: Option<reqwest::Client>,
}

/// A client for the Telegram Bot API, handling request and response
/// serialization as well as authorization.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    /// Endpoint with the `bot{token}` segment appended.
    endpoint: Url,
    method_urls: DashMap<&'static str, Url>,
}

impl Client {
    /// Creates a client for the given API endpoint and bot token.
    pub fn new(endpoint: &str, token: &str, opts: ClientOpts) -> Result<Client, Error> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|err| Error::Config(format!("invalid api endpoint: {err}")))?;
        endpoint
            .path_segments_mut()
            .map_err(|()| Error::Config("api endpoint cannot be a base url".into()))?
            .pop_if_empty()
            .push(&format!("bot{token}"));

        Ok(Client {
            http: opts.http.unwrap_or_default(),
            endpoint,
            method_urls: DashMap::new(),
        })
    }

    /// Authenticated URL for a method, computed once per method and cached.
    fn method_url(&self, method: &'static str) -> Url {
        self.method_urls
            .entry(method)
            .or_insert_with(|| {
                let mut url = self.endpoint.clone();
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.push(method);
                }
                url
            })
            .clone()
    }

    /// Completes a `getUpdates` request, calling `per_update` once for each
    /// known update in the response with the payload as a raw JSON slice.
    /// Unknown update types are skipped.
    pub async fn get_updates<F>(&self, req: &GetUpdatesRequest, per_update: F) -> Result<(), Error>
    where
        F: FnMut(UpdateInfo, &RawValue) -> Result<(), Error>,
    {
        let timeout = Duration::from_secs(req.timeout.unwrap_or(0)) + HTTP_TIMEOUT_GRACE;
        self.execute("getUpdates", req, Some(timeout), UpdatesConsumer::new(per_update))
            .await
    }

    /// Makes a POST request to the API and decodes the `result` field of the
    /// response into `T`.
    pub async fn call<R, T>(&self, method: &'static str, req: &R) -> Result<T, Error>
    where
        R: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(method, req, None, TypedConsumer(PhantomData))
            .await
    }

    /// Sends a text message to a chat and returns the sent message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<crate::model::Message, Error> {
        self.call("sendMessage", &SendMessageRequest { chat_id, text })
            .await
    }

    async fn execute<R, C, O>(
        &self,
        method: &'static str,
        req: &R,
        timeout: Option<Duration>,
        consumer: C,
    ) -> Result<O, Error>
    where
        R: Serialize + ?Sized,
        C: for<'de> ResultConsumer<'de, Output = O>,
    {
        let mut builder = self.http.post(self.method_url(method)).json(req);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let mut resp = builder.send().await.map_err(strip_url)?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status()));
        }

        // Drain the body into pooled scratch space; the parsers borrow
        // payload slices out of it, so it lives until parsing finishes.
        let mut buf = ScratchBuf::get();
        while let Some(chunk) = resp.chunk().await.map_err(strip_url)? {
            buf.extend_from_slice(&chunk);
        }
        let body = std::str::from_utf8(&buf)
            .map_err(|err| Error::Protocol(format!("response body is not valid utf-8: {err}")))?;

        parsing::read_response(body, consumer)
    }
}

/// Drops the URL from a transport error so the bot token cannot leak into
/// error messages.
fn strip_url(err: reqwest::Error) -> Error {
    Error::Http(err.without_url())
}

//! Typed mirrors of the Bot API payload objects.
//!
//! These are deliberately thin: enough structure for routing and replying,
//! with everything optional that the API marks optional. Callers needing
//! the full objects can run their own [`crate::stream::UpdateDecoder`]
//! against the raw payload instead.

use crate::api::types::{UpdateInfo, UpdateType};
use crate::Error;
use serde::Deserialize;
use serde_json::value::RawValue;

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// Chat type: "private", "group", "supergroup", or "channel".
    #[serde(default, rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: Option<User>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: Option<User>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Option<User>,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShippingQuery {
    pub id: String,
    #[serde(default)]
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    #[serde(default)]
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollOption {
    pub text: String,
    #[serde(default)]
    pub voter_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Poll {
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollAnswer {
    pub poll_id: String,
    #[serde(default)]
    pub option_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatJoinRequest {
    pub chat: Chat,
    pub from: Option<User>,
    pub bio: Option<String>,
}

/// A typed update payload, tagged the way it arrived on the wire.
#[derive(Debug, Clone)]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    EditedChannelPost(Message),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
    CallbackQuery(CallbackQuery),
    ShippingQuery(ShippingQuery),
    PreCheckoutQuery(PreCheckoutQuery),
    Poll(Poll),
    PollAnswer(PollAnswer),
    MyChatMember(ChatMemberUpdated),
    ChatMember(ChatMemberUpdated),
    ChatJoinRequest(ChatJoinRequest),
}

/// A fully decoded update.
#[derive(Debug, Clone)]
pub struct TypedUpdate {
    pub id: i64,
    pub kind: UpdateKind,
}

/// Update decoder producing [`TypedUpdate`]s, selecting the payload model
/// by the update's tag.
pub fn decode_update(info: UpdateInfo, payload: &RawValue) -> Result<TypedUpdate, Error> {
    fn parse<'de, T: Deserialize<'de>>(payload: &'de RawValue) -> Result<T, Error> {
        Ok(serde_json::from_str(payload.get())?)
    }

    let kind = match info.kind {
        UpdateType::Message => UpdateKind::Message(parse(payload)?),
        UpdateType::EditedMessage => UpdateKind::EditedMessage(parse(payload)?),
        UpdateType::ChannelPost => UpdateKind::ChannelPost(parse(payload)?),
        UpdateType::EditedChannelPost => UpdateKind::EditedChannelPost(parse(payload)?),
        UpdateType::InlineQuery => UpdateKind::InlineQuery(parse(payload)?),
        UpdateType::ChosenInlineResult => UpdateKind::ChosenInlineResult(parse(payload)?),
        UpdateType::CallbackQuery => UpdateKind::CallbackQuery(parse(payload)?),
        UpdateType::ShippingQuery => UpdateKind::ShippingQuery(parse(payload)?),
        UpdateType::PreCheckoutQuery => UpdateKind::PreCheckoutQuery(parse(payload)?),
        UpdateType::Poll => UpdateKind::Poll(parse(payload)?),
        UpdateType::PollAnswer => UpdateKind::PollAnswer(parse(payload)?),
        UpdateType::MyChatMember => UpdateKind::MyChatMember(parse(payload)?),
        UpdateType::ChatMember => UpdateKind::ChatMember(parse(payload)?),
        UpdateType::ChatJoinRequest => UpdateKind::ChatJoinRequest(parse(payload)?),
    };
    Ok(TypedUpdate { id: info.id, kind })
}

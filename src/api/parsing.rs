//! Streaming parsers for Bot API response envelopes.
//!
//! Responses arrive wrapped in `{ok, description, error_code, result}`. The
//! parsers here scan that envelope as a token stream and hand the `result`
//! value to a consumer without ever materializing it: update payloads reach
//! the consumer as raw JSON slices borrowed straight from the body buffer.
//!
//! Rich failures discovered mid-stream (a non-ok envelope, a shape
//! violation, a consumer error) are deferred through a fail cell so that
//! [`read_response`] can surface them typed instead of as decoder messages.

use crate::api::types::{UpdateInfo, UpdateType};
use crate::Error;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

pub(crate) type FailCell = Cell<Option<Error>>;

/// Stashes `err` in the fail cell and produces a placeholder decoder error
/// to abort the deserialization. The placeholder is replaced by the stashed
/// error at the top of [`read_response`].
fn defer<E: de::Error>(fail: &FailCell, err: Error) -> E {
    fail.set(Some(err));
    E::custom("deferred")
}

/// A consumer invoked with the deserializer positioned at the `result`
/// value of a response envelope. The consumer must fully read the value.
pub(crate) trait ResultConsumer<'de> {
    type Output;

    fn consume<D>(self, de: D, fail: &FailCell) -> Result<Self::Output, D::Error>
    where
        D: Deserializer<'de>;
}

/// Reads a single API response envelope from `body` and calls the consumer
/// once the response metadata has been read and validated.
pub(crate) fn read_response<'de, C>(body: &'de str, consumer: C) -> Result<C::Output, Error>
where
    C: ResultConsumer<'de>,
{
    let fail = FailCell::new(None);
    let mut de = serde_json::Deserializer::from_str(body);
    let seed = EnvelopeSeed {
        consumer,
        fail: &fail,
    };
    match seed.deserialize(&mut de) {
        Ok(output) => Ok(output),
        Err(err) => Err(fail.take().unwrap_or(Error::Json(err))),
    }
}

/// Envelope fields, classified by first byte after a minimum-length filter.
/// The wire names are long enough that two characters never collide.
enum EnvelopeField {
    Ok,
    Description,
    ErrorCode,
    Result,
    Skip,
}

impl<'de> Deserialize<'de> for EnvelopeField {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = EnvelopeField;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an api response field key")
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<EnvelopeField, E> {
                if s.len() < "ok".len() {
                    return Ok(EnvelopeField::Skip);
                }
                Ok(match s.as_bytes()[0] {
                    b'o' => EnvelopeField::Ok,
                    b'd' => EnvelopeField::Description,
                    b'e' => EnvelopeField::ErrorCode,
                    b'r' => EnvelopeField::Result,
                    _ => EnvelopeField::Skip,
                })
            }
        }

        de.deserialize_str(KeyVisitor)
    }
}

struct EnvelopeSeed<'f, C> {
    consumer: C,
    fail: &'f FailCell,
}

impl<'de, C> DeserializeSeed<'de> for EnvelopeSeed<'_, C>
where
    C: ResultConsumer<'de>,
{
    type Value = C::Output;

    fn deserialize<D: Deserializer<'de>>(self, de: D) -> Result<C::Output, D::Error> {
        de.deserialize_map(EnvelopeVisitor {
            consumer: self.consumer,
            fail: self.fail,
        })
    }
}

struct EnvelopeVisitor<'f, C> {
    consumer: C,
    fail: &'f FailCell,
}

impl<'de, C> Visitor<'de> for EnvelopeVisitor<'_, C>
where
    C: ResultConsumer<'de>,
{
    type Value = C::Output;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an api response object")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<C::Output, M::Error> {
        // "ok" defaults to true in case we encounter "result" first: a
        // well-formed response carrying a result is a success.
        let mut ok = true;
        let mut description = String::new();
        let mut error_code = 0i64;

        while let Some(field) = map.next_key::<EnvelopeField>()? {
            match field {
                EnvelopeField::Ok => ok = map.next_value()?,
                EnvelopeField::Description => description = map.next_value()?,
                EnvelopeField::ErrorCode => error_code = map.next_value()?,
                EnvelopeField::Result => {
                    if !ok {
                        return Err(defer(
                            self.fail,
                            Error::Api {
                                description,
                                code: error_code,
                            },
                        ));
                    }
                    let output = map.next_value_seed(ConsumerSeed {
                        consumer: self.consumer,
                        fail: self.fail,
                    })?;
                    // Envelope fields after the result carry nothing we need.
                    while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                    return Ok(output);
                }
                EnvelopeField::Skip => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        if !ok {
            return Err(defer(
                self.fail,
                Error::Api {
                    description,
                    code: error_code,
                },
            ));
        }
        Err(defer(
            self.fail,
            Error::Protocol("api response has no result".into()),
        ))
    }
}

struct ConsumerSeed<'f, C> {
    consumer: C,
    fail: &'f FailCell,
}

impl<'de, C> DeserializeSeed<'de> for ConsumerSeed<'_, C>
where
    C: ResultConsumer<'de>,
{
    type Value = C::Output;

    fn deserialize<D: Deserializer<'de>>(self, de: D) -> Result<C::Output, D::Error> {
        self.consumer.consume(de, self.fail)
    }
}

/// Consumer decoding the whole `result` value into `T`.
pub(crate) struct TypedConsumer<T>(pub(crate) PhantomData<T>);

impl<'de, T> ResultConsumer<'de> for TypedConsumer<T>
where
    T: Deserialize<'de>,
{
    type Output = T;

    fn consume<D: Deserializer<'de>>(self, de: D, _fail: &FailCell) -> Result<T, D::Error> {
        T::deserialize(de)
    }
}

/// Parses an update type key by looking at the minimum amount of characters
/// required to tell the known types apart: the first byte and the length.
/// Anything outside the known table is rejected.
pub fn parse_update_type(s: &str) -> Option<UpdateType> {
    if s.len() < "poll".len() {
        return None;
    }
    match (s.as_bytes()[0], s.len()) {
        (b'm', 7) => Some(UpdateType::Message),             // message
        (b'm', 14) => Some(UpdateType::MyChatMember),       // my_chat_member
        (b'e', 14) => Some(UpdateType::EditedMessage),      // edited_message
        (b'e', 19) => Some(UpdateType::EditedChannelPost),  // edited_channel_post
        (b'c', 12) => Some(UpdateType::ChannelPost),        // channel_post
        (b'c', 20) => Some(UpdateType::ChosenInlineResult), // chosen_inline_result
        (b'c', 14) => Some(UpdateType::CallbackQuery),      // callback_query
        (b'c', 11) => Some(UpdateType::ChatMember),         // chat_member
        (b'c', 17) => Some(UpdateType::ChatJoinRequest),    // chat_join_request
        (b'i', 12) => Some(UpdateType::InlineQuery),        // inline_query
        (b's', 14) => Some(UpdateType::ShippingQuery),      // shipping_query
        (b'p', 18) => Some(UpdateType::PreCheckoutQuery),   // pre_checkout_query
        (b'p', 4) => Some(UpdateType::Poll),                // poll
        (b'p', 11) => Some(UpdateType::PollAnswer),         // poll_answer
        _ => None,
    }
}

/// Consumer walking a `getUpdates` result array and calling `per_update`
/// once per known update, with the payload as a raw JSON slice.
pub(crate) struct UpdatesConsumer<F> {
    per_update: F,
}

impl<F> UpdatesConsumer<F> {
    pub(crate) fn new(per_update: F) -> UpdatesConsumer<F> {
        UpdatesConsumer { per_update }
    }
}

impl<'de, F> ResultConsumer<'de> for UpdatesConsumer<F>
where
    F: FnMut(UpdateInfo, &'de RawValue) -> Result<(), Error>,
{
    type Output = ();

    fn consume<D: Deserializer<'de>>(mut self, de: D, fail: &FailCell) -> Result<(), D::Error> {
        de.deserialize_seq(UpdatesVisitor {
            per_update: &mut self.per_update,
            fail,
        })
    }
}

struct UpdatesVisitor<'f, 'p, F> {
    per_update: &'p mut F,
    fail: &'f FailCell,
}

impl<'de, F> Visitor<'de> for UpdatesVisitor<'_, '_, F>
where
    F: FnMut(UpdateInfo, &'de RawValue) -> Result<(), Error>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of updates")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while seq
            .next_element_seed(UpdateSeed {
                per_update: &mut *self.per_update,
                fail: self.fail,
            })?
            .is_some()
        {}
        Ok(())
    }
}

/// True iff the key was exactly `update_id`.
struct FirstKey(bool);

impl<'de> Deserialize<'de> for FirstKey {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = FirstKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an update field key")
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<FirstKey, E> {
                Ok(FirstKey(s == "update_id"))
            }
        }

        de.deserialize_str(KeyVisitor)
    }
}

/// The update type carried by a payload key, if the key is known.
struct TypeKey(Option<UpdateType>);

impl<'de> Deserialize<'de> for TypeKey {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = TypeKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an update type key")
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<TypeKey, E> {
                Ok(TypeKey(parse_update_type(s)))
            }
        }

        de.deserialize_str(KeyVisitor)
    }
}

struct UpdateSeed<'f, 'p, F> {
    per_update: &'p mut F,
    fail: &'f FailCell,
}

impl<'de, F> DeserializeSeed<'de> for UpdateSeed<'_, '_, F>
where
    F: FnMut(UpdateInfo, &'de RawValue) -> Result<(), Error>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, de: D) -> Result<(), D::Error> {
        de.deserialize_map(self)
    }
}

impl<'de, F> Visitor<'de> for UpdateSeed<'_, '_, F>
where
    F: FnMut(UpdateInfo, &'de RawValue) -> Result<(), Error>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an update object")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<(), M::Error> {
        // Routing decisions rely on the update id being the first field.
        match map.next_key::<FirstKey>()? {
            Some(FirstKey(true)) => {}
            _ => {
                return Err(defer(
                    self.fail,
                    Error::Protocol("expected update_id to be the first field".into()),
                ))
            }
        }
        let id = match map.next_value::<i64>() {
            Ok(id) => id,
            Err(err) => {
                return Err(defer(
                    self.fail,
                    Error::Protocol(format!("invalid value specified as update_id: {err}")),
                ))
            }
        };

        // The only field left should be the payload, keyed by its type.
        let kind = match map.next_key::<TypeKey>()? {
            Some(TypeKey(kind)) => kind,
            None => {
                return Err(defer(
                    self.fail,
                    Error::Protocol("update without contents".into()),
                ))
            }
        };
        match kind {
            Some(kind) => {
                let payload: &'de RawValue = map.next_value()?;
                if let Err(err) = (self.per_update)(UpdateInfo { id, kind }, payload) {
                    return Err(defer(self.fail, err));
                }
            }
            None => {
                // Unknown update types are skipped, not failed on.
                map.next_value::<IgnoredAny>()?;
            }
        }

        if map.next_key::<IgnoredAny>()?.is_some() {
            return Err(defer(
                self.fail,
                Error::Protocol("excess field after update payload".into()),
            ));
        }
        Ok(())
    }
}

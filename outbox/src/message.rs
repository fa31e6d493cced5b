use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;

pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// Metadata keys set by [`Message::from_event`].
pub mod keys {
    pub const NAME: &str = "name";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const PUBLISHED_AT: &str = "published_at";
    pub const CORRELATION_ID: &str = "correlation_id";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected event {expected}, message carries {found}")]
    UnexpectedEvent {
        expected: &'static str,
        found: String,
    },
    #[error("malformed protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// A unit of delivery: an opaque payload addressed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub uuid: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            metadata: Metadata::default(),
        }
    }

    /// Marshals `event` onto its topic, tagged with its type name.
    pub fn from_event<E: Event>(event: &E, correlation_id: &str) -> Self {
        let mut message = Self::new(E::TOPIC, event.encode_to_vec());
        message.metadata.set(keys::NAME, E::NAME);
        message
            .metadata
            .set(keys::CONTENT_TYPE, CONTENT_TYPE_PROTOBUF);
        message
            .metadata
            .set(keys::PUBLISHED_AT, Utc::now().to_rfc3339());
        if !correlation_id.is_empty() {
            message.metadata.set(keys::CORRELATION_ID, correlation_id);
        }
        message
    }

    /// Unmarshals the payload as `E`.
    ///
    /// Messages without a `name` entry are accepted as long as the payload
    /// parses; a `name` naming another event type is rejected.
    pub fn decode<E: Event>(&self) -> Result<E, DecodeError> {
        if let Some(found) = self.metadata.get(keys::NAME) {
            if found != E::NAME {
                return Err(DecodeError::UnexpectedEvent {
                    expected: E::NAME,
                    found: found.to_owned(),
                });
            }
        }
        Ok(E::decode(self.payload.as_slice())?)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.metadata.get(keys::NAME)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(keys::CORRELATION_ID)
    }
}

#[cfg(test)]
mod tests {
    use proto::event::{UserCreatedEvent, UserDeletedEvent};
    use proto::user::User;

    use super::*;
    use crate::topics;

    fn created_event() -> UserCreatedEvent {
        UserCreatedEvent {
            event_id: "evt-1".to_string(),
            user: Some(User {
                id: "u-1".to_string(),
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                created_at: 1,
                updated_at: 1,
            }),
            event_time: 1,
            correlation_id: "corr-1".to_string(),
            data: None,
        }
    }

    #[test]
    fn from_event_sets_topic_and_metadata() {
        let message = Message::from_event(&created_event(), "corr-1");

        assert_eq!(message.topic, topics::USER_CREATED);
        assert_eq!(message.event_name(), Some("UserCreatedEvent"));
        assert_eq!(
            message.metadata.get(keys::CONTENT_TYPE),
            Some(CONTENT_TYPE_PROTOBUF)
        );
        assert_eq!(message.correlation_id(), Some("corr-1"));
        assert!(message.metadata.get(keys::PUBLISHED_AT).is_some());
    }

    #[test]
    fn empty_correlation_id_is_not_recorded() {
        let message = Message::from_event(&created_event(), "");
        assert_eq!(message.correlation_id(), None);
    }

    #[test]
    fn decode_rejects_other_event_type() {
        let message = Message::from_event(&created_event(), "corr-1");

        let err = message.decode::<UserDeletedEvent>().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnexpectedEvent {
                expected: "UserDeletedEvent",
                ..
            }
        ));
    }

    #[test]
    fn decode_rejects_garbage_payload() {
        let message = Message::new(topics::USER_CREATED, vec![0xff, 0xff, 0xff]);
        assert!(matches!(
            message.decode::<UserCreatedEvent>(),
            Err(DecodeError::Protobuf(_))
        ));
    }

    #[test]
    fn decode_returns_original_event() {
        let event = created_event();
        let message = Message::from_event(&event, "corr-1");
        assert_eq!(message.decode::<UserCreatedEvent>().unwrap(), event);
    }
}

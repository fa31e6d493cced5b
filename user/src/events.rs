use std::collections::HashMap;

use chrono::Utc;
use outbox::Message;
use proto::event::{
    UserCreatedEvent, UserCreatedEventData, UserDeletedEvent, UserDeletedEventData,
    UserUpdatedEvent, UserUpdatedEventData,
};
use uuid::Uuid;

use crate::domain::User;

const SOURCE: &str = "user-service";
const DELETE_REASON: &str = "manual_deletion";

fn metadata(operation: &str) -> HashMap<String, String> {
    HashMap::from([
        ("operation".to_string(), operation.to_string()),
        ("version".to_string(), "v1".to_string()),
    ])
}

pub fn created(user: &User, correlation_id: &str) -> Message {
    let event = UserCreatedEvent {
        event_id: Uuid::new_v4().to_string(),
        user: Some(user.to_proto()),
        event_time: Utc::now().timestamp(),
        correlation_id: correlation_id.to_string(),
        data: Some(UserCreatedEventData {
            source: SOURCE.to_string(),
            metadata: metadata("create_user"),
        }),
    };
    Message::from_event(&event, correlation_id)
}

pub fn updated(user: &User, previous: &User, changed_fields: Vec<String>, correlation_id: &str) -> Message {
    let event = UserUpdatedEvent {
        event_id: Uuid::new_v4().to_string(),
        user: Some(user.to_proto()),
        event_time: Utc::now().timestamp(),
        correlation_id: correlation_id.to_string(),
        data: Some(UserUpdatedEventData {
            source: SOURCE.to_string(),
            changed_fields,
            previous_user: Some(previous.to_proto()),
            metadata: metadata("update_user"),
        }),
    };
    Message::from_event(&event, correlation_id)
}

pub fn deleted(user: &User, correlation_id: &str) -> Message {
    let event = UserDeletedEvent {
        event_id: Uuid::new_v4().to_string(),
        user: Some(user.to_proto()),
        event_time: Utc::now().timestamp(),
        correlation_id: correlation_id.to_string(),
        data: Some(UserDeletedEventData {
            source: SOURCE.to_string(),
            reason: DELETE_REASON.to_string(),
            metadata: metadata("delete_user"),
        }),
    };
    Message::from_event(&event, correlation_id)
}

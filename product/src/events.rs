use std::collections::HashMap;

use chrono::Utc;
use outbox::Message;
use proto::event::{
    ProductCreatedEvent, ProductCreatedEventData, ProductDeletedEvent, ProductDeletedEventData,
    ProductPriceChangedEvent, ProductPriceChangedEventData, ProductUpdatedEvent,
    ProductUpdatedEventData,
};
use uuid::Uuid;

use crate::domain::{Change, Product};

const SOURCE: &str = "product-service";
const DELETE_REASON: &str = "manual_deletion";

fn metadata(operation: &str) -> HashMap<String, String> {
    HashMap::from([
        ("operation".to_string(), operation.to_string()),
        ("version".to_string(), "v1".to_string()),
    ])
}

pub fn created(product: &Product, correlation_id: &str) -> Message {
    let event = ProductCreatedEvent {
        event_id: Uuid::new_v4().to_string(),
        product: Some(product.to_proto()),
        event_time: Utc::now().timestamp(),
        correlation_id: correlation_id.to_string(),
        data: Some(ProductCreatedEventData {
            source: SOURCE.to_string(),
            metadata: metadata("create_product"),
        }),
    };
    Message::from_event(&event, correlation_id)
}

/// The updated event, followed by a price changed event when the price
/// moved.
pub fn updated(change: &Change, previous: &Product, correlation_id: &str) -> Vec<Message> {
    let product = change.product.to_proto();
    let event = ProductUpdatedEvent {
        event_id: Uuid::new_v4().to_string(),
        product: Some(product.clone()),
        event_time: Utc::now().timestamp(),
        correlation_id: correlation_id.to_string(),
        data: Some(ProductUpdatedEventData {
            source: SOURCE.to_string(),
            changed_fields: change.changed_fields.clone(),
            previous_product: Some(previous.to_proto()),
            metadata: metadata("update_product"),
        }),
    };
    let mut messages = vec![Message::from_event(&event, correlation_id)];

    if change.price_changed {
        let event = ProductPriceChangedEvent {
            event_id: Uuid::new_v4().to_string(),
            product: Some(product),
            event_time: Utc::now().timestamp(),
            correlation_id: correlation_id.to_string(),
            data: Some(ProductPriceChangedEventData {
                source: SOURCE.to_string(),
                previous_price: previous.price.to_string(),
                new_price: change.product.price.to_string(),
                metadata: metadata("price_change"),
            }),
        };
        messages.push(Message::from_event(&event, correlation_id));
    }
    messages
}

pub fn deleted(product: &Product, correlation_id: &str) -> Message {
    let event = ProductDeletedEvent {
        event_id: Uuid::new_v4().to_string(),
        product: Some(product.to_proto()),
        event_time: Utc::now().timestamp(),
        correlation_id: correlation_id.to_string(),
        data: Some(ProductDeletedEventData {
            source: SOURCE.to_string(),
            reason: DELETE_REASON.to_string(),
            metadata: metadata("delete_product"),
        }),
    };
    Message::from_event(&event, correlation_id)
}

use std::sync::Arc;

use async_trait::async_trait;
use outbox::{EventHandler, HandlerError, Message, Router, RouterError};
use proto::event::{
    ProductCreatedEvent, ProductDeletedEvent, ProductPriceChangedEvent, ProductUpdatedEvent,
    UserCreatedEvent, UserDeletedEvent, UserUpdatedEvent,
};
use tracing::info;

/// Registers every catalog handler. Each name doubles as the handler's
/// consumer group suffix, so renaming one replays its topic from the start.
pub fn register(router: &mut Router) -> Result<(), RouterError> {
    let users = Arc::new(UserEventsHandler);
    router
        .add_handler::<UserCreatedEvent, _>("handle_user_created", users.clone())?
        .add_handler::<UserUpdatedEvent, _>("handle_user_updated", users.clone())?
        .add_handler::<UserDeletedEvent, _>("handle_user_deleted", users)?;

    let products = Arc::new(ProductEventsHandler);
    router
        .add_handler::<ProductCreatedEvent, _>("handle_product_created", products.clone())?
        .add_handler::<ProductUpdatedEvent, _>("handle_product_updated", products.clone())?
        .add_handler::<ProductDeletedEvent, _>("handle_product_deleted", products.clone())?
        .add_handler::<ProductPriceChangedEvent, _>("handle_product_price_changed", products)?;
    Ok(())
}

fn missing(what: &str) -> HandlerError {
    HandlerError::rejected(format!("event carries no {what}"))
}

/// Logs user lifecycle events. Stateless, so redelivery is harmless.
pub struct UserEventsHandler;

#[async_trait]
impl EventHandler<UserCreatedEvent> for UserEventsHandler {
    async fn handle(&self, event: UserCreatedEvent, _message: &Message) -> Result<(), HandlerError> {
        let user = event.user.ok_or_else(|| missing("user"))?;
        let data = event.data.unwrap_or_default();
        info!(
            user_id = %user.id,
            name = %user.name,
            email = %user.email,
            event_id = %event.event_id,
            source = %data.source,
            correlation_id = %event.correlation_id,
            "User created"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<UserUpdatedEvent> for UserEventsHandler {
    async fn handle(&self, event: UserUpdatedEvent, _message: &Message) -> Result<(), HandlerError> {
        let user = event.user.ok_or_else(|| missing("user"))?;
        let data = event.data.unwrap_or_default();
        info!(
            user_id = %user.id,
            name = %user.name,
            email = %user.email,
            changed_fields = ?data.changed_fields,
            event_id = %event.event_id,
            source = %data.source,
            correlation_id = %event.correlation_id,
            "User updated"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<UserDeletedEvent> for UserEventsHandler {
    async fn handle(&self, event: UserDeletedEvent, _message: &Message) -> Result<(), HandlerError> {
        let user = event.user.ok_or_else(|| missing("user"))?;
        let data = event.data.unwrap_or_default();
        info!(
            user_id = %user.id,
            email = %user.email,
            reason = %data.reason,
            event_id = %event.event_id,
            source = %data.source,
            correlation_id = %event.correlation_id,
            "User deleted"
        );
        Ok(())
    }
}

/// Logs product lifecycle and pricing events.
pub struct ProductEventsHandler;

#[async_trait]
impl EventHandler<ProductCreatedEvent> for ProductEventsHandler {
    async fn handle(&self, event: ProductCreatedEvent, _message: &Message) -> Result<(), HandlerError> {
        let product = event.product.ok_or_else(|| missing("product"))?;
        let data = event.data.unwrap_or_default();
        info!(
            product_id = %product.id,
            name = %product.name,
            price = %product.price,
            event_id = %event.event_id,
            source = %data.source,
            correlation_id = %event.correlation_id,
            "Product created"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<ProductUpdatedEvent> for ProductEventsHandler {
    async fn handle(&self, event: ProductUpdatedEvent, _message: &Message) -> Result<(), HandlerError> {
        let product = event.product.ok_or_else(|| missing("product"))?;
        let data = event.data.unwrap_or_default();
        info!(
            product_id = %product.id,
            name = %product.name,
            price = %product.price,
            changed_fields = ?data.changed_fields,
            event_id = %event.event_id,
            source = %data.source,
            correlation_id = %event.correlation_id,
            "Product updated"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<ProductDeletedEvent> for ProductEventsHandler {
    async fn handle(&self, event: ProductDeletedEvent, _message: &Message) -> Result<(), HandlerError> {
        let product = event.product.ok_or_else(|| missing("product"))?;
        let data = event.data.unwrap_or_default();
        info!(
            product_id = %product.id,
            name = %product.name,
            reason = %data.reason,
            event_id = %event.event_id,
            source = %data.source,
            correlation_id = %event.correlation_id,
            "Product deleted"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<ProductPriceChangedEvent> for ProductEventsHandler {
    async fn handle(
        &self,
        event: ProductPriceChangedEvent,
        _message: &Message,
    ) -> Result<(), HandlerError> {
        let product = event.product.ok_or_else(|| missing("product"))?;
        let data = event.data.ok_or_else(|| missing("price change"))?;
        info!(
            product_id = %product.id,
            name = %product.name,
            previous_price = %data.previous_price,
            new_price = %data.new_price,
            event_id = %event.event_id,
            source = %data.source,
            correlation_id = %event.correlation_id,
            "Product price changed"
        );
        Ok(())
    }
}
